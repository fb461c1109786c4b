//! Reconnect trigger and the desktop connection loop
//!
//! Exactly one attempt runs at a time. Raising the trigger while an attempt is
//! running queues at most one follow-up attempt; raising it repeatedly while
//! idle starts exactly one.

use crate::config::{RuntimeConfig, Settings};
use crate::dispatcher::DispatcherHandle;
use crate::error::Result;
use crate::negotiator::{NegotiationOutcome, Negotiator, OfferFilter, PollSchedule};
use crate::peer::state::StatusSignal;
use crate::peer::types::{ConnectionStatus, PeerConnector};
use crate::session::SessionRegistry;
use crate::signaling::Mailbox;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use tokio::sync::Notify;
use tracing::{info, warn};

/// Settings shared between the console and the controller
pub type SharedSettings = Arc<RwLock<Settings>>;

/// Coalescing "connect again" signal
#[derive(Clone, Default)]
pub struct ReconnectTrigger {
    notify: Arc<Notify>,
}

impl ReconnectTrigger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raise(&self) {
        self.notify.notify_one();
    }

    pub async fn wait(&self) {
        self.notify.notified().await;
    }
}

/// How one attempt ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    /// No pairing code configured, nothing to search for
    Unpaired,
    Timeout,
    Ended(ConnectionStatus),
}

pub struct SessionController {
    settings: SharedSettings,
    runtime: RuntimeConfig,
    mailbox: Arc<dyn Mailbox>,
    connector: Arc<dyn PeerConnector>,
    keys: DispatcherHandle,
    status: StatusSignal,
    registry: Arc<SessionRegistry>,
    trigger: ReconnectTrigger,
    attempts: AtomicUsize,
}

impl SessionController {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        settings: SharedSettings,
        runtime: RuntimeConfig,
        mailbox: Arc<dyn Mailbox>,
        connector: Arc<dyn PeerConnector>,
        keys: DispatcherHandle,
        status: StatusSignal,
        registry: Arc<SessionRegistry>,
        trigger: ReconnectTrigger,
    ) -> Self {
        Self {
            settings,
            runtime,
            mailbox,
            connector,
            keys,
            status,
            registry,
            trigger,
            attempts: AtomicUsize::new(0),
        }
    }

    pub fn trigger(&self) -> &ReconnectTrigger {
        &self.trigger
    }

    pub fn attempts_started(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Serve reconnect requests forever
    pub async fn run(&self) {
        loop {
            self.trigger.wait().await;
            self.run_attempt().await;
        }
    }

    /// One attempt; failures are logged, never propagated
    pub async fn run_attempt(&self) -> Option<AttemptOutcome> {
        let n = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        info!(attempt = n, "connection attempt started");
        match self.attempt().await {
            Ok(outcome) => {
                info!(attempt = n, ?outcome, "connection attempt finished");
                Some(outcome)
            }
            Err(e) => {
                warn!(attempt = n, error = %e, "connection attempt failed");
                None
            }
        }
    }

    async fn attempt(&self) -> Result<AttemptOutcome> {
        let settings = self
            .settings
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .clone();
        let Some(identity) = settings.local_identity() else {
            warn!("no pairing code set; use `set code <code>` then `save`");
            return Ok(AttemptOutcome::Unpaired);
        };
        let filter = match settings.mobile_identity() {
            Some(mobile) if self.runtime.paired_only => OfferFilter::From(mobile),
            _ => OfferFilter::Any,
        };

        let negotiator = Negotiator::new(self.mailbox.clone(), self.connector.clone(), identity)
            .with_filter(filter)
            .with_schedule(PollSchedule {
                interval: self.runtime.poll_interval,
                deadline: self.runtime.search_timeout,
            });

        match negotiator.negotiate(&self.status, settings.mapper()).await? {
            NegotiationOutcome::Timeout => Ok(AttemptOutcome::Timeout),
            NegotiationOutcome::Established(session) => {
                let end = session
                    .run(self.keys.clone(), self.registry.clone())
                    .await?;
                Ok(AttemptOutcome::Ended(end))
            }
        }
    }
}
