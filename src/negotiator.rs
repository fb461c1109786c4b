//! Offer search and answer publication
//!
//! Polls the mailbox on a fixed interval until an acceptable offer shows up
//! or the search deadline passes. On an offer it opens a peer link, answers
//! with a complete (non-trickle) description and hands back a `Session`.

use crate::config::{POLL_INTERVAL, SEARCH_TIMEOUT};
use crate::error::Result;
use crate::mapper::KeyMapper;
use crate::peer::state::StatusSignal;
use crate::peer::types::{ConnectionStatus, PeerConnector, PeerLink};
use crate::session::{Session, EVENT_QUEUE};
use crate::signaling::{Mailbox, PeerIdentity, SignalMessage, SignalType};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PollSchedule {
    pub interval: Duration,
    /// Total search time before giving up
    pub deadline: Duration,
}

impl Default for PollSchedule {
    fn default() -> Self {
        Self {
            interval: POLL_INTERVAL,
            deadline: SEARCH_TIMEOUT,
        }
    }
}

/// Which offers the desktop agrees to answer
#[derive(Debug, Clone, PartialEq)]
pub enum OfferFilter {
    Any,
    From(PeerIdentity),
}

impl OfferFilter {
    fn accepts(&self, message: &SignalMessage) -> bool {
        if message.kind != SignalType::Offer {
            return false;
        }
        match self {
            OfferFilter::Any => true,
            OfferFilter::From(peer) => &message.from == peer,
        }
    }
}

/// An offer plus the candidates its sender queued behind it in the same batch
#[derive(Debug, Clone)]
pub struct FoundOffer {
    pub from: PeerIdentity,
    pub sdp: String,
    pub candidates: Vec<serde_json::Value>,
}

pub enum NegotiationOutcome {
    Established(Session),
    Timeout,
}

pub struct Negotiator {
    mailbox: Arc<dyn Mailbox>,
    connector: Arc<dyn PeerConnector>,
    identity: PeerIdentity,
    filter: OfferFilter,
    schedule: PollSchedule,
}

impl Negotiator {
    pub fn new(
        mailbox: Arc<dyn Mailbox>,
        connector: Arc<dyn PeerConnector>,
        identity: PeerIdentity,
    ) -> Self {
        Self {
            mailbox,
            connector,
            identity,
            filter: OfferFilter::Any,
            schedule: PollSchedule::default(),
        }
    }

    pub fn with_filter(mut self, filter: OfferFilter) -> Self {
        self.filter = filter;
        self
    }

    pub fn with_schedule(mut self, schedule: PollSchedule) -> Self {
        self.schedule = schedule;
        self
    }

    /// Poll until an acceptable offer arrives. `None` once the deadline passes,
    /// even if a poll is still in flight at that moment.
    ///
    /// Everything else polled along the way is discarded; the relay has
    /// already forgotten it.
    pub async fn find_offer(&self) -> Result<Option<FoundOffer>> {
        let deadline = Instant::now() + self.schedule.deadline;
        match tokio::time::timeout_at(deadline, self.poll_until(deadline)).await {
            Ok(found) => found,
            Err(_) => {
                debug!("search deadline passed during a poll");
                Ok(None)
            }
        }
    }

    async fn poll_until(&self, deadline: Instant) -> Result<Option<FoundOffer>> {
        loop {
            let batch = self.mailbox.poll(&self.identity).await?;
            if let Some(found) = self.pick_offer(batch) {
                return Ok(Some(found));
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(self.schedule.interval.min(deadline - now)).await;
        }
    }

    fn pick_offer(&self, batch: Vec<SignalMessage>) -> Option<FoundOffer> {
        let mut messages = batch.into_iter();
        let mut skipped = 0usize;
        let found = loop {
            let message = messages.next()?;
            if !self.filter.accepts(&message) {
                skipped += 1;
                continue;
            }
            match message.sdp {
                Some(sdp) => break FoundOffer {
                    from: message.from,
                    sdp,
                    candidates: Vec::new(),
                },
                None => {
                    warn!(from = %message.from, "offer without sdp");
                    skipped += 1;
                }
            }
        };
        if skipped > 0 {
            debug!(skipped, "dropped signals ahead of the offer");
        }
        let candidates = messages
            .filter(|m| m.kind == SignalType::Candidate && m.from == found.from)
            .filter_map(|m| m.candidate)
            .collect();
        Some(FoundOffer { candidates, ..found })
    }

    /// Run one search. Publishes `searching`, then either `timeout` or hands
    /// lifecycle reporting to the new session.
    pub async fn negotiate(
        &self,
        status: &StatusSignal,
        mapper: KeyMapper,
    ) -> Result<NegotiationOutcome> {
        status.set(ConnectionStatus::Searching);
        info!(identity = %self.identity, "searching for an offer");

        let Some(offer) = self.find_offer().await? else {
            status.set(ConnectionStatus::Timeout);
            info!(after = ?self.schedule.deadline, "no offer arrived");
            return Ok(NegotiationOutcome::Timeout);
        };
        info!(from = %offer.from, "offer received");

        let (tx, rx) = mpsc::channel(EVENT_QUEUE);
        let link = self.connector.connect(tx).await?;
        if let Err(e) = self.answer(link.as_ref(), &offer).await {
            if let Err(close_err) = link.close().await {
                warn!(error = %close_err, "closing abandoned peer failed");
            }
            return Err(e);
        }

        Ok(NegotiationOutcome::Established(Session::new(
            offer.from,
            link,
            rx,
            mapper,
            status.clone(),
        )))
    }

    async fn answer(&self, link: &dyn PeerLink, offer: &FoundOffer) -> Result<()> {
        link.apply_offer(offer.sdp.clone()).await?;
        for candidate in &offer.candidates {
            if let Err(e) = link.add_remote_candidate(candidate).await {
                warn!(error = %e, "skipping remote candidate");
            }
        }
        let sdp = link.create_answer().await?;
        self.mailbox
            .send(&SignalMessage::answer(
                self.identity.clone(),
                offer.from.clone(),
                sdp,
            ))
            .await?;
        info!(to = %offer.from, "answer published");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use crate::error::Error;
    use crate::relay::MailboxStore;
    use crate::testing::{FakeConnector, FAKE_ANSWER};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const DESKTOP: &str = "pc-4711";
    const MOBILE: &str = "mobile-4711";

    fn offer_from(from: &str, sdp: Option<&str>) -> SignalMessage {
        SignalMessage {
            from: from.into(),
            to: DESKTOP.into(),
            kind: SignalType::Offer,
            timestamp: None,
            sdp: sdp.map(str::to_string),
            candidate: None,
        }
    }

    fn candidate_from(from: &str, line: &str) -> SignalMessage {
        SignalMessage {
            from: from.into(),
            to: DESKTOP.into(),
            kind: SignalType::Candidate,
            timestamp: None,
            sdp: None,
            candidate: Some(serde_json::json!({ "candidate": line, "sdpMid": "0" })),
        }
    }

    /// Counts polls; never has anything to deliver
    #[derive(Default)]
    struct EmptyMailbox {
        polls: AtomicUsize,
    }

    #[async_trait]
    impl Mailbox for EmptyMailbox {
        async fn send(&self, _message: &SignalMessage) -> Result<()> {
            Ok(())
        }

        async fn poll(&self, _identity: &PeerIdentity) -> Result<Vec<SignalMessage>> {
            self.polls.fetch_add(1, Ordering::SeqCst);
            Ok(Vec::new())
        }
    }

    /// A relay that accepts the request and never answers
    struct HungMailbox;

    #[async_trait]
    impl Mailbox for HungMailbox {
        async fn send(&self, _message: &SignalMessage) -> Result<()> {
            std::future::pending().await
        }

        async fn poll(&self, _identity: &PeerIdentity) -> Result<Vec<SignalMessage>> {
            std::future::pending().await
        }
    }

    struct UnreachableMailbox;

    #[async_trait]
    impl Mailbox for UnreachableMailbox {
        async fn send(&self, _message: &SignalMessage) -> Result<()> {
            Err(Error::Transport("connection refused".into()))
        }

        async fn poll(&self, _identity: &PeerIdentity) -> Result<Vec<SignalMessage>> {
            Err(Error::Transport("connection refused".into()))
        }
    }

    fn schedule(interval: u64, deadline: u64) -> PollSchedule {
        PollSchedule {
            interval: Duration::from_secs(interval),
            deadline: Duration::from_secs(deadline),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn times_out_once_without_creating_a_peer() {
        let mailbox = Arc::new(EmptyMailbox::default());
        let connector = Arc::new(FakeConnector::default());
        let status = StatusSignal::new();
        let negotiator = Negotiator::new(mailbox.clone(), connector.clone(), DESKTOP.into())
            .with_schedule(schedule(3, 300));

        let started = Instant::now();
        let outcome = negotiator
            .negotiate(&status, Settings::default().mapper())
            .await
            .unwrap();

        assert!(matches!(outcome, NegotiationOutcome::Timeout));
        assert_eq!(status.get(), ConnectionStatus::Timeout);
        assert_eq!(connector.connects(), 0);
        assert!(started.elapsed() >= Duration::from_secs(300));
        assert!(started.elapsed() < Duration::from_secs(303));

        // polling stopped with the search
        let polls = mailbox.polls.load(Ordering::SeqCst);
        assert!((100..=101).contains(&polls), "polled {polls} times");
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(mailbox.polls.load(Ordering::SeqCst), polls);
    }

    #[tokio::test(start_paused = true)]
    async fn a_hung_poll_cannot_outlive_the_deadline() {
        let connector = Arc::new(FakeConnector::default());
        let status = StatusSignal::new();
        let negotiator = Negotiator::new(Arc::new(HungMailbox), connector.clone(), DESKTOP.into())
            .with_schedule(schedule(3, 300));

        let started = Instant::now();
        let outcome = tokio::time::timeout(
            Duration::from_secs(3600),
            negotiator.negotiate(&status, Settings::default().mapper()),
        )
        .await
        .expect("search ran past its deadline")
        .unwrap();

        assert!(matches!(outcome, NegotiationOutcome::Timeout));
        assert_eq!(status.get(), ConnectionStatus::Timeout);
        assert!(started.elapsed() >= Duration::from_secs(300));
        assert!(started.elapsed() < Duration::from_secs(301));
        assert_eq!(connector.connects(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn last_wait_is_clamped_to_the_deadline() {
        let mailbox = Arc::new(EmptyMailbox::default());
        let negotiator = Negotiator::new(
            mailbox.clone(),
            Arc::new(FakeConnector::default()),
            DESKTOP.into(),
        )
        .with_schedule(schedule(7, 10));

        let started = Instant::now();
        assert!(negotiator.find_offer().await.unwrap().is_none());
        // an unclamped second wait would end at 14s
        assert!(started.elapsed() >= Duration::from_secs(10));
        assert!(started.elapsed() < Duration::from_secs(11));
        assert!(mailbox.polls.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test(start_paused = true)]
    async fn answers_an_offer_that_arrives_mid_search() {
        let store = Arc::new(MailboxStore::new());
        let connector = Arc::new(FakeConnector::default());
        let status = StatusSignal::new();
        let negotiator = Negotiator::new(store.clone(), connector.clone(), DESKTOP.into())
            .with_schedule(schedule(3, 300));

        let producer = store.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(10)).await;
            producer.put(offer_from(MOBILE, Some("v=0 offer")));
            producer.put(candidate_from(MOBILE, "candidate:1 1 udp 1 10.0.0.2 5000 typ host"));
            producer.put(candidate_from("mobile-9", "candidate:2 1 udp 1 10.0.0.3 5000 typ host"));
        });

        let outcome = negotiator
            .negotiate(&status, Settings::default().mapper())
            .await
            .unwrap();
        let NegotiationOutcome::Established(session) = outcome else {
            panic!("expected a session");
        };
        assert_eq!(session.remote().as_str(), MOBILE);
        assert_eq!(status.get(), ConnectionStatus::New);

        let (link, _events) = connector.last();
        assert_eq!(link.offer.lock().unwrap().as_deref(), Some("v=0 offer"));
        assert_eq!(link.candidates.lock().unwrap().len(), 1);

        let delivered = store.take(&MOBILE.into());
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].kind, SignalType::Answer);
        assert_eq!(delivered[0].from.as_str(), DESKTOP);
        assert_eq!(delivered[0].sdp.as_deref(), Some(FAKE_ANSWER));
    }

    #[tokio::test]
    async fn paired_filter_skips_other_offers() {
        let store = Arc::new(MailboxStore::new());
        let connector = Arc::new(FakeConnector::default());
        let negotiator = Negotiator::new(store.clone(), connector, DESKTOP.into())
            .with_filter(OfferFilter::From(MOBILE.into()));

        store.put(offer_from("mobile-1234", Some("stranger")));
        store.put(offer_from(MOBILE, None));
        store.put(offer_from(MOBILE, Some("paired")));

        let found = negotiator.find_offer().await.unwrap().unwrap();
        assert_eq!(found.from.as_str(), MOBILE);
        assert_eq!(found.sdp, "paired");
        assert_eq!(store.pending(&DESKTOP.into()), 0);
    }

    #[tokio::test]
    async fn transport_errors_end_the_attempt() {
        let connector = Arc::new(FakeConnector::default());
        let negotiator =
            Negotiator::new(Arc::new(UnreachableMailbox), connector.clone(), DESKTOP.into());

        let result = negotiator
            .negotiate(&StatusSignal::new(), Settings::default().mapper())
            .await;
        assert!(matches!(result, Err(Error::Transport(_))));
        assert_eq!(connector.connects(), 0);
    }

    #[tokio::test]
    async fn failed_answer_closes_the_peer() {
        let store = Arc::new(MailboxStore::new());
        let connector = Arc::new(FakeConnector::failing_answer());
        let negotiator = Negotiator::new(store.clone(), connector.clone(), DESKTOP.into());
        store.put(offer_from(MOBILE, Some("v=0")));

        let result = negotiator
            .negotiate(&StatusSignal::new(), Settings::default().mapper())
            .await;
        assert!(matches!(result, Err(Error::MissingLocalDescription)));
        assert!(connector.last().0.is_closed());
        assert_eq!(store.pending(&MOBILE.into()), 0);
    }
}
