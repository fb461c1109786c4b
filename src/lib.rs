pub mod commands;
pub mod config;
pub mod controller;
pub mod dispatcher;
pub mod error;
pub mod injector;
pub mod local;
pub mod logger;
pub mod mapper;
pub mod negotiator;
pub mod peer;
pub mod relay;
pub mod session;
pub mod signaling;
pub mod utils;

#[cfg(test)]
pub(crate) mod testing;

pub use error::{Error, Result};

use crate::commands::{Console, HELP};
use crate::config::{RuntimeConfig, Settings};
use crate::controller::{ReconnectTrigger, SessionController};
use crate::dispatcher::Dispatcher;
use crate::local::{LocalState, TlsFiles};
use crate::peer::{StatusSignal, WebRtcConnector};
use crate::session::SessionRegistry;
use crate::signaling::HttpMailbox;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::io::BufReader;
use tokio::sync::oneshot;
use tracing::{info, warn};

const DISPATCHER_DRAIN: Duration = Duration::from_secs(2);

async fn ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "cannot listen for ctrl-c");
        std::future::pending::<()>().await;
    }
}

/// Give queued key commands a moment to drain, then move on regardless
async fn stop_dispatcher(dispatcher: Dispatcher) {
    let (done_tx, done_rx) = oneshot::channel();
    std::thread::spawn(move || {
        dispatcher.shutdown();
        let _ = done_tx.send(());
    });
    if tokio::time::timeout(DISPATCHER_DRAIN, done_rx).await.is_err() {
        warn!("key dispatcher still busy at exit");
    }
}

fn connector(runtime: &RuntimeConfig) -> Arc<WebRtcConnector> {
    Arc::new(
        WebRtcConnector::new(runtime.ice_servers.clone())
            .with_gather_timeout(runtime.gather_timeout),
    )
}

/// Always-on desktop agent: relay handshake, sessions, console
pub async fn run_desktop(config_path: PathBuf, runtime: RuntimeConfig) -> Result<()> {
    let settings = Settings::load(&config_path)?;
    let paired = settings.has_pairing_code();
    let mailbox = HttpMailbox::new(runtime.relay_url.clone());
    info!(path = %config_path.display(), relay = %mailbox.url(), "desktop agent starting");

    let dispatcher = Dispatcher::start(
        injector::open(runtime.key_backend)?,
        runtime.queue_capacity,
    )?;
    let status = StatusSignal::new();
    let status_worker = logger::spawn_status_worker(status.clone(), paired);
    let registry = Arc::new(SessionRegistry::new());
    let trigger = ReconnectTrigger::new();
    let shared = Arc::new(RwLock::new(settings));

    let controller = SessionController::new(
        shared.clone(),
        runtime.clone(),
        Arc::new(mailbox),
        connector(&runtime),
        dispatcher.handle(),
        status,
        registry.clone(),
        trigger.clone(),
    );
    if paired {
        trigger.raise();
    }

    let console = Console::new(shared, config_path, trigger);
    println!("{HELP}");
    let stdin = BufReader::new(tokio::io::stdin());
    let result = tokio::select! {
        _ = controller.run() => Ok(()),
        res = console.run(stdin) => res,
        _ = ctrl_c() => {
            info!("interrupted");
            Ok(())
        }
    };

    registry.close_all().await;
    drop(controller);
    status_worker.abort();
    stop_dispatcher(dispatcher).await;
    info!("desktop agent stopped");
    result
}

/// LAN mode: the phone posts its offer straight to us
pub async fn run_local(
    addr: SocketAddr,
    tls: Option<TlsFiles>,
    config_path: PathBuf,
    runtime: RuntimeConfig,
) -> Result<()> {
    let settings = Settings::load(&config_path)?;
    let tls = match tls {
        Some(files) => Some(files.load().await?),
        None => None,
    };
    let dispatcher = Dispatcher::start(
        injector::open(runtime.key_backend)?,
        runtime.queue_capacity,
    )?;
    let state = LocalState {
        connector: connector(&runtime),
        settings: Arc::new(RwLock::new(settings)),
        keys: dispatcher.handle(),
        registry: Arc::new(SessionRegistry::new()),
    };

    let result = local::serve(addr, state, tls, ctrl_c()).await;
    stop_dispatcher(dispatcher).await;
    result
}

/// Mailbox relay for the two peers
pub async fn run_relay(addr: SocketAddr) -> Result<()> {
    relay::serve(addr, ctrl_c()).await
}
