//! Connection lifecycle: `new → connecting → connected → {disconnected, failed, closed}`

use crate::peer::types::ConnectionStatus;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info};

/// Current-state signal read by the status display.
///
/// Holds only the latest value; intermediate states a slow reader misses are
/// still logged by whoever publishes them.
#[derive(Clone)]
pub struct StatusSignal {
    tx: Arc<watch::Sender<ConnectionStatus>>,
}

impl StatusSignal {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(ConnectionStatus::New);
        Self { tx: Arc::new(tx) }
    }

    pub fn set(&self, status: ConnectionStatus) {
        self.tx.send_replace(status);
    }

    pub fn get(&self) -> ConnectionStatus {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectionStatus> {
        self.tx.subscribe()
    }
}

impl Default for StatusSignal {
    fn default() -> Self {
        Self::new()
    }
}

fn rank(status: ConnectionStatus) -> Option<u8> {
    match status {
        ConnectionStatus::New => Some(0),
        ConnectionStatus::Connecting => Some(1),
        ConnectionStatus::Connected => Some(2),
        ConnectionStatus::Disconnected | ConnectionStatus::Failed | ConnectionStatus::Closed => {
            Some(3)
        }
        // negotiator-only states never come from the transport
        ConnectionStatus::Searching | ConnectionStatus::Timeout => None,
    }
}

/// Filters transport state reports into a monotonic lifecycle
pub struct LifecycleMonitor {
    current: ConnectionStatus,
    status: StatusSignal,
}

impl LifecycleMonitor {
    pub fn new(status: StatusSignal) -> Self {
        status.set(ConnectionStatus::New);
        Self {
            current: ConnectionStatus::New,
            status,
        }
    }

    /// Feed one transport report. Returns true if it advanced the lifecycle.
    pub fn observe(&mut self, next: ConnectionStatus) -> bool {
        let (Some(from), Some(to)) = (rank(self.current), rank(next)) else {
            debug!(state = %next, "ignoring non-transport state");
            return false;
        };
        if self.current.is_terminal() || to <= from {
            debug!(current = %self.current, reported = %next, "ignoring state report");
            return false;
        }
        info!(from = %self.current, to = %next, "peer connection state changed");
        self.current = next;
        self.status.set(next);
        true
    }

    pub fn current(&self) -> ConnectionStatus {
        self.current
    }

    pub fn is_finished(&self) -> bool {
        self.current.is_terminal()
    }
}
