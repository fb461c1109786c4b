//! Log setup and the status line
//!
//! Every log line carries a local wall-clock timestamp. Connection status
//! changes are additionally reported under the `status` target with the
//! human-readable text for each state.

use crate::peer::state::StatusSignal;
use std::fmt;
use tokio::task::JoinHandle;
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::time::FormatTime;
use tracing_subscriber::EnvFilter;

/// Filter used when `RUST_LOG` is not set
pub fn default_level() -> &'static str {
    if cfg!(debug_assertions) {
        "headctl=debug,info"
    } else {
        "info"
    }
}

/// `2024-05-01 13:37:00.123`
struct LocalTime;

impl FormatTime for LocalTime {
    fn format_time(&self, w: &mut Writer<'_>) -> fmt::Result {
        write!(w, "{}", chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f"))
    }
}

/// Install the global subscriber. `RUST_LOG` wins over `level`.
pub fn init(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let result = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(LocalTime)
        .with_target(false)
        .try_init();
    if let Err(e) = result {
        eprintln!("logging already initialised: {e}");
    }
}

/// Log the display text of every status the signal takes on.
///
/// A reader that falls behind only sees the latest value.
pub fn spawn_status_worker(status: StatusSignal, has_pairing_code: bool) -> JoinHandle<()> {
    let mut rx = status.subscribe();
    tokio::spawn(async move {
        if has_pairing_code {
            tracing::info!(target: "status", "{}", rx.borrow_and_update().display_text());
        } else {
            tracing::info!(target: "status", "waiting for a pairing code");
        }
        while rx.changed().await.is_ok() {
            let current = *rx.borrow_and_update();
            tracing::info!(target: "status", state = %current, "{}", current.display_text());
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peer::types::ConnectionStatus;

    #[test]
    fn timestamps_have_millisecond_precision() {
        let mut out = String::new();
        LocalTime.format_time(&mut Writer::new(&mut out)).unwrap();
        // YYYY-MM-DD HH:MM:SS.mmm
        assert_eq!(out.len(), 23);
        assert_eq!(&out[10..11], " ");
        assert_eq!(&out[19..20], ".");
    }

    #[tokio::test]
    async fn status_worker_stops_with_the_signal() {
        let status = StatusSignal::new();
        let worker = spawn_status_worker(status.clone(), true);
        status.set(ConnectionStatus::Searching);
        status.set(ConnectionStatus::Timeout);
        drop(status);
        worker.await.unwrap();
    }
}
