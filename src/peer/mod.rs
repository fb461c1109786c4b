pub mod connection;
pub mod data_channel;
pub mod ice;
pub mod state;
pub mod types;

pub use connection::WebRtcConnector;
pub use state::{LifecycleMonitor, StatusSignal};
pub use types::{ConnectionStatus, PeerConnector, PeerEvent, PeerLink, ServerConfig};
