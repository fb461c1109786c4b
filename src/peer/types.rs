use crate::error::Result;
use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Connection status surfaced to the application.
///
/// `Searching` and `Timeout` are produced by the negotiator; the rest mirror
/// the transport's connection state.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    New,
    Searching,
    Timeout,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl ConnectionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionStatus::New => "new",
            ConnectionStatus::Searching => "searching",
            ConnectionStatus::Timeout => "timeout",
            ConnectionStatus::Connecting => "connecting",
            ConnectionStatus::Connected => "connected",
            ConnectionStatus::Disconnected => "disconnected",
            ConnectionStatus::Failed => "failed",
            ConnectionStatus::Closed => "closed",
        }
    }

    /// Human-readable status line
    pub fn display_text(&self) -> &'static str {
        match self {
            ConnectionStatus::New => "initialising connection",
            ConnectionStatus::Searching => "searching for the mobile peer...",
            ConnectionStatus::Timeout => "search for the mobile peer timed out",
            ConnectionStatus::Connecting => "connecting...",
            ConnectionStatus::Connected => "connected",
            ConnectionStatus::Disconnected => "connection lost",
            ConnectionStatus::Failed => "connection failed",
            ConnectionStatus::Closed => "connection closed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ConnectionStatus::Disconnected | ConnectionStatus::Failed | ConnectionStatus::Closed
        )
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The closed set of things a peer link reports back to its session
#[derive(Debug, Clone, PartialEq)]
pub enum PeerEvent {
    DataChannelOpen { label: String },
    Message(Bytes),
    StateChange(ConnectionStatus),
}

/// One negotiated real-time channel, seen from the answering side
#[async_trait]
pub trait PeerLink: Send + Sync {
    /// Apply a remote offer as the remote description
    async fn apply_offer(&self, sdp: String) -> Result<()>;

    /// Create the answer, apply it locally, and return the SDP to publish
    async fn create_answer(&self) -> Result<String>;

    /// Apply a trickled remote candidate
    async fn add_remote_candidate(&self, candidate: &serde_json::Value) -> Result<()>;

    /// Release transport resources
    async fn close(&self) -> Result<()>;
}

/// Creates peer links whose events flow into `events`
#[async_trait]
pub trait PeerConnector: Send + Sync {
    async fn connect(&self, events: mpsc::Sender<PeerEvent>) -> Result<Arc<dyn PeerLink>>;
}

/// ICE server entry
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ServerConfig {
    pub r#type: String, // 'stun' or 'turn'
    pub url: String,
    pub username: Option<String>,
    pub credential: Option<String>,
}

impl ServerConfig {
    pub fn stun(url: impl Into<String>) -> Self {
        Self {
            r#type: "stun".into(),
            url: url.into(),
            username: None,
            credential: None,
        }
    }
}
