//! Error types shared across the signaling, session and input layers

use thiserror::Error;

/// Errors that can end a connection attempt or a single operation
#[derive(Error, Debug)]
pub enum Error {
    /// Mailbox send/poll got no usable HTTP response (connect, timeout, body)
    #[error("mailbox transport error: {0}")]
    Transport(String),

    /// Mailbox send/poll reached the relay but got a non-2xx status back
    #[error("relay answered {status} for {operation}")]
    RelayStatus { operation: &'static str, status: u16 },

    #[error("malformed sensor payload: {0}")]
    MalformedPayload(String),

    #[error("key injection failed for '{key}': {reason}")]
    KeyInjection { key: String, reason: String },

    #[error("unknown key symbol: {0}")]
    UnknownKey(String),

    #[error("key dispatcher has stopped")]
    DispatcherClosed,

    #[error("webrtc error: {0}")]
    WebRtc(#[from] webrtc::Error),

    #[error("peer has no local description after negotiation")]
    MissingLocalDescription,

    #[error("config error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Transport(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::MalformedPayload(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
