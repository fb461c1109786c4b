//! Mailbox client: exchanges handshake messages through the relay.
//!
//! Every successful `poll` is a one-shot delivery. The relay deletes what it
//! returns, so a message the caller does not act on is gone for good.

use crate::error::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

/// Routing key in the mailbox, derived from the pairing code
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct PeerIdentity(String);

impl PeerIdentity {
    /// `pc-<code>`
    pub fn desktop(code: &str) -> Self {
        Self(format!("pc-{code}"))
    }

    /// `mobile-<code>`
    pub fn mobile(code: &str) -> Self {
        Self(format!("mobile-{code}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for PeerIdentity {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl fmt::Display for PeerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SignalType {
    Offer,
    Answer,
    Candidate,
}

/// One handshake message. `timestamp` is stamped by the relay on write and is
/// only meaningful for oldest-first delivery.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SignalMessage {
    pub from: PeerIdentity,
    pub to: PeerIdentity,
    #[serde(rename = "type")]
    pub kind: SignalType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub candidate: Option<serde_json::Value>,
}

impl SignalMessage {
    pub fn answer(from: PeerIdentity, to: PeerIdentity, sdp: String) -> Self {
        Self {
            from,
            to,
            kind: SignalType::Answer,
            timestamp: None,
            sdp: Some(sdp),
            candidate: None,
        }
    }
}

/// Request/response access to the relay, keyed by recipient identity
#[async_trait]
pub trait Mailbox: Send + Sync {
    /// Publish one message. No retry.
    async fn send(&self, message: &SignalMessage) -> Result<()>;

    /// Take every message addressed to `identity`, oldest first.
    async fn poll(&self, identity: &PeerIdentity) -> Result<Vec<SignalMessage>>;
}

/// Mailbox client speaking the relay's HTTP protocol
#[derive(Clone)]
pub struct HttpMailbox {
    client: reqwest::Client,
    url: String,
}

impl HttpMailbox {
    /// `url` points at the relay's `/signal` resource
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Mailbox for HttpMailbox {
    async fn send(&self, message: &SignalMessage) -> Result<()> {
        debug!(to = %message.to, kind = ?message.kind, "posting signal");
        let resp = self.client.post(&self.url).json(message).send().await?;
        if !resp.status().is_success() {
            return Err(Error::RelayStatus {
                operation: "send",
                status: resp.status().as_u16(),
            });
        }
        Ok(())
    }

    async fn poll(&self, identity: &PeerIdentity) -> Result<Vec<SignalMessage>> {
        let resp = self
            .client
            .get(&self.url)
            .query(&[("clientId", identity.as_str())])
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(Error::RelayStatus {
                operation: "poll",
                status: resp.status().as_u16(),
            });
        }
        let mut messages: Vec<SignalMessage> = resp.json().await?;
        messages.sort_by_key(|m| m.timestamp.unwrap_or_default());
        debug!(identity = %identity, count = messages.len(), "polled mailbox");
        Ok(messages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identities_follow_pairing_convention() {
        assert_eq!(PeerIdentity::desktop("4711").as_str(), "pc-4711");
        assert_eq!(PeerIdentity::mobile("4711").as_str(), "mobile-4711");
    }

    #[test]
    fn outgoing_answer_has_no_timestamp() {
        let msg = SignalMessage::answer("pc-1".into(), "mobile-1".into(), "v=0".into());
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "answer");
        assert_eq!(json["from"], "pc-1");
        assert!(json.get("timestamp").is_none());
        assert!(json.get("candidate").is_none());
    }

    #[test]
    fn relay_item_parses() {
        let raw = r#"{"from":"mobile-1","to":"pc-1","type":"offer","timestamp":1700000000123,"sdp":"v=0"}"#;
        let msg: SignalMessage = serde_json::from_str(raw).unwrap();
        assert_eq!(msg.kind, SignalType::Offer);
        assert_eq!(msg.timestamp, Some(1_700_000_000_123));
        assert_eq!(msg.sdp.as_deref(), Some("v=0"));
    }
}
