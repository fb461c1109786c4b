//! Mailbox relay: an in-memory store behind the `/signal` HTTP protocol.
//!
//! `POST /signal` stores a message stamped with the relay's clock,
//! `GET /signal?clientId=X` returns everything addressed to `X` oldest first
//! and deletes it in the same step.

use crate::error::Result;
use crate::signaling::{Mailbox, PeerIdentity, SignalMessage, SignalType};
use async_trait::async_trait;
use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tower_http::cors::{Any, CorsLayer};
use tracing::{debug, info};

const MOBILE_INDEX_HTML: &str = include_str!("../assets/mobile/index.html");
const MOBILE_CLIENT_JS: &str = include_str!("../assets/mobile/client.js");

/// Unread messages older than this are dropped on the next store, in ms.
/// Must stay above the desktop's offer search timeout.
pub const MESSAGE_TTL_MS: i64 = 10 * 60 * 1000;

/// Per-recipient message queues with consume-on-read semantics
#[derive(Default)]
pub struct MailboxStore {
    queues: Mutex<HashMap<PeerIdentity, Vec<SignalMessage>>>,
}

impl MailboxStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `message`, overwriting any client-supplied timestamp.
    ///
    /// Also sweeps messages nobody collected within [`MESSAGE_TTL_MS`].
    pub fn put(&self, message: SignalMessage) {
        self.put_at(message, chrono::Utc::now().timestamp_millis());
    }

    fn put_at(&self, mut message: SignalMessage, now_ms: i64) {
        message.timestamp = Some(now_ms);
        let mut queues = self.queues.lock().unwrap_or_else(|p| p.into_inner());
        let before = queues.len();
        queues.retain(|_, queue| {
            queue.retain(|m| now_ms - m.timestamp.unwrap_or_default() <= MESSAGE_TTL_MS);
            !queue.is_empty()
        });
        if queues.len() < before {
            debug!(dropped = before - queues.len(), "expired relay mailboxes");
        }
        let queue = queues.entry(message.to.clone()).or_default();
        queue.push(message);
        // stable: equal timestamps keep arrival order
        queue.sort_by_key(|m| m.timestamp.unwrap_or_default());
    }

    /// Remove and return every message addressed to `recipient`.
    pub fn take(&self, recipient: &PeerIdentity) -> Vec<SignalMessage> {
        let mut queues = self.queues.lock().unwrap_or_else(|p| p.into_inner());
        queues.remove(recipient).unwrap_or_default()
    }

    pub fn pending(&self, recipient: &PeerIdentity) -> usize {
        let queues = self.queues.lock().unwrap_or_else(|p| p.into_inner());
        queues.get(recipient).map_or(0, Vec::len)
    }

    /// Number of recipients with unread messages
    pub fn mailboxes(&self) -> usize {
        self.queues.lock().unwrap_or_else(|p| p.into_inner()).len()
    }
}

#[async_trait]
impl Mailbox for MailboxStore {
    async fn send(&self, message: &SignalMessage) -> Result<()> {
        self.put(message.clone());
        Ok(())
    }

    async fn poll(&self, identity: &PeerIdentity) -> Result<Vec<SignalMessage>> {
        Ok(self.take(identity))
    }
}

#[derive(Deserialize)]
struct PollParams {
    #[serde(rename = "clientId")]
    client_id: Option<String>,
}

/// Accepted POST body; `timestamp` is never taken from the client.
#[derive(Deserialize)]
struct PostBody {
    from: Option<String>,
    to: Option<String>,
    #[serde(rename = "type")]
    kind: Option<SignalType>,
    sdp: Option<String>,
    candidate: Option<serde_json::Value>,
}

async fn post_signal(State(store): State<Arc<MailboxStore>>, body: Bytes) -> Response {
    let parsed: PostBody = match serde_json::from_slice(&body) {
        Ok(b) => b,
        Err(e) => return (StatusCode::BAD_REQUEST, format!("Invalid body: {e}")).into_response(),
    };
    let (Some(from), Some(to), Some(kind)) = (parsed.from, parsed.to, parsed.kind) else {
        return (StatusCode::BAD_REQUEST, "Missing from, to or type").into_response();
    };

    debug!(%from, %to, ?kind, "relay stored signal");
    store.put(SignalMessage {
        from: PeerIdentity::from(from.as_str()),
        to: PeerIdentity::from(to.as_str()),
        kind,
        timestamp: None,
        sdp: parsed.sdp,
        candidate: parsed.candidate,
    });
    Json(serde_json::json!({ "result": "ok" })).into_response()
}

async fn poll_signal(
    State(store): State<Arc<MailboxStore>>,
    Query(params): Query<PollParams>,
) -> Response {
    let Some(client_id) = params.client_id.filter(|id| !id.is_empty()) else {
        return (StatusCode::BAD_REQUEST, "Missing clientId").into_response();
    };
    let items = store.take(&PeerIdentity::from(client_id.as_str()));
    debug!(%client_id, count = items.len(), "relay delivered signals");
    Json(items).into_response()
}

async fn preflight() -> StatusCode {
    StatusCode::OK
}

async fn method_not_allowed() -> (StatusCode, &'static str) {
    (StatusCode::METHOD_NOT_ALLOWED, "Method Not Allowed")
}

async fn mobile_index() -> Html<&'static str> {
    Html(MOBILE_INDEX_HTML)
}

async fn mobile_client_js() -> impl IntoResponse {
    ([("content-type", "application/javascript")], MOBILE_CLIENT_JS)
}

pub fn build_router(store: Arc<MailboxStore>) -> Router {
    let cors = CorsLayer::new().allow_origin(Any).allow_headers(Any);
    Router::new()
        .route(
            "/signal",
            get(poll_signal).post(post_signal).options(preflight),
        )
        .route("/index.html", get(mobile_index))
        .route("/client.js", get(mobile_client_js))
        .fallback(method_not_allowed)
        .layer(cors)
        .with_state(store)
}

/// Serve the relay until `shutdown` resolves
pub async fn serve<F>(addr: SocketAddr, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let app = build_router(Arc::new(MailboxStore::new()));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "mailbox relay listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}
