//! LAN direct-offer endpoint
//!
//! The phone loads the control page from this server and posts its offer to
//! `POST /offer`. Each offer gets its own session and key state; sessions run
//! until their connection ends and are all closed when the server stops.

use crate::config::Settings;
use crate::controller::SharedSettings;
use crate::dispatcher::DispatcherHandle;
use crate::error::{Error, Result};
use crate::peer::state::StatusSignal;
use crate::peer::types::{PeerConnector, PeerLink};
use crate::session::{Session, SessionRegistry, EVENT_QUEUE};
use crate::signaling::PeerIdentity;
use crate::utils::random_id;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use axum_server::tls_rustls::RustlsConfig;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{info, warn};

const LOCAL_INDEX_HTML: &str = include_str!("../assets/local/index.html");
const LOCAL_CLIENT_JS: &str = include_str!("../assets/local/client.js");

/// How long in-flight HTTPS requests get once shutdown starts
const TLS_DRAIN: Duration = Duration::from_secs(5);

/// PEM certificate chain and private key for serving the page over HTTPS.
/// Phone browsers only expose motion sensors to secure origins.
#[derive(Debug, Clone)]
pub struct TlsFiles {
    pub cert: PathBuf,
    pub key: PathBuf,
}

impl TlsFiles {
    pub async fn load(&self) -> Result<RustlsConfig> {
        // Err only means a provider is already installed
        let _ = rustls::crypto::ring::default_provider().install_default();
        RustlsConfig::from_pem_file(&self.cert, &self.key)
            .await
            .map_err(|e| {
                Error::Config(format!(
                    "TLS cert {} / key {}: {e}",
                    self.cert.display(),
                    self.key.display()
                ))
            })
    }
}

/// Session description as the browser serialises it
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SessionDescription {
    pub sdp: String,
    #[serde(rename = "type")]
    pub kind: String,
}

#[derive(Clone)]
pub struct LocalState {
    pub connector: Arc<dyn PeerConnector>,
    pub settings: SharedSettings,
    pub keys: DispatcherHandle,
    pub registry: Arc<SessionRegistry>,
}

impl LocalState {
    fn mapper_settings(&self) -> Settings {
        self.settings
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }
}

pub fn build_router(state: LocalState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/client.js", get(client_js))
        .route("/offer", post(offer))
        .with_state(state)
}

async fn index() -> Html<&'static str> {
    Html(LOCAL_INDEX_HTML)
}

async fn client_js() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "application/javascript")],
        LOCAL_CLIENT_JS,
    )
}

async fn offer(State(state): State<LocalState>, Json(desc): Json<SessionDescription>) -> Response {
    if desc.kind != "offer" {
        return (StatusCode::BAD_REQUEST, "expected an offer").into_response();
    }
    match accept_offer(&state, desc.sdp).await {
        Ok(answer) => Json(answer).into_response(),
        Err(e) => {
            warn!(error = %e, "could not answer LAN offer");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

/// Answer one offer and start its session on a task of its own
pub async fn accept_offer(state: &LocalState, sdp: String) -> Result<SessionDescription> {
    let (tx, rx) = mpsc::channel(EVENT_QUEUE);
    let link = state.connector.connect(tx).await?;
    let answer = match answer_with(link.as_ref(), sdp).await {
        Ok(answer) => answer,
        Err(e) => {
            if let Err(close_err) = link.close().await {
                warn!(error = %close_err, "closing abandoned peer failed");
            }
            return Err(e);
        }
    };

    let remote = PeerIdentity::from(format!("lan-{}", random_id()).as_str());
    let session = Session::new(
        remote,
        link,
        rx,
        state.mapper_settings().mapper(),
        StatusSignal::new(),
    );
    info!(session = %session.id(), "LAN offer answered");

    let keys = state.keys.clone();
    let registry = state.registry.clone();
    tokio::spawn(async move {
        if let Err(e) = session.run(keys, registry).await {
            warn!(error = %e, "LAN session ended with an error");
        }
    });

    Ok(SessionDescription {
        sdp: answer,
        kind: "answer".into(),
    })
}

async fn answer_with(link: &dyn PeerLink, sdp: String) -> Result<String> {
    link.apply_offer(sdp).await?;
    link.create_answer().await
}

/// Serve until `shutdown` resolves, then close every live session.
/// With `tls` the page and `/offer` are served over HTTPS only.
pub async fn serve<F>(
    addr: SocketAddr,
    state: LocalState,
    tls: Option<RustlsConfig>,
    shutdown: F,
) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let registry = state.registry.clone();
    let app = build_router(state);
    match tls {
        Some(config) => {
            let handle = axum_server::Handle::new();
            let stopper = handle.clone();
            tokio::spawn(async move {
                shutdown.await;
                stopper.graceful_shutdown(Some(TLS_DRAIN));
            });
            info!(%addr, "LAN control page listening (https)");
            axum_server::bind_rustls(addr, config)
                .handle(handle)
                .serve(app.into_make_service())
                .await?;
        }
        None => {
            let listener = tokio::net::TcpListener::bind(addr).await?;
            info!(%addr, "LAN control page listening");
            axum::serve(listener, app)
                .with_graceful_shutdown(shutdown)
                .await?;
        }
    }

    info!(sessions = registry.len(), "closing LAN sessions");
    registry.close_all().await;
    Ok(())
}
