use crate::error::{Error, Result};
use crate::peer::data_channel::attach_dc;
use crate::peer::ice::{candidate_from_value, summarize_candidates, wait_for_gathering};
use crate::peer::types::{ConnectionStatus, PeerConnector, PeerEvent, PeerLink, ServerConfig};
use crate::utils::add_ice_url_scheme;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use webrtc::api::APIBuilder;
use webrtc::data_channel::RTCDataChannel;
use webrtc::ice_transport::ice_gatherer_state::RTCIceGathererState;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::policy::bundle_policy::RTCBundlePolicy;
use webrtc::peer_connection::policy::rtcp_mux_policy::RTCRtcpMuxPolicy;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;

pub const DEFAULT_STUN: &str = "stun:stun.l.google.com:19302";

/// Default bound on local ICE gathering before the answer is sent
pub const GATHER_TIMEOUT: Duration = Duration::from_secs(10);

/// Builds answering peers on top of webrtc-rs
pub struct WebRtcConnector {
    ice_servers: Vec<ServerConfig>,
    gather_timeout: Duration,
}

impl WebRtcConnector {
    pub fn new(ice_servers: Vec<ServerConfig>) -> Self {
        Self {
            ice_servers,
            gather_timeout: GATHER_TIMEOUT,
        }
    }

    pub fn with_gather_timeout(mut self, limit: Duration) -> Self {
        self.gather_timeout = limit;
        self
    }
}

impl Default for WebRtcConnector {
    fn default() -> Self {
        Self::new(vec![ServerConfig::stun(DEFAULT_STUN)])
    }
}

fn map_state(st: RTCPeerConnectionState) -> Option<ConnectionStatus> {
    match st {
        RTCPeerConnectionState::New => Some(ConnectionStatus::New),
        RTCPeerConnectionState::Connecting => Some(ConnectionStatus::Connecting),
        RTCPeerConnectionState::Connected => Some(ConnectionStatus::Connected),
        RTCPeerConnectionState::Disconnected => Some(ConnectionStatus::Disconnected),
        RTCPeerConnectionState::Failed => Some(ConnectionStatus::Failed),
        RTCPeerConnectionState::Closed => Some(ConnectionStatus::Closed),
        RTCPeerConnectionState::Unspecified => None,
    }
}

/// Translate configured servers into the library's form
pub fn ice_servers(servers: &[ServerConfig]) -> Vec<RTCIceServer> {
    servers
        .iter()
        .map(|config| RTCIceServer {
            urls: vec![add_ice_url_scheme(config)],
            username: config.username.clone().unwrap_or_default(),
            credential: config.credential.clone().unwrap_or_default(),
            ..Default::default()
        })
        .collect()
}

fn rtc_config(servers: &[ServerConfig]) -> RTCConfiguration {
    RTCConfiguration {
        ice_servers: ice_servers(servers),
        bundle_policy: RTCBundlePolicy::MaxBundle,
        rtcp_mux_policy: RTCRtcpMuxPolicy::Require,
        ..Default::default()
    }
}

#[async_trait]
impl PeerConnector for WebRtcConnector {
    async fn connect(&self, events: mpsc::Sender<PeerEvent>) -> Result<Arc<dyn PeerLink>> {
        let api = APIBuilder::new().build();
        let pc = Arc::new(api.new_peer_connection(rtc_config(&self.ice_servers)).await?);

        pc.on_ice_gathering_state_change(Box::new(move |state: RTCIceGathererState| {
            debug!(?state, "ICE gathering state changed");
            Box::pin(async {})
        }));

        pc.on_peer_connection_state_change(Box::new({
            let events = events.clone();
            move |st: RTCPeerConnectionState| {
                debug!(?st, "transport reported state");
                let events = events.clone();
                Box::pin(async move {
                    if let Some(status) = map_state(st) {
                        let _ = events.send(PeerEvent::StateChange(status)).await;
                    }
                })
            }
        }));

        // the mobile side creates the channel; we only answer
        pc.on_data_channel(Box::new(move |dc: Arc<RTCDataChannel>| {
            attach_dc(&dc, events.clone());
            Box::pin(async {})
        }));

        Ok(Arc::new(RtcPeer {
            pc,
            gather_timeout: self.gather_timeout,
        }))
    }
}

struct RtcPeer {
    pc: Arc<RTCPeerConnection>,
    gather_timeout: Duration,
}

#[async_trait]
impl PeerLink for RtcPeer {
    async fn apply_offer(&self, sdp: String) -> Result<()> {
        let offer = RTCSessionDescription::offer(sdp)?;
        self.pc.set_remote_description(offer).await?;
        debug!("remote description set (offer)");
        Ok(())
    }

    async fn create_answer(&self) -> Result<String> {
        let answer = self.pc.create_answer(None).await?;
        let mut gather = self.pc.gathering_complete_promise().await;
        self.pc.set_local_description(answer).await?;
        wait_for_gathering(&mut gather, self.gather_timeout).await;

        let local = self
            .pc
            .local_description()
            .await
            .ok_or(Error::MissingLocalDescription)?;
        let summary = summarize_candidates(&local.sdp);
        if summary.host + summary.srflx + summary.relay == 0 {
            warn!("answer carries no ICE candidates; the peer may not reach us");
        }
        info!(len = local.sdp.len(), "answer ready");
        Ok(local.sdp)
    }

    async fn add_remote_candidate(&self, candidate: &serde_json::Value) -> Result<()> {
        match candidate_from_value(candidate) {
            Some(init) => {
                self.pc.add_ice_candidate(init).await?;
                debug!("remote candidate applied");
            }
            None => warn!(%candidate, "skipping unusable remote candidate"),
        }
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.pc.close().await?;
        Ok(())
    }
}
