use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, warn};
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;

/// Candidate counts by type found in an SDP blob
#[derive(Debug, Default, PartialEq, Eq)]
pub struct CandidateSummary {
    pub host: usize,
    pub srflx: usize,
    pub relay: usize,
}

/// Wait until local ICE gathering finishes or `limit` passes.
///
/// The mobile peer never trickles, so the answer must carry its candidates.
pub async fn wait_for_gathering(gather: &mut mpsc::Receiver<()>, limit: Duration) {
    if timeout(limit, gather.recv()).await.is_err() {
        warn!(
            secs = limit.as_secs(),
            "ICE gathering did not finish in time, answering with what we have"
        );
    }
}

pub fn summarize_candidates(sdp: &str) -> CandidateSummary {
    let mut summary = CandidateSummary::default();
    for line in sdp.lines().filter(|l| l.starts_with("a=candidate:")) {
        if line.contains("typ host") {
            summary.host += 1;
        } else if line.contains("typ srflx") {
            summary.srflx += 1;
        } else if line.contains("typ relay") {
            summary.relay += 1;
        }
    }
    debug!(
        host = summary.host,
        srflx = summary.srflx,
        relay = summary.relay,
        "candidate analysis"
    );
    summary
}

/// Accepts a bare candidate string or a browser-style
/// `{candidate, sdpMid, sdpMLineIndex}` object.
pub fn candidate_from_value(value: &serde_json::Value) -> Option<RTCIceCandidateInit> {
    match value {
        serde_json::Value::String(s) => Some(RTCIceCandidateInit {
            candidate: s.clone(),
            ..Default::default()
        }),
        serde_json::Value::Object(map) => {
            let candidate = map.get("candidate")?.as_str()?.to_string();
            Some(RTCIceCandidateInit {
                candidate,
                sdp_mid: map
                    .get("sdpMid")
                    .and_then(|v| v.as_str())
                    .map(str::to_string),
                sdp_mline_index: map
                    .get("sdpMLineIndex")
                    .and_then(|v| v.as_u64())
                    .and_then(|v| u16::try_from(v).ok()),
                username_fragment: map
                    .get("usernameFragment")
                    .and_then(|v| v.as_str())
                    .map(str::to_string),
            })
        }
        _ => None,
    }
}
