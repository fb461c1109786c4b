use crate::peer::types::{ConnectionStatus, PeerEvent};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info};
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::RTCDataChannel;

/// Route a remote data channel's callbacks into the session's event queue
pub fn attach_dc(dc: &Arc<RTCDataChannel>, events: mpsc::Sender<PeerEvent>) {
    let label = dc.label().to_string();
    debug!(%label, "data channel announced");

    dc.on_open(Box::new({
        let events = events.clone();
        let label = label.clone();
        move || {
            info!(%label, "data channel open");
            let events = events.clone();
            let label = label.clone();
            Box::pin(async move {
                let _ = events.send(PeerEvent::DataChannelOpen { label }).await;
            })
        }
    }));

    // awaiting the send keeps frames in arrival order
    dc.on_message(Box::new({
        let events = events.clone();
        move |msg: DataChannelMessage| {
            let events = events.clone();
            Box::pin(async move {
                let _ = events.send(PeerEvent::Message(msg.data)).await;
            })
        }
    }));

    dc.on_close(Box::new(move || {
        info!(%label, "data channel closed");
        let events = events.clone();
        Box::pin(async move {
            let _ = events
                .send(PeerEvent::StateChange(ConnectionStatus::Closed))
                .await;
        })
    }));
}
