//! One established peer channel and its event loop
//!
//! A session owns its peer link, its per-axis key state and its lifecycle
//! monitor. Events are handled one at a time in arrival order; the loop ends
//! when the lifecycle reaches a terminal state. Teardown always releases held
//! keys, closes the link and drops the session from the registry.

use crate::dispatcher::DispatcherHandle;
use crate::error::Result;
use crate::mapper::{KeyMapper, SensorPayload};
use crate::peer::state::{LifecycleMonitor, StatusSignal};
use crate::peer::types::{ConnectionStatus, PeerEvent, PeerLink};
use crate::signaling::PeerIdentity;
use crate::utils::random_id;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Depth of the queue between transport callbacks and the session loop
pub const EVENT_QUEUE: usize = 256;

/// Live sessions, kept only so they can all be closed at shutdown
#[derive(Default)]
pub struct SessionRegistry {
    sessions: Mutex<HashMap<String, Arc<dyn PeerLink>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn insert(&self, id: &str, link: Arc<dyn PeerLink>) {
        let mut sessions = self.sessions.lock().unwrap_or_else(|p| p.into_inner());
        sessions.insert(id.to_string(), link);
    }

    fn remove(&self, id: &str) {
        let mut sessions = self.sessions.lock().unwrap_or_else(|p| p.into_inner());
        sessions.remove(id);
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().unwrap_or_else(|p| p.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Close every registered session's transport
    pub async fn close_all(&self) {
        let drained: Vec<_> = {
            let mut sessions = self.sessions.lock().unwrap_or_else(|p| p.into_inner());
            sessions.drain().collect()
        };
        for (id, link) in drained {
            if let Err(e) = link.close().await {
                warn!(session = %id, error = %e, "failed to close session");
            }
        }
    }
}

pub struct Session {
    id: String,
    remote: PeerIdentity,
    link: Arc<dyn PeerLink>,
    events: mpsc::Receiver<PeerEvent>,
    mapper: KeyMapper,
    monitor: LifecycleMonitor,
}

impl Session {
    pub fn new(
        remote: PeerIdentity,
        link: Arc<dyn PeerLink>,
        events: mpsc::Receiver<PeerEvent>,
        mapper: KeyMapper,
        status: StatusSignal,
    ) -> Self {
        Self {
            id: random_id(),
            remote,
            link,
            events,
            mapper,
            monitor: LifecycleMonitor::new(status),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn remote(&self) -> &PeerIdentity {
        &self.remote
    }

    /// Drive the session until it ends, then tear it down.
    ///
    /// Returns the terminal state that ended it.
    pub async fn run(
        mut self,
        keys: DispatcherHandle,
        registry: Arc<SessionRegistry>,
    ) -> Result<ConnectionStatus> {
        registry.insert(&self.id, self.link.clone());
        info!(session = %self.id, remote = %self.remote, "session started");

        let result = self.event_loop(&keys).await;
        self.teardown(&keys, &registry).await;
        result
    }

    async fn event_loop(&mut self, keys: &DispatcherHandle) -> Result<ConnectionStatus> {
        while let Some(event) = self.events.recv().await {
            match event {
                PeerEvent::DataChannelOpen { label } => {
                    info!(session = %self.id, %label, "sensor channel open");
                }
                PeerEvent::Message(frame) => self.handle_frame(&frame, keys).await?,
                PeerEvent::StateChange(state) => {
                    if self.monitor.observe(state) && self.monitor.is_finished() {
                        break;
                    }
                }
            }
        }
        if !self.monitor.is_finished() {
            debug!(session = %self.id, "event stream closed");
            self.monitor.observe(ConnectionStatus::Closed);
        }
        Ok(self.monitor.current())
    }

    /// A bad frame is dropped on its own; the session keeps going.
    async fn handle_frame(&mut self, frame: &[u8], keys: &DispatcherHandle) -> Result<()> {
        let payload = match SensorPayload::parse(frame) {
            Ok(p) => p,
            Err(e) => {
                warn!(session = %self.id, error = %e, "discarding sensor frame");
                return Ok(());
            }
        };
        let commands = self.mapper.apply(&payload);
        if !commands.is_empty() {
            debug!(session = %self.id, count = commands.len(), "key commands emitted");
        }
        keys.send_all(commands).await
    }

    async fn teardown(&mut self, keys: &DispatcherHandle, registry: &SessionRegistry) {
        if let Err(e) = keys.send_all(self.mapper.release_all()).await {
            warn!(session = %self.id, error = %e, "could not release held keys");
        }
        if let Err(e) = self.link.close().await {
            warn!(session = %self.id, error = %e, "closing peer failed");
        }
        registry.remove(&self.id);
        info!(session = %self.id, state = %self.monitor.current(), "session ended");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use crate::dispatcher::{Dispatcher, Key, KeyCommand};
    use crate::testing::{FakeLink, Recorder};
    use bytes::Bytes;

    fn key(s: &str) -> Key {
        Key::parse(s).unwrap()
    }

    fn session_with(events: mpsc::Receiver<PeerEvent>, link: Arc<FakeLink>) -> Session {
        Session::new(
            "mobile-1".into(),
            link,
            events,
            Settings::default().mapper(),
            StatusSignal::new(),
        )
    }

    fn frame(json: &str) -> PeerEvent {
        PeerEvent::Message(Bytes::from(json.to_string()))
    }

    #[tokio::test]
    async fn frames_become_keys_and_teardown_releases_them() {
        let recorder = Recorder::default();
        let applied = recorder.applied.clone();
        let dispatcher = Dispatcher::start(Box::new(recorder), 8).unwrap();
        let registry = Arc::new(SessionRegistry::new());
        let link = Arc::new(FakeLink::default());

        let (tx, rx) = mpsc::channel(EVENT_QUEUE);
        for ev in [
            PeerEvent::StateChange(ConnectionStatus::Connecting),
            PeerEvent::StateChange(ConnectionStatus::Connected),
            PeerEvent::DataChannelOpen {
                label: "control".into(),
            },
            frame(r#"{"alpha": 20, "beta": 0}"#),
            frame(r#"{"alpha": 20, "beta": -30}"#),
            PeerEvent::StateChange(ConnectionStatus::Disconnected),
            // after the terminal state, never processed
            frame(r#"{"alpha": -20}"#),
        ] {
            tx.send(ev).await.unwrap();
        }

        let session = session_with(rx, link.clone());
        let end = session
            .run(dispatcher.handle(), registry.clone())
            .await
            .unwrap();
        assert_eq!(end, ConnectionStatus::Disconnected);
        assert!(link.is_closed());
        assert!(registry.is_empty());

        tokio::task::spawn_blocking(move || dispatcher.shutdown())
            .await
            .unwrap();
        assert_eq!(
            *applied.lock().unwrap(),
            vec![
                KeyCommand::press(key("a")),
                KeyCommand::press(key("s")),
                KeyCommand::release(key("a")),
                KeyCommand::release(key("s")),
            ]
        );
    }

    #[tokio::test]
    async fn malformed_frame_does_not_end_the_session() {
        let recorder = Recorder::default();
        let applied = recorder.applied.clone();
        let dispatcher = Dispatcher::start(Box::new(recorder), 8).unwrap();
        let registry = Arc::new(SessionRegistry::new());

        let (tx, rx) = mpsc::channel(EVENT_QUEUE);
        tx.send(frame("{not json")).await.unwrap();
        tx.send(frame(r#"{"alpha": "left"}"#)).await.unwrap();
        tx.send(PeerEvent::Message(Bytes::from_static(&[0xff, 0xfe])))
            .await
            .unwrap();
        tx.send(frame(r#"{"alpha": -15}"#)).await.unwrap();
        tx.send(PeerEvent::StateChange(ConnectionStatus::Failed))
            .await
            .unwrap();

        let end = session_with(rx, Arc::new(FakeLink::default()))
            .run(dispatcher.handle(), registry)
            .await
            .unwrap();
        assert_eq!(end, ConnectionStatus::Failed);

        tokio::task::spawn_blocking(move || dispatcher.shutdown())
            .await
            .unwrap();
        assert_eq!(
            *applied.lock().unwrap(),
            vec![KeyCommand::press(key("d")), KeyCommand::release(key("d"))]
        );
    }

    #[tokio::test]
    async fn registry_tracks_live_sessions_and_closes_them_in_bulk() {
        let dispatcher = Dispatcher::start(Box::new(Recorder::default()), 8).unwrap();
        let registry = Arc::new(SessionRegistry::new());
        let link = Arc::new(FakeLink::default());

        let (tx, rx) = mpsc::channel(EVENT_QUEUE);
        let session = session_with(rx, link.clone());
        let task = tokio::spawn(session.run(dispatcher.handle(), registry.clone()));

        while registry.is_empty() {
            tokio::task::yield_now().await;
        }
        assert_eq!(registry.len(), 1);
        registry.close_all().await;
        assert!(link.is_closed());
        assert!(registry.is_empty());

        // closing the transport reports a terminal state
        tx.send(PeerEvent::StateChange(ConnectionStatus::Closed))
            .await
            .unwrap();
        assert_eq!(task.await.unwrap().unwrap(), ConnectionStatus::Closed);

        tokio::task::spawn_blocking(move || dispatcher.shutdown())
            .await
            .unwrap();
    }
}
