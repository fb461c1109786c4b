//! Scripted stand-ins for the transport and the OS input layer

use crate::dispatcher::{Key, KeyCommand, KeyInjector};
use crate::error::{Error, Result};
use crate::peer::types::{PeerConnector, PeerEvent, PeerLink};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

pub(crate) const FAKE_ANSWER: &str = "v=0\r\ns=fake-answer\r\n";

/// Records every applied command; refuses `failing` if set
#[derive(Clone, Default)]
pub(crate) struct Recorder {
    pub applied: Arc<Mutex<Vec<KeyCommand>>>,
    pub failing: Option<Key>,
}

impl Recorder {
    fn apply(&mut self, cmd: KeyCommand) -> Result<()> {
        if self.failing.as_ref() == Some(&cmd.key) {
            return Err(Error::KeyInjection {
                key: cmd.key.to_string(),
                reason: "refused".into(),
            });
        }
        self.applied.lock().unwrap().push(cmd);
        Ok(())
    }
}

impl KeyInjector for Recorder {
    fn press(&mut self, key: &Key) -> Result<()> {
        self.apply(KeyCommand::press(key.clone()))
    }

    fn release(&mut self, key: &Key) -> Result<()> {
        self.apply(KeyCommand::release(key.clone()))
    }
}

#[derive(Default)]
pub(crate) struct FakeLink {
    pub offer: Mutex<Option<String>>,
    pub candidates: Mutex<Vec<Value>>,
    closed: AtomicBool,
    fail_answer: bool,
}

impl FakeLink {
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PeerLink for FakeLink {
    async fn apply_offer(&self, sdp: String) -> Result<()> {
        *self.offer.lock().unwrap() = Some(sdp);
        Ok(())
    }

    async fn create_answer(&self) -> Result<String> {
        if self.fail_answer {
            return Err(Error::MissingLocalDescription);
        }
        Ok(FAKE_ANSWER.to_string())
    }

    async fn add_remote_candidate(&self, candidate: &Value) -> Result<()> {
        self.candidates.lock().unwrap().push(candidate.clone());
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Hands out `FakeLink`s and keeps the event sender of each so a test can
/// play the transport's side
#[derive(Default)]
pub(crate) struct FakeConnector {
    links: Mutex<Vec<(Arc<FakeLink>, mpsc::Sender<PeerEvent>)>>,
    pub fail_answer: bool,
}

impl FakeConnector {
    pub fn failing_answer() -> Self {
        Self {
            fail_answer: true,
            ..Default::default()
        }
    }

    pub fn connects(&self) -> usize {
        self.links.lock().unwrap().len()
    }

    pub fn last(&self) -> (Arc<FakeLink>, mpsc::Sender<PeerEvent>) {
        self.links
            .lock()
            .unwrap()
            .last()
            .cloned()
            .expect("no link was created")
    }
}

#[async_trait]
impl PeerConnector for FakeConnector {
    async fn connect(&self, events: mpsc::Sender<PeerEvent>) -> Result<Arc<dyn PeerLink>> {
        let link = Arc::new(FakeLink {
            fail_answer: self.fail_answer,
            ..Default::default()
        });
        self.links.lock().unwrap().push((link.clone(), events));
        Ok(link)
    }
}
