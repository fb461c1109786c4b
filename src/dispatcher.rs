//! Key event dispatcher
//!
//! Sessions push `KeyCommand`s into one bounded queue; a dedicated worker
//! thread applies them to the OS input layer strictly in queue order. A full
//! queue blocks the producer, nothing is dropped. A command that fails to
//! apply is logged and the worker moves on to the next one.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::thread;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Named keys accepted besides single letters and digits
pub const NAMED_KEYS: &[&str] = &["up", "down", "left", "right", "space", "enter", "esc", "tab"];

/// Default queue depth between sessions and the worker
pub const DEFAULT_CAPACITY: usize = 64;

/// A key symbol: `a`-`z`, `0`-`9` or one of [`NAMED_KEYS`]
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Key(String);

impl Key {
    pub fn parse(raw: &str) -> Result<Self> {
        let normalized = raw.trim().to_ascii_lowercase();
        let single = normalized.len() == 1
            && normalized
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit());
        if single || NAMED_KEYS.contains(&normalized.as_str()) {
            Ok(Self(normalized))
        } else {
            Err(Error::UnknownKey(raw.to_string()))
        }
    }

    /// For compile-time defaults that are known to be valid
    pub(crate) fn known(symbol: &'static str) -> Self {
        Self(symbol.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Key {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Key::parse(&value)
    }
}

impl From<Key> for String {
    fn from(key: Key) -> Self {
        key.0
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyAction {
    Press,
    Release,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyCommand {
    pub action: KeyAction,
    pub key: Key,
}

impl KeyCommand {
    pub fn press(key: Key) -> Self {
        Self {
            action: KeyAction::Press,
            key,
        }
    }

    pub fn release(key: Key) -> Self {
        Self {
            action: KeyAction::Release,
            key,
        }
    }
}

/// OS input backend. Called only from the dispatcher's worker thread.
pub trait KeyInjector: Send + 'static {
    fn press(&mut self, key: &Key) -> Result<()>;
    fn release(&mut self, key: &Key) -> Result<()>;
}

/// Producer side of the queue; cheap to clone into every session
#[derive(Clone)]
pub struct DispatcherHandle {
    tx: mpsc::Sender<KeyCommand>,
}

impl DispatcherHandle {
    /// Enqueue one command, waiting while the queue is full
    pub async fn send(&self, cmd: KeyCommand) -> Result<()> {
        self.tx.send(cmd).await.map_err(|_| Error::DispatcherClosed)
    }

    pub async fn send_all(&self, cmds: Vec<KeyCommand>) -> Result<()> {
        for cmd in cmds {
            self.send(cmd).await?;
        }
        Ok(())
    }

    /// Enqueue from a thread that is not running async code
    pub fn blocking_send(&self, cmd: KeyCommand) -> Result<()> {
        self.tx.blocking_send(cmd).map_err(|_| Error::DispatcherClosed)
    }
}

pub struct Dispatcher {
    tx: mpsc::Sender<KeyCommand>,
    worker: thread::JoinHandle<()>,
}

impl Dispatcher {
    pub fn start(injector: Box<dyn KeyInjector>, capacity: usize) -> Result<Self> {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let worker = thread::Builder::new()
            .name("key-dispatcher".into())
            .spawn(move || run_worker(injector, rx))?;
        Ok(Self { tx, worker })
    }

    pub fn handle(&self) -> DispatcherHandle {
        DispatcherHandle {
            tx: self.tx.clone(),
        }
    }

    /// Stop accepting commands and wait for the queue to drain.
    ///
    /// Blocks until every outstanding handle is dropped as well.
    pub fn shutdown(self) {
        drop(self.tx);
        if self.worker.join().is_err() {
            warn!("key dispatcher worker panicked");
        }
    }
}

fn run_worker(mut injector: Box<dyn KeyInjector>, mut rx: mpsc::Receiver<KeyCommand>) {
    debug!("key dispatcher started");
    while let Some(cmd) = rx.blocking_recv() {
        let result = match cmd.action {
            KeyAction::Press => injector.press(&cmd.key),
            KeyAction::Release => injector.release(&cmd.key),
        };
        match result {
            Ok(()) => debug!(key = %cmd.key, action = ?cmd.action, "key applied"),
            Err(e) => warn!(key = %cmd.key, action = ?cmd.action, error = %e, "key command failed"),
        }
    }
    debug!("key dispatcher stopped");
}
