//! Console commands for the desktop agent
//!
//! ```text
//! reconnect            start a new connection attempt
//! set alpha <n>        alpha threshold in degrees
//! set beta <n>         beta threshold in degrees
//! set code <code>      pairing code
//! save                 write settings to disk and reconnect
//! show                 print current settings
//! quit
//! ```

use crate::config::Settings;
use crate::controller::{ReconnectTrigger, SharedSettings};
use crate::error::Result;
use crate::mapper::Axis;
use std::path::PathBuf;
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::{info, warn};

pub const HELP: &str = "commands: reconnect | set alpha <n> | set beta <n> | set code <code> | save | show | quit";

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Reconnect,
    SetThreshold(Axis, String),
    SetCode(String),
    Save,
    Show,
    Help,
    Quit,
}

#[derive(Error, Debug, PartialEq)]
pub enum ParseError {
    #[error("unknown command '{0}'")]
    Unknown(String),
    #[error("usage: {0}")]
    Usage(&'static str),
}

impl Command {
    /// `Ok(None)` for a blank line
    pub fn parse(line: &str) -> std::result::Result<Option<Self>, ParseError> {
        let mut words = line.split_whitespace();
        let Some(head) = words.next() else {
            return Ok(None);
        };
        let cmd = match head.to_ascii_lowercase().as_str() {
            "reconnect" => Command::Reconnect,
            "save" => Command::Save,
            "show" => Command::Show,
            "help" | "?" => Command::Help,
            "quit" | "exit" => Command::Quit,
            "set" => {
                const USAGE: &str = "set alpha|beta|code <value>";
                let field = words.next().ok_or(ParseError::Usage(USAGE))?;
                let value = words.collect::<Vec<_>>().join(" ");
                if value.is_empty() {
                    return Err(ParseError::Usage(USAGE));
                }
                match field.to_ascii_lowercase().as_str() {
                    "alpha" => Command::SetThreshold(Axis::Alpha, value),
                    "beta" => Command::SetThreshold(Axis::Beta, value),
                    "code" => Command::SetCode(value),
                    _ => return Err(ParseError::Usage(USAGE)),
                }
            }
            other => return Err(ParseError::Unknown(other.to_string())),
        };
        Ok(Some(cmd))
    }
}

/// Applies console commands to shared settings
pub struct Console {
    settings: SharedSettings,
    path: PathBuf,
    trigger: ReconnectTrigger,
}

impl Console {
    pub fn new(settings: SharedSettings, path: PathBuf, trigger: ReconnectTrigger) -> Self {
        Self {
            settings,
            path,
            trigger,
        }
    }

    /// Run one command. Returns false when the console should stop.
    pub fn execute(&self, cmd: Command) -> Result<bool> {
        match cmd {
            Command::Reconnect => {
                info!("reconnect requested");
                self.trigger.raise();
            }
            Command::SetThreshold(axis, raw) => {
                let mut settings = self.settings.write().unwrap_or_else(|p| p.into_inner());
                if settings.set_threshold(axis, &raw) {
                    info!(axis = axis.as_str(), value = %raw.trim(), "threshold updated");
                } else {
                    warn!(
                        axis = axis.as_str(),
                        input = %raw,
                        "not a valid threshold, keeping the old value"
                    );
                }
            }
            Command::SetCode(code) => {
                let mut settings = self.settings.write().unwrap_or_else(|p| p.into_inner());
                settings.set_pairing_code(&code);
                info!(code = %settings.pairing_code, "pairing code updated");
            }
            Command::Save => {
                let snapshot = self.snapshot();
                snapshot.save(&self.path)?;
                info!(path = %self.path.display(), "settings saved");
                self.trigger.raise();
            }
            Command::Show => {
                let s = self.snapshot();
                println!(
                    "alpha threshold: {}  ({} / {})",
                    s.alpha_threshold, s.alpha_keys.positive, s.alpha_keys.negative
                );
                println!(
                    "beta threshold:  {}  ({} / {})",
                    s.beta_threshold, s.beta_keys.positive, s.beta_keys.negative
                );
                if s.has_pairing_code() {
                    println!("pairing code:    {}", s.pairing_code);
                } else {
                    println!("pairing code:    (none)");
                }
            }
            Command::Help => println!("{HELP}"),
            Command::Quit => return Ok(false),
        }
        Ok(true)
    }

    fn snapshot(&self) -> Settings {
        self.settings
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    /// Read commands line by line until `quit` or end of input
    pub async fn run<R: AsyncBufRead + Unpin>(&self, input: R) -> Result<()> {
        let mut lines = input.lines();
        while let Some(line) = lines.next_line().await? {
            let cmd = match Command::parse(&line) {
                Ok(Some(cmd)) => cmd,
                Ok(None) => continue,
                Err(e) => {
                    warn!("{e}");
                    println!("{HELP}");
                    continue;
                }
            };
            match self.execute(cmd) {
                Ok(true) => {}
                Ok(false) => break,
                Err(e) => warn!(error = %e, "command failed"),
            }
        }
        Ok(())
    }
}
