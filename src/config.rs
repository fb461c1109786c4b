//! Persisted settings and per-run configuration
//!
//! Settings live in a small JSON file:
//! `{"alpha_threshold": 12, "beta_threshold": 12, "pairing_code": ""}`
//! plus optional key bindings per axis.

use crate::dispatcher::{Key, DEFAULT_CAPACITY};
use crate::error::{Error, Result};
use crate::injector::KeyBackend;
use crate::mapper::{Axis, AxisBinding, KeyMapper};
use crate::peer::connection::{DEFAULT_STUN, GATHER_TIMEOUT};
use crate::peer::types::ServerConfig;
use crate::signaling::PeerIdentity;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_THRESHOLD: f64 = 12.0;
pub const DEFAULT_RELAY_URL: &str = "http://127.0.0.1:8080/signal";
pub const POLL_INTERVAL: Duration = Duration::from_secs(3);
pub const SEARCH_TIMEOUT: Duration = Duration::from_secs(300);

fn default_threshold() -> f64 {
    DEFAULT_THRESHOLD
}

/// Opposing keys for one axis
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct KeyPair {
    pub positive: Key,
    pub negative: Key,
}

impl KeyPair {
    fn alpha_default() -> Self {
        Self {
            positive: Key::known("a"),
            negative: Key::known("d"),
        }
    }

    fn beta_default() -> Self {
        Self {
            positive: Key::known("w"),
            negative: Key::known("s"),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Settings {
    #[serde(default = "default_threshold")]
    pub alpha_threshold: f64,
    #[serde(default = "default_threshold")]
    pub beta_threshold: f64,
    #[serde(default)]
    pub pairing_code: String,
    #[serde(default = "KeyPair::alpha_default")]
    pub alpha_keys: KeyPair,
    #[serde(default = "KeyPair::beta_default")]
    pub beta_keys: KeyPair,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            alpha_threshold: DEFAULT_THRESHOLD,
            beta_threshold: DEFAULT_THRESHOLD,
            pairing_code: String::new(),
            alpha_keys: KeyPair::alpha_default(),
            beta_keys: KeyPair::beta_default(),
        }
    }
}

impl Settings {
    /// `~/.config/headctl/config.json` or the platform equivalent
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("headctl")
            .join("config.json")
    }

    /// Load settings, or defaults if the file does not exist
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("reading {}: {e}", path.display())))?;
        let mut settings: Settings = serde_json::from_str(&content)
            .map_err(|e| Error::Config(format!("parsing {}: {e}", path.display())))?;
        settings.pairing_code = settings.pairing_code.trim().to_string();
        Ok(settings)
    }

    /// Rewrite the whole file
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("encoding settings: {e}")))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn has_pairing_code(&self) -> bool {
        !self.pairing_code.is_empty()
    }

    pub fn set_pairing_code(&mut self, code: &str) {
        self.pairing_code = code.trim().to_string();
    }

    /// Update a threshold from user input. Unparseable, negative or
    /// non-finite input keeps the previous value and returns false.
    pub fn set_threshold(&mut self, axis: Axis, raw: &str) -> bool {
        let Ok(value) = raw.trim().parse::<f64>() else {
            return false;
        };
        if !value.is_finite() || value < 0.0 {
            return false;
        }
        match axis {
            Axis::Alpha => self.alpha_threshold = value,
            Axis::Beta => self.beta_threshold = value,
        }
        true
    }

    /// Our routing identity, `pc-<code>`
    pub fn local_identity(&self) -> Option<PeerIdentity> {
        self.has_pairing_code()
            .then(|| PeerIdentity::desktop(&self.pairing_code))
    }

    /// The paired phone's identity, `mobile-<code>`
    pub fn mobile_identity(&self) -> Option<PeerIdentity> {
        self.has_pairing_code()
            .then(|| PeerIdentity::mobile(&self.pairing_code))
    }

    /// A fresh mapper with nothing held
    pub fn mapper(&self) -> KeyMapper {
        KeyMapper::new(
            AxisBinding::new(
                self.alpha_keys.positive.clone(),
                self.alpha_keys.negative.clone(),
                self.alpha_threshold,
            ),
            AxisBinding::new(
                self.beta_keys.positive.clone(),
                self.beta_keys.negative.clone(),
                self.beta_threshold,
            ),
        )
    }
}

/// Knobs that come from the command line rather than the settings file
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub relay_url: String,
    pub poll_interval: Duration,
    pub search_timeout: Duration,
    pub ice_servers: Vec<ServerConfig>,
    /// Bound on local ICE gathering before an answer goes out
    pub gather_timeout: Duration,
    /// Accept offers only from `mobile-<code>`
    pub paired_only: bool,
    pub queue_capacity: usize,
    pub key_backend: KeyBackend,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            relay_url: DEFAULT_RELAY_URL.to_string(),
            poll_interval: POLL_INTERVAL,
            search_timeout: SEARCH_TIMEOUT,
            ice_servers: vec![ServerConfig::stun(DEFAULT_STUN)],
            gather_timeout: GATHER_TIMEOUT,
            paired_only: false,
            queue_capacity: DEFAULT_CAPACITY,
            key_backend: KeyBackend::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings::load(&dir.path().join("nope.json")).unwrap();
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.alpha_threshold, 12.0);
        assert!(settings.local_identity().is_none());
    }

    #[test]
    fn three_field_file_loads_with_default_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{"alpha_threshold": 15, "beta_threshold": 9, "pairing_code": " 4711 "}"#,
        )
        .unwrap();

        let settings = Settings::load(&path).unwrap();
        assert_eq!(settings.alpha_threshold, 15.0);
        assert_eq!(settings.beta_threshold, 9.0);
        assert_eq!(settings.local_identity().unwrap().as_str(), "pc-4711");
        assert_eq!(settings.mobile_identity().unwrap().as_str(), "mobile-4711");
        assert_eq!(settings.alpha_keys.positive.as_str(), "a");
        assert_eq!(settings.beta_keys.negative.as_str(), "s");
    }

    #[test]
    fn save_then_load_preserves_updates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");
        let mut settings = Settings::default();
        settings.set_pairing_code("abc");
        assert!(settings.set_threshold(Axis::Beta, "20"));
        settings.save(&path).unwrap();

        assert_eq!(Settings::load(&path).unwrap(), settings);
    }

    #[test]
    fn bad_threshold_keeps_previous_value() {
        let mut settings = Settings::default();
        assert!(!settings.set_threshold(Axis::Alpha, "lots"));
        assert!(!settings.set_threshold(Axis::Alpha, "-3"));
        assert_eq!(settings.alpha_threshold, DEFAULT_THRESHOLD);
    }

    #[test]
    fn invalid_key_binding_is_a_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{"alpha_keys": {"positive": "ctrl+a", "negative": "d"}}"#,
        )
        .unwrap();
        assert!(matches!(Settings::load(&path), Err(Error::Config(_))));
    }
}
