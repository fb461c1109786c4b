//! Tilt-to-key mapping
//!
//! Each axis holds at most one key. A reading beyond `+threshold` wants the
//! positive key, beyond `-threshold` the negative key, anything in between
//! wants no key. Commands are emitted only when the wanted key changes, and a
//! held key is always released before another is pressed on the same axis.
//!
//! Engage and disengage share one threshold, so a signal hovering right at
//! `±threshold` toggles the key on every crossing.

use crate::dispatcher::{Key, KeyCommand};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Axis {
    Alpha,
    Beta,
}

impl Axis {
    pub const ALL: [Axis; 2] = [Axis::Alpha, Axis::Beta];

    pub fn as_str(&self) -> &'static str {
        match self {
            Axis::Alpha => "alpha",
            Axis::Beta => "beta",
        }
    }
}

/// Key pair and threshold for one axis
#[derive(Debug, Clone, PartialEq)]
pub struct AxisBinding {
    pub positive: Key,
    pub negative: Key,
    pub threshold: f64,
}

impl AxisBinding {
    pub fn new(positive: Key, negative: Key, threshold: f64) -> Self {
        Self {
            positive,
            negative,
            threshold,
        }
    }

    fn desired(&self, value: f64) -> Option<&Key> {
        if value > self.threshold {
            Some(&self.positive)
        } else if value < -self.threshold {
            Some(&self.negative)
        } else {
            None
        }
    }
}

/// The key currently held on one axis, if any
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AxisState {
    current: Option<Key>,
}

impl AxisState {
    pub fn current(&self) -> Option<&Key> {
        self.current.as_ref()
    }

    /// Feed one reading. `None` leaves state and output untouched.
    pub fn update(
        &mut self,
        value: Option<f64>,
        binding: &AxisBinding,
        out: &mut Vec<KeyCommand>,
    ) {
        let Some(value) = value else {
            return;
        };
        let desired = binding.desired(value);
        if desired == self.current.as_ref() {
            return;
        }
        let desired = desired.cloned();
        if let Some(held) = self.current.take() {
            out.push(KeyCommand::release(held));
        }
        if let Some(key) = &desired {
            out.push(KeyCommand::press(key.clone()));
        }
        self.current = desired;
    }

    /// Release whatever is held
    pub fn release(&mut self, out: &mut Vec<KeyCommand>) {
        if let Some(held) = self.current.take() {
            out.push(KeyCommand::release(held));
        }
    }
}

/// One inbound sensor frame: `{"alpha": number|null, "beta": number|null}`
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct SensorPayload {
    #[serde(default)]
    pub alpha: Option<f64>,
    #[serde(default)]
    pub beta: Option<f64>,
}

impl SensorPayload {
    pub fn parse(raw: &[u8]) -> Result<Self> {
        serde_json::from_slice(raw).map_err(|e| Error::MalformedPayload(e.to_string()))
    }

    pub fn value(&self, axis: Axis) -> Option<f64> {
        match axis {
            Axis::Alpha => self.alpha,
            Axis::Beta => self.beta,
        }
    }
}

/// Both axes of one session
#[derive(Debug, Clone)]
pub struct KeyMapper {
    alpha: (AxisBinding, AxisState),
    beta: (AxisBinding, AxisState),
}

impl KeyMapper {
    pub fn new(alpha: AxisBinding, beta: AxisBinding) -> Self {
        Self {
            alpha: (alpha, AxisState::default()),
            beta: (beta, AxisState::default()),
        }
    }

    /// Evaluate alpha then beta for one frame
    pub fn apply(&mut self, payload: &SensorPayload) -> Vec<KeyCommand> {
        let mut out = Vec::new();
        for axis in Axis::ALL {
            let (binding, state) = self.axis_mut(axis);
            state.update(payload.value(axis), binding, &mut out);
        }
        out
    }

    /// Release every held key, e.g. when the session ends
    pub fn release_all(&mut self) -> Vec<KeyCommand> {
        let mut out = Vec::new();
        self.alpha.1.release(&mut out);
        self.beta.1.release(&mut out);
        out
    }

    pub fn state(&self, axis: Axis) -> &AxisState {
        match axis {
            Axis::Alpha => &self.alpha.1,
            Axis::Beta => &self.beta.1,
        }
    }

    fn axis_mut(&mut self, axis: Axis) -> (&AxisBinding, &mut AxisState) {
        let (binding, state) = match axis {
            Axis::Alpha => &mut self.alpha,
            Axis::Beta => &mut self.beta,
        };
        (&*binding, state)
    }
}
