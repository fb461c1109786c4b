//! OS input backends for the key dispatcher

use crate::dispatcher::{Key, KeyInjector};
use crate::error::{Error, Result};
use clap::ValueEnum;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum KeyBackend {
    /// Virtual keyboard through /dev/uinput (Linux)
    Uinput,
    /// Log commands without touching the OS
    Log,
}

impl Default for KeyBackend {
    fn default() -> Self {
        if cfg!(target_os = "linux") {
            KeyBackend::Uinput
        } else {
            KeyBackend::Log
        }
    }
}

pub fn open(backend: KeyBackend) -> Result<Box<dyn KeyInjector>> {
    match backend {
        KeyBackend::Log => Ok(Box::new(LogInjector)),
        #[cfg(target_os = "linux")]
        KeyBackend::Uinput => Ok(Box::new(uinput::UinputInjector::new(
            "headctl virtual keyboard",
        )?)),
        #[cfg(not(target_os = "linux"))]
        KeyBackend::Uinput => Err(Error::Config(
            "the uinput key backend is only available on Linux".into(),
        )),
    }
}

/// Dry-run backend
pub struct LogInjector;

impl KeyInjector for LogInjector {
    fn press(&mut self, key: &Key) -> Result<()> {
        info!(%key, "key down");
        Ok(())
    }

    fn release(&mut self, key: &Key) -> Result<()> {
        info!(%key, "key up");
        Ok(())
    }
}

#[cfg(target_os = "linux")]
mod uinput {
    use super::*;
    use evdev::uinput::{VirtualDevice, VirtualDeviceBuilder};
    use evdev::{AttributeSet, EventType, InputEvent, Key as EvKey};

    const KEY_DOWN: i32 = 1;
    const KEY_UP: i32 = 0;

    /// Every key the mapper can emit, registered on the virtual device
    const SUPPORTED: &[EvKey] = &[
        EvKey::KEY_A,
        EvKey::KEY_B,
        EvKey::KEY_C,
        EvKey::KEY_D,
        EvKey::KEY_E,
        EvKey::KEY_F,
        EvKey::KEY_G,
        EvKey::KEY_H,
        EvKey::KEY_I,
        EvKey::KEY_J,
        EvKey::KEY_K,
        EvKey::KEY_L,
        EvKey::KEY_M,
        EvKey::KEY_N,
        EvKey::KEY_O,
        EvKey::KEY_P,
        EvKey::KEY_Q,
        EvKey::KEY_R,
        EvKey::KEY_S,
        EvKey::KEY_T,
        EvKey::KEY_U,
        EvKey::KEY_V,
        EvKey::KEY_W,
        EvKey::KEY_X,
        EvKey::KEY_Y,
        EvKey::KEY_Z,
        EvKey::KEY_0,
        EvKey::KEY_1,
        EvKey::KEY_2,
        EvKey::KEY_3,
        EvKey::KEY_4,
        EvKey::KEY_5,
        EvKey::KEY_6,
        EvKey::KEY_7,
        EvKey::KEY_8,
        EvKey::KEY_9,
        EvKey::KEY_UP,
        EvKey::KEY_DOWN,
        EvKey::KEY_LEFT,
        EvKey::KEY_RIGHT,
        EvKey::KEY_SPACE,
        EvKey::KEY_ENTER,
        EvKey::KEY_ESC,
        EvKey::KEY_TAB,
    ];

    pub(super) fn ev_key(key: &Key) -> Option<EvKey> {
        let k = match key.as_str() {
            "up" => EvKey::KEY_UP,
            "down" => EvKey::KEY_DOWN,
            "left" => EvKey::KEY_LEFT,
            "right" => EvKey::KEY_RIGHT,
            "space" => EvKey::KEY_SPACE,
            "enter" => EvKey::KEY_ENTER,
            "esc" => EvKey::KEY_ESC,
            "tab" => EvKey::KEY_TAB,
            s => {
                let c = s.chars().next()?;
                let idx = match c {
                    'a'..='z' => c as usize - 'a' as usize,
                    '0'..='9' => 26 + (c as usize - '0' as usize),
                    _ => return None,
                };
                return SUPPORTED.get(idx).copied();
            }
        };
        Some(k)
    }

    pub struct UinputInjector {
        device: VirtualDevice,
    }

    impl UinputInjector {
        pub fn new(name: &str) -> Result<Self> {
            let mut keys = AttributeSet::<EvKey>::new();
            for k in SUPPORTED {
                keys.insert(*k);
            }
            let device = VirtualDeviceBuilder::new()?
                .name(name)
                .with_keys(&keys)?
                .build()?;
            info!(name, "virtual keyboard created");
            Ok(Self { device })
        }

        fn emit(&mut self, key: &Key, value: i32) -> Result<()> {
            let code = ev_key(key).ok_or_else(|| Error::UnknownKey(key.to_string()))?;
            let event = InputEvent::new(EventType::KEY, code.code(), value);
            self.device
                .emit(&[event])
                .map_err(|e| Error::KeyInjection {
                    key: key.to_string(),
                    reason: e.to_string(),
                })
        }
    }

    impl KeyInjector for UinputInjector {
        fn press(&mut self, key: &Key) -> Result<()> {
            self.emit(key, KEY_DOWN)
        }

        fn release(&mut self, key: &Key) -> Result<()> {
            self.emit(key, KEY_UP)
        }
    }
}
