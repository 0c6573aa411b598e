//! Keyboard discovery and the raw key-event reader.
//!
//! Enumeration order of `/dev/input/event*` is decided by the kernel and can
//! change between boots, so "first matching device" is only stable on
//! machines with a single keyboard.  Set an explicit device path (`--device`
//! or the `device` setting) for reproducible selection.
//!
//! The device is opened shared, not grabbed: typing keeps working normally
//! while the daemon listens.
//!
//! On non-Linux platforms the public API compiles but every lookup fails
//! with [`DeviceError::Unsupported`].
use std::future::Future;
use std::io;
use std::path::PathBuf;
use std::time::Duration;

use tracing::debug;

/// How many times a lost keyboard is looked for again before giving up.
pub const REACQUIRE_ATTEMPTS: u32 = 5;
pub const REACQUIRE_DELAY: Duration = Duration::from_secs(1);

#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    #[error("no keyboard found (is the daemon allowed to read /dev/input?)")]
    NoKeyboardFound,

    #[error("failed to open input device {}: {source}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("{} does not report key events", .0.display())]
    NotKeyboard(PathBuf),

    #[error("failed to read input device: {0}")]
    Read(#[source] io::Error),

    #[cfg(not(target_os = "linux"))]
    #[error("raw keyboard input is only supported on Linux")]
    Unsupported,
}

// ── Selection ─────────────────────────────────────────────────────────────────

/// Name predicate deciding which key-capable device counts as a keyboard.
pub type KeyboardFilter = fn(&str) -> bool;

/// Matches "keyboard" anywhere in the name, or "at trans" for the built-in
/// "AT Translated Set 2 keyboard" found on many laptops.  Case-insensitive.
pub fn default_filter(name: &str) -> bool {
    let name = name.to_lowercase();
    name.contains("keyboard") || name.contains("at trans")
}

/// What enumeration learned about one input node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub path: PathBuf,
    pub name: String,
    pub has_keys: bool,
}

/// Index of the first key-capable candidate whose name passes `filter`.
pub fn select_keyboard(candidates: &[Candidate], filter: KeyboardFilter) -> Option<usize> {
    candidates.iter().position(|c| c.has_keys && filter(&c.name))
}

/// How to find the keyboard: an explicit path, or enumeration plus a filter.
#[derive(Debug, Clone)]
pub struct DeviceSelector {
    pub path: Option<PathBuf>,
    pub filter: KeyboardFilter,
}

impl DeviceSelector {
    pub fn new(path: Option<PathBuf>) -> Self {
        Self {
            path,
            filter: default_filter,
        }
    }
}

impl Default for DeviceSelector {
    fn default() -> Self {
        Self::new(None)
    }
}

/// Calls `locate` up to `attempts` times, sleeping `delay` before each try.
/// Returns the last error if every attempt fails.
pub async fn reacquire<K, F, Fut>(attempts: u32, delay: Duration, mut locate: F) -> Result<K, DeviceError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<K, DeviceError>>,
{
    let mut last = DeviceError::NoKeyboardFound;
    for attempt in 1..=attempts {
        tokio::time::sleep(delay).await;
        match locate().await {
            Ok(found) => return Ok(found),
            Err(e) => {
                debug!(attempt, error = %e, "keyboard re-acquire attempt failed");
                last = e;
            }
        }
    }
    Err(last)
}

pub use imp::{list_devices, locate_keyboard, watch};

// ── Linux implementation ──────────────────────────────────────────────────────

#[cfg(target_os = "linux")]
mod imp {
    use std::path::PathBuf;

    use evdev::{Device, EventType, InputEventKind};
    use tokio::sync::mpsc;
    use tracing::{info, warn};

    use super::{reacquire, select_keyboard, Candidate, DeviceError, DeviceSelector};
    use super::{REACQUIRE_ATTEMPTS, REACQUIRE_DELAY};
    use crate::event::DaemonEvent;
    use crate::hotkey::{KeyCode, KeyEvent, Transition};

    /// An opened keyboard.  Dropping it closes the device node.
    pub struct Keyboard {
        pub path: PathBuf,
        pub name: String,
        device: Device,
    }

    fn describe(path: PathBuf, device: &Device) -> Candidate {
        Candidate {
            path,
            name: device.name().unwrap_or("Unknown").to_string(),
            has_keys: device.supported_events().contains(EventType::KEY),
        }
    }

    /// Every key-capable input device, in enumeration order.
    pub fn list_devices() -> Vec<Candidate> {
        evdev::enumerate()
            .map(|(path, device)| describe(path, &device))
            .filter(|c| c.has_keys)
            .collect()
    }

    /// Opens the keyboard described by `selector`.
    pub fn locate_keyboard(selector: &DeviceSelector) -> Result<Keyboard, DeviceError> {
        if let Some(path) = &selector.path {
            let device = Device::open(path).map_err(|source| DeviceError::Open {
                path: path.clone(),
                source,
            })?;
            let candidate = describe(path.clone(), &device);
            if !candidate.has_keys {
                return Err(DeviceError::NotKeyboard(path.clone()));
            }
            return Ok(Keyboard {
                path: candidate.path,
                name: candidate.name,
                device,
            });
        }

        let (candidates, devices): (Vec<Candidate>, Vec<Device>) = evdev::enumerate()
            .map(|(path, device)| (describe(path, &device), device))
            .unzip();

        let index = select_keyboard(&candidates, selector.filter).ok_or(DeviceError::NoKeyboardFound)?;
        let candidate = candidates[index].clone();
        let device = devices
            .into_iter()
            .nth(index)
            .ok_or(DeviceError::NoKeyboardFound)?;

        Ok(Keyboard {
            path: candidate.path,
            name: candidate.name,
            device,
        })
    }

    /// Streams key events from `keyboard` into `tx` until the receiver is dropped.
    ///
    /// When a read fails the keyboard is looked up again with `selector`,
    /// [`REACQUIRE_ATTEMPTS`] times, [`REACQUIRE_DELAY`] apart.  The outcome is
    /// reported as `DeviceReacquired` or `DeviceFailed`.
    pub async fn watch(keyboard: Keyboard, selector: DeviceSelector, tx: mpsc::Sender<DaemonEvent>) {
        let mut keyboard = keyboard;
        loop {
            let name = keyboard.name.clone();
            let error = match read_events(keyboard.device, &tx).await {
                Ok(()) => return,
                Err(e) => e,
            };

            warn!(device = %name, error = %error, "lost keyboard, trying to re-acquire");
            if tx.send(DaemonEvent::DeviceLost(error.to_string())).await.is_err() {
                return;
            }

            let lookup = || locate_keyboard_blocking(selector.clone());
            match reacquire(REACQUIRE_ATTEMPTS, REACQUIRE_DELAY, lookup).await {
                Ok(found) => {
                    info!(device = %found.name, path = %found.path.display(), "keyboard re-acquired");
                    if tx.send(DaemonEvent::DeviceReacquired(found.name.clone())).await.is_err() {
                        return;
                    }
                    keyboard = found;
                }
                Err(e) => {
                    let _ = tx.send(DaemonEvent::DeviceFailed(e.to_string())).await;
                    return;
                }
            }
        }
    }

    /// [`locate_keyboard`] on the blocking pool; enumeration opens every
    /// `/dev/input` node.
    pub(super) async fn locate_keyboard_blocking(selector: DeviceSelector) -> Result<Keyboard, DeviceError> {
        tokio::task::spawn_blocking(move || locate_keyboard(&selector))
            .await
            .map_err(|e| DeviceError::Read(std::io::Error::other(e)))?
    }

    /// Returns `Ok(())` only when the receiving side has gone away.
    async fn read_events(device: Device, tx: &mpsc::Sender<DaemonEvent>) -> Result<(), DeviceError> {
        let mut stream = device.into_event_stream().map_err(DeviceError::Read)?;
        loop {
            let ev = stream.next_event().await.map_err(DeviceError::Read)?;
            let InputEventKind::Key(key) = ev.kind() else {
                continue;
            };
            let Some(transition) = Transition::from_value(ev.value()) else {
                continue;
            };

            let event = match KeyCode::from_symbol(key.code(), &format!("{key:?}")) {
                Ok(code) => DaemonEvent::Key(KeyEvent::new(code, transition)),
                Err(_) => DaemonEvent::UnrecognizedKey(key.code()),
            };
            if tx.send(event).await.is_err() {
                return Ok(());
            }
        }
    }
}

// ── Non-Linux stub ────────────────────────────────────────────────────────────

#[cfg(not(target_os = "linux"))]
mod imp {
    use std::path::PathBuf;

    use tokio::sync::mpsc;

    use super::{Candidate, DeviceError, DeviceSelector};
    use crate::event::DaemonEvent;

    pub struct Keyboard {
        pub path: PathBuf,
        pub name: String,
    }

    pub fn list_devices() -> Vec<Candidate> {
        Vec::new()
    }

    pub fn locate_keyboard(_selector: &DeviceSelector) -> Result<Keyboard, DeviceError> {
        Err(DeviceError::Unsupported)
    }

    pub async fn watch(_keyboard: Keyboard, _selector: DeviceSelector, _tx: mpsc::Sender<DaemonEvent>) {}
}

// ── Tests ─────────────────────────────────────────────────────────────────────
