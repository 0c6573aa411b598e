use crate::hotkey::KeyEvent;
use crate::settings::Settings;

/// Everything the main loop reacts to.  Key events come from a single
/// producer, so they arrive in device order.
#[derive(Debug)]
pub enum DaemonEvent {
    /// A press, release or repeat from the keyboard.
    Key(KeyEvent),
    /// The device reported a key code with no kernel name; skipped.
    UnrecognizedKey(u16),
    /// Reading the keyboard failed; a re-acquire is in progress.
    DeviceLost(String),
    /// A keyboard was found again after `DeviceLost`.  Carries its name.
    DeviceReacquired(String),
    /// Re-acquiring the keyboard gave up; the daemon must exit.
    DeviceFailed(String),
    /// The settings file changed on disk (defaults if it became invalid).
    SettingsReloaded(Settings),
    /// The backend's recorder process appeared in the process list.
    RecorderStarted,
    /// The recorder process is gone.
    RecorderStopped,
    /// SIGINT or SIGTERM received.
    Shutdown,
}
