use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::warn;

/// Current operational state of the daemon.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
#[serde(rename_all = "lowercase")]
pub enum DaemonState {
    /// Listening for the hotkey; no recorder process is running.
    Idle,
    /// The backend's recorder process is running.
    Recording,
}

/// Runtime status written by the daemon as JSON for the settings UI and scripts.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct DaemonStatus {
    /// Daemon binary version (set from Cargo.toml at compile time).
    pub version: String,
    /// Current operational state.
    pub state: DaemonState,
    /// Name of the keyboard being watched, if one is open.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keyboard: Option<String>,
    /// RFC 3339 timestamp of the last hotkey action that started a program.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_trigger: Option<String>,
    /// Human-readable message for the most recent non-fatal error.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DaemonStatus {
    /// Constructs the initial idle status on daemon startup.
    pub fn new() -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            state: DaemonState::Idle,
            keyboard: None,
            last_trigger: None,
            error: None,
        }
    }

    /// Stamps `last_trigger` with the current local time.
    pub fn mark_triggered(&mut self) {
        self.last_trigger = Some(chrono::Local::now().to_rfc3339());
    }
}

impl Default for DaemonStatus {
    fn default() -> Self {
        Self::new()
    }
}

/// Serializes `status` to JSON and writes it to `path`.
/// Creates the parent directory if it does not exist.
/// Failures are logged and otherwise ignored; a status write must never
/// take the daemon down.
pub fn write_status(path: &Path, status: &DaemonStatus) {
    if let Some(parent) = path.parent() {
        if let Err(e) = std::fs::create_dir_all(parent) {
            warn!(dir = %parent.display(), error = %e, "failed to create status directory");
            return;
        }
    }
    match serde_json::to_string_pretty(status) {
        Ok(content) => {
            if let Err(e) = std::fs::write(path, content) {
                warn!(path = %path.display(), error = %e, "failed to write status file");
            }
        }
        Err(e) => warn!(error = %e, "failed to serialize status"),
    }
}
