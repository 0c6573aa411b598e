use notify::{Config as NotifyConfig, RecommendedWatcher, RecursiveMode, Watcher};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::event::DaemonEvent;
use crate::hotkey::{HotkeyCombo, KeyError, DEFAULT_COMBO};
use crate::paths;

pub const DEFAULT_CLIP_LENGTH_SECS: u32 = 30;
pub const DEFAULT_WINDOW: &str = "screen";
pub const DEFAULT_FRAMERATE: u32 = 60;
pub const DEFAULT_REPLAY_TIME_SECS: u32 = 30;
/// `~` is expanded against the interactive user's home at launch time.
pub const DEFAULT_OUTPUT: &str = "~/Videos/clip";
pub const DEFAULT_CODEC: &str = "h264";
pub const DEFAULT_QUALITY: u32 = 20;
pub const DEFAULT_AUDIO: &str = "default_output";

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("failed to read settings file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse settings: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("clip_hotkey must name at least one key")]
    EmptyHotkey,

    #[error("clip_hotkey contains an invalid key name: {0:?}")]
    InvalidKey(String),
}

impl From<KeyError> for SettingsError {
    fn from(e: KeyError) -> Self {
        match e {
            KeyError::EmptyCombo => Self::EmptyHotkey,
            KeyError::InvalidName(name) => Self::InvalidKey(name),
            KeyError::UnrecognizedKeyCode(code) => Self::InvalidKey(code.to_string()),
        }
    }
}

// ── Closed value sets ─────────────────────────────────────────────────────────

/// Tool invoked when the hotkey fires.
///
/// Unknown names are kept rather than rejected so that the dispatcher can
/// report exactly which backend the user asked for.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Backend {
    #[default]
    GpuScreenRecorder,
    Obs,
    /// Desktop notification only; useful for testing the hotkey.
    Notify,
    Unsupported(String),
}

impl Backend {
    pub fn as_str(&self) -> &str {
        match self {
            Backend::GpuScreenRecorder => "gpu-screen-recorder",
            Backend::Obs => "obs",
            Backend::Notify => "notify",
            Backend::Unsupported(name) => name,
        }
    }

    /// Executable name of the long-running recorder process, if the backend has one.
    pub fn executable(&self) -> Option<&'static str> {
        match self {
            Backend::GpuScreenRecorder => Some("gpu-screen-recorder"),
            Backend::Obs => Some("obs"),
            Backend::Notify | Backend::Unsupported(_) => None,
        }
    }
}

impl From<String> for Backend {
    fn from(name: String) -> Self {
        match name.as_str() {
            "gpu-screen-recorder" => Backend::GpuScreenRecorder,
            "obs" => Backend::Obs,
            "notify" => Backend::Notify,
            _ => Backend::Unsupported(name),
        }
    }
}

impl From<Backend> for String {
    fn from(backend: Backend) -> Self {
        backend.as_str().to_string()
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Container {
    #[default]
    Mp4,
    Mkv,
    Flv,
    Webm,
}

impl Container {
    pub fn as_str(self) -> &'static str {
        match self {
            Container::Mp4 => "mp4",
            Container::Mkv => "mkv",
            Container::Flv => "flv",
            Container::Webm => "webm",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FramerateMode {
    #[default]
    Vfr,
    Cfr,
    Content,
}

impl FramerateMode {
    pub fn as_str(self) -> &'static str {
        match self {
            FramerateMode::Vfr => "vfr",
            FramerateMode::Cfr => "cfr",
            FramerateMode::Content => "content",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BitrateMode {
    Auto,
    Qp,
    #[default]
    Cqp,
    Vbr,
    Cbr,
}

impl BitrateMode {
    pub fn as_str(self) -> &'static str {
        match self {
            BitrateMode::Auto => "auto",
            BitrateMode::Qp => "qp",
            BitrateMode::Cqp => "cqp",
            BitrateMode::Vbr => "vbr",
            BitrateMode::Cbr => "cbr",
        }
    }
}

// ── Settings ──────────────────────────────────────────────────────────────────

/// Validated user settings. Deserialized from `~/.config/flux/settings.json`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Settings {
    pub backend: Backend,
    /// Clip length in seconds, as chosen in the settings UI.
    pub clip_length: u32,
    pub clip_hotkey: HotkeyCombo,
    /// Capture target passed to the recorder (`screen`, a monitor name, or a window id).
    pub window: String,
    pub framerate: u32,
    /// Replay buffer length in seconds.
    pub replay_time: u32,
    pub container: Container,
    pub output: String,
    pub codec: String,
    pub quality: u32,
    pub framerate_mode: FramerateMode,
    pub bitrate_mode: BitrateMode,
    pub audio: String,
    /// Explicit input device; skips keyboard auto-detection when set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            backend: Backend::default(),
            clip_length: DEFAULT_CLIP_LENGTH_SECS,
            clip_hotkey: HotkeyCombo::default(),
            window: DEFAULT_WINDOW.to_string(),
            framerate: DEFAULT_FRAMERATE,
            replay_time: DEFAULT_REPLAY_TIME_SECS,
            container: Container::default(),
            output: DEFAULT_OUTPUT.to_string(),
            codec: DEFAULT_CODEC.to_string(),
            quality: DEFAULT_QUALITY,
            framerate_mode: FramerateMode::default(),
            bitrate_mode: BitrateMode::default(),
            audio: DEFAULT_AUDIO.to_string(),
            device: None,
        }
    }
}

impl Settings {
    /// The output path with a leading `~` resolved against `home`.
    pub fn output_path(&self, home: &Path) -> PathBuf {
        paths::expand_home(&self.output, home)
    }
}

/// On-disk shape: every key optional, hotkey names not yet validated.
#[derive(Debug, Deserialize)]
#[serde(default)]
struct SettingsFile {
    backend: Backend,
    clip_length: u32,
    clip_hotkey: Vec<String>,
    window: String,
    framerate: u32,
    replay_time: u32,
    container: Container,
    output: String,
    codec: String,
    quality: u32,
    framerate_mode: FramerateMode,
    bitrate_mode: BitrateMode,
    audio: String,
    device: Option<PathBuf>,
}

impl Default for SettingsFile {
    fn default() -> Self {
        let d = Settings::default();
        Self {
            backend: d.backend,
            clip_length: d.clip_length,
            clip_hotkey: DEFAULT_COMBO.iter().map(|k| k.to_string()).collect(),
            window: d.window,
            framerate: d.framerate,
            replay_time: d.replay_time,
            container: d.container,
            output: d.output,
            codec: d.codec,
            quality: d.quality,
            framerate_mode: d.framerate_mode,
            bitrate_mode: d.bitrate_mode,
            audio: d.audio,
            device: d.device,
        }
    }
}

impl TryFrom<SettingsFile> for Settings {
    type Error = SettingsError;

    fn try_from(file: SettingsFile) -> Result<Self, Self::Error> {
        Ok(Self {
            backend: file.backend,
            clip_length: file.clip_length,
            clip_hotkey: HotkeyCombo::new(&file.clip_hotkey)?,
            window: file.window,
            framerate: file.framerate,
            replay_time: file.replay_time,
            container: file.container,
            output: file.output,
            codec: file.codec,
            quality: file.quality,
            framerate_mode: file.framerate_mode,
            bitrate_mode: file.bitrate_mode,
            audio: file.audio,
            device: file.device,
        })
    }
}

// ── Loading ───────────────────────────────────────────────────────────────────

/// Parses and validates a settings document.
pub fn parse(json: &str) -> Result<Settings, SettingsError> {
    let file: SettingsFile = serde_json::from_str(json)?;
    Settings::try_from(file)
}

/// Loads the settings file at `path`, returning `Settings::default()` if it does not exist.
/// Returns an error if the file exists but cannot be read, parsed or validated.
pub fn load_or_default(path: &Path) -> Result<Settings, SettingsError> {
    if !path.exists() {
        return Ok(Settings::default());
    }
    let content = std::fs::read_to_string(path).map_err(|source| SettingsError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    parse(&content)
}

/// Settings provider used by the daemon: never fails.
///
/// Any read, parse or validation error is logged and the documented
/// defaults are returned instead.
pub fn load(path: &Path) -> Settings {
    match load_or_default(path) {
        Ok(settings) => {
            if let Backend::Unsupported(name) = &settings.backend {
                warn!(backend = %name, "unrecognized backend in settings; the hotkey will do nothing");
            }
            settings
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "invalid settings, using defaults");
            Settings::default()
        }
    }
}

// ── Watching ──────────────────────────────────────────────────────────────────

/// Watches the parent directory of `path`.  Whenever the settings file is
/// created, modified or removed, reloads it and sends a `SettingsReloaded` event.
///
/// If that directory does not exist yet (first run, before the settings UI
/// has saved anything), the nearest existing ancestor is watched instead
/// and the watch moves down as the missing directories are created.
pub async fn watch_settings(path: PathBuf, tx: mpsc::Sender<DaemonEvent>) {
    let (watch_tx, mut watch_rx) = mpsc::channel::<notify::Event>(16);

    let mut watcher = match RecommendedWatcher::new(
        move |res: notify::Result<notify::Event>| {
            if let Ok(event) = res {
                let _ = watch_tx.blocking_send(event);
            }
        },
        NotifyConfig::default(),
    ) {
        Ok(w) => w,
        Err(e) => {
            warn!(error = %e, "failed to create settings watcher; changes need a restart");
            return;
        }
    };

    // Watch the directory rather than the file so editor-style atomic saves
    // (write-new + rename) are seen.
    let settings_dir = match path.parent() {
        Some(d) if !d.as_os_str().is_empty() => d.to_path_buf(),
        _ => PathBuf::from("."),
    };

    let Some(mut watched) = arm(&mut watcher, &settings_dir) else {
        return;
    };
    info!(path = %path.display(), dir = %watched.display(), "watching settings");

    while let Some(event) = watch_rx.recv().await {
        if watched != settings_dir {
            let Some(closer) = nearest_existing(&settings_dir) else {
                continue;
            };
            if closer == watched {
                continue;
            }
            let _ = watcher.unwatch(&watched);
            match arm(&mut watcher, &settings_dir) {
                Some(dir) => watched = dir,
                None => return,
            }
            debug!(dir = %watched.display(), "settings watch moved");
            // The file may have been written before the new watch was in place.
            if watched == settings_dir
                && path.exists()
                && tx.send(DaemonEvent::SettingsReloaded(load(&path))).await.is_err()
            {
                break;
            }
            continue;
        }

        if !is_settings_change(&event, &path) {
            continue;
        }
        debug!(kind = ?event.kind, "settings file changed");
        if tx.send(DaemonEvent::SettingsReloaded(load(&path))).await.is_err() {
            break;
        }
    }
}

/// Watches `dir`, or its nearest existing ancestor.  Returns the directory
/// actually watched.
fn arm(watcher: &mut RecommendedWatcher, dir: &Path) -> Option<PathBuf> {
    let target = nearest_existing(dir)?;
    if let Err(e) = watcher.watch(&target, RecursiveMode::NonRecursive) {
        warn!(
            dir = %target.display(),
            error = %e,
            "cannot watch settings directory; changes need a restart"
        );
        return None;
    }
    Some(target)
}

fn nearest_existing(dir: &Path) -> Option<PathBuf> {
    dir.ancestors().find(|d| d.is_dir()).map(Path::to_path_buf)
}

fn is_settings_change(event: &notify::Event, path: &Path) -> bool {
    let affects_settings = event
        .paths
        .iter()
        .any(|p| p.file_name().is_some() && p.file_name() == path.file_name());
    let is_write = matches!(
        event.kind,
        notify::EventKind::Create(_) | notify::EventKind::Modify(_) | notify::EventKind::Remove(_)
    );
    affects_settings && is_write
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(dir: &tempfile::TempDir, content: &str) -> PathBuf {
        let path = dir.path().join("settings.json");
        std::fs::write(&path, content).unwrap();
        path
    }

    // ── defaults ──────────────────────────────────────────────────────────────

    #[test]
    fn default_values() {
        let s = Settings::default();
        assert_eq!(s.backend, Backend::GpuScreenRecorder);
        assert_eq!(s.clip_length, 30);
        assert_eq!(s.clip_hotkey, HotkeyCombo::new(["KEY_LEFTALT", "KEY_Z"]).unwrap());
        assert_eq!(s.window, "screen");
        assert_eq!(s.framerate, 60);
        assert_eq!(s.replay_time, 30);
        assert_eq!(s.container, Container::Mp4);
        assert_eq!(s.output, "~/Videos/clip");
        assert_eq!(s.codec, "h264");
        assert_eq!(s.quality, 20);
        assert_eq!(s.framerate_mode, FramerateMode::Vfr);
        assert_eq!(s.bitrate_mode, BitrateMode::Cqp);
        assert_eq!(s.audio, "default_output");
        assert!(s.device.is_none());
    }

    #[test]
    fn defaults_serialize_to_documented_document() {
        let value = serde_json::to_value(Settings::default()).unwrap();
        assert_eq!(
            value,
            serde_json::json!({
                "backend": "gpu-screen-recorder",
                "clip_length": 30,
                "clip_hotkey": ["KEY_LEFTALT", "KEY_Z"],
                "window": "screen",
                "framerate": 60,
                "replay_time": 30,
                "container": "mp4",
                "output": "~/Videos/clip",
                "codec": "h264",
                "quality": 20,
                "framerate_mode": "vfr",
                "bitrate_mode": "cqp",
                "audio": "default_output"
            })
        );
    }

    // ── load_or_default ───────────────────────────────────────────────────────

    #[test]
    fn missing_file_returns_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nonexistent.json");
        assert_eq!(load_or_default(&path).unwrap(), Settings::default());
        assert_eq!(load(&path), Settings::default());
    }

    #[test]
    fn parses_full_document() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            &dir,
            r#"{
                "backend": "gpu-screen-recorder",
                "clip_length": 45,
                "clip_hotkey": ["KEY_LEFTCTRL", "KEY_LEFTSHIFT", "KEY_S"],
                "window": "DP-1",
                "framerate": 144,
                "replay_time": 90,
                "container": "mkv",
                "output": "/mnt/clips",
                "codec": "hevc",
                "quality": 30,
                "framerate_mode": "cfr",
                "bitrate_mode": "vbr",
                "audio": "default_input",
                "device": "/dev/input/event3"
            }"#,
        );

        let s = load_or_default(&path).unwrap();
        assert_eq!(s.clip_length, 45);
        assert_eq!(
            s.clip_hotkey,
            HotkeyCombo::new(["KEY_S", "KEY_LEFTSHIFT", "KEY_LEFTCTRL"]).unwrap()
        );
        assert_eq!(s.window, "DP-1");
        assert_eq!(s.framerate, 144);
        assert_eq!(s.replay_time, 90);
        assert_eq!(s.container, Container::Mkv);
        assert_eq!(s.output, "/mnt/clips");
        assert_eq!(s.codec, "hevc");
        assert_eq!(s.quality, 30);
        assert_eq!(s.framerate_mode, FramerateMode::Cfr);
        assert_eq!(s.bitrate_mode, BitrateMode::Vbr);
        assert_eq!(s.audio, "default_input");
        assert_eq!(s.device.as_deref(), Some(Path::new("/dev/input/event3")));
    }

    #[test]
    fn partial_document_uses_field_defaults() {
        // The settings UI only writes these three keys.
        let s = parse(r#"{"backend":"obs","clip_length":10,"clip_hotkey":["KEY_F9"]}"#).unwrap();
        assert_eq!(s.backend, Backend::Obs);
        assert_eq!(s.clip_length, 10);
        assert_eq!(s.clip_hotkey, HotkeyCombo::new(["KEY_F9"]).unwrap());
        assert_eq!(s.framerate, DEFAULT_FRAMERATE);
        assert_eq!(s.output, DEFAULT_OUTPUT);
        assert_eq!(s.bitrate_mode, BitrateMode::Cqp);
    }

    #[test]
    fn unknown_keys_are_ignored() {
        let s = parse(r#"{"theme":"dark","framerate":30}"#).unwrap();
        assert_eq!(s.framerate, 30);
    }

    #[test]
    fn unknown_backend_is_kept_by_name() {
        let s = parse(r#"{"backend":"unknown-tool"}"#).unwrap();
        assert_eq!(s.backend, Backend::Unsupported("unknown-tool".to_string()));
        assert_eq!(s.backend.to_string(), "unknown-tool");
        assert_eq!(s.backend.executable(), None);
    }

    #[test]
    fn invalid_json_is_an_error_but_load_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(&dir, "{ this is not json");
        assert!(matches!(load_or_default(&path), Err(SettingsError::Parse(_))));
        assert_eq!(load(&path), Settings::default());
    }

    #[test]
    fn wrong_value_type_is_an_error() {
        assert!(matches!(parse(r#"{"framerate":"sixty"}"#), Err(SettingsError::Parse(_))));
    }

    #[test]
    fn unrecognized_enum_values_are_rejected() {
        assert!(parse(r#"{"container":"avi"}"#).is_err());
        assert!(parse(r#"{"framerate_mode":"sometimes"}"#).is_err());
        assert!(parse(r#"{"bitrate_mode":"fast"}"#).is_err());
    }

    #[test]
    fn empty_hotkey_is_rejected() {
        assert!(matches!(parse(r#"{"clip_hotkey":[]}"#), Err(SettingsError::EmptyHotkey)));
        let dir = tempfile::tempdir().unwrap();
        let path = write(&dir, r#"{"clip_hotkey":[],"framerate":30}"#);
        // The whole document is discarded, not just the hotkey.
        assert_eq!(load(&path), Settings::default());
    }

    #[test]
    fn invalid_key_name_is_rejected() {
        match parse(r#"{"clip_hotkey":["KEY_LEFTALT","Alt+Z"]}"#) {
            Err(SettingsError::InvalidKey(name)) => assert_eq!(name, "Alt+Z"),
            other => panic!("expected InvalidKey, got {other:?}"),
        }
    }

    #[test]
    fn hotkey_names_are_normalised() {
        let s = parse(r#"{"clip_hotkey":["leftalt","z","KEY_Z"]}"#).unwrap();
        assert_eq!(s.clip_hotkey, HotkeyCombo::default());
    }

    #[test]
    fn unreadable_path_is_a_read_error() {
        // A directory exists but cannot be read as a file.
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(load_or_default(dir.path()), Err(SettingsError::Read { .. })));
    }

    // ── output_path ───────────────────────────────────────────────────────────

    #[test]
    fn output_path_expands_home() {
        let s = Settings::default();
        assert_eq!(s.output_path(Path::new("/home/alice")), PathBuf::from("/home/alice/Videos/clip"));
    }

    // ── watcher filter ────────────────────────────────────────────────────────

    #[test]
    fn settings_change_filter() {
        use notify::event::{AccessKind, CreateKind, ModifyKind};
        let path = Path::new("/home/alice/.config/flux/settings.json");

        let modify = notify::Event::new(notify::EventKind::Modify(ModifyKind::Any))
            .add_path(path.to_path_buf());
        assert!(is_settings_change(&modify, path));

        let other_file = notify::Event::new(notify::EventKind::Create(CreateKind::File))
            .add_path(PathBuf::from("/home/alice/.config/flux/settings.json.tmp"));
        assert!(!is_settings_change(&other_file, path));

        let access = notify::Event::new(notify::EventKind::Access(AccessKind::Any))
            .add_path(path.to_path_buf());
        assert!(!is_settings_change(&access, path));
    }

    #[test]
    fn nearest_existing_walks_up_to_a_real_directory() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("config").join("flux");
        assert_eq!(nearest_existing(&missing).unwrap(), dir.path());
        assert_eq!(nearest_existing(dir.path()).unwrap(), dir.path());
    }

    #[tokio::test]
    async fn watcher_picks_up_directory_created_after_start() {
        let dir = tempfile::tempdir().unwrap();
        let settings_dir = dir.path().join("config").join("flux");
        let path = settings_dir.join("settings.json");
        let (tx, mut rx) = mpsc::channel(8);
        let task = tokio::spawn(watch_settings(path.clone(), tx));

        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
        std::fs::create_dir(dir.path().join("config")).unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
        std::fs::create_dir(&settings_dir).unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
        std::fs::write(&path, r#"{"framerate":144}"#).unwrap();

        let reloaded = tokio::time::timeout(std::time::Duration::from_secs(5), async {
            loop {
                match rx.recv().await {
                    Some(DaemonEvent::SettingsReloaded(s)) if s.framerate == 144 => break s,
                    Some(_) => continue,
                    None => panic!("watcher stopped"),
                }
            }
        })
        .await
        .expect("no reload event");
        assert_eq!(reloaded.framerate, 144);
        task.abort();
    }

    #[tokio::test]
    async fn watcher_reports_rewritten_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(&dir, r#"{"framerate":30}"#);
        let (tx, mut rx) = mpsc::channel(8);
        let task = tokio::spawn(watch_settings(path.clone(), tx));

        // Give the watcher a moment to register before writing.
        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
        std::fs::write(&path, r#"{"framerate":120}"#).unwrap();

        let reloaded = tokio::time::timeout(std::time::Duration::from_secs(5), async {
            loop {
                match rx.recv().await {
                    Some(DaemonEvent::SettingsReloaded(s)) if s.framerate == 120 => break s,
                    Some(_) => continue,
                    None => panic!("watcher stopped"),
                }
            }
        })
        .await
        .expect("no reload event");
        assert_eq!(reloaded.framerate, 120);
        task.abort();
    }
}
