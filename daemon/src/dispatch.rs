//! Turns a hotkey match into the configured backend action.
//!
//! The dispatcher only starts processes.  A launched recorder runs in its own
//! process group with no link back to the daemon: stopping the daemon never
//! stops the recorder, and the daemon never blocks on it.
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use tracing::{info, warn};

use crate::settings::{Backend, Settings};

/// Summary line of the desktop notification sent by the `notify` backend.
pub const NOTIFICATION_TITLE: &str = "flux";
pub const NOTIFICATION_BODY: &str = "Clip hotkey pressed";

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("backend {0} not supported")]
    UnsupportedBackend(String),

    #[error("failed to launch {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
}

/// Starts an external program without waiting for it.
pub trait Launcher: Send + Sync {
    fn launch(&self, program: &str, args: &[String]) -> Result<(), DispatchError>;
}

// ── Commands ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecorderCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl RecorderCommand {
    /// `gpu-screen-recorder` in replay mode, one flag per setting.
    pub fn gpu_screen_recorder(settings: &Settings, home: &Path) -> Self {
        let output = settings.output_path(home);
        let args = [
            ("-w", settings.window.clone()),
            ("-f", settings.framerate.to_string()),
            ("-r", settings.replay_time.to_string()),
            ("-c", settings.container.as_str().to_string()),
            ("-o", output.to_string_lossy().into_owned()),
            ("-a", settings.audio.clone()),
            ("-k", settings.codec.clone()),
            ("-q", settings.quality.to_string()),
            ("-fm", settings.framerate_mode.as_str().to_string()),
            ("-bm", settings.bitrate_mode.as_str().to_string()),
        ]
        .into_iter()
        .flat_map(|(flag, value)| [flag.to_string(), value])
        .collect();

        Self {
            program: "gpu-screen-recorder".to_string(),
            args,
        }
    }

    pub fn notification() -> Self {
        Self {
            program: "notify-send".to_string(),
            args: vec![NOTIFICATION_TITLE.to_string(), NOTIFICATION_BODY.to_string()],
        }
    }
}

// ── Dispatcher ────────────────────────────────────────────────────────────────

#[derive(Debug, PartialEq, Eq)]
pub enum Outcome {
    /// The named program was started.
    Launched(String),
    /// The backend's recorder is already running; nothing was started.
    AlreadyRunning,
}

pub struct Dispatcher<L> {
    launcher: L,
    /// Interactive user's home, for `~` in the output path.
    home: PathBuf,
}

impl<L: Launcher> Dispatcher<L> {
    pub fn new(launcher: L, home: PathBuf) -> Self {
        Self { launcher, home }
    }

    /// Runs the action for `settings.backend`.
    ///
    /// `recorder_running` comes from the process monitor; when set, the
    /// recorder is not launched a second time.
    pub fn dispatch(&self, settings: &Settings, recorder_running: bool) -> Result<Outcome, DispatchError> {
        let command = match &settings.backend {
            Backend::GpuScreenRecorder => {
                if recorder_running {
                    return Ok(Outcome::AlreadyRunning);
                }
                RecorderCommand::gpu_screen_recorder(settings, &self.home)
            }
            Backend::Notify => RecorderCommand::notification(),
            Backend::Obs | Backend::Unsupported(_) => {
                return Err(DispatchError::UnsupportedBackend(settings.backend.to_string()));
            }
        };

        info!(program = %command.program, args = ?command.args, "starting backend");
        self.launcher.launch(&command.program, &command.args)?;
        Ok(Outcome::Launched(command.program))
    }

    #[cfg(test)]
    pub fn launcher(&self) -> &L {
        &self.launcher
    }
}

// ── Production launcher ───────────────────────────────────────────────────────

/// Spawns detached children on the tokio runtime.
///
/// The child gets its own process group (terminal Ctrl+C is not forwarded),
/// no stdin, and is not killed when its handle drops.  A reaper task collects
/// the exit status so finished children do not linger as zombies.
#[derive(Debug, Default, Clone, Copy)]
pub struct DetachedLauncher;

impl Launcher for DetachedLauncher {
    fn launch(&self, program: &str, args: &[String]) -> Result<(), DispatchError> {
        let mut command = std::process::Command::new(program);
        command.args(args).stdin(Stdio::null());
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            command.process_group(0);
        }

        let mut child = tokio::process::Command::from(command)
            .kill_on_drop(false)
            .spawn()
            .map_err(|source| DispatchError::Spawn {
                program: program.to_string(),
                source,
            })?;

        let program = program.to_string();
        tokio::spawn(async move {
            match child.wait().await {
                Ok(status) if status.success() => info!(%program, "backend exited"),
                Ok(status) => warn!(%program, %status, "backend exited with failure"),
                Err(e) => warn!(%program, error = %e, "failed to wait for backend"),
            }
        });
        Ok(())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────


#[cfg(test)]
mod tests {
    use super::testing::RecordingLauncher;
    use super::*;
    use crate::settings::{BitrateMode, Container, FramerateMode};

    fn dispatcher() -> Dispatcher<RecordingLauncher> {
        Dispatcher::new(RecordingLauncher::default(), PathBuf::from("/home/alice"))
    }

    fn settings_with(backend: Backend) -> Settings {
        Settings {
            backend,
            ..Settings::default()
        }
    }

    // ── RecorderCommand ───────────────────────────────────────────────────────

    #[test]
    fn default_recorder_arguments() {
        let cmd = RecorderCommand::gpu_screen_recorder(&Settings::default(), Path::new("/home/alice"));
        assert_eq!(cmd.program, "gpu-screen-recorder");
        assert_eq!(
            cmd.args,
            [
                "-w", "screen",
                "-f", "60",
                "-r", "30",
                "-c", "mp4",
                "-o", "/home/alice/Videos/clip",
                "-a", "default_output",
                "-k", "h264",
                "-q", "20",
                "-fm", "vfr",
                "-bm", "cqp",
            ]
        );
    }

    #[test]
    fn recorder_arguments_follow_settings() {
        let settings = Settings {
            window: "DP-2".to_string(),
            framerate: 144,
            replay_time: 120,
            container: Container::Mkv,
            output: "/srv/clips".to_string(),
            audio: "default_input".to_string(),
            codec: "av1".to_string(),
            quality: 35,
            framerate_mode: FramerateMode::Cfr,
            bitrate_mode: BitrateMode::Vbr,
            ..Settings::default()
        };
        let cmd = RecorderCommand::gpu_screen_recorder(&settings, Path::new("/home/alice"));
        assert_eq!(
            cmd.args,
            [
                "-w", "DP-2",
                "-f", "144",
                "-r", "120",
                "-c", "mkv",
                "-o", "/srv/clips",
                "-a", "default_input",
                "-k", "av1",
                "-q", "35",
                "-fm", "cfr",
                "-bm", "vbr",
            ]
        );
    }

    // ── dispatch ──────────────────────────────────────────────────────────────

    #[test]
    fn gpu_screen_recorder_is_launched() {
        let d = dispatcher();
        let outcome = d.dispatch(&Settings::default(), false).unwrap();
        assert_eq!(outcome, Outcome::Launched("gpu-screen-recorder".to_string()));

        let calls = d.launcher().calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, "gpu-screen-recorder");
        assert_eq!(calls[0].1.len(), 20);
    }

    #[test]
    fn running_recorder_is_not_launched_again() {
        let d = dispatcher();
        let outcome = d.dispatch(&Settings::default(), true).unwrap();
        assert_eq!(outcome, Outcome::AlreadyRunning);
        assert!(d.launcher().calls().is_empty());
    }

    #[test]
    fn notify_backend_sends_notification() {
        let d = dispatcher();
        let outcome = d.dispatch(&settings_with(Backend::Notify), true).unwrap();
        assert_eq!(outcome, Outcome::Launched("notify-send".to_string()));
        assert_eq!(
            d.launcher().calls(),
            vec![(
                "notify-send".to_string(),
                vec![NOTIFICATION_TITLE.to_string(), NOTIFICATION_BODY.to_string()]
            )]
        );
    }

    #[test]
    fn unknown_backend_is_reported_and_nothing_spawns() {
        let d = dispatcher();
        let err = d
            .dispatch(&settings_with(Backend::Unsupported("unknown-tool".to_string())), false)
            .unwrap_err();
        assert!(matches!(&err, DispatchError::UnsupportedBackend(name) if name == "unknown-tool"));
        assert_eq!(err.to_string(), "backend unknown-tool not supported");
        assert!(d.launcher().calls().is_empty());
    }

    #[test]
    fn obs_is_not_supported_yet() {
        let d = dispatcher();
        let err = d.dispatch(&settings_with(Backend::Obs), false).unwrap_err();
        assert!(matches!(err, DispatchError::UnsupportedBackend(name) if name == "obs"));
        assert!(d.launcher().calls().is_empty());
    }

    // ── DetachedLauncher ──────────────────────────────────────────────────────

    #[tokio::test]
    async fn detached_launcher_reports_missing_program() {
        let err = DetachedLauncher
            .launch("flux-no-such-program-7c1e", &[])
            .unwrap_err();
        assert!(matches!(err, DispatchError::Spawn { ref program, .. } if program == "flux-no-such-program-7c1e"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn detached_launcher_starts_program() {
        DetachedLauncher.launch("true", &[]).unwrap();
    }
}
