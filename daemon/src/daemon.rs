//! The daemon's event loop.
//!
//! One task owns the hotkey matcher and consumes [`DaemonEvent`]s strictly in
//! arrival order.  Settings are read from the shared cache on every key event,
//! so a saved settings file takes effect on the next keystroke without any
//! file I/O on the hot path.

use std::ops::ControlFlow;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Result};
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, error, info, warn};

use crate::dispatch::{Dispatcher, Launcher, Outcome};
use crate::event::DaemonEvent;
use crate::hotkey::{HotkeyMatcher, KeyEvent, MatchResult};
use crate::settings::Settings;
use crate::status::{self, DaemonState, DaemonStatus};

/// How long a freshly launched recorder counts as running before the process
/// monitor has seen it.  Longer than the monitor's poll interval.
pub const LAUNCH_GRACE: Duration = Duration::from_secs(5);

/// Why the loop stopped.
#[derive(Debug, PartialEq, Eq)]
pub enum Stop {
    Shutdown,
    DeviceFailed(String),
}

pub struct Daemon<L> {
    matcher: HotkeyMatcher,
    settings: Arc<RwLock<Settings>>,
    dispatcher: Dispatcher<L>,
    recorder_running: bool,
    /// Set when we start the recorder ourselves, cleared once the monitor
    /// reports on it or the grace period runs out.
    launched_at: Option<Instant>,
    launch_grace: Duration,
    status: DaemonStatus,
    status_path: PathBuf,
}

impl<L: Launcher> Daemon<L> {
    pub fn new(
        settings: Arc<RwLock<Settings>>,
        dispatcher: Dispatcher<L>,
        status: DaemonStatus,
        status_path: PathBuf,
    ) -> Self {
        Self {
            matcher: HotkeyMatcher::new(),
            settings,
            dispatcher,
            recorder_running: false,
            launched_at: None,
            launch_grace: LAUNCH_GRACE,
            status,
            status_path,
        }
    }

    /// Processes events until shutdown.  A keyboard that could not be
    /// re-acquired is an error.
    pub async fn run(mut self, mut rx: mpsc::Receiver<DaemonEvent>) -> Result<()> {
        info!("event loop started");
        while let Some(event) = rx.recv().await {
            match self.handle(event).await {
                ControlFlow::Continue(()) => {}
                ControlFlow::Break(Stop::Shutdown) => return Ok(()),
                ControlFlow::Break(Stop::DeviceFailed(e)) => {
                    bail!("keyboard lost and could not be re-acquired: {e}")
                }
            }
        }
        info!("all event sources closed");
        Ok(())
    }

    pub async fn handle(&mut self, event: DaemonEvent) -> ControlFlow<Stop> {
        match event {
            DaemonEvent::Key(key) => self.on_key(&key).await,

            DaemonEvent::UnrecognizedKey(code) => {
                debug!(code, "ignoring unrecognized key code");
            }

            DaemonEvent::DeviceLost(e) => {
                // Releases during the outage were never seen.
                self.matcher.reset();
                self.status.error = Some(format!("Keyboard lost: {e}"));
                self.write_status();
            }

            DaemonEvent::DeviceReacquired(name) => {
                info!(keyboard = %name, "listening again");
                self.matcher.reset();
                self.status.keyboard = Some(name);
                self.status.error = None;
                self.write_status();
            }

            DaemonEvent::DeviceFailed(e) => {
                error!(error = %e, "giving up on the keyboard");
                self.status.keyboard = None;
                self.status.error = Some(format!("Keyboard lost: {e}"));
                self.write_status();
                return ControlFlow::Break(Stop::DeviceFailed(e));
            }

            DaemonEvent::SettingsReloaded(settings) => {
                info!(
                    backend = %settings.backend,
                    hotkey = %settings.clip_hotkey,
                    "settings reloaded"
                );
                *self.settings.write().await = settings;
            }

            DaemonEvent::RecorderStarted => {
                self.recorder_running = true;
                self.launched_at = None;
                self.status.state = DaemonState::Recording;
                self.write_status();
            }

            DaemonEvent::RecorderStopped => {
                self.recorder_running = false;
                self.launched_at = None;
                self.status.state = DaemonState::Idle;
                self.write_status();
            }

            DaemonEvent::Shutdown => {
                info!("shutting down");
                self.status.state = DaemonState::Idle;
                self.status.keyboard = None;
                self.status.error = None;
                self.write_status();
                return ControlFlow::Break(Stop::Shutdown);
            }
        }
        ControlFlow::Continue(())
    }

    async fn on_key(&mut self, key: &KeyEvent) {
        let settings = Arc::clone(&self.settings);
        let settings = settings.read().await;

        if self.matcher.on_event(key, &settings.clip_hotkey) != MatchResult::Matched {
            return;
        }
        info!(hotkey = %settings.clip_hotkey, backend = %settings.backend, "clip hotkey pressed");

        let recorder_running = self.recorder_running();
        match self.dispatcher.dispatch(&settings, recorder_running) {
            Ok(Outcome::Launched(program)) => {
                debug!(%program, "backend started");
                if settings.backend.executable().is_some() {
                    self.launched_at = Some(Instant::now());
                }
                self.status.mark_triggered();
                self.status.error = None;
            }
            Ok(Outcome::AlreadyRunning) => {
                info!(backend = %settings.backend, "recorder already running, not starting another");
                return;
            }
            Err(e) => {
                warn!(error = %e, "hotkey action failed");
                self.status.error = Some(e.to_string());
            }
        }
        self.write_status();
    }

    /// The monitor's view, or a launch of ours it has not polled yet.
    fn recorder_running(&mut self) -> bool {
        if let Some(at) = self.launched_at {
            if at.elapsed() < self.launch_grace {
                return true;
            }
            debug!("launched recorder never showed up in the process list");
            self.launched_at = None;
        }
        self.recorder_running
    }

    fn write_status(&self) {
        status::write_status(&self.status_path, &self.status);
    }

    #[cfg(test)]
    fn matcher(&self) -> &HotkeyMatcher {
        &self.matcher
    }
}
