use std::sync::Arc;
use sysinfo::{ProcessesToUpdate, System};
use tokio::sync::{mpsc, RwLock};
use tokio::time::{interval, Duration};
use tracing::info;

use crate::event::DaemonEvent;
use crate::settings::Settings;

const POLL_INTERVAL_SECS: u64 = 2;
/// Linux truncates the kernel-side process name (`comm`) to this many bytes.
const COMM_LEN: usize = 15;

/// Polls the OS process list every [`POLL_INTERVAL_SECS`] seconds and emits
/// [`DaemonEvent::RecorderStarted`] / [`DaemonEvent::RecorderStopped`] whenever
/// the configured backend's recorder appears or disappears.
///
/// The backend is re-read on every tick, so switching backends in the
/// settings file switches the watched executable too.
pub async fn run(settings: Arc<RwLock<Settings>>, tx: mpsc::Sender<DaemonEvent>) {
    let mut sys = System::new();
    let mut running = false;
    let mut ticker = interval(Duration::from_secs(POLL_INTERVAL_SECS));

    loop {
        ticker.tick().await;

        let target = settings.read().await.backend.executable();

        let found = match target {
            Some(target) => {
                sys.refresh_processes(ProcessesToUpdate::All, true);
                sys.processes().values().any(|p| {
                    let exe_name = p.exe().and_then(|e| e.file_name()).and_then(|n| n.to_str());
                    is_recorder(&p.name().to_string_lossy(), exe_name, target)
                })
            }
            None => false,
        };

        let event = match (running, found) {
            (false, true) => DaemonEvent::RecorderStarted,
            (true, false) => DaemonEvent::RecorderStopped,
            _ => continue, // No change.
        };
        running = found;
        info!(recorder = target.unwrap_or("none"), running, "recorder state changed");
        if tx.send(event).await.is_err() {
            break;
        }
    }
}

/// Whether a process with the given name (and executable file name, when
/// readable) is the `target` recorder.
fn is_recorder(name: &str, exe_name: Option<&str>, target: &str) -> bool {
    if exe_name.is_some_and(|exe| exe == target) {
        return true;
    }
    if name == target {
        return true;
    }
    // `comm` is truncated, e.g. "gpu-screen-reco" for gpu-screen-recorder.
    name.len() == COMM_LEN && target.len() > COMM_LEN && target.starts_with(name)
}
