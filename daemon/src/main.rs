mod cli;
mod daemon;
mod device;
mod dispatch;
mod event;
mod hotkey;
mod paths;
mod process_monitor;
mod settings;
mod shutdown;
mod status;

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::{mpsc, RwLock};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::cli::Args;
use crate::daemon::Daemon;
use crate::device::DeviceSelector;
use crate::dispatch::{DetachedLauncher, Dispatcher};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    if let Err(e) = run().await {
        error!("{e:#}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let args = Args::from_env()?;
    if args.help {
        cli::print_help();
        return Ok(());
    }

    // ── Configuration ─────────────────────────────────────────────────────────
    let home = paths::resolve_home()?;
    let settings_path = args
        .settings
        .clone()
        .unwrap_or_else(|| paths::settings_file_path(&home));
    let initial_settings = settings::load(&settings_path);

    if args.print_settings {
        println!("{}", serde_json::to_string_pretty(&initial_settings)?);
        return Ok(());
    }

    let selector = DeviceSelector::new(args.device.clone().or_else(|| initial_settings.device.clone()));

    if args.list_devices {
        for candidate in device::list_devices() {
            let marker = if (selector.filter)(&candidate.name) { "*" } else { " " };
            println!("{marker} {}\t{}", candidate.path.display(), candidate.name);
        }
        return Ok(());
    }

    // ── Keyboard ──────────────────────────────────────────────────────────────
    let keyboard = device::locate_keyboard(&selector).context("cannot listen for the clip hotkey")?;
    info!(
        keyboard = %keyboard.name,
        path = %keyboard.path.display(),
        hotkey = %initial_settings.clip_hotkey,
        backend = %initial_settings.backend,
        "listening"
    );

    // ── Initial status ────────────────────────────────────────────────────────
    let status_path = args.status.clone().unwrap_or_else(paths::default_status_path);
    let mut initial_status = status::DaemonStatus::new();
    initial_status.keyboard = Some(keyboard.name.clone());
    status::write_status(&status_path, &initial_status);

    let shared_settings = Arc::new(RwLock::new(initial_settings));
    let (event_tx, event_rx) = mpsc::channel::<event::DaemonEvent>(64);

    // ── Background tasks ──────────────────────────────────────────────────────
    tokio::spawn(settings::watch_settings(settings_path, event_tx.clone()));
    tokio::spawn(process_monitor::run(Arc::clone(&shared_settings), event_tx.clone()));
    tokio::spawn(shutdown::forward(event_tx.clone()));
    let reader = tokio::spawn(device::watch(keyboard, selector, event_tx));

    info!("flux-daemon v{} started", env!("CARGO_PKG_VERSION"));

    // ── Event loop ────────────────────────────────────────────────────────────
    let dispatcher = Dispatcher::new(DetachedLauncher, home);
    let daemon = Daemon::new(shared_settings, dispatcher, initial_status, status_path);
    let result = daemon.run(event_rx).await;

    // Closes the device node.
    reader.abort();
    result
}
