//! Signal handling for graceful shutdown

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::event::DaemonEvent;

/// Waits for SIGTERM or SIGINT, then asks the event loop to stop.
pub async fn forward(tx: mpsc::Sender<DaemonEvent>) {
    wait().await;
    let _ = tx.send(DaemonEvent::Shutdown).await;
}

#[cfg(unix)]
async fn wait() {
    use tokio::signal::unix::{signal, SignalKind};

    let (mut sigterm, mut sigint) = match (
        signal(SignalKind::terminate()),
        signal(SignalKind::interrupt()),
    ) {
        (Ok(term), Ok(int)) => (term, int),
        (Err(e), _) | (_, Err(e)) => {
            warn!(error = %e, "failed to register signal handlers, falling back to Ctrl+C");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };

    tokio::select! {
        _ = sigterm.recv() => {
            debug!("received SIGTERM");
        }
        _ = sigint.recv() => {
            debug!("received SIGINT");
        }
    }
}

#[cfg(not(unix))]
async fn wait() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for Ctrl+C");
        std::future::pending::<()>().await;
    }
    debug!("received Ctrl+C");
}
