//! Graceful shutdown coordination.

use tokio::sync::broadcast;
use tracing::{info, warn};

/// Shutdown signal sender.
pub type ShutdownTx = broadcast::Sender<()>;

/// Shutdown signal receiver.
pub type ShutdownRx = broadcast::Receiver<()>;

pub fn shutdown_channel() -> (ShutdownTx, ShutdownRx) {
    broadcast::channel(1)
}

/// Resolves on SIGINT or SIGTERM (Ctrl+C elsewhere).
pub async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let (mut sigint, mut sigterm) = match (
            signal(SignalKind::interrupt()),
            signal(SignalKind::terminate()),
        ) {
            (Ok(sigint), Ok(sigterm)) => (sigint, sigterm),
            (Err(error), _) | (_, Err(error)) => {
                warn!(%error, "Could not install signal handlers, falling back to Ctrl+C");
                let _ = tokio::signal::ctrl_c().await;
                info!("Received Ctrl+C, shutting down");
                return;
            }
        };

        tokio::select! {
            _ = sigint.recv() => info!("Received SIGINT, shutting down"),
            _ = sigterm.recv() => info!("Received SIGTERM, shutting down"),
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(error) = tokio::signal::ctrl_c().await {
            warn!(%error, "Could not listen for Ctrl+C");
            return;
        }
        info!("Received Ctrl+C, shutting down");
    }
}

/// Sends the shutdown signal once `wait_for_shutdown_signal` resolves.
pub fn spawn_signal_listener(tx: ShutdownTx) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        let _ = tx.send(());
    })
}
