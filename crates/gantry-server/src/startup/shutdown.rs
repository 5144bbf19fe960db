//! Graceful shutdown handling for the Gantry server

use std::future::Future;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Broadcasts a single shutdown notification to every background task.
#[derive(Clone)]
pub struct ShutdownSignal {
    sender: broadcast::Sender<()>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(1);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.sender.subscribe()
    }

    pub fn shutdown(&self) {
        let _ = self.sender.send(());
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}

async fn ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to install Ctrl+C handler: {}", e);
        std::future::pending::<()>().await;
    }
}

#[cfg(unix)]
async fn terminate() {
    use tokio::signal::unix::{SignalKind, signal};

    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            sigterm.recv().await;
        }
        Err(e) => {
            error!("Failed to install SIGTERM handler: {}", e);
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn terminate() {
    std::future::pending::<()>().await;
}

/// Fires `signal` on Ctrl+C or SIGTERM.
pub fn listen_for_shutdown(signal: ShutdownSignal) {
    tokio::spawn(async move {
        tokio::select! {
            _ = ctrl_c() => info!("Received Ctrl+C, initiating graceful shutdown..."),
            _ = terminate() => info!("Received SIGTERM, initiating graceful shutdown..."),
        }
        signal.shutdown();
    });
}

/// Waits up to `grace` for `tasks`, abandoning the stragglers.
pub async fn drain_tasks(tasks: Vec<JoinHandle<()>>, grace: Duration) {
    let count = tasks.len();
    let drained = tokio::time::timeout(grace, async {
        for task in tasks {
            if let Err(e) = task.await {
                warn!("Background task ended abnormally: {}", e);
            }
        }
    })
    .await;
    match drained {
        Ok(()) => info!(tasks = count, "Background tasks stopped"),
        Err(_) => warn!("Shutdown grace period of {:?} elapsed", grace),
    }
}

/// Runs `future` unless shutdown arrives first.
pub async fn run_with_shutdown<F, T>(future: F, mut shutdown_rx: broadcast::Receiver<()>) -> Option<T>
where
    F: Future<Output = T>,
{
    tokio::select! {
        result = future => Some(result),
        _ = shutdown_rx.recv() => {
            warn!("Shutdown signal received, cancelling operation");
            None
        }
    }
}
