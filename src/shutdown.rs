//! Graceful shutdown handling
//!
//! Coordinates termination of the evaluator, watchdog, worker pool, and
//! retention sweeper loops on SIGINT/SIGTERM.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::{info, warn};

/// Shutdown coordinator for graceful termination
#[derive(Clone)]
pub struct ShutdownCoordinator {
    /// Flag indicating shutdown has been requested
    shutdown_requested: Arc<AtomicBool>,
    /// Notifier for shutdown signal
    shutdown_notify: Arc<Notify>,
}

impl std::fmt::Debug for ShutdownCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShutdownCoordinator")
            .field(
                "shutdown_requested",
                &self.shutdown_requested.load(Ordering::SeqCst),
            )
            .finish()
    }
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        Self {
            shutdown_requested: Arc::new(AtomicBool::new(false)),
            shutdown_notify: Arc::new(Notify::new()),
        }
    }

    /// Request shutdown; idempotent
    pub fn request_shutdown(&self) {
        if !self.shutdown_requested.swap(true, Ordering::SeqCst) {
            info!("Shutdown requested");
            self.shutdown_notify.notify_waiters();
        }
    }

    /// Check if shutdown has been requested
    pub fn is_shutdown_requested(&self) -> bool {
        self.shutdown_requested.load(Ordering::SeqCst)
    }

    /// Wait for the shutdown signal
    ///
    /// Returns immediately if shutdown was already requested, so loops can
    /// safely select on this after checking the flag.
    pub async fn wait_for_shutdown(&self) {
        if self.is_shutdown_requested() {
            return;
        }
        self.shutdown_notify.notified().await;
    }

    /// Install signal handlers for SIGINT and SIGTERM
    ///
    /// Spawns a background task that listens for signals and calls
    /// request_shutdown().
    pub fn install_signal_handlers(&self) -> tokio::task::JoinHandle<()> {
        let coordinator = self.clone();

        tokio::spawn(async move {
            #[cfg(unix)]
            {
                use tokio::signal::unix::{signal, SignalKind};

                let mut sigint =
                    signal(SignalKind::interrupt()).expect("Failed to install SIGINT handler");
                let mut sigterm =
                    signal(SignalKind::terminate()).expect("Failed to install SIGTERM handler");

                tokio::select! {
                    _ = sigint.recv() => {
                        warn!("Received SIGINT, initiating graceful shutdown...");
                        coordinator.request_shutdown();
                    }
                    _ = sigterm.recv() => {
                        warn!("Received SIGTERM, initiating graceful shutdown...");
                        coordinator.request_shutdown();
                    }
                }
            }

            #[cfg(not(unix))]
            {
                use tokio::signal;

                signal::ctrl_c()
                    .await
                    .expect("Failed to install Ctrl+C handler");
                warn!("Received Ctrl+C, initiating graceful shutdown...");
                coordinator.request_shutdown();
            }
        })
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}
