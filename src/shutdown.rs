use std::time::Duration;

use actix_web::dev::ServerHandle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Health server pieces owned by the coordinator
pub struct HealthServer {
    pub handle: ServerHandle,
    pub task: JoinHandle<Result<(), std::io::Error>>,
}

/// Handles graceful shutdown of the agent
///
/// This module orchestrates graceful shutdown by:
/// 1. Listening for shutdown signals (SIGTERM, SIGINT/CTRL+C)
/// 2. Signaling the poller to stop taking new jobs
/// 3. Stopping the health server
/// 4. Waiting for the in-flight job, bounded by the grace period
pub struct ShutdownCoordinator {
    health: Option<HealthServer>,
    poller_handle: JoinHandle<()>,
    shutdown_tx: watch::Sender<bool>,
    grace: Duration,
}

impl ShutdownCoordinator {
    /// Create a new shutdown coordinator
    pub fn new(
        health: Option<HealthServer>,
        poller_handle: JoinHandle<()>,
        shutdown_tx: watch::Sender<bool>,
        grace: Duration,
    ) -> Self {
        Self {
            health,
            poller_handle,
            shutdown_tx,
            grace,
        }
    }

    /// Wait for a shutdown signal, then drain
    pub async fn wait_for_shutdown(self) {
        let ctrl_c = async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for CTRL+C: {}", e);
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut signal) => {
                    signal.recv().await;
                }
                Err(e) => {
                    error!("Failed to install SIGTERM signal handler: {}", e);
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {
                info!("Received CTRL+C signal, initiating graceful shutdown...");
            }
            _ = terminate => {
                info!("Received SIGTERM signal, initiating graceful shutdown...");
            }
        }

        self.shutdown().await
    }

    /// Perform the actual shutdown sequence
    pub async fn shutdown(self) {
        // 1. Signal the poller to stop (it finishes the current job)
        info!("Signaling poller to stop taking new jobs...");
        if let Err(e) = self.shutdown_tx.send(true) {
            warn!("Poller already gone: {:?}", e);
        }

        // 2. Stop health server
        if let Some(health) = self.health {
            info!("Stopping health server...");
            health.handle.stop(true).await;
            match health.task.await {
                Ok(Ok(())) => info!("Health server stopped"),
                Ok(Err(e)) => error!("Health server encountered error during shutdown: {:?}", e),
                Err(e) => error!("Health server task panicked: {:?}", e),
            }
        }

        // 3. Wait for the in-flight job, bounded by the grace period
        info!("Waiting up to {:?} for the in-flight job...", self.grace);
        let mut poller = self.poller_handle;
        match tokio::time::timeout(self.grace, &mut poller).await {
            Ok(Ok(())) => info!("Poller stopped"),
            Ok(Err(e)) => error!("Poller task failed: {:?}", e),
            Err(_) => {
                error!(
                    "Grace period of {:?} expired, abandoning in-flight job",
                    self.grace
                );
                poller.abort();
            }
        }

        info!("Graceful shutdown completed");
    }
}
