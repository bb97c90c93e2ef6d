//! Graceful shutdown
//!
//! SIGINT or SIGTERM triggers a broadcast to every subscriber. The
//! reconciliation loop finishes its current cycle and returns; the controller
//! then waits up to the grace period before exiting.

use std::future::Future;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

const DEFAULT_GRACE_PERIOD_SECS: u64 = 30;

/// Fans a single shutdown request out to every subscriber
#[derive(Clone)]
pub struct ShutdownCoordinator {
    tx: broadcast::Sender<()>,
    grace_period: Duration,
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new(Duration::from_secs(DEFAULT_GRACE_PERIOD_SECS))
    }
}

impl ShutdownCoordinator {
    pub fn new(grace_period: Duration) -> Self {
        let (tx, _) = broadcast::channel(1);
        Self { tx, grace_period }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.tx.subscribe()
    }

    pub fn shutdown(&self) {
        // No receivers means nothing is left to stop
        let _ = self.tx.send(());
    }

    /// Trigger shutdown on the first SIGINT or SIGTERM
    pub fn listen_for_signals(&self) {
        let coordinator = self.clone();
        tokio::spawn(async move {
            shutdown_signal().await;
            coordinator.shutdown();
        });
    }

    /// Await `task`, giving up after the grace period
    pub async fn drain<T>(&self, task: impl Future<Output = T>) -> Option<T> {
        match tokio::time::timeout(self.grace_period, task).await {
            Ok(result) => Some(result),
            Err(_) => {
                warn!(
                    "Shutdown did not complete within grace period ({:?})",
                    self.grace_period
                );
                None
            }
        }
    }
}

/// Wait for SIGINT (Ctrl+C) or SIGTERM
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
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
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_grace_period() {
        let coordinator = ShutdownCoordinator::default();
        assert_eq!(
            coordinator.grace_period,
            Duration::from_secs(DEFAULT_GRACE_PERIOD_SECS)
        );
    }

    #[tokio::test]
    async fn test_shutdown_reaches_every_subscriber() {
        let coordinator = ShutdownCoordinator::default();
        let mut first = coordinator.subscribe();
        let mut second = coordinator.subscribe();

        coordinator.shutdown();

        assert!(first.recv().await.is_ok());
        assert!(second.recv().await.is_ok());
    }

    #[test]
    fn test_shutdown_without_subscribers_is_harmless() {
        ShutdownCoordinator::default().shutdown();
    }

    #[tokio::test]
    async fn test_drain_bounds_slow_tasks() {
        let coordinator = ShutdownCoordinator::new(Duration::from_millis(20));

        assert_eq!(coordinator.drain(async { 7 }).await, Some(7));
        let slow = tokio::time::sleep(Duration::from_secs(5));
        assert_eq!(coordinator.drain(slow).await, None);
    }
}
