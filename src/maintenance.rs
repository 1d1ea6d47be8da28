//! Background cache maintenance
//!
//! Periodically sweeps expired entries out of a shared cache on a tokio task
//! and reports each sweep over a channel. The cache itself never spawns
//! anything; whoever owns the runtime decides whether this runs.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::cache::CacheManager;

/// Messages sent from the maintenance task to its owner
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MaintenanceMessage {
    /// A sweep finished and removed this many expired entries
    CleanupCompleted { removed: usize },
    /// A sweep hit a storage error
    CleanupFailed(String),
}

/// Configuration for the sweep interval
#[derive(Debug, Clone)]
pub struct MaintenanceConfig {
    /// Time between sweeps
    pub cleanup_interval: Duration,
    /// Whether the sweep task runs at all
    pub enabled: bool,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            cleanup_interval: Duration::from_secs(300),
            enabled: true,
        }
    }
}

/// Handle for the background maintenance task
pub struct MaintenanceHandle {
    /// Sweep reports
    pub receiver: mpsc::Receiver<MaintenanceMessage>,
    shutdown_tx: mpsc::Sender<()>,
}

impl MaintenanceHandle {
    /// Spawns the sweep task onto the current tokio runtime
    ///
    /// The first sweep happens one full interval after spawning. With
    /// `enabled: false` nothing is spawned and the receiver stays empty.
    pub fn spawn<V>(config: MaintenanceConfig, cache: Arc<CacheManager<V>>) -> Self
    where
        V: Clone + Send + Sync + 'static,
    {
        let (msg_tx, msg_rx) = mpsc::channel(32);
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);

        if config.enabled {
            let cleanup_interval = config.cleanup_interval;
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(cleanup_interval);
                // first tick completes immediately
                interval.tick().await;

                loop {
                    tokio::select! {
                        _ = interval.tick() => {
                            let message = match cache.cleanup_expired() {
                                Ok(removed) => {
                                    debug!(removed, "maintenance sweep finished");
                                    MaintenanceMessage::CleanupCompleted { removed }
                                }
                                Err(e) => {
                                    warn!(error = %e, "maintenance sweep failed");
                                    MaintenanceMessage::CleanupFailed(e.to_string())
                                }
                            };
                            // a full channel or a dropped receiver must not stop sweeping
                            let _ = msg_tx.try_send(message);
                        }
                        _ = shutdown_rx.recv() => {
                            debug!("maintenance task shutting down");
                            break;
                        }
                    }
                }
            });
        }

        Self {
            receiver: msg_rx,
            shutdown_tx,
        }
    }

    /// Stops the sweep task
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(()).await;
    }
}

/// Next pending sweep report, without blocking
pub fn try_recv(handle: &mut MaintenanceHandle) -> Option<MaintenanceMessage> {
    handle.receiver.try_recv().ok()
}
