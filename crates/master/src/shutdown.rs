//! Stop coordination for the scheduling loop.
//!
//! A stop comes from SIGTERM/SIGINT, from the wall-clock run timer, or
//! programmatically. The loop checks for it at tick boundaries and races
//! every blocking receive against [`ShutdownCoordinator::cancelled`].

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{RwLock, broadcast};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

/// What asked the run to stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ShutdownSignal {
    /// SIGTERM signal received
    Sigterm,
    /// SIGINT signal received (Ctrl+C)
    Sigint,
    /// Wall-clock run bound elapsed
    Timeout,
    /// Programmatic stop requested
    Programmatic,
}

impl std::fmt::Display for ShutdownSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sigterm => write!(f, "SIGTERM"),
            Self::Sigint => write!(f, "SIGINT"),
            Self::Timeout => write!(f, "TIMEOUT"),
            Self::Programmatic => write!(f, "PROGRAMMATIC"),
        }
    }
}

/// Shutdown progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ShutdownPhase {
    /// Normal operation
    Running,
    /// Stop requested, loop finishing its current step
    Initiating,
    /// Terminating live workers
    StoppingWorkers,
    /// Every worker reaped
    Complete,
}

/// Shared stop flag with a broadcast for waiters.
pub struct ShutdownCoordinator {
    phase: RwLock<ShutdownPhase>,
    shutdown_initiated: AtomicBool,
    signal: RwLock<Option<ShutdownSignal>>,
    shutdown_tx: broadcast::Sender<ShutdownSignal>,
}

impl ShutdownCoordinator {
    #[must_use]
    pub fn new() -> Self {
        let (shutdown_tx, _) = broadcast::channel(16);
        Self {
            phase: RwLock::new(ShutdownPhase::Running),
            shutdown_initiated: AtomicBool::new(false),
            signal: RwLock::new(None),
            shutdown_tx,
        }
    }

    /// Get the current shutdown phase
    pub async fn phase(&self) -> ShutdownPhase {
        *self.phase.read().await
    }

    /// The signal that started the shutdown, if any.
    pub async fn signal(&self) -> Option<ShutdownSignal> {
        *self.signal.read().await
    }

    /// Check if shutdown has been initiated
    #[must_use]
    pub fn is_shutdown_initiated(&self) -> bool {
        self.shutdown_initiated.load(Ordering::Acquire)
    }

    /// Subscribe to shutdown notifications
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ShutdownSignal> {
        self.shutdown_tx.subscribe()
    }

    /// Resolves once a stop has been requested.
    pub async fn cancelled(&self) {
        let mut rx = self.shutdown_tx.subscribe();
        if self.is_shutdown_initiated() {
            return;
        }
        // Lagged or closed also means the stop went out.
        let _ = rx.recv().await;
    }

    /// Request a stop. Later requests are ignored.
    pub async fn initiate_shutdown(&self, signal: ShutdownSignal) {
        if self
            .shutdown_initiated
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!(signal = %signal, "shutdown already in progress, ignoring duplicate signal");
            return;
        }

        info!(signal = %signal, "initiating shutdown");
        *self.signal.write().await = Some(signal);
        *self.phase.write().await = ShutdownPhase::Initiating;

        if let Err(e) = self.shutdown_tx.send(signal) {
            debug!("no active subscribers for shutdown signal: {}", e);
        }
    }

    /// Mark that live workers are being terminated.
    pub async fn begin_stopping_workers(&self) {
        *self.phase.write().await = ShutdownPhase::StoppingWorkers;
    }

    /// Mark the shutdown finished.
    pub async fn complete(&self) {
        *self.phase.write().await = ShutdownPhase::Complete;
        info!("shutdown complete");
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

/// Install OS signal handlers (SIGTERM, SIGINT)
#[must_use]
pub fn install_signal_handlers(coordinator: Arc<ShutdownCoordinator>) -> JoinHandle<()> {
    debug!("installing OS signal handlers");

    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{SignalKind, signal};

            let mut sigterm = match signal(SignalKind::terminate()) {
                Ok(s) => s,
                Err(e) => {
                    error!(error = %e, "failed to install SIGTERM handler");
                    return;
                }
            };

            let mut sigint = match signal(SignalKind::interrupt()) {
                Ok(s) => s,
                Err(e) => {
                    error!(error = %e, "failed to install SIGINT handler");
                    return;
                }
            };

            tokio::select! {
                _ = sigterm.recv() => {
                    info!("received SIGTERM");
                    coordinator.initiate_shutdown(ShutdownSignal::Sigterm).await;
                }
                _ = sigint.recv() => {
                    info!("received SIGINT");
                    coordinator.initiate_shutdown(ShutdownSignal::Sigint).await;
                }
            }
        }

        #[cfg(not(unix))]
        {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "failed to listen for Ctrl+C");
                return;
            }

            info!("received Ctrl+C");
            coordinator.initiate_shutdown(ShutdownSignal::Sigint).await;
        }
    })
}

/// Request a stop once `limit` of wall-clock time has passed.
#[must_use]
pub fn arm_run_timer(coordinator: Arc<ShutdownCoordinator>, limit: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::select! {
            () = tokio::time::sleep(limit) => {
                info!(limit_secs = limit.as_secs_f64(), "run time bound reached");
                coordinator.initiate_shutdown(ShutdownSignal::Timeout).await;
            }
            () = coordinator.cancelled() => {}
        }
    })
}
