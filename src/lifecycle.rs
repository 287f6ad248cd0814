//! Run/Stop Lifecycle
//!
//! `Running → Stopping → Stopped`. A stop request (OS signal or inbox `quit`)
//! flips the flag; the scheduler notices at the next iteration boundary, so the
//! tick in flight always finishes.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info};

/// Scheduler phases
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Phase {
    /// Ticking
    Running = 0,
    /// Stop observed, final persist in progress
    Stopping = 1,
    /// Loop exited
    Stopped = 2,
}

impl From<u8> for Phase {
    fn from(v: u8) -> Self {
        match v {
            0 => Phase::Running,
            1 => Phase::Stopping,
            _ => Phase::Stopped,
        }
    }
}

/// Shared stop flag plus phase
pub struct Lifecycle {
    phase: AtomicU8,
    stop_tx: watch::Sender<bool>,
}

impl Lifecycle {
    pub fn new() -> Arc<Self> {
        let (stop_tx, _) = watch::channel(false);
        Arc::new(Self {
            phase: AtomicU8::new(Phase::Running as u8),
            stop_tx,
        })
    }

    pub fn current_phase(&self) -> Phase {
        Phase::from(self.phase.load(Ordering::SeqCst))
    }

    pub fn transition_to(&self, phase: Phase) {
        let old = Phase::from(self.phase.swap(phase as u8, Ordering::SeqCst));
        if old != phase {
            debug!("Lifecycle: {:?} -> {:?}", old, phase);
        }
    }

    /// Ask the scheduler to stop after the current tick
    pub fn request_stop(&self) {
        if !self.stop_tx.send_replace(true) {
            info!("Stop requested");
        }
    }

    pub fn stop_requested(&self) -> bool {
        *self.stop_tx.borrow()
    }

    /// Receiver that wakes when a stop is requested
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.stop_tx.subscribe()
    }

    /// Sleep for `duration`, returning early on a stop request
    pub async fn sleep(&self, duration: std::time::Duration) {
        let mut stop_rx = self.subscribe();
        if *stop_rx.borrow_and_update() {
            return;
        }
        tokio::select! {
            _ = tokio::time::sleep(duration) => {}
            _ = stop_rx.changed() => {}
        }
    }
}

/// Resolves on SIGINT or SIGTERM
pub async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
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
