//! Process supervisor (S4.8): one subsystem shared by the job runner and
//! the cycled orchestrator. Installs a panic hook and signal handlers,
//! and on shutdown rescues `running` job records to `failed` and flushes
//! registered close callbacks before the process exits.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use sqlx::PgPool;
use tokio::signal::unix::{signal, SignalKind};
use tracing::{error, info, warn};

static CRASHED: AtomicBool = AtomicBool::new(false);

/// Installs a panic hook that flips [`has_crashed`] before delegating to
/// whatever hook was previously installed, so a panicking job step or
/// orchestrator cycle is distinguishable from a clean signal shutdown.
/// Rust has no "unhandled rejection" analog to catch separately — a panic
/// on any spawned task is the closest equivalent, and `tokio::spawn`
/// already isolates it to that task's `JoinHandle` without killing the
/// process, so this hook is what lets the supervisor notice it happened.
pub fn install_panic_hook() {
    let previous = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        CRASHED.store(true, Ordering::SeqCst);
        previous(info);
    }));
}

pub fn has_crashed() -> bool {
    CRASHED.load(Ordering::SeqCst)
}

#[cfg(test)]
fn reset_crashed_for_test() {
    CRASHED.store(false, Ordering::SeqCst);
}

/// An external resource the supervisor must flush or close before the
/// process exits: a provider's connection pool, an open export file, a
/// metrics exporter's background task.
#[async_trait]
pub trait CloseCallback: Send + Sync {
    async fn close(&self) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    Signal,
    Crash,
}

#[derive(Debug, Clone, Copy)]
pub struct ShutdownOutcome {
    pub reason: ShutdownReason,
    pub rescued_job_records: u64,
    pub exit_code: i32,
}

pub struct Supervisor {
    pool: PgPool,
    marker: String,
    close_callbacks: Vec<Arc<dyn CloseCallback>>,
}

impl Supervisor {
    pub fn new(pool: PgPool, marker: impl Into<String>) -> Self {
        Self { pool, marker: marker.into(), close_callbacks: Vec::new() }
    }

    pub fn register_close_callback(&mut self, callback: Arc<dyn CloseCallback>) {
        self.close_callbacks.push(callback);
    }

    /// Blocks until SIGINT, SIGTERM, or a hooked panic is observed, then
    /// drains active job records and close callbacks. The caller's `main`
    /// should exit the process with `outcome.exit_code`.
    pub async fn run_until_shutdown(&self) -> Result<ShutdownOutcome> {
        let reason = wait_for_shutdown_signal().await;
        self.drain(reason).await
    }

    async fn drain(&self, reason: ShutdownReason) -> Result<ShutdownOutcome> {
        let rescued = match qscan_db::rescue_all_running(&self.pool, &self.marker).await {
            Ok(count) => {
                if count > 0 {
                    info!(count, "rescued running job records to failed on shutdown");
                }
                count
            }
            Err(err) => {
                error!(%err, "failed to rescue running job records on shutdown");
                0
            }
        };

        for callback in &self.close_callbacks {
            if let Err(err) = callback.close().await {
                warn!(%err, "close callback failed during shutdown");
            }
        }

        let exit_code = match reason {
            ShutdownReason::Signal => 0,
            ShutdownReason::Crash => 1,
        };
        Ok(ShutdownOutcome { reason, rescued_job_records: rescued, exit_code })
    }
}

async fn wait_for_shutdown_signal() -> ShutdownReason {
    let mut sigterm = signal(SignalKind::terminate()).expect("install SIGTERM handler");
    let mut sigint = signal(SignalKind::interrupt()).expect("install SIGINT handler");

    loop {
        tokio::select! {
            _ = sigterm.recv() => {
                info!("received SIGTERM");
                return ShutdownReason::Signal;
            }
            _ = sigint.recv() => {
                info!("received SIGINT");
                return ShutdownReason::Signal;
            }
            _ = crash_poll() => {
                return ShutdownReason::Crash;
            }
        }
    }
}

async fn crash_poll() {
    loop {
        if has_crashed() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
    }
}
