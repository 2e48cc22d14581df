//! Crash-recovery harness: drives the job runner through a simulated crash
//! (a `running` record left behind, no completion write) and the
//! supervisor's rescue path, so a test can assert the next tick starts a
//! genuinely fresh run rather than resuming or double-counting the old one.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use qscan_jobs::context::{JobContext, JobOutcome};
use qscan_jobs::runner::JobCallback;
use sqlx::PgPool;

/// A [`JobCallback`] that counts invocations and always succeeds —
/// deterministic, no I/O, no sleeping — for asserting exactly how many
/// times a job body ran across a crash/recovery cycle.
#[derive(Default)]
pub struct CountingCallback {
    pub runs: AtomicUsize,
}

impl CountingCallback {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn run_count(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl JobCallback for CountingCallback {
    async fn run(&self, _ctx: Arc<JobContext>) -> JobOutcome {
        self.runs.fetch_add(1, Ordering::SeqCst);
        JobOutcome::Success(None)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CrashReport {
    pub rescued_records: u64,
}

/// Simulates a process crash: marks every `running` job record as `failed`
/// with the given marker, the same primitive the real process supervisor
/// runs on signal shutdown. A job name left `running` with no callback
/// still executing (the test's equivalent of the process having died)
/// is exactly what this puts right before the next tick fires.
pub async fn simulate_crash(pool: &PgPool, marker: &str) -> anyhow::Result<CrashReport> {
    let rescued_records = qscan_db::rescue_all_running(pool, marker).await?;
    Ok(CrashReport { rescued_records })
}
