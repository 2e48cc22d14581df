//! Cron-tick firing semantics (S4.1 steps 1-5), independent of any
//! particular cron scheduling backend so it can be driven directly in
//! tests.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use qscan_schemas::{JobErrorDetails, JobRecord};
use sqlx::PgPool;

use crate::context::{JobContext, JobOutcome};

pub const DEFAULT_STUCK_THRESHOLD: Duration = Duration::from_secs(2 * 3600);
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(6 * 3600);
pub const DEFAULT_LOG_CAP: usize = 1000;

/// A registered job body. Implementations must be idempotent per
/// invocation — the runner never retries automatically (S4.1 failure
/// semantics).
#[async_trait]
pub trait JobCallback: Send + Sync {
    async fn run(&self, ctx: Arc<JobContext>) -> JobOutcome;
}

pub struct JobDefinition {
    pub name: String,
    pub cron_expression: String,
    pub timezone: String,
    pub machine_name: String,
    pub stuck_threshold: Duration,
    pub timeout: Duration,
    pub callback: Arc<dyn JobCallback>,
}

impl JobDefinition {
    pub fn new(
        name: impl Into<String>,
        cron_expression: impl Into<String>,
        callback: Arc<dyn JobCallback>,
    ) -> Self {
        Self {
            name: name.into(),
            cron_expression: cron_expression.into(),
            timezone: "UTC".to_string(),
            machine_name: hostname_fallback(),
            stuck_threshold: DEFAULT_STUCK_THRESHOLD,
            timeout: DEFAULT_TIMEOUT,
            callback,
        }
    }
}

fn hostname_fallback() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "qscan-daemon".to_string())
}

#[derive(Debug, PartialEq, Eq)]
pub enum TickOutcome {
    /// Another invocation of this job name is already running; this tick
    /// was skipped (single-run-per-name invariant).
    SkippedAlreadyRunning,
    /// A prior running record was older than the stuck threshold and was
    /// marked failed with reason "stuck"; the scheduled tick still did not
    /// start a fresh run in the same pass (S4.1 step 1: "mark failed ...
    /// and continue", evaluated fresh on the next tick).
    RescuedStuckRecord,
    /// The callback ran to completion (success or failure) and the record
    /// reached a terminal status.
    Ran { completed: bool },
    /// The CAS transition to running failed (another writer beat us to
    /// it); this invocation aborts without running the callback.
    AbortedOnCas,
}

/// Execute one cron tick for `def` (S4.1 steps 1-5).
pub async fn run_tick(pool: &PgPool, def: &JobDefinition) -> anyhow::Result<TickOutcome> {
    if let Some(running) = qscan_db::fetch_running(pool, &def.name).await? {
        let started_at = running.record.started_at.unwrap_or(running.record.scheduled_at);
        let age = Utc::now() - started_at;
        if age > chrono::Duration::from_std(def.stuck_threshold).unwrap_or_default() {
            let details = JobErrorDetails {
                message: "stuck".to_string(),
                stack: None,
                code: Some("stuck".to_string()),
                response_snapshot: None,
                timestamp: Utc::now(),
            };
            qscan_db::mark_failed(
                pool,
                running.id,
                "stuck",
                serde_json::to_value(&details)?,
                Utc::now(),
            )
            .await?;
            return Ok(TickOutcome::RescuedStuckRecord);
        }
        return Ok(TickOutcome::SkippedAlreadyRunning);
    }

    let scheduled_at = Utc::now();
    let record = JobRecord::new_scheduled(
        &def.name,
        scheduled_at,
        &def.machine_name,
        &def.cron_expression,
        &def.timezone,
    );
    let id = qscan_db::insert_scheduled(pool, &record).await?;

    let started_at = Utc::now();
    if !qscan_db::mark_running(pool, id, started_at).await? {
        return Ok(TickOutcome::AbortedOnCas);
    }

    let ctx = Arc::new(JobContext::new(DEFAULT_LOG_CAP));
    let outcome = tokio::time::timeout(def.timeout, def.callback.run(ctx.clone())).await;

    let ended_at = Utc::now();
    let completed = match outcome {
        Ok(JobOutcome::Success(result)) => {
            let write_ok = qscan_db::mark_completed(pool, id, result, ended_at).await;
            finalize(pool, id, write_ok, ended_at, "post-completion write failed").await?;
            true
        }
        Ok(JobOutcome::Failure(details)) => {
            let msg = details.message.clone();
            let write_ok = qscan_db::mark_failed(
                pool,
                id,
                &msg,
                serde_json::to_value(&details)?,
                ended_at,
            )
            .await;
            finalize(pool, id, write_ok, ended_at, &msg).await?;
            false
        }
        Err(_elapsed) => {
            let hours = def.timeout.as_secs() / 3600;
            let message = format!("Job timeout after {hours} hours");
            let write_ok = qscan_db::mark_failed(
                pool,
                id,
                &message,
                serde_json::to_value(&JobErrorDetails {
                    message: message.clone(),
                    stack: None,
                    code: Some("timeout".to_string()),
                    response_snapshot: None,
                    timestamp: ended_at,
                })?,
                ended_at,
            )
            .await;
            finalize(pool, id, write_ok, ended_at, &message).await?;
            false
        }
    };

    Ok(TickOutcome::Ran { completed })
}

/// Step 5: if the CAS write itself errored, fall back to an unconditional
/// overwrite so the record can never be left stuck in `running`.
async fn finalize(
    pool: &PgPool,
    id: uuid::Uuid,
    write_result: anyhow::Result<bool>,
    ended_at: DateTime<Utc>,
    fallback_message: &str,
) -> anyhow::Result<()> {
    match write_result {
        Ok(_) => Ok(()),
        Err(e) => {
            tracing::error!(error = %e, "post-completion write failed, forcing terminal state");
            qscan_db::force_mark_failed(pool, id, fallback_message, ended_at).await
        }
    }
}
