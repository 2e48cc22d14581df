//! Cron-driven wiring around [`crate::runner::run_tick`]. This module owns
//! the `tokio-cron-scheduler` instance; the runner stays free of any
//! particular scheduling backend so it can be unit-tested by calling
//! `run_tick` directly.

use std::sync::Arc;

use sqlx::PgPool;
use tokio_cron_scheduler::{Job, JobScheduler};

use crate::runner::{run_tick, JobDefinition, TickOutcome};

pub struct JobRunner {
    scheduler: JobScheduler,
    pool: PgPool,
}

impl JobRunner {
    pub async fn new(pool: PgPool) -> anyhow::Result<Self> {
        let scheduler = JobScheduler::new().await?;
        Ok(Self { scheduler, pool })
    }

    /// Bind `def` to its cron expression. `run_now` additionally fires one
    /// tick immediately, before the first scheduled firing (S4.1
    /// `register(fn, {cron, name, timezone, runNow})`).
    pub async fn register(&mut self, def: JobDefinition, run_now: bool) -> anyhow::Result<()> {
        let def = Arc::new(def);
        if run_now {
            let outcome = run_tick(&self.pool, &def).await;
            log_tick(&def.name, outcome);
        }

        let pool = self.pool.clone();
        let def_for_job = def.clone();
        let job = Job::new_async(def.cron_expression.as_str(), move |_uuid, _locked| {
            let pool = pool.clone();
            let def = def_for_job.clone();
            Box::pin(async move {
                let outcome = run_tick(&pool, &def).await;
                log_tick(&def.name, outcome);
            })
        })?;

        self.scheduler.add(job).await?;
        Ok(())
    }

    pub async fn start(&mut self) -> anyhow::Result<()> {
        self.scheduler.start().await?;
        Ok(())
    }

    pub async fn shutdown(&mut self) -> anyhow::Result<()> {
        self.scheduler.shutdown().await?;
        Ok(())
    }
}

fn log_tick(name: &str, outcome: anyhow::Result<TickOutcome>) {
    match outcome {
        Ok(TickOutcome::SkippedAlreadyRunning) => {
            tracing::debug!(job = name, "tick skipped: already running");
        }
        Ok(TickOutcome::RescuedStuckRecord) => {
            tracing::warn!(job = name, "rescued stuck running record");
        }
        Ok(TickOutcome::AbortedOnCas) => {
            tracing::warn!(job = name, "tick aborted: lost the running-transition race");
        }
        Ok(TickOutcome::Ran { completed }) => {
            tracing::info!(job = name, completed, "tick ran to completion");
        }
        Err(e) => {
            tracing::error!(job = name, error = %e, "tick failed before reaching the callback");
        }
    }
}
