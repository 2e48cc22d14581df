/// Firing a second tick while the first is still `running` is a no-op
/// (single-run-per-name invariant, S4.1 step 1). DB-backed, skipped if
/// MQS_DATABASE_URL is not set.
use async_trait::async_trait;
use qscan_jobs::{JobCallback, JobContext, JobDefinition, JobOutcome, TickOutcome};
use std::sync::Arc;
use std::time::Duration;

struct NeverFinishes;

#[async_trait]
impl JobCallback for NeverFinishes {
    async fn run(&self, _ctx: Arc<JobContext>) -> JobOutcome {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        JobOutcome::Success(None)
    }
}

struct Succeeds;

#[async_trait]
impl JobCallback for Succeeds {
    async fn run(&self, ctx: Arc<JobContext>) -> JobOutcome {
        ctx.append_log("job started", qscan_schemas::LogLevel::Info);
        JobOutcome::Success(Some(serde_json::json!({"ok": true})))
    }
}

async fn connect() -> Option<sqlx::PgPool> {
    let url = std::env::var(qscan_db::ENV_DB_URL).ok()?;
    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(4)
        .connect(&url)
        .await
        .ok()?;
    qscan_db::migrate(&pool).await.ok()?;
    Some(pool)
}

#[tokio::test]
async fn second_tick_is_skipped_while_first_is_running() -> anyhow::Result<()> {
    let pool = match connect().await {
        Some(p) => p,
        None => {
            eprintln!("SKIP: MQS_DATABASE_URL not set");
            return Ok(());
        }
    };

    let def = JobDefinition::new(
        "scenario-concurrent-tick",
        "0 0 * * * *",
        Arc::new(NeverFinishes),
    );

    let pool2 = pool.clone();
    let def_name = def.name.clone();
    let first = tokio::spawn(async move {
        let def = JobDefinition::new(def_name, "0 0 * * * *", Arc::new(NeverFinishes));
        qscan_jobs::runner::run_tick(&pool2, &def).await
    });

    // Give the first tick time to reach `running` before firing the second.
    tokio::time::sleep(Duration::from_millis(200)).await;

    let second = qscan_jobs::runner::run_tick(&pool, &def).await?;
    assert_eq!(second, TickOutcome::SkippedAlreadyRunning);

    first.abort();
    Ok(())
}

#[tokio::test]
async fn successful_callback_completes_the_record() -> anyhow::Result<()> {
    let pool = match connect().await {
        Some(p) => p,
        None => {
            eprintln!("SKIP: MQS_DATABASE_URL not set");
            return Ok(());
        }
    };

    let def = JobDefinition::new("scenario-success-tick", "0 0 * * * *", Arc::new(Succeeds));
    let outcome = qscan_jobs::runner::run_tick(&pool, &def).await?;
    assert_eq!(outcome, TickOutcome::Ran { completed: true });

    assert!(qscan_db::fetch_running(&pool, "scenario-success-tick").await?.is_none());
    Ok(())
}
