//! Job-history maintenance sweep (S4.4 "Job history").

use chrono::Utc;
use qscan_schemas::JobStatus;
use sqlx::PgPool;

#[derive(Debug, Clone, Copy)]
pub struct JobHistoryConfig {
    pub keep_n_completed: usize,
    pub keep_n_failed: usize,
    pub completed_retention_days: i64,
    pub failed_retention_days: i64,
    pub max_logs_per_job: usize,
    pub max_total_jobs: i64,
}

impl Default for JobHistoryConfig {
    fn default() -> Self {
        Self {
            keep_n_completed: 10,
            keep_n_failed: 10,
            completed_retention_days: 30,
            failed_retention_days: 90,
            max_logs_per_job: 1000,
            max_total_jobs: 10_000,
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct JobHistoryReport {
    pub aged_out_deleted: u64,
    pub logs_trimmed: u64,
    pub total_cap_deleted: u64,
}

pub async fn sweep(pool: &PgPool, config: JobHistoryConfig) -> anyhow::Result<JobHistoryReport> {
    let mut report = JobHistoryReport::default();
    let now = Utc::now();

    for name in qscan_db::distinct_job_names(pool).await? {
        report.aged_out_deleted += sweep_name_status(
            pool,
            &name,
            JobStatus::Completed,
            config.keep_n_completed,
            config.completed_retention_days,
            now,
        )
        .await?;
        report.aged_out_deleted += sweep_name_status(
            pool,
            &name,
            JobStatus::Failed,
            config.keep_n_failed,
            config.failed_retention_days,
            now,
        )
        .await?;
    }

    report.logs_trimmed = trim_logs(pool, config.max_logs_per_job).await?;
    report.total_cap_deleted = enforce_total_cap(pool, config.max_total_jobs).await?;

    Ok(report)
}

/// Retain the N most recent records for `(name, status)` irrespective of
/// age; beyond that, delete anything older than `retention_days`.
async fn sweep_name_status(
    pool: &PgPool,
    name: &str,
    status: JobStatus,
    keep_n: usize,
    retention_days: i64,
    now: chrono::DateTime<Utc>,
) -> anyhow::Result<u64> {
    let records = qscan_db::list_by_name_and_status(pool, name, status).await?;
    let cutoff = now - chrono::Duration::days(retention_days);

    let to_delete: Vec<uuid::Uuid> = records
        .into_iter()
        .skip(keep_n)
        .filter(|row| {
            row.record
                .ended_at
                .map(|ended| ended < cutoff)
                .unwrap_or(false)
        })
        .map(|row| row.id)
        .collect();

    if to_delete.is_empty() {
        return Ok(0);
    }
    qscan_db::delete_job_records(pool, &to_delete).await
}

/// Trim every record's `logs` tail down to `max_logs_per_job`, rewriting
/// only the records that actually exceed the cap.
async fn trim_logs(pool: &PgPool, max_logs_per_job: usize) -> anyhow::Result<u64> {
    let mut trimmed = 0u64;
    for name in qscan_db::distinct_job_names(pool).await? {
        for mut row in qscan_db::list_by_name(pool, &name).await? {
            if row.record.logs.len() > max_logs_per_job {
                let overflow = row.record.logs.len() - max_logs_per_job;
                row.record.logs.drain(0..overflow);
                qscan_db::replace_job_record_doc(pool, row.id, &row.record).await?;
                trimmed += 1;
            }
        }
    }
    Ok(trimmed)
}

/// If the total record count still exceeds the ceiling, delete the oldest
/// completed/failed records by `endedAt` — running/scheduled records are
/// never touched.
async fn enforce_total_cap(pool: &PgPool, max_total_jobs: i64) -> anyhow::Result<u64> {
    let total = qscan_db::count_job_records(pool).await?;
    if total <= max_total_jobs {
        return Ok(0);
    }
    let overflow = total - max_total_jobs;
    let victims = qscan_db::oldest_terminal_records(pool, overflow).await?;
    let ids: Vec<uuid::Uuid> = victims.into_iter().map(|row| row.id).collect();
    qscan_db::delete_job_records(pool, &ids).await
}
