//! On-demand job-history health report (S4.4 "Health report").

use chrono::Utc;
use sqlx::PgPool;
use std::collections::HashMap;

use crate::job_history::JobHistoryConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    Ok,
    Warning,
}

#[derive(Debug, Clone)]
pub struct HealthReport {
    pub total: i64,
    pub by_status: HashMap<String, i64>,
    pub average_logs_per_record: f64,
    pub max_logs_per_record: i64,
    pub oldest_record_age_days: Option<f64>,
    pub status: HealthStatus,
    pub warnings: Vec<String>,
}

pub async fn report(pool: &PgPool, config: JobHistoryConfig) -> anyhow::Result<HealthReport> {
    let counts = qscan_db::job_status_counts(pool).await?;
    let by_status: HashMap<String, i64> = counts.into_iter().collect();
    let total: i64 = by_status.values().sum();

    let (average_logs_per_record, max_logs_per_record) = qscan_db::job_logs_stats(pool).await?;

    let oldest_record_age_days = qscan_db::oldest_job_record_scheduled_at(pool)
        .await?
        .map(|t| (Utc::now() - t).num_seconds() as f64 / 86_400.0);

    let mut warnings = Vec::new();

    let total_ratio = total as f64 / config.max_total_jobs as f64;
    if total_ratio >= 0.9 {
        warnings.push(format!(
            "job record count {total} is at {:.0}% of the {} ceiling",
            total_ratio * 100.0,
            config.max_total_jobs
        ));
    }

    if max_logs_per_record as f64 >= 0.9 * config.max_logs_per_job as f64 {
        warnings.push(format!(
            "a job record holds {max_logs_per_record} log lines, near the {} cap",
            config.max_logs_per_job
        ));
    }

    let completed = *by_status.get("completed").unwrap_or(&0);
    let failed = *by_status.get("failed").unwrap_or(&0);
    let terminal = completed + failed;
    if terminal > 0 {
        let failure_rate = failed as f64 / terminal as f64;
        if failure_rate > 0.30 {
            warnings.push(format!("failure rate {:.0}% exceeds 30%", failure_rate * 100.0));
        }
    }

    let status = if warnings.is_empty() { HealthStatus::Ok } else { HealthStatus::Warning };

    Ok(HealthReport {
        total,
        by_status,
        average_logs_per_record,
        max_logs_per_record,
        oldest_record_age_days,
        status,
        warnings,
    })
}
