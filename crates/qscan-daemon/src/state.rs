//! Shared runtime state for qscan-daemon.

use std::time::Instant;

use serde::{Deserialize, Serialize};
use sqlx::PgPool;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BuildInfo {
    pub service: &'static str,
    pub version: &'static str,
}

#[derive(Clone, Debug, Serialize)]
pub struct StatusSnapshot {
    pub daemon_uptime_secs: u64,
    pub job_counts_by_status: std::collections::HashMap<String, i64>,
    pub cache_entry_count: i64,
    pub job_history_status: String,
    pub job_history_warnings: Vec<String>,
}

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub build: BuildInfo,
    started_at: Instant,
}

impl AppState {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            build: BuildInfo {
                service: "qscan-daemon",
                version: env!("CARGO_PKG_VERSION"),
            },
            started_at: Instant::now(),
        }
    }

    pub fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}
