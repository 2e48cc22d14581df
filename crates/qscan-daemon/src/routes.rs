//! Axum router and handlers for qscan-daemon's ambient status surface.
//!
//! This is deliberately not the public heat-map/ranking query API — just
//! enough to let an operator or a liveness probe see that the job runner,
//! cache tier, and job-history retention are healthy.

use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use qscan_httpclient::cache::{PersistentCacheStore, PostgresCacheStore};
use qscan_maintenance::JobHistoryConfig;
use serde::Serialize;

use crate::state::{AppState, StatusSnapshot};

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v1/health", get(health))
        .route("/v1/status", get(status_handler))
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    ok: bool,
    service: &'static str,
    version: &'static str,
}

pub(crate) async fn health(State(st): State<Arc<AppState>>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse { ok: true, service: st.build.service, version: st.build.version }),
    )
}

pub(crate) async fn status_handler(State(st): State<Arc<AppState>>) -> impl IntoResponse {
    let job_counts_by_status = qscan_db::job_status_counts(&st.pool)
        .await
        .unwrap_or_default()
        .into_iter()
        .collect();

    let cache_store = PostgresCacheStore::new(st.pool.clone());
    let cache_entry_count = cache_store.stats().await.map(|s| s.entry_count).unwrap_or(-1);

    let (job_history_status, job_history_warnings) =
        match qscan_maintenance::health_report(&st.pool, JobHistoryConfig::default()).await {
            Ok(report) => (format!("{:?}", report.status), report.warnings),
            Err(err) => ("unavailable".to_string(), vec![err.to_string()]),
        };

    let snapshot = StatusSnapshot {
        daemon_uptime_secs: st.uptime_secs(),
        job_counts_by_status,
        cache_entry_count,
        job_history_status,
        job_history_warnings,
    };

    (StatusCode::OK, Json(snapshot))
}
