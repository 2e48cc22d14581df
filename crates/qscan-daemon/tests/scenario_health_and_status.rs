//! `/v1/health` is pure in-process (no DB connection attempt, since the pool
//! is lazy and the handler never touches it). `/v1/status` needs a live
//! database and is skipped when one isn't configured.

use std::sync::Arc;

use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use qscan_daemon::{routes, state};
use sqlx::postgres::PgPoolOptions;
use tower::ServiceExt;

async fn call(router: axum::Router, req: Request<axum::body::Body>) -> (StatusCode, bytes::Bytes) {
    let resp = router.oneshot(req).await.expect("oneshot failed");
    let status = resp.status();
    let body = resp.into_body().collect().await.expect("body collect failed").to_bytes();
    (status, body)
}

fn parse_json(b: bytes::Bytes) -> serde_json::Value {
    serde_json::from_slice(&b).expect("body is not valid JSON")
}

fn lazy_state() -> Arc<state::AppState> {
    let pool = PgPoolOptions::new().connect_lazy("postgres://localhost/does_not_need_to_exist").unwrap();
    Arc::new(state::AppState::new(pool))
}

#[tokio::test]
async fn health_reports_ok_without_touching_the_database() {
    let st = lazy_state();
    let req = Request::builder().method("GET").uri("/v1/health").body(axum::body::Body::empty()).unwrap();
    let (status, body) = call(routes::build_router(st), req).await;

    assert_eq!(status, StatusCode::OK);
    let json = parse_json(body);
    assert_eq!(json["ok"], true);
    assert_eq!(json["service"], "qscan-daemon");
}

#[tokio::test]
async fn status_reports_job_and_cache_state() {
    let Ok(database_url) = std::env::var("MQS_DATABASE_URL") else {
        eprintln!("skipping status_reports_job_and_cache_state: MQS_DATABASE_URL not set");
        return;
    };
    let pool = PgPoolOptions::new().connect(&database_url).await.unwrap();
    let st = Arc::new(state::AppState::new(pool));

    let req = Request::builder().method("GET").uri("/v1/status").body(axum::body::Body::empty()).unwrap();
    let (status, body) = call(routes::build_router(st), req).await;

    assert_eq!(status, StatusCode::OK);
    let json = parse_json(body);
    assert!(json["cache_entry_count"].is_i64());
    assert!(json["job_counts_by_status"].is_object());
}
