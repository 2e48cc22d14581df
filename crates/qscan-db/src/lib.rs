//! Postgres-backed persistence for job records, cache entries, and the
//! index-manager's applied-rule registry.
//!
//! Each table stores a JSONB `doc` column holding the full serialized
//! struct from `qscan-schemas`, plus a handful of plain columns that need
//! to be indexed or filtered on directly. All status transitions are
//! implemented as single-statement conditional `UPDATE ... WHERE status =
//! $expected` queries — never a separate read-then-write round trip — so
//! that two callers racing on the same job can never both "win" a
//! transition (S5).

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use qscan_schemas::{CacheEntry, JobRecord, JobStatus};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use uuid::Uuid;

pub const ENV_DB_URL: &str = "MQS_DATABASE_URL";

/// Connect to Postgres using `MQS_DATABASE_URL`.
pub async fn connect_from_env() -> Result<PgPool> {
    let url = std::env::var(ENV_DB_URL).with_context(|| format!("missing env var {ENV_DB_URL}"))?;
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&url)
        .await
        .context("failed to connect to Postgres")?;
    Ok(pool)
}

/// Test helper: connect and ensure migrations are applied.
pub async fn testkit_db_pool() -> Result<PgPool> {
    let pool = connect_from_env().await?;
    migrate(&pool).await?;
    Ok(pool)
}

/// Run embedded SQLx migrations. Idempotent on a clean or already-migrated
/// database.
pub async fn migrate(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .context("db migrate failed")?;
    Ok(())
}

#[derive(Debug, Clone)]
pub struct DbStatus {
    pub ok: bool,
    pub has_job_records_table: bool,
}

/// Connectivity + schema-presence check, used by the CLI's `db status`
/// command and the daemon's health endpoint.
pub async fn status(pool: &PgPool) -> Result<DbStatus> {
    let (one,): (i32,) = sqlx::query_as("select 1")
        .fetch_one(pool)
        .await
        .context("status connectivity query failed")?;

    let (exists,): (bool,) = sqlx::query_as(
        r#"
        select exists (
            select 1 from information_schema.tables
            where table_schema = 'public' and table_name = 'job_records'
        )
        "#,
    )
    .fetch_one(pool)
    .await
    .context("status table-exists query failed")?;

    Ok(DbStatus {
        ok: one == 1,
        has_job_records_table: exists,
    })
}

// ---------------------------------------------------------------------------
// Job records
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct JobRecordRow {
    pub id: Uuid,
    pub record: JobRecord,
}

/// Insert a new scheduled record. Fails if another record with this name is
/// currently running — callers should check [`fetch_running`] first (S4.1
/// step 1), but this is not itself a uniqueness constraint: multiple
/// scheduled/completed/failed records for the same name coexist by design.
pub async fn insert_scheduled(pool: &PgPool, record: &JobRecord) -> Result<Uuid> {
    let id = Uuid::new_v4();
    let doc = serde_json::to_value(record).context("serialize job record")?;
    sqlx::query(
        r#"
        insert into job_records (id, name, scheduled_at, status, doc)
        values ($1, $2, $3, $4, $5)
        "#,
    )
    .bind(id)
    .bind(&record.name)
    .bind(record.scheduled_at)
    .bind(JobStatus::Scheduled.as_str())
    .bind(&doc)
    .execute(pool)
    .await
    .context("insert_scheduled failed")?;
    Ok(id)
}

/// The most recent record for `name` with status=running, if any (S4.1 step 1).
pub async fn fetch_running(pool: &PgPool, name: &str) -> Result<Option<JobRecordRow>> {
    let row = sqlx::query(
        r#"
        select id, doc from job_records
        where name = $1 and status = 'running'
        order by scheduled_at desc
        limit 1
        "#,
    )
    .bind(name)
    .fetch_optional(pool)
    .await
    .context("fetch_running failed")?;

    row.map(|r| row_to_record(r)).transpose()
}

fn row_to_record(row: sqlx::postgres::PgRow) -> Result<JobRecordRow> {
    let id: Uuid = row.try_get("id")?;
    let doc: serde_json::Value = row.try_get("doc")?;
    let record: JobRecord = serde_json::from_value(doc).context("deserialize job record")?;
    Ok(JobRecordRow { id, record })
}

/// CAS: scheduled -> running. Returns `false` (no error) if the record was
/// not in `scheduled` status when this executed — the caller aborts that
/// invocation rather than treating it as a hard failure.
pub async fn mark_running(pool: &PgPool, id: Uuid, started_at: DateTime<Utc>) -> Result<bool> {
    let result = sqlx::query(
        r#"
        update job_records
        set status = 'running',
            started_at = $2,
            doc = jsonb_set(jsonb_set(doc, '{status}', '"running"'), '{startedAt}', to_jsonb($2::timestamptz))
        where id = $1 and status = 'scheduled'
        "#,
    )
    .bind(id)
    .bind(started_at)
    .execute(pool)
    .await
    .context("mark_running failed")?;
    Ok(result.rows_affected() == 1)
}

/// CAS: running -> completed, with result payload and progress=1.
pub async fn mark_completed(
    pool: &PgPool,
    id: Uuid,
    result: Option<serde_json::Value>,
    ended_at: DateTime<Utc>,
) -> Result<bool> {
    let result_json = result.unwrap_or(serde_json::Value::Null);
    let rows = sqlx::query(
        r#"
        update job_records
        set status = 'completed',
            ended_at = $2,
            doc = jsonb_set(
                    jsonb_set(
                      jsonb_set(doc, '{status}', '"completed"'),
                      '{endedAt}', to_jsonb($2::timestamptz)),
                    '{progress}', '1.0')
                  || jsonb_build_object('result', $3::jsonb)
        where id = $1 and status = 'running'
        "#,
    )
    .bind(id)
    .bind(ended_at)
    .bind(&result_json)
    .execute(pool)
    .await
    .context("mark_completed failed")?;
    Ok(rows.rows_affected() == 1)
}

/// CAS: running -> failed, with structured error details.
pub async fn mark_failed(
    pool: &PgPool,
    id: Uuid,
    error: &str,
    error_details: serde_json::Value,
    ended_at: DateTime<Utc>,
) -> Result<bool> {
    let rows = sqlx::query(
        r#"
        update job_records
        set status = 'failed',
            ended_at = $2,
            doc = jsonb_set(
                    jsonb_set(
                      jsonb_set(doc, '{status}', '"failed"'),
                      '{endedAt}', to_jsonb($2::timestamptz)),
                    '{error}', to_jsonb($3::text))
                  || jsonb_build_object('errorDetails', $4::jsonb)
        where id = $1 and status = 'running'
        "#,
    )
    .bind(id)
    .bind(ended_at)
    .bind(error)
    .bind(&error_details)
    .execute(pool)
    .await
    .context("mark_failed failed")?;
    Ok(rows.rows_affected() == 1)
}

/// Unconditional overwrite to failed, used only as the fallback when a CAS
/// write in the normal completion path itself errors (S4.1 step 5) — the
/// record must not be left stuck in `running` no matter what.
pub async fn force_mark_failed(
    pool: &PgPool,
    id: Uuid,
    error: &str,
    ended_at: DateTime<Utc>,
) -> Result<()> {
    sqlx::query(
        r#"
        update job_records
        set status = 'failed',
            ended_at = $2,
            doc = jsonb_set(jsonb_set(doc, '{status}', '"failed"'), '{error}', to_jsonb($3::text))
        where id = $1
        "#,
    )
    .bind(id)
    .bind(ended_at)
    .bind(error)
    .execute(pool)
    .await
    .context("force_mark_failed failed")?;
    Ok(())
}

/// Global rescue: unconditionally fail every record currently running, used
/// by the process supervisor on crash or signal (S4.8). Returns the number
/// of records rescued.
pub async fn rescue_all_running(pool: &PgPool, marker: &str) -> Result<u64> {
    let now = Utc::now();
    let rows = sqlx::query(
        r#"
        update job_records
        set status = 'failed',
            ended_at = $1,
            doc = jsonb_set(jsonb_set(doc, '{status}', '"failed"'), '{error}', to_jsonb($2::text))
        where status = 'running'
        "#,
    )
    .bind(now)
    .bind(marker)
    .execute(pool)
    .await
    .context("rescue_all_running failed")?;
    Ok(rows.rows_affected())
}

/// All records for `name`, most recent first — used by maintenance's
/// retention sweep.
pub async fn list_by_name(pool: &PgPool, name: &str) -> Result<Vec<JobRecordRow>> {
    let rows = sqlx::query(
        r#"select id, doc from job_records where name = $1 order by scheduled_at desc"#,
    )
    .bind(name)
    .fetch_all(pool)
    .await
    .context("list_by_name failed")?;
    rows.into_iter().map(row_to_record).collect()
}

pub async fn delete_job_records(pool: &PgPool, ids: &[Uuid]) -> Result<u64> {
    if ids.is_empty() {
        return Ok(0);
    }
    let rows = sqlx::query("delete from job_records where id = any($1)")
        .bind(ids)
        .execute(pool)
        .await
        .context("delete_job_records failed")?;
    Ok(rows.rows_affected())
}

pub async fn count_job_records(pool: &PgPool) -> Result<i64> {
    let (n,): (i64,) = sqlx::query_as("select count(*)::bigint from job_records")
        .fetch_one(pool)
        .await
        .context("count_job_records failed")?;
    Ok(n)
}

/// Records for `name` in `status`, most recently ended first — used by
/// maintenance's per-name retention sweep (S4.4).
pub async fn list_by_name_and_status(
    pool: &PgPool,
    name: &str,
    status: JobStatus,
) -> Result<Vec<JobRecordRow>> {
    let rows = sqlx::query(
        r#"
        select id, doc from job_records
        where name = $1 and status = $2
        order by ended_at desc nulls last
        "#,
    )
    .bind(name)
    .bind(status.as_str())
    .fetch_all(pool)
    .await
    .context("list_by_name_and_status failed")?;
    rows.into_iter().map(row_to_record).collect()
}

/// Terminal (completed/failed) records, oldest-ended first — used to trim
/// down to `maxTotalJobs` without ever touching running/scheduled records
/// (S4.4 step d).
pub async fn oldest_terminal_records(pool: &PgPool, limit: i64) -> Result<Vec<JobRecordRow>> {
    let rows = sqlx::query(
        r#"
        select id, doc from job_records
        where status in ('completed', 'failed')
        order by ended_at asc nulls first
        limit $1
        "#,
    )
    .bind(limit)
    .fetch_all(pool)
    .await
    .context("oldest_terminal_records failed")?;
    rows.into_iter().map(row_to_record).collect()
}

/// Unconditional doc overwrite, used only by maintenance to persist a
/// trimmed `logs` sequence (S4.4 step c) — no status change, no CAS guard.
pub async fn replace_job_record_doc(pool: &PgPool, id: Uuid, record: &JobRecord) -> Result<()> {
    let doc = serde_json::to_value(record).context("serialize job record")?;
    sqlx::query("update job_records set doc = $2 where id = $1")
        .bind(id)
        .bind(&doc)
        .execute(pool)
        .await
        .context("replace_job_record_doc failed")?;
    Ok(())
}

pub async fn distinct_job_names(pool: &PgPool) -> Result<Vec<String>> {
    let rows: Vec<(String,)> = sqlx::query_as("select distinct name from job_records")
        .fetch_all(pool)
        .await
        .context("distinct_job_names failed")?;
    Ok(rows.into_iter().map(|(n,)| n).collect())
}

/// Record count grouped by status, used by the maintenance health report.
pub async fn job_status_counts(pool: &PgPool) -> Result<Vec<(String, i64)>> {
    let rows: Vec<(String, i64)> =
        sqlx::query_as("select status, count(*)::bigint from job_records group by status")
            .fetch_all(pool)
            .await
            .context("job_status_counts failed")?;
    Ok(rows)
}

/// Average and max `logs` array length across all job records, for the
/// maintenance health report.
pub async fn job_logs_stats(pool: &PgPool) -> Result<(f64, i64)> {
    let row: (Option<f64>, Option<i64>) = sqlx::query_as(
        r#"
        select
            avg(jsonb_array_length(doc->'logs'))::float8,
            max(jsonb_array_length(doc->'logs'))::bigint
        from job_records
        "#,
    )
    .fetch_one(pool)
    .await
    .context("job_logs_stats failed")?;
    Ok((row.0.unwrap_or(0.0), row.1.unwrap_or(0)))
}

/// The `scheduledAt` of the single oldest job record, if any — used by the
/// maintenance health report's "oldest record age" figure.
pub async fn oldest_job_record_scheduled_at(pool: &PgPool) -> Result<Option<DateTime<Utc>>> {
    let row: Option<(DateTime<Utc>,)> =
        sqlx::query_as("select scheduled_at from job_records order by scheduled_at asc limit 1")
            .fetch_optional(pool)
            .await
            .context("oldest_job_record_scheduled_at failed")?;
    Ok(row.map(|(t,)| t))
}

// ---------------------------------------------------------------------------
// Cache entries
// ---------------------------------------------------------------------------

pub async fn cache_get(pool: &PgPool, cache_key: &str) -> Result<Option<CacheEntry>> {
    let row = sqlx::query(r#"select doc from cache_entries where cache_key = $1"#)
        .bind(cache_key)
        .fetch_optional(pool)
        .await
        .context("cache_get failed")?;
    match row {
        None => Ok(None),
        Some(r) => {
            let doc: serde_json::Value = r.try_get("doc")?;
            Ok(Some(serde_json::from_value(doc).context("deserialize cache entry")?))
        }
    }
}

/// Upsert (write-through) of a cache entry.
pub async fn cache_put(pool: &PgPool, entry: &CacheEntry) -> Result<()> {
    let doc = serde_json::to_value(entry).context("serialize cache entry")?;
    sqlx::query(
        r#"
        insert into cache_entries (cache_key, api_endpoint, created_at, expires_at, last_accessed_at, doc)
        values ($1, $2, $3, $4, $5, $6)
        on conflict (cache_key) do update
        set api_endpoint = excluded.api_endpoint,
            expires_at = excluded.expires_at,
            last_accessed_at = excluded.last_accessed_at,
            doc = excluded.doc
        "#,
    )
    .bind(&entry.cache_key)
    .bind(&entry.api_endpoint)
    .bind(entry.created_at)
    .bind(entry.expires_at)
    .bind(entry.last_accessed_at)
    .bind(&doc)
    .execute(pool)
    .await
    .context("cache_put failed")?;
    Ok(())
}

/// Record a read of `cache_key` at `at`, for LRU-approximation eviction
/// ordering (S4.3). A no-op if the key doesn't exist.
pub async fn cache_touch(pool: &PgPool, cache_key: &str, at: DateTime<Utc>) -> Result<()> {
    sqlx::query(
        r#"
        update cache_entries
        set last_accessed_at = $2,
            doc = jsonb_set(doc, '{last_accessed_at}', to_jsonb($2::timestamptz))
        where cache_key = $1
        "#,
    )
    .bind(cache_key)
    .bind(at)
    .execute(pool)
    .await
    .context("cache_touch failed")?;
    Ok(())
}

pub async fn cache_delete(pool: &PgPool, cache_keys: &[String]) -> Result<u64> {
    if cache_keys.is_empty() {
        return Ok(0);
    }
    let rows = sqlx::query("delete from cache_entries where cache_key = any($1)")
        .bind(cache_keys)
        .execute(pool)
        .await
        .context("cache_delete failed")?;
    Ok(rows.rows_affected())
}

pub async fn cache_delete_expired(pool: &PgPool, now: DateTime<Utc>) -> Result<u64> {
    let rows = sqlx::query("delete from cache_entries where expires_at <= $1")
        .bind(now)
        .execute(pool)
        .await
        .context("cache_delete_expired failed")?;
    Ok(rows.rows_affected())
}

pub async fn cache_count(pool: &PgPool) -> Result<i64> {
    let (n,): (i64,) = sqlx::query_as("select count(*)::bigint from cache_entries")
        .fetch_one(pool)
        .await
        .context("cache_count failed")?;
    Ok(n)
}

/// Entry count plus an approximate total size of all persisted `doc`
/// payloads, in bytes — the basis for the persistent tier's size-ceiling
/// enforcement (S4.3).
pub async fn cache_stats(pool: &PgPool) -> Result<(i64, i64)> {
    let (count, total_bytes): (i64, Option<i64>) = sqlx::query_as(
        "select count(*)::bigint, coalesce(sum(octet_length(doc::text)), 0)::bigint from cache_entries",
    )
    .fetch_one(pool)
    .await
    .context("cache_stats failed")?;
    Ok((count, total_bytes.unwrap_or(0)))
}

/// Keys whose `doc` is missing one of the fields a well-formed entry must
/// carry — orphans left behind by a partial write (S4.4 cache sweep).
pub async fn cache_list_malformed(pool: &PgPool) -> Result<Vec<String>> {
    let rows: Vec<(String,)> = sqlx::query_as(
        r#"
        select cache_key from cache_entries
        where not (doc ?& array['cache_key', 'expires_at', 'data'])
        "#,
    )
    .fetch_all(pool)
    .await
    .context("cache_list_malformed failed")?;
    Ok(rows.into_iter().map(|(k,)| k).collect())
}

/// Oldest-created-first listing, for the maintenance sweep's ceiling trim
/// and the persistent cache tier's out-of-space recovery (S4.3: "evict half
/// (oldest by timestamp) and retry the write exactly once").
pub async fn cache_list_oldest(pool: &PgPool, limit: i64) -> Result<Vec<CacheEntry>> {
    let rows = sqlx::query(
        r#"select doc from cache_entries order by created_at asc limit $1"#,
    )
    .bind(limit)
    .fetch_all(pool)
    .await
    .context("cache_list_oldest failed")?;
    rows.into_iter()
        .map(|r| {
            let doc: serde_json::Value = r.try_get("doc")?;
            Ok(serde_json::from_value(doc)?)
        })
        .collect()
}

/// Least-recently-accessed-first listing — the LRU approximation the
/// persistent cache tier's write-path ceiling enforcement sorts by (S4.3).
pub async fn cache_list_least_recently_accessed(pool: &PgPool, limit: i64) -> Result<Vec<CacheEntry>> {
    let rows = sqlx::query(
        r#"select doc from cache_entries order by last_accessed_at asc limit $1"#,
    )
    .bind(limit)
    .fetch_all(pool)
    .await
    .context("cache_list_least_recently_accessed failed")?;
    rows.into_iter()
        .map(|r| {
            let doc: serde_json::Value = r.try_get("doc")?;
            Ok(serde_json::from_value(doc)?)
        })
        .collect()
}

/// Fetch the cache tier's schema version tag, if one has been recorded yet.
pub async fn cache_version(pool: &PgPool) -> Result<Option<u32>> {
    let row: Option<(String,)> =
        sqlx::query_as("select value from cache_meta where key = 'cache_schema_version'")
            .fetch_optional(pool)
            .await
            .context("cache_version failed")?;
    Ok(row.and_then(|(v,)| v.parse::<u32>().ok()))
}

/// Persist the cache tier's schema version tag.
pub async fn cache_set_version(pool: &PgPool, version: u32) -> Result<()> {
    sqlx::query(
        r#"
        insert into cache_meta (key, value)
        values ('cache_schema_version', $1)
        on conflict (key) do update set value = excluded.value
        "#,
    )
    .bind(version.to_string())
    .execute(pool)
    .await
    .context("cache_set_version failed")?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Index-rule registry (fast-path bookkeeping for the index manager)
// ---------------------------------------------------------------------------

pub async fn index_registry_applied(pool: &PgPool, collection: &str) -> Result<Vec<String>> {
    let rows: Vec<(String,)> = sqlx::query_as(
        "select normalized_key from index_rule_registry where collection = $1",
    )
    .bind(collection)
    .fetch_all(pool)
    .await
    .context("index_registry_applied failed")?;
    Ok(rows.into_iter().map(|(k,)| k).collect())
}

pub async fn index_registry_mark_applied(
    pool: &PgPool,
    collection: &str,
    normalized_key: &str,
) -> Result<()> {
    sqlx::query(
        r#"
        insert into index_rule_registry (collection, normalized_key)
        values ($1, $2)
        on conflict (collection, normalized_key) do nothing
        "#,
    )
    .bind(collection)
    .bind(normalized_key)
    .execute(pool)
    .await
    .context("index_registry_mark_applied failed")?;
    Ok(())
}
