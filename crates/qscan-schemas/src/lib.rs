//! Shared data-model types for the scanning platform: job records, workflow
//! nodes, cache entries, index rules, derivation artifacts, and the outward
//! error taxonomy. These types are serde-round-trippable so they can be
//! persisted as JSONB documents by `qscan-db` and exchanged between crates
//! without any crate depending on another's internal representation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

pub mod error;
pub use error::{InternalCategory, QscanError, ReasonCode};

/// Generic envelope wrapping a typed payload with identity and causation
/// metadata, used for anything that crosses a process boundary (job
/// completion notices, cache write-throughs, index-manager reports).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope<T> {
    pub event_id: Uuid,
    pub ts_utc: DateTime<Utc>,
    pub correlation_id: Uuid,
    pub causation_id: Option<Uuid>,
    pub topic: String,
    pub payload: T,
}

impl<T> EventEnvelope<T> {
    pub fn new(topic: impl Into<String>, correlation_id: Uuid, payload: T) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            ts_utc: Utc::now(),
            correlation_id,
            causation_id: None,
            topic: topic.into(),
            payload,
        }
    }
}

// ---------------------------------------------------------------------------
// JobRecord (spec S3)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Scheduled,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Scheduled => "scheduled",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "scheduled" => Some(JobStatus::Scheduled),
            "running" => Some(JobStatus::Running),
            "completed" => Some(JobStatus::Completed),
            "failed" => Some(JobStatus::Failed),
            _ => None,
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobLogLine {
    pub ts: DateTime<Utc>,
    pub level: LogLevel,
    pub msg: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobErrorDetails {
    pub message: String,
    pub stack: Option<String>,
    pub code: Option<String>,
    pub response_snapshot: Option<serde_json::Value>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: Option<Uuid>,
    pub name: String,
    pub scheduled_at: DateTime<Utc>,
    pub status: JobStatus,
    pub machine_name: String,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub progress: f64,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
    pub error_details: Option<JobErrorDetails>,
    pub logs: Vec<JobLogLine>,
    pub metadata: Option<serde_json::Value>,
    pub cron_expression: String,
    pub timezone: String,
    pub next_run: Option<DateTime<Utc>>,
}

impl JobRecord {
    /// Construct a fresh scheduled record. `ended_at` is set iff
    /// `status ∈ {completed, failed}` — this constructor upholds that
    /// invariant by construction.
    pub fn new_scheduled(
        name: impl Into<String>,
        scheduled_at: DateTime<Utc>,
        machine_name: impl Into<String>,
        cron_expression: impl Into<String>,
        timezone: impl Into<String>,
    ) -> Self {
        Self {
            id: None,
            name: name.into(),
            scheduled_at,
            status: JobStatus::Scheduled,
            machine_name: machine_name.into(),
            started_at: None,
            ended_at: None,
            progress: 0.0,
            result: None,
            error: None,
            error_details: None,
            logs: Vec::new(),
            metadata: None,
            cron_expression: cron_expression.into(),
            timezone: timezone.into(),
            next_run: None,
        }
    }

    /// Append a log line, trimming from the head once `cap` is exceeded.
    pub fn push_log(&mut self, level: LogLevel, msg: impl Into<String>, cap: usize) {
        self.logs.push(JobLogLine {
            ts: Utc::now(),
            level,
            msg: msg.into(),
        });
        if self.logs.len() > cap {
            let overflow = self.logs.len() - cap;
            self.logs.drain(0..overflow);
        }
    }
}

// ---------------------------------------------------------------------------
// WorkflowNode / CycledListState (spec S3, S4.2)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowNode {
    pub id: String,
    pub name: String,
    pub function_name: String,
    pub parallel_group: Option<String>,
    pub status: NodeStatus,
    pub attempts: u32,
    pub max_attempts: u32,
    pub cancelled: bool,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
}

impl WorkflowNode {
    pub fn new(id: impl Into<String>, name: impl Into<String>, function_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            function_name: function_name.into(),
            parallel_group: None,
            status: NodeStatus::Pending,
            attempts: 0,
            max_attempts: 3,
            cancelled: false,
            result: None,
            error: None,
            started_at: None,
            completed_at: None,
            failed_at: None,
        }
    }

    pub fn with_parallel_group(mut self, group: impl Into<String>) -> Self {
        self.parallel_group = Some(group.into());
        self
    }

    /// Reset node state for a fresh cycle or a replay after cancellation.
    pub fn reset(&mut self) {
        self.status = NodeStatus::Pending;
        self.cancelled = false;
        self.attempts = 0;
        self.result = None;
        self.error = None;
        self.started_at = None;
        self.completed_at = None;
        self.failed_at = None;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrchestratorPhase {
    Uninitialized,
    Running,
    Paused,
    Stopped,
    Completed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CycledListState {
    pub name: String,
    pub phase: OrchestratorPhase,
    pub is_running: bool,
    pub is_paused: bool,
    pub manual_pause: bool,
    pub pause_reason: Option<String>,
    pub stop_reason: Option<String>,
    pub current_cycle: u64,
    pub total_cycles: u64,
    pub max_cycles: Option<u64>,
    pub current_async_fn_index: usize,
}

impl CycledListState {
    pub fn new(name: impl Into<String>, max_cycles: Option<u64>) -> Self {
        Self {
            name: name.into(),
            phase: OrchestratorPhase::Uninitialized,
            is_running: false,
            is_paused: false,
            manual_pause: false,
            pause_reason: None,
            stop_reason: None,
            current_cycle: 0,
            total_cycles: 0,
            max_cycles,
            current_async_fn_index: 0,
        }
    }

    /// `(is_running && is_paused)` must never hold; `manual_pause` implies
    /// `is_paused`. Callers that construct or mutate this struct by hand
    /// (tests, fixtures) should assert this still holds.
    pub fn invariant_holds(&self) -> bool {
        !(self.is_running && self.is_paused) && (!self.manual_pause || self.is_paused)
    }
}

// ---------------------------------------------------------------------------
// CacheEntry (spec S3, S4.3)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub cache_key: String,
    pub api_endpoint: String,
    pub params: serde_json::Value,
    pub data: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Last time this entry was read back from the persistent tier — the
    /// basis for the LRU-approximation eviction ordering (S4.3).
    pub last_accessed_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl CacheEntry {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    /// Approximate persisted byte size — used by maintenance's size-ceiling
    /// enforcement. Not exact (serde overhead, varint sizes) but monotone
    /// in content size, which is all the eviction ordering needs.
    pub fn approx_bytes(&self) -> usize {
        self.cache_key.len()
            + self.api_endpoint.len()
            + self.params.to_string().len()
            + self.data.to_string().len()
    }
}

// ---------------------------------------------------------------------------
// IndexRule (spec S3, S4.5)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Asc,
    Desc,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexRule {
    pub collection: String,
    pub fields: Vec<(String, SortDirection)>,
    pub unique: bool,
    pub name: Option<String>,
    /// 1 = critical ... 4 = low priority.
    pub priority: u8,
}

impl IndexRule {
    /// Two rules are equal iff their sorted field sets and directions
    /// coincide — collection and fields together form the normalized key,
    /// independent of declaration order or assigned `name`.
    pub fn normalized_key(&self) -> (String, Vec<(String, SortDirection)>) {
        let mut fields = self.fields.clone();
        fields.sort_by(|a, b| a.0.cmp(&b.0));
        (self.collection.clone(), fields)
    }
}

// ---------------------------------------------------------------------------
// DerivationArtifact (spec S3, S4.6)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GrowthMetrics {
    pub revenue_cagr: f64,
    pub per_period_growth: Vec<f64>,
    pub volatility: f64,
    pub using_default_revenue_growth: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MarginMetrics {
    pub operating_margin: Option<f64>,
    pub ebitda_margin: Option<f64>,
    pub operating_margin_volatility: f64,
    pub ebitda_margin_volatility: f64,
    pub using_default_margin: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReinvestmentMetrics {
    pub sales_to_capital: f64,
    pub deviation: f64,
    pub flagged: bool,
    pub using_default_sales_to_capital: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaxMetrics {
    pub effective_rate: f64,
    pub using_default_tax_rate: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StructureMetrics {
    pub net_debt: f64,
    pub shares_diluted: f64,
    pub shares_basic: f64,
    pub using_fallback_shares: bool,
    pub working_capital: f64,
    pub ppe: f64,
    pub invested_capital: f64,
    pub minority_interest: f64,
    pub preferred_equity: f64,
    pub investments_in_associates: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProfitabilityMetrics {
    pub nopat: f64,
    pub roic: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ControlFlags {
    pub data_quality_flags: std::collections::BTreeMap<String, bool>,
    pub data_quality_score: f64,
    pub reinvestment_flagged: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DerivationArtifact {
    pub symbol: String,
    pub growth: GrowthMetrics,
    pub margins: MarginMetrics,
    pub reinvestment: ReinvestmentMetrics,
    pub taxes: TaxMetrics,
    pub structure: StructureMetrics,
    pub profitability: ProfitabilityMetrics,
    pub volatility: f64,
    pub controls: ControlFlags,
}
