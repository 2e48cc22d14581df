//! Externally supplied predicates and hooks (S4.2).

use async_trait::async_trait;

/// Consulted after a step failure to decide paused-vs-stopped. Receives the
/// most recent step error message.
#[async_trait]
pub trait PausePredicate: Send + Sync {
    async fn should_pause(&self, last_error: Option<&str>) -> bool;
}

/// Polled by the background condition-checker while paused and not
/// manually paused; when every registered predicate returns true the
/// orchestrator resumes.
#[async_trait]
pub trait ContinuePredicate: Send + Sync {
    async fn ready(&self) -> bool;
}

/// Invoked once when entering paused state mid-step, to abort in-flight
/// work (e.g. cancel an outstanding HTTP request).
#[async_trait]
pub trait CancelHook: Send + Sync {
    async fn cancel(&self);
}

/// Invoked on every terminal state transition with the full status
/// snapshot, so callers can persist it.
#[async_trait]
pub trait StatusNotifier: Send + Sync {
    async fn notify(&self, state: &qscan_schemas::CycledListState);
}
