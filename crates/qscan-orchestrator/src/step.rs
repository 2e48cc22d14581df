//! Step contract executed by a single [`crate::WorkflowNode`].

use async_trait::async_trait;

#[derive(Debug, thiserror::Error)]
#[error("step failed: {0}")]
pub struct StepError(pub String);

/// One unit of work in a cycled list. Implementations must be idempotent:
/// a step cancelled mid-execution is restarted from scratch on resume, so
/// partial side effects from an earlier attempt must not corrupt a later
/// one.
#[async_trait]
pub trait Step: Send + Sync {
    async fn run(&self) -> Result<Option<serde_json::Value>, StepError>;
}
