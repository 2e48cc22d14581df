//! Outward error taxonomy shared across the platform (spec S7).
//!
//! `ReasonCode` is the exhaustive, outward-visible set of codes every
//! subsystem reports through. `InternalCategory` is an orthogonal
//! classification used only to decide retry behaviour internally; it is
//! never surfaced to callers.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Error)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReasonCode {
    #[error("required input data is missing or insufficient")]
    MissingData,
    #[error("projected free cash flow is negative or near-zero across the horizon")]
    NegFcf,
    #[error("projected growth is too volatile to be a reliable basis for valuation")]
    VolatileGrowth,
    #[error("job exceeded the stuck-job threshold while running")]
    StuckJob,
    #[error("operation exceeded its allotted timeout")]
    Timeout,
    #[error("operation was cooperatively cancelled")]
    Cancelled,
    #[error("vendor rate limit reached; caller should pause and retry later")]
    RateLimitPause,
    #[error("network transport error")]
    Network,
    #[error("persistent cache storage is full")]
    StorageFull,
    #[error("configuration is missing or invalid")]
    Config,
}

/// Internal-only classification used by retry policies (HTTP client, job
/// runner). Never serialized alongside a `ReasonCode` for external callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InternalCategory {
    Validation,
    TransientIo,
    NonRetryableIo,
    Capacity,
}

impl ReasonCode {
    pub fn internal_category(self) -> InternalCategory {
        match self {
            ReasonCode::Network | ReasonCode::RateLimitPause | ReasonCode::Timeout => {
                InternalCategory::TransientIo
            }
            ReasonCode::StorageFull => InternalCategory::Capacity,
            ReasonCode::MissingData
            | ReasonCode::NegFcf
            | ReasonCode::VolatileGrowth
            | ReasonCode::Config => InternalCategory::Validation,
            ReasonCode::StuckJob | ReasonCode::Cancelled => InternalCategory::NonRetryableIo,
        }
    }

    pub fn is_retryable(self) -> bool {
        matches!(self.internal_category(), InternalCategory::TransientIo)
    }
}

/// Top-level error type most crates propagate with `anyhow::Context`
/// layered on top at operation boundaries; kept exhaustively matchable here
/// for the sites (derivation gates, job transitions) where callers must
/// branch on the specific code rather than just log-and-bail.
#[derive(Debug, Error)]
pub enum QscanError {
    #[error("{code}: {detail}")]
    Reason { code: ReasonCode, detail: String },
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl QscanError {
    pub fn reason(code: ReasonCode, detail: impl Into<String>) -> Self {
        QscanError::Reason {
            code,
            detail: detail.into(),
        }
    }

    pub fn code(&self) -> Option<ReasonCode> {
        match self {
            QscanError::Reason { code, .. } => Some(*code),
            QscanError::Other(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn network_is_retryable() {
        assert!(ReasonCode::Network.is_retryable());
        assert!(ReasonCode::RateLimitPause.is_retryable());
    }

    #[test]
    fn missing_data_is_not_retryable() {
        assert!(!ReasonCode::MissingData.is_retryable());
        assert_eq!(
            ReasonCode::MissingData.internal_category(),
            InternalCategory::Validation
        );
    }

    #[test]
    fn storage_full_is_capacity_not_retryable() {
        assert_eq!(
            ReasonCode::StorageFull.internal_category(),
            InternalCategory::Capacity
        );
        assert!(!ReasonCode::StorageFull.is_retryable());
    }
}
