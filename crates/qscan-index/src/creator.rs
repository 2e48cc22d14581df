//! Index-creation boundary (S4.5 step 3). A concrete implementation issues
//! the actual `CREATE INDEX` (or store-specific equivalent); this crate
//! only owns ordering, retry classification, and bookkeeping.

use async_trait::async_trait;
use qscan_schemas::IndexRule;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexCreateError {
    Network(String),
    Timeout,
    ElectionInProgress,
    ShutdownInProgress,
    AlreadyExists,
    Other(String),
}

impl IndexCreateError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            IndexCreateError::Network(_)
                | IndexCreateError::Timeout
                | IndexCreateError::ElectionInProgress
                | IndexCreateError::ShutdownInProgress
        )
    }
}

impl std::fmt::Display for IndexCreateError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IndexCreateError::Network(msg) => write!(f, "network error: {msg}"),
            IndexCreateError::Timeout => write!(f, "timed out"),
            IndexCreateError::ElectionInProgress => write!(f, "election in progress"),
            IndexCreateError::ShutdownInProgress => write!(f, "shutdown in progress"),
            IndexCreateError::AlreadyExists => write!(f, "already exists"),
            IndexCreateError::Other(msg) => write!(f, "{msg}"),
        }
    }
}

impl std::error::Error for IndexCreateError {}

#[async_trait]
pub trait IndexCreator: Send + Sync {
    async fn create_index(&self, rule: &IndexRule) -> Result<(), IndexCreateError>;
    /// Re-list the collection's indexes and confirm `rule`'s normalized key
    /// is present (S4.5 step 4).
    async fn validate(&self, rule: &IndexRule) -> Result<bool, IndexCreateError>;
}
