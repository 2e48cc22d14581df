//! Cron-driven job runner (S4.1): crash-safe lifecycle state, stuck-job
//! recovery, and atomic status transitions layered on `qscan-db`.

pub mod context;
pub mod runner;
pub mod scheduler;

pub use context::{ContextError, JobContext, JobOutcome};
pub use runner::{JobCallback, JobDefinition, TickOutcome, DEFAULT_LOG_CAP, DEFAULT_STUCK_THRESHOLD, DEFAULT_TIMEOUT};
pub use scheduler::JobRunner;
