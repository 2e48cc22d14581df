//! Callback-facing context (S4.1): the only surface a registered job body
//! sees. Progress and log calls mutate an in-memory buffer that the runner
//! flushes into the persisted record on completion — the callback itself
//! never touches the database.

use qscan_schemas::{JobErrorDetails, JobLogLine, LogLevel};
use std::sync::Mutex;

/// Log lines containing any of these substrings are persisted; everything
/// else goes to the process logger only, to bound record size (S4.1).
const PERSISTED_MARKERS: [&str; 3] = ["started", "completed", "Summary"];

#[derive(Debug, thiserror::Error)]
pub enum ContextError {
    #[error("progress must be within [0, 1], got {0}")]
    ProgressOutOfRange(f64),
}

#[derive(Default)]
struct ContextState {
    progress: f64,
    logs: Vec<JobLogLine>,
}

pub struct JobContext {
    state: Mutex<ContextState>,
    log_cap: usize,
}

impl JobContext {
    pub fn new(log_cap: usize) -> Self {
        Self {
            state: Mutex::new(ContextState::default()),
            log_cap,
        }
    }

    pub fn progress(&self, p: f64) -> Result<(), ContextError> {
        if !(0.0..=1.0).contains(&p) {
            return Err(ContextError::ProgressOutOfRange(p));
        }
        self.state.lock().unwrap().progress = p;
        Ok(())
    }

    /// Non-blocking by contract: never returns an error, never awaits.
    pub fn append_log(&self, msg: impl Into<String>, level: LogLevel) {
        let msg = msg.into();
        let should_persist =
            matches!(level, LogLevel::Error | LogLevel::Warn) || PERSISTED_MARKERS.iter().any(|m| msg.contains(m));

        match level {
            LogLevel::Error => tracing::error!(%msg, "job log"),
            LogLevel::Warn => tracing::warn!(%msg, "job log"),
            LogLevel::Info => tracing::info!(%msg, "job log"),
        }

        if should_persist {
            let mut state = self.state.lock().unwrap();
            state.logs.push(JobLogLine {
                ts: chrono::Utc::now(),
                level,
                msg,
            });
            if state.logs.len() > self.log_cap {
                let overflow = state.logs.len() - self.log_cap;
                state.logs.drain(0..overflow);
            }
        }
    }

    pub fn current_progress(&self) -> f64 {
        self.state.lock().unwrap().progress
    }

    pub fn drain_logs(&self) -> Vec<JobLogLine> {
        std::mem::take(&mut self.state.lock().unwrap().logs)
    }
}

/// A callback's outcome: either a JSON result payload or structured error
/// details (S4.1 step 4).
pub enum JobOutcome {
    Success(Option<serde_json::Value>),
    Failure(JobErrorDetails),
}
