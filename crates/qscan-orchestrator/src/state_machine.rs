//! Explicit phase transitions for a cycled workflow (S4.2 transition
//! table). [`apply`] enforces legal transitions only; illegal combinations
//! return [`TransitionError`], which callers must treat as an orchestrator-
//! level escalation to `stopped`, not a recoverable condition.

use qscan_schemas::{CycledListState, OrchestratorPhase};

#[derive(Debug, Clone, PartialEq)]
pub enum OrchestratorEvent {
    Create,
    StepFailurePauses { reason: String },
    StepFailureStops { reason: String },
    CycleEndMaxCyclesReached,
    CycleEndContinue,
    CycleEndPause,
    PauseManually,
    ResumeManually,
    ContinuePredicatesPassed,
    Stop { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionError {
    pub from: OrchestratorPhase,
    pub event: String,
}

impl std::fmt::Display for TransitionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "illegal orchestrator transition: {:?} + {}", self.from, self.event)
    }
}

impl std::error::Error for TransitionError {}

fn illegal(state: &CycledListState, event: &OrchestratorEvent) -> TransitionError {
    TransitionError {
        from: state.phase,
        event: format!("{event:?}"),
    }
}

/// Apply `event` to `state` in place (S4.2's transition table). `stop` is
/// legal from any phase; everything else is legal from exactly one phase.
pub fn apply(state: &mut CycledListState, event: OrchestratorEvent) -> Result<(), TransitionError> {
    if let OrchestratorEvent::Stop { reason } = &event {
        state.phase = OrchestratorPhase::Stopped;
        state.is_running = false;
        state.is_paused = false;
        state.stop_reason = Some(reason.clone());
        return Ok(());
    }

    match (state.phase, &event) {
        (OrchestratorPhase::Uninitialized, OrchestratorEvent::Create) => {
            state.phase = OrchestratorPhase::Running;
            state.is_running = true;
            state.is_paused = false;
        }
        (OrchestratorPhase::Running, OrchestratorEvent::StepFailurePauses { reason }) => {
            state.phase = OrchestratorPhase::Paused;
            state.is_running = false;
            state.is_paused = true;
            state.pause_reason = Some(reason.clone());
        }
        (OrchestratorPhase::Running, OrchestratorEvent::StepFailureStops { reason }) => {
            state.phase = OrchestratorPhase::Stopped;
            state.is_running = false;
            state.is_paused = false;
            state.stop_reason = Some(reason.clone());
        }
        (OrchestratorPhase::Running, OrchestratorEvent::CycleEndMaxCyclesReached) => {
            state.phase = OrchestratorPhase::Completed;
            state.is_running = false;
            state.is_paused = false;
        }
        (OrchestratorPhase::Running, OrchestratorEvent::CycleEndContinue) => {
            // Stays running; next cycle begins immediately.
        }
        (OrchestratorPhase::Running, OrchestratorEvent::CycleEndPause) => {
            state.phase = OrchestratorPhase::Paused;
            state.is_running = false;
            state.is_paused = true;
        }
        (OrchestratorPhase::Running, OrchestratorEvent::PauseManually) => {
            state.phase = OrchestratorPhase::Paused;
            state.is_running = false;
            state.is_paused = true;
            state.manual_pause = true;
        }
        (OrchestratorPhase::Paused, OrchestratorEvent::ContinuePredicatesPassed) => {
            if state.manual_pause {
                return Err(illegal(state, &event));
            }
            state.phase = OrchestratorPhase::Running;
            state.is_running = true;
            state.is_paused = false;
        }
        (OrchestratorPhase::Paused, OrchestratorEvent::ResumeManually) => {
            state.phase = OrchestratorPhase::Running;
            state.is_running = true;
            state.is_paused = false;
            state.manual_pause = false;
        }
        _ => return Err(illegal(state, &event)),
    }

    debug_assert!(state.invariant_holds());
    Ok(())
}
