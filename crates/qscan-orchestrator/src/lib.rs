//! Cycled workflow orchestrator (S4.2): executes an ordered list of steps
//! continuously in cycles, with parallel groups, pause/continue
//! predicates, cooperative cancellation, and a named step registry.

pub mod orchestrator;
pub mod plugin_registry;
pub mod predicates;
pub mod state_machine;
pub mod step;

pub use orchestrator::{CycledWorkflowOrchestrator, OrchestratorOptions, DEFAULT_CONDITION_CHECK_INTERVAL};
pub use plugin_registry::{RegistryError, StepFactory, StepMeta, StepRegistry};
pub use predicates::{CancelHook, ContinuePredicate, PausePredicate, StatusNotifier};
pub use qscan_schemas::{CycledListState, NodeStatus, OrchestratorPhase, WorkflowNode};
pub use state_machine::{apply, OrchestratorEvent, TransitionError};
pub use step::{Step, StepError};
