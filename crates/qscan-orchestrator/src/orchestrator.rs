//! Cycled workflow execution engine (S4.2): runs an ordered list of steps
//! continuously, executing consecutive same-`parallelGroup` nodes
//! concurrently, consulting pause/continue predicates around failures and
//! cycle boundaries.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures_util::future::join_all;
use qscan_schemas::{CycledListState, NodeStatus, WorkflowNode};
use tokio::sync::Mutex;

use crate::plugin_registry::StepRegistry;
use crate::predicates::{CancelHook, ContinuePredicate, PausePredicate, StatusNotifier};
use crate::state_machine::{apply, OrchestratorEvent, TransitionError};

pub const DEFAULT_CONDITION_CHECK_INTERVAL: Duration = Duration::from_secs(5);

pub struct CycledWorkflowOrchestrator {
    registry: Arc<StepRegistry>,
    nodes: Mutex<Vec<WorkflowNode>>,
    state: Mutex<CycledListState>,
    pause_predicates: Vec<Arc<dyn PausePredicate>>,
    continue_predicates: Vec<Arc<dyn ContinuePredicate>>,
    cancel_hook: Option<Arc<dyn CancelHook>>,
    notifier: Option<Arc<dyn StatusNotifier>>,
}

pub struct OrchestratorOptions {
    pub max_cycles: Option<u64>,
    pub pause_predicates: Vec<Arc<dyn PausePredicate>>,
    pub continue_predicates: Vec<Arc<dyn ContinuePredicate>>,
    pub cancel_hook: Option<Arc<dyn CancelHook>>,
    pub notifier: Option<Arc<dyn StatusNotifier>>,
}

impl Default for OrchestratorOptions {
    fn default() -> Self {
        Self {
            max_cycles: None,
            pause_predicates: Vec::new(),
            continue_predicates: Vec::new(),
            cancel_hook: None,
            notifier: None,
        }
    }
}

impl CycledWorkflowOrchestrator {
    pub fn create(
        name: impl Into<String>,
        nodes: Vec<WorkflowNode>,
        registry: Arc<StepRegistry>,
        opts: OrchestratorOptions,
    ) -> Result<Self, TransitionError> {
        let mut state = CycledListState::new(name, opts.max_cycles);
        apply(&mut state, OrchestratorEvent::Create)?;
        Ok(Self {
            registry,
            nodes: Mutex::new(nodes),
            state: Mutex::new(state),
            pause_predicates: opts.pause_predicates,
            continue_predicates: opts.continue_predicates,
            cancel_hook: opts.cancel_hook,
            notifier: opts.notifier,
        })
    }

    pub async fn snapshot(&self) -> CycledListState {
        self.state.lock().await.clone()
    }

    pub async fn pause_manually(&self) -> Result<(), TransitionError> {
        let mut state = self.state.lock().await;
        apply(&mut state, OrchestratorEvent::PauseManually)?;
        self.notify(&state).await;
        Ok(())
    }

    pub async fn resume_manually(&self) -> Result<(), TransitionError> {
        let mut state = self.state.lock().await;
        apply(&mut state, OrchestratorEvent::ResumeManually)?;
        self.notify(&state).await;
        Ok(())
    }

    pub async fn stop(&self, reason: impl Into<String>) {
        let mut state = self.state.lock().await;
        let _ = apply(&mut state, OrchestratorEvent::Stop { reason: reason.into() });
        self.notify(&state).await;
    }

    async fn notify(&self, state: &CycledListState) {
        if let Some(notifier) = &self.notifier {
            notifier.notify(state).await;
        }
    }

    /// Run cycles until a terminal phase (stopped or completed) is reached,
    /// or until paused with no continue predicates registered to drive
    /// resumption (callers own the background condition-checker — see
    /// [`Self::run_condition_checker`]).
    pub async fn run_until_terminal(&self) {
        loop {
            let phase = self.state.lock().await.phase;
            match phase {
                qscan_schemas::OrchestratorPhase::Stopped
                | qscan_schemas::OrchestratorPhase::Completed => return,
                qscan_schemas::OrchestratorPhase::Paused => return,
                _ => {}
            }
            self.run_one_cycle().await;
        }
    }

    /// Execute a single cycle starting at `currentAsyncFnIndex` (S4.2
    /// execution protocol).
    pub async fn run_one_cycle(&self) {
        let node_count = self.nodes.lock().await.len();
        let mut index = self.state.lock().await.current_async_fn_index;

        while index < node_count {
            if self.state.lock().await.is_paused {
                return;
            }

            let group = self.nodes.lock().await[index].parallel_group.clone();
            let group_end = match &group {
                None => index + 1,
                Some(g) => {
                    let nodes = self.nodes.lock().await;
                    let mut end = index + 1;
                    while end < node_count && nodes[end].parallel_group.as_deref() == Some(g.as_str()) {
                        end += 1;
                    }
                    end
                }
            };

            let last_error = if group_end - index == 1 {
                self.run_single(index).await
            } else {
                self.run_group(index, group_end).await
            };

            if let Some(error) = last_error {
                let should_pause = self.consult_pause_predicates(Some(&error)).await;
                let mut state = self.state.lock().await;
                let event = if should_pause {
                    OrchestratorEvent::StepFailurePauses { reason: error }
                } else {
                    OrchestratorEvent::StepFailureStops { reason: error }
                };
                let _ = apply(&mut state, event);
                if state.is_paused {
                    self.cancel_in_flight(index, group_end).await;
                }
                let snapshot = state.clone();
                drop(state);
                self.notify(&snapshot).await;
                return;
            }

            index = group_end;
            self.state.lock().await.current_async_fn_index = index;
        }

        self.finish_cycle().await;
    }

    async fn run_single(&self, index: usize) -> Option<String> {
        let function_name = {
            let mut nodes = self.nodes.lock().await;
            nodes[index].status = NodeStatus::Running;
            nodes[index].started_at = Some(Utc::now());
            nodes[index].attempts += 1;
            nodes[index].function_name.clone()
        };

        let outcome = self.invoke_step(&function_name).await;
        self.apply_node_outcome(index, outcome).await
    }

    async fn run_group(&self, start: usize, end: usize) -> Option<String> {
        let function_names: Vec<(usize, String)> = {
            let mut nodes = self.nodes.lock().await;
            (start..end)
                .map(|i| {
                    nodes[i].status = NodeStatus::Running;
                    nodes[i].started_at = Some(Utc::now());
                    nodes[i].attempts += 1;
                    (i, nodes[i].function_name.clone())
                })
                .collect()
        };

        let outcomes = join_all(
            function_names
                .iter()
                .map(|(_, name)| self.invoke_step(name)),
        )
        .await;

        let mut first_error = None;
        for ((index, _), outcome) in function_names.into_iter().zip(outcomes) {
            if let Some(error) = self.apply_node_outcome(index, outcome).await {
                first_error.get_or_insert(error);
            }
        }
        first_error
    }

    async fn invoke_step(&self, function_name: &str) -> Result<Option<serde_json::Value>, String> {
        let step = self
            .registry
            .instantiate(function_name)
            .map_err(|e| e.to_string())?;
        step.run().await.map_err(|e| e.0)
    }

    /// Apply a step's outcome to its node; returns `Some(error)` on a
    /// non-cancelled failure.
    async fn apply_node_outcome(
        &self,
        index: usize,
        outcome: Result<Option<serde_json::Value>, String>,
    ) -> Option<String> {
        let mut nodes = self.nodes.lock().await;
        let node = &mut nodes[index];
        if node.cancelled {
            // Cancelled mid-execution: leave pending so continue() replays it.
            node.status = NodeStatus::Pending;
            node.cancelled = false;
            return None;
        }
        match outcome {
            Ok(result) => {
                node.status = NodeStatus::Completed;
                node.completed_at = Some(Utc::now());
                node.result = result;
                None
            }
            Err(error) => {
                node.status = NodeStatus::Failed;
                node.failed_at = Some(Utc::now());
                node.error = Some(error.clone());
                Some(error)
            }
        }
    }

    async fn consult_pause_predicates(&self, last_error: Option<&str>) -> bool {
        if self.pause_predicates.is_empty() {
            return false;
        }
        for predicate in &self.pause_predicates {
            if predicate.should_pause(last_error).await {
                return true;
            }
        }
        false
    }

    async fn cancel_in_flight(&self, start: usize, end: usize) {
        {
            let mut nodes = self.nodes.lock().await;
            for node in &mut nodes[start..end] {
                if node.status == NodeStatus::Running {
                    node.cancelled = true;
                }
            }
        }
        if let Some(hook) = &self.cancel_hook {
            hook.cancel().await;
        }
    }

    async fn finish_cycle(&self) {
        let mut state = self.state.lock().await;
        state.total_cycles += 1;
        state.current_cycle += 1;
        state.current_async_fn_index = 0;
        {
            let mut nodes = self.nodes.lock().await;
            for node in nodes.iter_mut() {
                node.reset();
            }
        }

        let event = if state.max_cycles.map(|max| state.total_cycles >= max).unwrap_or(false) {
            OrchestratorEvent::CycleEndMaxCyclesReached
        } else if self.continue_ready().await {
            OrchestratorEvent::CycleEndContinue
        } else {
            OrchestratorEvent::CycleEndPause
        };
        let terminal = matches!(
            event,
            OrchestratorEvent::CycleEndMaxCyclesReached | OrchestratorEvent::CycleEndPause
        );
        let _ = apply(&mut state, event);
        if terminal {
            let snapshot = state.clone();
            drop(state);
            self.notify(&snapshot).await;
        }
    }

    /// Continue predicates are evaluated per-predicate: each predicate's
    /// truth value is independent, and all must pass (design decision —
    /// see design notes on predicate serialization).
    async fn continue_ready(&self) -> bool {
        if self.continue_predicates.is_empty() {
            return true;
        }
        for predicate in &self.continue_predicates {
            if !predicate.ready().await {
                return false;
            }
        }
        true
    }

    /// Background condition-checker (S4.2): while paused and not manually
    /// paused, poll continue predicates at `interval` and drive the
    /// transition back to running when they all pass. Runs until the
    /// orchestrator leaves the paused phase or reaches a terminal phase.
    pub async fn run_condition_checker(self: &Arc<Self>, interval: Duration) {
        loop {
            tokio::time::sleep(interval).await;
            let (is_paused, manual_pause, phase) = {
                let state = self.state.lock().await;
                (state.is_paused, state.manual_pause, state.phase)
            };
            if matches!(
                phase,
                qscan_schemas::OrchestratorPhase::Stopped | qscan_schemas::OrchestratorPhase::Completed
            ) {
                return;
            }
            if !is_paused || manual_pause {
                continue;
            }
            if self.continue_ready().await {
                let mut state = self.state.lock().await;
                let _ = apply(&mut state, OrchestratorEvent::ContinuePredicatesPassed);
                let snapshot = state.clone();
                drop(state);
                self.notify(&snapshot).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin_registry::StepMeta;
    use crate::step::{Step, StepError};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingStep {
        counter: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Step for CountingStep {
        async fn run(&self) -> Result<Option<serde_json::Value>, StepError> {
            self.counter.fetch_add(1, Ordering::SeqCst);
            Ok(None)
        }
    }

    struct FailingStep;

    #[async_trait]
    impl Step for FailingStep {
        async fn run(&self) -> Result<Option<serde_json::Value>, StepError> {
            Err(StepError("boom".into()))
        }
    }

    struct AlwaysPause;

    #[async_trait]
    impl PausePredicate for AlwaysPause {
        async fn should_pause(&self, _last_error: Option<&str>) -> bool {
            true
        }
    }

    fn registry_with_counter(counter: Arc<AtomicUsize>) -> Arc<StepRegistry> {
        let mut reg = StepRegistry::new();
        reg.register(StepMeta::new("count", "1.0.0", ""), move || {
            Box::new(CountingStep { counter: counter.clone() })
        })
        .unwrap();
        Arc::new(reg)
    }

    #[tokio::test]
    async fn one_cycle_runs_every_node_in_order() {
        let counter = Arc::new(AtomicUsize::new(0));
        let registry = registry_with_counter(counter.clone());
        let nodes = vec![
            WorkflowNode::new("n1", "n1", "count"),
            WorkflowNode::new("n2", "n2", "count"),
        ];
        let orch = CycledWorkflowOrchestrator::create(
            "wf",
            nodes,
            registry,
            OrchestratorOptions { max_cycles: Some(1), ..Default::default() },
        )
        .unwrap();
        orch.run_one_cycle().await;
        assert_eq!(counter.load(Ordering::SeqCst), 2);
        assert_eq!(orch.snapshot().await.phase, qscan_schemas::OrchestratorPhase::Completed);
    }

    #[tokio::test]
    async fn parallel_group_runs_concurrently() {
        let counter = Arc::new(AtomicUsize::new(0));
        let registry = registry_with_counter(counter.clone());
        let nodes = vec![
            WorkflowNode::new("n1", "n1", "count").with_parallel_group("g1"),
            WorkflowNode::new("n2", "n2", "count").with_parallel_group("g1"),
            WorkflowNode::new("n3", "n3", "count"),
        ];
        let orch = CycledWorkflowOrchestrator::create(
            "wf",
            nodes,
            registry,
            OrchestratorOptions { max_cycles: Some(1), ..Default::default() },
        )
        .unwrap();
        orch.run_one_cycle().await;
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn failure_without_pause_predicate_stops() {
        let mut reg = StepRegistry::new();
        reg.register(StepMeta::new("fail", "1.0.0", ""), || Box::new(FailingStep))
            .unwrap();
        let nodes = vec![WorkflowNode::new("n1", "n1", "fail")];
        let orch = CycledWorkflowOrchestrator::create(
            "wf",
            nodes,
            Arc::new(reg),
            OrchestratorOptions::default(),
        )
        .unwrap();
        orch.run_one_cycle().await;
        assert_eq!(orch.snapshot().await.phase, qscan_schemas::OrchestratorPhase::Stopped);
    }

    #[tokio::test]
    async fn failure_with_pause_predicate_pauses() {
        let mut reg = StepRegistry::new();
        reg.register(StepMeta::new("fail", "1.0.0", ""), || Box::new(FailingStep))
            .unwrap();
        let nodes = vec![WorkflowNode::new("n1", "n1", "fail")];
        let orch = CycledWorkflowOrchestrator::create(
            "wf",
            nodes,
            Arc::new(reg),
            OrchestratorOptions {
                pause_predicates: vec![Arc::new(AlwaysPause)],
                ..Default::default()
            },
        )
        .unwrap();
        orch.run_one_cycle().await;
        assert_eq!(orch.snapshot().await.phase, qscan_schemas::OrchestratorPhase::Paused);
    }

    #[tokio::test]
    async fn manual_pause_then_resume_round_trips() {
        let counter = Arc::new(AtomicUsize::new(0));
        let registry = registry_with_counter(counter.clone());
        let nodes = vec![WorkflowNode::new("n1", "n1", "count")];
        let orch = CycledWorkflowOrchestrator::create("wf", nodes, registry, OrchestratorOptions::default())
            .unwrap();
        orch.pause_manually().await.unwrap();
        assert!(orch.snapshot().await.manual_pause);
        orch.resume_manually().await.unwrap();
        assert_eq!(orch.snapshot().await.phase, qscan_schemas::OrchestratorPhase::Running);
    }
}
