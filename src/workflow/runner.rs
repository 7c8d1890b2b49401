//! Workflow runner/orchestrator
//!
//! Drives a run through the six steps, handling:
//! - Resumption from the first step without an output
//! - The guardrail checkpoint after `flag_issues`
//! - Step-by-step pauses
//! - State persistence after every step
//! - Refusing a second driver for a run that is already going

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::executor::StepExecutor;
use super::gate::GuardrailGate;
use super::state::{StepFeedback, WorkflowState, WorkflowStatus};
use super::store::StateManager;
use crate::catalog::Catalog;
use crate::harness::Harness;
use crate::{Error, Result};

/// Options for running a workflow
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Pause for review after every step
    pub step_by_step: bool,
}

/// Workflow runner
pub struct WorkflowRunner {
    executor: StepExecutor,
    gate: GuardrailGate,
    state_manager: Arc<StateManager>,
    active: Mutex<HashSet<String>>,
}

/// Marks a run as driven by this runner until dropped
struct ActiveRun<'a> {
    run_id: String,
    active: &'a Mutex<HashSet<String>>,
}

impl Drop for ActiveRun<'_> {
    fn drop(&mut self) {
        self.active
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&self.run_id);
    }
}

impl WorkflowRunner {
    /// Create a new workflow runner
    pub fn new(
        harness: Arc<dyn Harness>,
        catalog: Arc<Catalog>,
        state_manager: Arc<StateManager>,
    ) -> Self {
        Self {
            executor: StepExecutor::new(Arc::clone(&harness), Arc::clone(&catalog)),
            gate: GuardrailGate::new(harness, catalog),
            state_manager,
            active: Mutex::new(HashSet::new()),
        }
    }

    pub fn state_manager(&self) -> &Arc<StateManager> {
        &self.state_manager
    }

    /// Create the record for a run and return its ID
    ///
    /// A fresh ID is generated when none is given. An existing record under
    /// the given ID is kept as is, so running it again resumes it.
    pub async fn create(&self, run_id: Option<String>, project_description: &str) -> Result<String> {
        let run_id = run_id.unwrap_or_else(|| Uuid::new_v4().to_string());
        let state = WorkflowState::new(project_description);

        if self.state_manager.create(&run_id, &state).await? {
            info!("Starting new workflow run: {}", run_id);
        } else {
            info!("Workflow run {} already exists, resuming", run_id);
        }
        Ok(run_id)
    }

    /// Run the workflow from wherever `run_id` left off
    ///
    /// Fails with `Error::Workflow` while another call is driving the same run.
    pub async fn run(&self, run_id: &str, options: &RunOptions) -> Result<WorkflowState> {
        let _active = self.claim(run_id)?;
        let mut state = self.state_manager.load(run_id)?;

        if state.status() == WorkflowStatus::Completed {
            debug!("Workflow run {} already completed", run_id);
            return Ok(state);
        }

        loop {
            if self.needs_guardrail(&state) {
                state = self.run_guardrail(run_id, &state).await?;
            }

            let Some(step) = state.next_step() else {
                break;
            };

            info!("[{}] Running step {}: {}", run_id, step.index() + 1, step.label());
            let result = match self.executor.run(step, &state).await {
                Ok(result) => result,
                Err(e) => {
                    error!("[{}] Step {} failed: {}", run_id, step, e);
                    return Err(e);
                }
            };

            let feedback = options.step_by_step.then_some(StepFeedback::Awaiting);
            state = self
                .state_manager
                .update(run_id, move |s| {
                    if s.has_output(step) {
                        warn!("[{}] Step {} was already recorded, keeping it", run_id, step);
                    } else {
                        s.record_step(result.output, feedback);
                    }
                })
                .await?;

            if options.step_by_step && state.next_step().is_some() {
                info!("[{}] Paused after {} for review", run_id, step);
                return Ok(state);
            }
        }

        // Workflow complete
        let state = self.state_manager.update(run_id, |s| s.complete()).await?;
        info!("Workflow completed: {}", run_id);
        Ok(state)
    }

    fn claim(&self, run_id: &str) -> Result<ActiveRun<'_>> {
        let mut active = self.active.lock().unwrap_or_else(|e| e.into_inner());
        if !active.insert(run_id.to_string()) {
            return Err(Error::Workflow(format!(
                "Workflow run {} is already running",
                run_id
            )));
        }
        Ok(ActiveRun {
            run_id: run_id.to_string(),
            active: &self.active,
        })
    }

    /// The checkpoint has output but no findings, and the decision is not in yet
    fn needs_guardrail(&self, state: &WorkflowState) -> bool {
        let checkpoint = GuardrailGate::CHECKPOINT;
        state.has_output(checkpoint)
            && !state.has_guardrail(checkpoint)
            && checkpoint.next().map_or(true, |next| !state.has_output(next))
    }

    async fn run_guardrail(&self, run_id: &str, state: &WorkflowState) -> Result<WorkflowState> {
        let checkpoint = GuardrailGate::CHECKPOINT;
        let violations = match self.gate.evaluate(checkpoint, state).await {
            Ok(violations) => violations,
            Err(e) => {
                error!("[{}] Guardrail check failed: {}", run_id, e);
                return Err(e);
            }
        };

        self.state_manager
            .update(run_id, move |s| {
                if !s.has_guardrail(checkpoint) {
                    s.record_guardrail(checkpoint, violations);
                }
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::harness::StateSnapshot;
    use crate::workflow::step::Step;
    use async_trait::async_trait;

    /// Answers every step with text that does not decode
    #[derive(Default)]
    struct Chatty {
        calls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Harness for Chatty {
        fn name(&self) -> &str {
            "chatty"
        }

        async fn execute_step(&self, step: Step, _context: &StateSnapshot) -> Result<String> {
            self.calls.lock().unwrap().push(step.to_string());
            if step == Step::GenerateMitigations {
                return Err(Error::Capability("rate limited".to_string()));
            }
            Ok(format!("notes for {}", step))
        }

        async fn evaluate_guardrails(&self, _step: Step, _content: &str) -> Result<String> {
            self.calls.lock().unwrap().push("guardrail".to_string());
            Ok("[]".to_string())
        }

        async fn revise(&self, _: &StateSnapshot, _: Step, _: &str) -> Result<String> {
            unreachable!()
        }
    }

    #[tokio::test]
    async fn test_capability_error_keeps_progress() {
        let harness = Arc::new(Chatty::default());
        let manager = Arc::new(StateManager::in_memory());
        let runner = WorkflowRunner::new(
            harness.clone(),
            Arc::new(Catalog::default()),
            Arc::clone(&manager),
        );

        let run_id = runner.create(None, "Cloud payroll").await.unwrap();
        let err = runner.run(&run_id, &RunOptions::default()).await.unwrap_err();
        assert!(matches!(err, Error::Capability(_)));

        let state = manager.load(&run_id).unwrap();
        assert_eq!(
            state.executed_steps(),
            vec![Step::GenerateDraft, Step::MapRisks, Step::MapControls]
        );
        assert!(state.draft_submission().unwrap().is_raw());
        assert_eq!(state.status(), WorkflowStatus::InProgress);
        assert_eq!(state.next_step(), Some(Step::GenerateMitigations));
    }

    #[tokio::test]
    async fn test_run_refuses_second_driver() {
        let manager = Arc::new(StateManager::in_memory());
        let runner = WorkflowRunner::new(
            Arc::new(Chatty::default()),
            Arc::new(Catalog::default()),
            Arc::clone(&manager),
        );
        let run_id = runner.create(None, "Cloud payroll").await.unwrap();

        let active = runner.claim(&run_id).unwrap();
        let err = runner.run(&run_id, &RunOptions::default()).await.unwrap_err();
        assert!(matches!(err, Error::Workflow(_)));
        assert!(manager.load(&run_id).unwrap().executed_steps().is_empty());

        drop(active);
        runner.run(&run_id, &RunOptions::default()).await.unwrap_err();
        assert_eq!(manager.load(&run_id).unwrap().executed_steps().len(), 3);
    }

    #[tokio::test]
    async fn test_create_keeps_existing_run() {
        let manager = Arc::new(StateManager::in_memory());
        let runner = WorkflowRunner::new(
            Arc::new(Chatty::default()),
            Arc::new(Catalog::default()),
            Arc::clone(&manager),
        );

        let id = runner.create(Some("r1".to_string()), "first").await.unwrap();
        assert_eq!(id, "r1");
        runner.create(Some("r1".to_string()), "second").await.unwrap();
        assert_eq!(manager.load("r1").unwrap().project_description(), "first");
    }
}
