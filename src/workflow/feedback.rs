//! Human feedback on finished steps
//!
//! Feedback is recorded against a step and handed, with the full run state,
//! to the harness for revision. The reply replaces the stored state only if
//! it is a complete, consistent state; anything else leaves the run as it
//! was, apart from the recorded feedback. Later steps are never re-run.

use std::sync::Arc;
use tracing::{error, info, warn};

use super::state::WorkflowState;
use super::step::{extract_json, Step};
use super::store::StateManager;
use crate::harness::{Harness, StateSnapshot};
use crate::{Error, Result};

/// Why a revision reply was not accepted
#[derive(Debug, thiserror::Error)]
pub enum RevisionError {
    #[error("reply is not a workflow state: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("reply drops the {0} output")]
    DroppedStep(Step),

    #[error("reply changes the project description")]
    DescriptionChanged,
}

/// Applies reviewer feedback to stored runs
pub struct FeedbackProcessor {
    harness: Arc<dyn Harness>,
    state_manager: Arc<StateManager>,
}

impl FeedbackProcessor {
    pub fn new(harness: Arc<dyn Harness>, state_manager: Arc<StateManager>) -> Self {
        Self {
            harness,
            state_manager,
        }
    }

    /// Record `feedback` for `step` on `run_id` and revise the run
    ///
    /// Returns `Error::NotFound` without writing anything when the run is
    /// missing, the step name is unknown, or the step has not run yet.
    pub async fn apply_feedback(
        &self,
        run_id: &str,
        step: &str,
        feedback: &str,
    ) -> Result<WorkflowState> {
        if !self.state_manager.exists(run_id) {
            return Err(Error::NotFound(format!("Workflow run {}", run_id)));
        }

        // Held across the whole cycle so the runner cannot interleave a step
        let _guard = self.state_manager.lock(run_id).await;

        let mut state = self.state_manager.load(run_id)?;
        let step: Step = step.parse()?;
        if !state.has_output(step) {
            return Err(Error::NotFound(format!(
                "Step {} has not run for workflow {}",
                step, run_id
            )));
        }

        state.record_feedback(step, feedback);

        let snapshot = StateSnapshot::new(&state);
        let reply = match self.harness.revise(&snapshot, step, feedback).await {
            Ok(reply) => reply,
            Err(e) => {
                error!("[{}] Revision for {} failed: {}", run_id, step, e);
                self.state_manager.save(run_id, &state)?;
                return Err(e);
            }
        };

        let state = match validate_revision(&state, &reply) {
            Ok(mut revised) => {
                revised.record_feedback(step, feedback);
                info!("[{}] Applied feedback to {}", run_id, step);
                revised
            }
            Err(e) => {
                warn!(
                    "[{}] Error parsing feedback response for {}: {}",
                    run_id, step, e
                );
                state
            }
        };

        self.state_manager.save(run_id, &state)?;
        Ok(state)
    }
}

/// Decode a revision reply and check it against the state it revises
pub fn validate_revision(
    before: &WorkflowState,
    reply: &str,
) -> std::result::Result<WorkflowState, RevisionError> {
    let revised: WorkflowState = serde_json::from_str(extract_json(reply))?;

    if revised.project_description() != before.project_description() {
        return Err(RevisionError::DescriptionChanged);
    }
    if let Some(step) = before
        .executed_steps()
        .into_iter()
        .find(|step| !revised.has_output(*step))
    {
        return Err(RevisionError::DroppedStep(step));
    }

    Ok(revised)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::step::StepOutput;

    fn before() -> WorkflowState {
        let mut state = WorkflowState::new("HR chatbot");
        state.record_step(StepOutput::raw(Step::GenerateDraft, "draft"), None);
        state.record_step(StepOutput::raw(Step::MapRisks, "risks"), None);
        state
    }

    #[test]
    fn test_validate_accepts_complete_revision() {
        let mut revised = before();
        revised.record_step(StepOutput::raw(Step::MapRisks, "risks incl. vendor"), None);
        let reply = format!("```json\n{}\n```", serde_json::to_string(&revised).unwrap());

        let accepted = validate_revision(&before(), &reply).unwrap();
        assert_eq!(accepted, revised);
    }

    #[test]
    fn test_validate_accepts_state_holding_fenced_raw_output() {
        let mut before = before();
        before.record_step(
            StepOutput::raw(
                Step::EvaluateDecision,
                "```json\n{\"decision\": \"Needs review\"}\n```",
            ),
            None,
        );
        let reply = serde_json::to_string(&before).unwrap();

        let accepted = validate_revision(&before, &reply).unwrap();
        assert_eq!(accepted, before);

        let fenced = format!("```json\n{}\n```", reply);
        assert_eq!(validate_revision(&before, &fenced).unwrap(), before);
    }

    #[test]
    fn test_validate_rejects_dropped_step() {
        let mut partial = WorkflowState::new("HR chatbot");
        partial.record_step(StepOutput::raw(Step::GenerateDraft, "draft"), None);
        let reply = serde_json::to_string(&partial).unwrap();

        assert!(matches!(
            validate_revision(&before(), &reply),
            Err(RevisionError::DroppedStep(Step::MapRisks))
        ));
    }

    #[test]
    fn test_validate_rejects_changed_description() {
        let mut other = WorkflowState::new("Payroll migration");
        other.record_step(StepOutput::raw(Step::GenerateDraft, "draft"), None);
        other.record_step(StepOutput::raw(Step::MapRisks, "risks"), None);
        let reply = serde_json::to_string(&other).unwrap();

        assert!(matches!(
            validate_revision(&before(), &reply),
            Err(RevisionError::DescriptionChanged)
        ));
    }

    #[test]
    fn test_validate_rejects_prose() {
        assert!(matches!(
            validate_revision(&before(), "Sure, I updated the risks."),
            Err(RevisionError::Decode(_))
        ));
    }
}
