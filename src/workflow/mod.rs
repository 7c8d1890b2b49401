//! Workflow orchestration system
//!
//! A run moves through six fixed steps, each handled by one LLM agent:
//!
//! - **Steps**: `generate_draft`, `map_risks`, `map_controls`,
//!   `generate_mitigations`, `flag_issues`, `evaluate_decision`
//! - **Gate**: one advisory guardrail check after `flag_issues`
//! - **State**: one persisted record per run, saved after every step
//! - **Feedback**: reviewer notes that revise a run after the fact
//!
//! ## Running Workflows
//!
//! ```bash
//! # Run to completion
//! rcsa run "Build an internal ML model to flag expense report anomalies"
//!
//! # Pause after every step
//! rcsa run --step-by-step "Vendor onboarding portal"
//! rcsa resume <run-id>
//!
//! # Revise a finished step
//! rcsa feedback <run-id> map_risks "Missing third-party vendor risk"
//! ```

pub mod executor;
pub mod feedback;
pub mod gate;
pub mod runner;
pub mod state;
pub mod step;
pub mod store;

pub use executor::{StepExecutor, StepResult};
pub use feedback::{validate_revision, FeedbackProcessor, RevisionError};
pub use gate::{GuardrailGate, GuardrailViolation};
pub use runner::{RunOptions, WorkflowRunner};
pub use state::{StepFeedback, UiUpdate, WorkflowState, WorkflowStatus, AWAIT_FEEDBACK};
pub use step::{
    extract_json, ControlMapping, DecodeError, Decision, Decoded, DraftSubmission, Issue,
    MappedControl, Mitigation, RiskMapping, Step, StepOutput, Verdict,
};
pub use store::{FileStore, MemoryStore, RunLock, StateManager, StateStore};
