//! Step execution
//!
//! Builds the context for one step, calls the harness, and decodes what
//! comes back. Decoding is best effort: text that does not match the step's
//! expected shape is kept verbatim so the run can move on.

use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::state::WorkflowState;
use super::step::{DecodeError, Step, StepOutput};
use crate::catalog::{Catalog, PastMitigation};
use crate::harness::{Harness, StateSnapshot};
use crate::Result;

/// Outcome of one step call
#[derive(Debug)]
pub struct StepResult {
    /// Decoded output, or the raw text wrapped for the step
    pub output: StepOutput,
    /// Text exactly as the harness returned it
    pub raw: String,
    /// Why decoding failed, when it did
    pub decode_error: Option<DecodeError>,
}

impl StepResult {
    pub fn is_decoded(&self) -> bool {
        self.decode_error.is_none()
    }
}

/// Runs individual steps against the harness
pub struct StepExecutor {
    harness: Arc<dyn Harness>,
    catalog: Arc<Catalog>,
}

impl StepExecutor {
    pub fn new(harness: Arc<dyn Harness>, catalog: Arc<Catalog>) -> Self {
        Self { harness, catalog }
    }

    /// Run `step` against the current state
    ///
    /// Harness failures propagate; decode failures do not.
    pub async fn run(&self, step: Step, state: &WorkflowState) -> Result<StepResult> {
        let snapshot = self.snapshot(step, state);
        debug!(
            "Executing {} with references: {:?}",
            step,
            snapshot.references.keys().collect::<Vec<_>>()
        );

        let raw = self.harness.execute_step(step, &snapshot).await?;

        match StepOutput::decode(step, &raw) {
            Ok(output) => {
                info!("Step {} produced {}", step, step.label());
                Ok(StepResult {
                    output,
                    raw,
                    decode_error: None,
                })
            }
            Err(e) => {
                warn!("Keeping raw output: {}", e);
                Ok(StepResult {
                    output: StepOutput::raw(step, &raw),
                    raw,
                    decode_error: Some(e),
                })
            }
        }
    }

    /// State plus the catalog data the agent for `step` consults
    pub fn snapshot(&self, step: Step, state: &WorkflowState) -> StateSnapshot {
        let catalog = &self.catalog;
        let snapshot = StateSnapshot::new(state);

        let snapshot = match step {
            Step::GenerateDraft => snapshot.with_reference("past_submissions", catalog.samples()),
            Step::MapRisks => snapshot
                .with_reference("risk_catalog", catalog.risks())
                .with_reference("past_submissions", catalog.samples()),
            Step::MapControls => snapshot
                .with_reference("controls_catalog", catalog.controls())
                .with_reference("past_submissions", catalog.samples()),
            Step::GenerateMitigations => snapshot
                .with_reference("controls_catalog", catalog.controls())
                .with_reference("past_mitigations", self.past_mitigations(state)),
            Step::FlagIssues => snapshot.with_reference("past_issues", catalog.past_issues("")),
            Step::EvaluateDecision => snapshot,
        };

        if step == Step::EvaluateDecision {
            snapshot
        } else {
            snapshot.with_reference("guardrail_rules", catalog.guardrails())
        }
    }

    /// Past mitigations for every identified risk, keyed by risk
    fn past_mitigations(&self, state: &WorkflowState) -> BTreeMap<String, Vec<PastMitigation>> {
        state
            .risk_mapping()
            .and_then(|risks| risks.parsed())
            .map(|risks| {
                risks
                    .iter()
                    .map(|r| (r.risk.clone(), self.catalog.past_mitigations(&r.risk)))
                    .collect()
            })
            .unwrap_or_default()
    }
}
