//! Guardrail checkpoint
//!
//! The gate runs once per run, after `flag_issues` and before
//! `evaluate_decision`. Its findings are advisory: they are recorded in state
//! for reviewers and never stop the pipeline.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

use super::state::WorkflowState;
use super::step::{extract_json, Decoded, Step};
use crate::catalog::Catalog;
use crate::harness::Harness;
use crate::Result;

/// A guardrail rule the evaluated content breaks
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuardrailViolation {
    #[serde(alias = "ruleId")]
    pub rule_id: String,
    pub description: String,
    #[serde(default)]
    pub severity: String,
}

/// Evaluates step output against the guardrail rules
pub struct GuardrailGate {
    harness: Arc<dyn Harness>,
    catalog: Arc<Catalog>,
}

impl GuardrailGate {
    /// The step after which the gate runs
    pub const CHECKPOINT: Step = Step::FlagIssues;

    pub fn new(harness: Arc<dyn Harness>, catalog: Arc<Catalog>) -> Self {
        Self { harness, catalog }
    }

    /// Evaluate the output of `step` in `state`
    ///
    /// Capability failures propagate. A response that is not a JSON array of
    /// violations is kept raw instead.
    pub async fn evaluate(
        &self,
        step: Step,
        state: &WorkflowState,
    ) -> Result<Decoded<Vec<GuardrailViolation>>> {
        let content = self.content(step, state);
        let response = self.harness.evaluate_guardrails(step, &content).await?;

        match serde_json::from_str::<Vec<GuardrailViolation>>(extract_json(&response)) {
            Ok(violations) => {
                info!(
                    "Guardrail check after {}: {} violation(s)",
                    step,
                    violations.len()
                );
                Ok(Decoded::Parsed(violations))
            }
            Err(e) => {
                warn!("Error parsing guardrail response for {}: {}", step, e);
                Ok(Decoded::Raw(response))
            }
        }
    }

    /// Content handed to the evaluator: rules, draft and the step's output
    fn content(&self, step: Step, state: &WorkflowState) -> String {
        serde_json::json!({
            "step": step,
            "project_draft": state.draft_submission(),
            "output": state.output(step).map(|o| o.to_value()),
            "guardrail_rules": self.catalog.guardrails(),
        })
        .to_string()
    }
}
