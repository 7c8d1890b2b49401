//! Workflow state
//!
//! One [`WorkflowState`] per run. Every change goes through the mutators on
//! this type so the UI log stays a faithful audit trail; fields are not
//! writable from outside.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::gate::GuardrailViolation;
use super::step::{
    ControlMapping, Decision, Decoded, DraftSubmission, Issue, Mitigation, RiskMapping, Step,
    StepOutput,
};

/// Feedback value that marks a step as waiting on a human reviewer
pub const AWAIT_FEEDBACK: &str = "__AWAIT_FEEDBACK__";

/// Persisted record of one workflow run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowState {
    project_description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    draft_submission: Option<Decoded<DraftSubmission>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    risk_mapping: Option<Decoded<Vec<RiskMapping>>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    controls_mapping: Option<Decoded<Vec<ControlMapping>>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    mitigation_proposals: Option<Decoded<Vec<Mitigation>>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    issues_list: Option<Decoded<Vec<Issue>>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    decision_result: Option<Decoded<Decision>>,
    #[serde(default)]
    guardrail_violations: BTreeMap<Step, Decoded<Vec<GuardrailViolation>>>,
    #[serde(default)]
    ui_updates: Vec<UiUpdate>,
    #[serde(default)]
    feedbacks: BTreeMap<Step, String>,
    #[serde(default)]
    status: WorkflowStatus,
    #[serde(default, with = "optional_step")]
    current_step: Option<Step>,
    #[serde(default = "Utc::now")]
    started_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    updated_at: DateTime<Utc>,
}

/// Overall workflow status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    /// Steps are still being executed
    #[default]
    InProgress,
    /// The last step asked for human review
    AwaitingFeedback,
    /// All steps have run
    Completed,
}

/// One entry of the append-only UI log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UiUpdate {
    pub step: String,
    pub output: serde_json::Value,
}

/// Feedback attached to a step while recording it
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepFeedback {
    /// Pause for human review after this step
    Awaiting,
    /// Free-form reviewer text
    Text(String),
}

impl StepFeedback {
    fn as_str(&self) -> &str {
        match self {
            StepFeedback::Awaiting => AWAIT_FEEDBACK,
            StepFeedback::Text(text) => text,
        }
    }
}

impl WorkflowState {
    /// Create state for a new run
    pub fn new(project_description: &str) -> Self {
        let now = Utc::now();
        Self {
            project_description: project_description.to_string(),
            draft_submission: None,
            risk_mapping: None,
            controls_mapping: None,
            mitigation_proposals: None,
            issues_list: None,
            decision_result: None,
            guardrail_violations: BTreeMap::new(),
            ui_updates: Vec::new(),
            feedbacks: BTreeMap::new(),
            status: WorkflowStatus::InProgress,
            current_step: None,
            started_at: now,
            updated_at: now,
        }
    }

    /// Record the output of a step
    pub fn record_step(&mut self, output: StepOutput, feedback: Option<StepFeedback>) {
        let step = output.step();
        self.ui_updates.push(UiUpdate {
            step: step.name().to_string(),
            output: output.to_value(),
        });

        match output {
            StepOutput::Draft(d) => self.draft_submission = Some(d),
            StepOutput::Risks(d) => self.risk_mapping = Some(d),
            StepOutput::Controls(d) => self.controls_mapping = Some(d),
            StepOutput::Mitigations(d) => self.mitigation_proposals = Some(d),
            StepOutput::Issues(d) => self.issues_list = Some(d),
            StepOutput::Decision(d) => self.decision_result = Some(d),
        }

        self.current_step = Some(step);
        self.status = match feedback {
            Some(StepFeedback::Awaiting) => WorkflowStatus::AwaitingFeedback,
            _ => WorkflowStatus::InProgress,
        };
        if let Some(feedback) = feedback {
            self.feedbacks.insert(step, feedback.as_str().to_string());
        }
        self.updated_at = Utc::now();
    }

    /// Record guardrail findings for a step
    pub fn record_guardrail(&mut self, step: Step, violations: Decoded<Vec<GuardrailViolation>>) {
        self.ui_updates.push(UiUpdate {
            step: format!("guard_{}", step),
            output: serde_json::to_value(&violations).unwrap_or(serde_json::Value::Null),
        });
        self.guardrail_violations.insert(step, violations);
        self.updated_at = Utc::now();
    }

    /// Record reviewer feedback for a step, replacing any earlier feedback
    pub fn record_feedback(&mut self, step: Step, feedback: &str) {
        self.feedbacks.insert(step, feedback.to_string());
        self.updated_at = Utc::now();
    }

    /// Mark every step as done
    pub fn complete(&mut self) {
        self.status = WorkflowStatus::Completed;
        self.updated_at = Utc::now();
    }

    pub fn project_description(&self) -> &str {
        &self.project_description
    }

    pub fn status(&self) -> WorkflowStatus {
        self.status
    }

    pub fn current_step(&self) -> Option<Step> {
        self.current_step
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Time of the last recorded change
    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn ui_updates(&self) -> &[UiUpdate] {
        &self.ui_updates
    }

    pub fn feedbacks(&self) -> &BTreeMap<Step, String> {
        &self.feedbacks
    }

    pub fn feedback(&self, step: Step) -> Option<&str> {
        self.feedbacks.get(&step).map(String::as_str)
    }

    pub fn guardrail_violations(&self, step: Step) -> Option<&Decoded<Vec<GuardrailViolation>>> {
        self.guardrail_violations.get(&step)
    }

    pub fn has_guardrail(&self, step: Step) -> bool {
        self.guardrail_violations.contains_key(&step)
    }

    pub fn draft_submission(&self) -> Option<&Decoded<DraftSubmission>> {
        self.draft_submission.as_ref()
    }

    pub fn risk_mapping(&self) -> Option<&Decoded<Vec<RiskMapping>>> {
        self.risk_mapping.as_ref()
    }

    pub fn controls_mapping(&self) -> Option<&Decoded<Vec<ControlMapping>>> {
        self.controls_mapping.as_ref()
    }

    pub fn mitigation_proposals(&self) -> Option<&Decoded<Vec<Mitigation>>> {
        self.mitigation_proposals.as_ref()
    }

    pub fn issues_list(&self) -> Option<&Decoded<Vec<Issue>>> {
        self.issues_list.as_ref()
    }

    pub fn decision_result(&self) -> Option<&Decoded<Decision>> {
        self.decision_result.as_ref()
    }

    /// Output recorded for `step`, if it has run
    pub fn output(&self, step: Step) -> Option<StepOutput> {
        match step {
            Step::GenerateDraft => self.draft_submission.clone().map(StepOutput::Draft),
            Step::MapRisks => self.risk_mapping.clone().map(StepOutput::Risks),
            Step::MapControls => self.controls_mapping.clone().map(StepOutput::Controls),
            Step::GenerateMitigations => {
                self.mitigation_proposals.clone().map(StepOutput::Mitigations)
            }
            Step::FlagIssues => self.issues_list.clone().map(StepOutput::Issues),
            Step::EvaluateDecision => self.decision_result.clone().map(StepOutput::Decision),
        }
    }

    pub fn has_output(&self, step: Step) -> bool {
        match step {
            Step::GenerateDraft => self.draft_submission.is_some(),
            Step::MapRisks => self.risk_mapping.is_some(),
            Step::MapControls => self.controls_mapping.is_some(),
            Step::GenerateMitigations => self.mitigation_proposals.is_some(),
            Step::FlagIssues => self.issues_list.is_some(),
            Step::EvaluateDecision => self.decision_result.is_some(),
        }
    }

    /// Steps that have an output, in pipeline order
    pub fn executed_steps(&self) -> Vec<Step> {
        Step::ALL
            .into_iter()
            .filter(|step| self.has_output(*step))
            .collect()
    }

    /// First step without an output; where a resumed run picks up
    pub fn next_step(&self) -> Option<Step> {
        Step::ALL.into_iter().find(|step| !self.has_output(*step))
    }

    /// Get summary of workflow progress
    pub fn summary(&self) -> String {
        let mut lines = vec![
            format!("Status: {:?}", self.status),
            format!("Started: {}", self.started_at.format("%Y-%m-%d %H:%M")),
            format!(
                "Current: {}",
                self.current_step.map(|s| s.name()).unwrap_or("-")
            ),
            String::new(),
            "Steps:".to_string(),
        ];

        for step in Step::ALL {
            let icon = match self.output(step) {
                None => "⬜",
                Some(output) if output.is_raw() => "⚠️",
                Some(_) => "✅",
            };
            let mut line = format!("  {} {} ({})", icon, step.label(), step);
            if let Some(feedback) = self.feedback(step) {
                line.push_str(&format!(" feedback: {}", feedback));
            }
            lines.push(line);
        }

        for (step, violations) in &self.guardrail_violations {
            match violations {
                Decoded::Parsed(list) => {
                    lines.push(format!("Guardrails after {}: {} violation(s)", step, list.len()));
                    for v in list {
                        lines.push(format!("  [{}] {}: {}", v.severity, v.rule_id, v.description));
                    }
                }
                Decoded::Raw(text) => {
                    lines.push(format!("Guardrails after {} (unparsed): {}", step, text));
                }
            }
        }

        if let Some(Decoded::Parsed(decision)) = &self.decision_result {
            lines.push(String::new());
            lines.push(format!("Decision: {} - {}", decision.decision, decision.rationale));
        }

        lines.join("\n")
    }
}

// `current_step` is persisted as a plain string, empty before the first step
mod optional_step {
    use super::Step;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(step: &Option<Step>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(step.map(|s| s.name()).unwrap_or(""))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Step>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s: Option<String> = Option::deserialize(deserializer)?;
        match s.as_deref().map(str::trim) {
            None | Some("") => Ok(None),
            Some(name) => name.parse().map(Some).map_err(serde::de::Error::custom),
        }
    }
}
