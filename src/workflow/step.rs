//! Canonical pipeline steps and their typed outputs
//!
//! Each step produces a differently shaped payload. [`StepOutput`] is the
//! closed union over those shapes; decoding dispatches on the [`Step`], never
//! on the payload itself. Output that cannot be decoded is kept verbatim as
//! [`Decoded::Raw`] so the pipeline can keep moving.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use crate::{Error, Result};

/// One of the six fixed pipeline steps
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    /// Draft the submission from the project description
    GenerateDraft,
    /// Identify risks against the risk catalog
    MapRisks,
    /// Map each risk onto catalog controls
    MapControls,
    /// Propose mitigation steps per risk/control pair
    GenerateMitigations,
    /// QA pass over draft and mitigations
    FlagIssues,
    /// Final approve/reject decision
    EvaluateDecision,
}

impl Step {
    /// Pipeline order
    pub const ALL: [Step; 6] = [
        Step::GenerateDraft,
        Step::MapRisks,
        Step::MapControls,
        Step::GenerateMitigations,
        Step::FlagIssues,
        Step::EvaluateDecision,
    ];

    /// Wire name, as used in persisted state and by the capability
    pub fn name(&self) -> &'static str {
        match self {
            Step::GenerateDraft => "generate_draft",
            Step::MapRisks => "map_risks",
            Step::MapControls => "map_controls",
            Step::GenerateMitigations => "generate_mitigations",
            Step::FlagIssues => "flag_issues",
            Step::EvaluateDecision => "evaluate_decision",
        }
    }

    /// Human-readable label
    pub fn label(&self) -> &'static str {
        match self {
            Step::GenerateDraft => "Draft Submission",
            Step::MapRisks => "Risk Mapping",
            Step::MapControls => "Control Mapping",
            Step::GenerateMitigations => "Mitigation Proposal",
            Step::FlagIssues => "QA Issues",
            Step::EvaluateDecision => "Final Decision",
        }
    }

    /// Position in the pipeline (0-based)
    pub fn index(&self) -> usize {
        Self::ALL.iter().position(|s| s == self).unwrap_or_default()
    }

    /// The step that follows this one, if any
    pub fn next(&self) -> Option<Step> {
        Self::ALL.get(self.index() + 1).copied()
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Step {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .iter()
            .find(|step| step.name() == s.trim())
            .copied()
            .ok_or_else(|| Error::NotFound(format!("Unknown step: {}", s)))
    }
}

/// A payload that either decoded into its expected shape or was kept raw
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Decoded<T> {
    Parsed(T),
    Raw(String),
}

impl<T> Decoded<T> {
    pub fn parsed(&self) -> Option<&T> {
        match self {
            Decoded::Parsed(value) => Some(value),
            Decoded::Raw(_) => None,
        }
    }

    pub fn is_raw(&self) -> bool {
        matches!(self, Decoded::Raw(_))
    }
}

/// Draft submission produced by `generate_draft`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DraftSubmission {
    pub project_title: String,
    pub project_description: String,
    #[serde(default)]
    pub objectives: Vec<String>,
    #[serde(default)]
    pub benefits: Vec<String>,
    #[serde(default)]
    pub deliverables: Vec<String>,
}

/// Risk identified by `map_risks`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskMapping {
    pub risk: String,
    pub category: String,
    #[serde(default)]
    pub subrisk: String,
    #[serde(default)]
    pub confidence: f64,
}

/// Controls mapped onto a single risk by `map_controls`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlMapping {
    pub risk: String,
    #[serde(default)]
    pub controls: Vec<MappedControl>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MappedControl {
    pub control_id: String,
    pub name: String,
    #[serde(default)]
    pub relevance_score: f64,
}

/// Mitigation proposed by `generate_mitigations`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mitigation {
    pub risk: String,
    pub control_id: String,
    #[serde(default)]
    pub mitigation_steps: Vec<String>,
}

/// Deficiency flagged by `flag_issues`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Issue {
    pub issue: String,
    pub severity: String,
    #[serde(default)]
    pub recommendation: String,
}

/// Final decision produced by `evaluate_decision`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub decision: Verdict,
    #[serde(default)]
    pub rationale: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Verdict {
    #[serde(alias = "approved", alias = "APPROVED", alias = "Approve", alias = "APPROVE")]
    Approved,
    #[serde(alias = "rejected", alias = "REJECTED", alias = "Reject", alias = "REJECT")]
    Rejected,
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verdict::Approved => f.write_str("Approved"),
            Verdict::Rejected => f.write_str("Rejected"),
        }
    }
}

/// Output of one step, tagged by the step that produced it
#[derive(Debug, Clone, PartialEq)]
pub enum StepOutput {
    Draft(Decoded<DraftSubmission>),
    Risks(Decoded<Vec<RiskMapping>>),
    Controls(Decoded<Vec<ControlMapping>>),
    Mitigations(Decoded<Vec<Mitigation>>),
    Issues(Decoded<Vec<Issue>>),
    Decision(Decoded<Decision>),
}

/// Capability text that did not decode into the step's expected shape
#[derive(Debug, thiserror::Error)]
#[error("{step} output did not decode: {source}")]
pub struct DecodeError {
    pub step: Step,
    #[source]
    pub source: serde_json::Error,
}

impl StepOutput {
    /// Decode capability text into the shape expected for `step`
    pub fn decode(step: Step, text: &str) -> std::result::Result<Self, DecodeError> {
        let json = extract_json(text);
        let wrap = |source| DecodeError { step, source };

        let output = match step {
            Step::GenerateDraft => {
                StepOutput::Draft(Decoded::Parsed(serde_json::from_str(json).map_err(wrap)?))
            }
            Step::MapRisks => {
                StepOutput::Risks(Decoded::Parsed(serde_json::from_str(json).map_err(wrap)?))
            }
            Step::MapControls => {
                StepOutput::Controls(Decoded::Parsed(serde_json::from_str(json).map_err(wrap)?))
            }
            Step::GenerateMitigations => StepOutput::Mitigations(Decoded::Parsed(
                serde_json::from_str(json).map_err(wrap)?,
            )),
            Step::FlagIssues => {
                StepOutput::Issues(Decoded::Parsed(serde_json::from_str(json).map_err(wrap)?))
            }
            Step::EvaluateDecision => {
                StepOutput::Decision(Decoded::Parsed(serde_json::from_str(json).map_err(wrap)?))
            }
        };

        Ok(output)
    }

    /// Keep capability text verbatim as the output of `step`
    pub fn raw(step: Step, text: &str) -> Self {
        let raw = text.to_string();
        match step {
            Step::GenerateDraft => StepOutput::Draft(Decoded::Raw(raw)),
            Step::MapRisks => StepOutput::Risks(Decoded::Raw(raw)),
            Step::MapControls => StepOutput::Controls(Decoded::Raw(raw)),
            Step::GenerateMitigations => StepOutput::Mitigations(Decoded::Raw(raw)),
            Step::FlagIssues => StepOutput::Issues(Decoded::Raw(raw)),
            Step::EvaluateDecision => StepOutput::Decision(Decoded::Raw(raw)),
        }
    }

    /// The step this output belongs to
    pub fn step(&self) -> Step {
        match self {
            StepOutput::Draft(_) => Step::GenerateDraft,
            StepOutput::Risks(_) => Step::MapRisks,
            StepOutput::Controls(_) => Step::MapControls,
            StepOutput::Mitigations(_) => Step::GenerateMitigations,
            StepOutput::Issues(_) => Step::FlagIssues,
            StepOutput::Decision(_) => Step::EvaluateDecision,
        }
    }

    pub fn is_raw(&self) -> bool {
        match self {
            StepOutput::Draft(d) => d.is_raw(),
            StepOutput::Risks(d) => d.is_raw(),
            StepOutput::Controls(d) => d.is_raw(),
            StepOutput::Mitigations(d) => d.is_raw(),
            StepOutput::Issues(d) => d.is_raw(),
            StepOutput::Decision(d) => d.is_raw(),
        }
    }

    /// JSON form, as written to the UI log
    pub fn to_value(&self) -> serde_json::Value {
        let value = match self {
            StepOutput::Draft(d) => serde_json::to_value(d),
            StepOutput::Risks(d) => serde_json::to_value(d),
            StepOutput::Controls(d) => serde_json::to_value(d),
            StepOutput::Mitigations(d) => serde_json::to_value(d),
            StepOutput::Issues(d) => serde_json::to_value(d),
            StepOutput::Decision(d) => serde_json::to_value(d),
        };
        value.unwrap_or(serde_json::Value::Null)
    }
}

fn fence_regex() -> &'static Regex {
    static FENCE: OnceLock<Regex> = OnceLock::new();
    FENCE.get_or_init(|| {
        Regex::new(r"(?s)```[A-Za-z0-9_-]*[ \t]*\r?\n?(.*?)```").expect("fence pattern is valid")
    })
}

fn whole_fence_regex() -> &'static Regex {
    static WHOLE: OnceLock<Regex> = OnceLock::new();
    WHOLE.get_or_init(|| {
        Regex::new(r"(?s)\A```[A-Za-z0-9_-]*[ \t]*\r?\n?(.*)```\z")
            .expect("whole fence pattern is valid")
    })
}

/// Pull the JSON body out of model text, dropping a surrounding code fence
///
/// Text that already starts like JSON is returned as is, so fences inside
/// string values survive. A reply that is one fenced block keeps everything
/// up to its closing fence. Only prose around a fence falls back to the
/// first fenced block.
pub fn extract_json(text: &str) -> &str {
    let text = text.trim();
    if text.starts_with('{') || text.starts_with('[') {
        return text;
    }

    let fence = if text.starts_with("```") {
        whole_fence_regex().captures(text)
    } else {
        fence_regex().captures(text)
    };
    match fence.and_then(|caps| caps.get(1)) {
        Some(body) => body.as_str().trim(),
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_order_and_names() {
        assert_eq!(Step::ALL.len(), 6);
        assert_eq!(Step::GenerateDraft.next(), Some(Step::MapRisks));
        assert_eq!(Step::FlagIssues.next(), Some(Step::EvaluateDecision));
        assert_eq!(Step::EvaluateDecision.next(), None);
        assert_eq!(Step::GenerateMitigations.index(), 3);
        assert_eq!("map_controls".parse::<Step>().unwrap(), Step::MapControls);
    }

    #[test]
    fn test_unknown_step_is_not_found() {
        let err = "guard_flag_issues".parse::<Step>().unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[test]
    fn test_step_serializes_as_wire_name() {
        let json = serde_json::to_string(&Step::GenerateMitigations).unwrap();
        assert_eq!(json, "\"generate_mitigations\"");
    }

    #[test]
    fn test_decode_dispatches_on_step() {
        let text = r#"[{"risk": "System outage", "category": "Operational Risk", "subrisk": "System outage", "confidence": 0.92}]"#;
        let output = StepOutput::decode(Step::MapRisks, text).unwrap();
        match output {
            StepOutput::Risks(Decoded::Parsed(risks)) => {
                assert_eq!(risks.len(), 1);
                assert_eq!(risks[0].category, "Operational Risk");
            }
            other => panic!("unexpected output: {:?}", other),
        }

        // The same array is not a decision
        assert!(StepOutput::decode(Step::EvaluateDecision, text).is_err());
    }

    #[test]
    fn test_decode_strips_code_fence() {
        let text = "Here you go:\n```json\n{\"decision\": \"Rejected\", \"rationale\": \"No SLA\"}\n```";
        let output = StepOutput::decode(Step::EvaluateDecision, text).unwrap();
        let StepOutput::Decision(Decoded::Parsed(decision)) = output else {
            panic!("expected parsed decision");
        };
        assert_eq!(decision.decision, Verdict::Rejected);
        assert_eq!(decision.rationale, "No SLA");
    }

    #[test]
    fn test_extract_json_keeps_fences_inside_strings() {
        let text = r#"{"decision": "Rejected", "rationale": "see ```json {} ``` above"}"#;
        assert_eq!(extract_json(text), text);

        let output = StepOutput::decode(Step::EvaluateDecision, text).unwrap();
        let StepOutput::Decision(Decoded::Parsed(decision)) = output else {
            panic!("expected parsed decision");
        };
        assert_eq!(decision.rationale, "see ```json {} ``` above");

        let fenced = format!("```json\n{}\n```", text);
        assert_eq!(extract_json(&fenced), text);
    }

    #[test]
    fn test_verdict_aliases() {
        let decision: Decision = serde_json::from_str(r#"{"decision": "APPROVED"}"#).unwrap();
        assert_eq!(decision.decision, Verdict::Approved);
        assert!(decision.rationale.is_empty());
    }

    #[test]
    fn test_raw_output_keeps_text() {
        let output = StepOutput::raw(Step::FlagIssues, "not json at all");
        assert!(output.is_raw());
        assert_eq!(output.step(), Step::FlagIssues);
        assert_eq!(output.to_value(), serde_json::json!("not json at all"));
    }

    #[test]
    fn test_raw_string_does_not_reparse_as_list() {
        let raw: Decoded<Vec<Issue>> = serde_json::from_str("\"[]\"").unwrap();
        assert_eq!(raw, Decoded::Raw("[]".to_string()));
    }
}
