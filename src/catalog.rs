//! Read-only catalog data
//!
//! Risks, controls, guardrail rules and past submissions are loaded once
//! from a data directory and handed to the components that need them. The
//! engine never writes them.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::path::Path;
use tracing::debug;

use crate::{Error, Result};

pub const RISKS_FILE: &str = "risks.json";
pub const CONTROLS_FILE: &str = "controls.json";
pub const GUARDRAILS_FILE: &str = "guardrails.json";
pub const SAMPLES_FILE: &str = "sample_submissions.json";

/// Catalog risk
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskEntry {
    pub risk_id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Catalog control
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlEntry {
    pub control_id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Guardrail rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuardrailRule {
    #[serde(rename = "ruleId", alias = "rule_id")]
    pub rule_id: String,
    pub description: String,
    pub severity: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Historical submission used as a reference for new drafts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleSubmission {
    #[serde(rename = "submissionId")]
    pub submission_id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub draft: Map<String, Value>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub mitigation: Vec<SampleMitigation>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub issues: Vec<SampleIssue>,
}

impl SampleSubmission {
    /// `draft.project_summary`, empty when absent
    pub fn project_summary(&self) -> &str {
        self.draft
            .get("project_summary")
            .and_then(Value::as_str)
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleMitigation {
    pub risk: String,
    pub control_id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub mitigation_steps: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleIssue {
    pub issue: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Optional fields may be written as `null` by other tools
fn null_as_default<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// A past mitigation for a given risk
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PastMitigation {
    #[serde(rename = "submissionId")]
    pub submission_id: String,
    pub project_summary: String,
    pub control_id: String,
    pub mitigation_steps: Vec<String>,
}

/// A past issue matching a search
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PastIssue {
    #[serde(rename = "submissionId")]
    pub submission_id: String,
    pub project_summary: String,
    #[serde(flatten)]
    pub issue: SampleIssue,
}

/// All catalog tables
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    risks: Vec<RiskEntry>,
    controls: Vec<ControlEntry>,
    guardrails: Vec<GuardrailRule>,
    samples: Vec<SampleSubmission>,
}

impl Catalog {
    pub fn new(
        risks: Vec<RiskEntry>,
        controls: Vec<ControlEntry>,
        guardrails: Vec<GuardrailRule>,
        samples: Vec<SampleSubmission>,
    ) -> Self {
        Self {
            risks,
            controls,
            guardrails,
            samples,
        }
    }

    /// Load all tables from `dir`; a missing file is an empty table
    pub fn load(dir: &Path) -> Result<Self> {
        Ok(Self {
            risks: load_table(dir, RISKS_FILE)?,
            controls: load_table(dir, CONTROLS_FILE)?,
            guardrails: load_table(dir, GUARDRAILS_FILE)?,
            samples: load_table(dir, SAMPLES_FILE)?,
        })
    }

    pub fn risks(&self) -> &[RiskEntry] {
        &self.risks
    }

    pub fn controls(&self) -> &[ControlEntry] {
        &self.controls
    }

    pub fn guardrails(&self) -> &[GuardrailRule] {
        &self.guardrails
    }

    pub fn samples(&self) -> &[SampleSubmission] {
        &self.samples
    }

    /// Past mitigations recorded against exactly this risk
    pub fn past_mitigations(&self, risk: &str) -> Vec<PastMitigation> {
        self.samples
            .iter()
            .flat_map(|sub| {
                sub.mitigation
                    .iter()
                    .filter(move |m| m.risk == risk)
                    .map(move |m| PastMitigation {
                        submission_id: sub.submission_id.clone(),
                        project_summary: sub.project_summary().to_string(),
                        control_id: m.control_id.clone(),
                        mitigation_steps: m.mitigation_steps.clone(),
                    })
            })
            .collect()
    }

    /// Past issues whose text contains `text`, ignoring case
    pub fn past_issues(&self, text: &str) -> Vec<PastIssue> {
        let needle = text.to_lowercase();
        self.samples
            .iter()
            .flat_map(|sub| {
                let needle = needle.clone();
                sub.issues
                    .iter()
                    .filter(move |i| i.issue.to_lowercase().contains(&needle))
                    .map(move |i| PastIssue {
                        submission_id: sub.submission_id.clone(),
                        project_summary: sub.project_summary().to_string(),
                        issue: i.clone(),
                    })
            })
            .collect()
    }
}

fn load_table<T: serde::de::DeserializeOwned>(dir: &Path, file: &str) -> Result<Vec<T>> {
    let path = dir.join(file);
    if !path.exists() {
        debug!("Catalog file {:?} not found, using empty table", path);
        return Ok(Vec::new());
    }

    let content = std::fs::read_to_string(&path)?;
    serde_json::from_str(&content)
        .map_err(|e| Error::Config(format!("Failed to parse {:?}: {}", path, e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_catalog() -> Catalog {
        let samples: Vec<SampleSubmission> = serde_json::from_value(serde_json::json!([
            {
                "submissionId": "S001",
                "draft": {"project_summary": "Migrate payroll to cloud"},
                "mitigation": [
                    {"risk": "System outage", "control_id": "C002", "mitigation_steps": ["Geo-redundancy"]},
                    {"risk": "Data leakage", "control_id": "C010", "mitigation_steps": ["DLP"]}
                ],
                "issues": [
                    {"issue": "No SLA defined for vendor", "severity": "High"}
                ]
            },
            {
                "submissionId": "S002",
                "draft": {"project_summary": "Chatbot for HR"},
                "mitigation": [
                    {"risk": "System outage", "control_id": "C003", "mitigation_steps": []}
                ],
                "issues": [
                    {"issue": "Missing DPIA", "severity": "Medium", "recommendation": "Run DPIA"}
                ]
            }
        ]))
        .unwrap();
        Catalog::new(vec![], vec![], vec![], samples)
    }

    #[test]
    fn test_past_mitigations_exact_risk_match() {
        let catalog = sample_catalog();
        let found = catalog.past_mitigations("System outage");
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].submission_id, "S001");
        assert_eq!(found[0].project_summary, "Migrate payroll to cloud");
        assert_eq!(found[1].control_id, "C003");

        assert!(catalog.past_mitigations("system outage").is_empty());
    }

    #[test]
    fn test_past_issues_case_insensitive() {
        let catalog = sample_catalog();
        let found = catalog.past_issues("sla");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].issue.issue, "No SLA defined for vendor");

        let json = serde_json::to_value(&found[0]).unwrap();
        assert_eq!(json["severity"], "High");
        assert_eq!(json["submissionId"], "S001");

        assert_eq!(catalog.past_issues("").len(), 2);
    }

    #[test]
    fn test_samples_with_null_fields_load() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(SAMPLES_FILE),
            r#"[
                {"submissionId": "S003", "draft": null, "mitigation": null, "issues": null},
                {"submissionId": "S004", "draft": {"project_summary": "Vendor portal"},
                 "mitigation": [{"risk": "Fraud", "control_id": "C001", "mitigation_steps": null}]}
            ]"#,
        )
        .unwrap();

        let catalog = Catalog::load(dir.path()).unwrap();
        assert_eq!(catalog.samples().len(), 2);
        assert!(catalog.samples()[0].mitigation.is_empty());
        assert!(catalog.samples()[0].issues.is_empty());
        assert_eq!(catalog.samples()[0].project_summary(), "");

        let found = catalog.past_mitigations("Fraud");
        assert_eq!(found.len(), 1);
        assert!(found[0].mitigation_steps.is_empty());
        assert!(catalog.past_issues("").is_empty());
    }

    #[test]
    fn test_load_missing_dir_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = Catalog::load(&dir.path().join("nope")).unwrap();
        assert!(catalog.risks().is_empty());
        assert!(catalog.samples().is_empty());
    }

    #[test]
    fn test_load_reads_tables() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(GUARDRAILS_FILE),
            r#"[{"ruleId": "G001", "description": "Mask PII", "severity": "High", "owner": "CISO"}]"#,
        )
        .unwrap();
        std::fs::write(
            dir.path().join(CONTROLS_FILE),
            r#"[{"control_id": "C002", "name": "High-Availability Architecture"}]"#,
        )
        .unwrap();

        let catalog = Catalog::load(dir.path()).unwrap();
        assert_eq!(catalog.guardrails()[0].rule_id, "G001");
        assert_eq!(catalog.guardrails()[0].extra["owner"], "CISO");
        assert_eq!(catalog.controls()[0].control_id, "C002");
    }

    #[test]
    fn test_load_malformed_table_fails() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(RISKS_FILE), "{not json").unwrap();
        assert!(matches!(Catalog::load(dir.path()), Err(Error::Config(_))));
    }
}
