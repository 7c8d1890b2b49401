//! Shared fixtures for integration tests
#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rcsa::catalog::{Catalog, ControlEntry, GuardrailRule, RiskEntry, SampleSubmission};
use rcsa::harness::{Harness, StateSnapshot};
use rcsa::workflow::{StateManager, Step};
use rcsa::{Engine, Error, Result};

pub const PROJECT: &str = "Build an internal ML model to flag expense report anomalies";

/// Valid reply for each step
pub fn canned_reply(step: Step) -> &'static str {
    match step {
        Step::GenerateDraft => {
            r#"{"project_title": "Expense Anomaly Detection",
                "project_description": "Internal ML model that flags anomalous expense reports",
                "objectives": ["Reduce fraudulent claims"],
                "benefits": ["Faster audits"],
                "deliverables": ["Scoring service", "Reviewer dashboard"]}"#
        }
        Step::MapRisks => {
            r#"[{"risk": "Data leakage", "category": "Security", "subrisk": "Employee PII exposure", "confidence": 0.9},
                {"risk": "Model bias", "category": "Model Risk", "subrisk": "Unfair flagging", "confidence": 0.7}]"#
        }
        Step::MapControls => {
            r#"[{"risk": "Data leakage", "controls": [{"control_id": "C010", "name": "Data Loss Prevention", "relevance_score": 0.95}]},
                {"risk": "Model bias", "controls": [{"control_id": "C021", "name": "Model Validation", "relevance_score": 0.8}]}]"#
        }
        Step::GenerateMitigations => {
            r#"[{"risk": "Data leakage", "control_id": "C010", "mitigation_steps": ["Mask PII before training"]},
                {"risk": "Model bias", "control_id": "C021", "mitigation_steps": ["Quarterly fairness review"]}]"#
        }
        Step::FlagIssues => {
            "```json\n[{\"issue\": \"No retention period for training data\", \"severity\": \"Medium\", \"recommendation\": \"Define retention\"}]\n```"
        }
        Step::EvaluateDecision => {
            r#"{"decision": "Approved", "rationale": "Identified risks have mapped controls"}"#
        }
    }
}

/// Output field holding each step's result in the persisted record
pub fn state_field(step: Step) -> &'static str {
    match step {
        Step::GenerateDraft => "draft_submission",
        Step::MapRisks => "risk_mapping",
        Step::MapControls => "controls_mapping",
        Step::GenerateMitigations => "mitigation_proposals",
        Step::FlagIssues => "issues_list",
        Step::EvaluateDecision => "decision_result",
    }
}

/// In-process harness with scripted replies and a call log
#[derive(Default)]
pub struct ScriptedHarness {
    overrides: Mutex<HashMap<Step, String>>,
    failing: Mutex<Option<Step>>,
    guardrail_reply: Mutex<Option<String>>,
    revision_reply: Mutex<Option<String>>,
    revision_fails: Mutex<bool>,
    delay: Mutex<Option<Duration>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedHarness {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Reply to `step` with `text` instead of the canned JSON
    pub fn reply_with(&self, step: Step, text: &str) {
        self.overrides.lock().unwrap().insert(step, text.to_string());
    }

    /// Fail `step` with a capability error; `None` clears it
    pub fn fail_at(&self, step: Option<Step>) {
        *self.failing.lock().unwrap() = step;
    }

    pub fn guardrail_reply(&self, text: &str) {
        *self.guardrail_reply.lock().unwrap() = Some(text.to_string());
    }

    pub fn revision_reply(&self, text: &str) {
        *self.revision_reply.lock().unwrap() = Some(text.to_string());
    }

    pub fn fail_revision(&self) {
        *self.revision_fails.lock().unwrap() = true;
    }

    /// Sleep this long before answering any step or guardrail call
    pub fn slow_down(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    async fn pause(&self) {
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }

    /// Calls so far: step names, `guardrail:<step>`, `revise:<step>`
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, call: &str) -> usize {
        self.calls().iter().filter(|c| *c == call).count()
    }

    fn log(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl Harness for ScriptedHarness {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn execute_step(&self, step: Step, _context: &StateSnapshot) -> Result<String> {
        if *self.failing.lock().unwrap() == Some(step) {
            return Err(Error::Capability(format!("{} unavailable", step)));
        }
        self.log(step.to_string());
        self.pause().await;

        let reply = self.overrides.lock().unwrap().get(&step).cloned();
        Ok(reply.unwrap_or_else(|| canned_reply(step).to_string()))
    }

    async fn evaluate_guardrails(&self, step: Step, content: &str) -> Result<String> {
        self.log(format!("guardrail:{}", step));
        assert!(content.contains("guardrail_rules"));
        self.pause().await;

        let reply = self.guardrail_reply.lock().unwrap().clone();
        Ok(reply.unwrap_or_else(|| {
            r#"[{"ruleId": "G001", "description": "PII must be masked", "severity": "High"}]"#
                .to_string()
        }))
    }

    /// Default revision: add a vendor risk to whatever the step produced
    async fn revise(&self, context: &StateSnapshot, step: Step, feedback: &str) -> Result<String> {
        self.log(format!("revise:{}", step));
        if *self.revision_fails.lock().unwrap() {
            return Err(Error::Capability("revision service down".to_string()));
        }
        if let Some(reply) = self.revision_reply.lock().unwrap().clone() {
            return Ok(reply);
        }

        let mut state = serde_json::to_value(&context.state)?;
        if step == Step::MapRisks {
            let risks = state[state_field(step)]
                .as_array_mut()
                .ok_or_else(|| Error::Workflow("risk mapping is not a list".to_string()))?;
            risks.push(serde_json::json!({
                "risk": "Third-party vendor risk",
                "category": "Third Party",
                "subrisk": feedback,
                "confidence": 0.6
            }));
        }
        Ok(state.to_string())
    }
}

pub fn catalog() -> Arc<Catalog> {
    let samples: Vec<SampleSubmission> = serde_json::from_value(serde_json::json!([{
        "submissionId": "S001",
        "draft": {"project_summary": "Migrate payroll to cloud"},
        "mitigation": [{"risk": "Data leakage", "control_id": "C010", "mitigation_steps": ["DLP"]}],
        "issues": [{"issue": "No SLA defined for vendor", "severity": "High"}]
    }]))
    .unwrap();
    let risks: Vec<RiskEntry> = serde_json::from_value(serde_json::json!([
        {"risk_id": "R001", "name": "Data leakage", "category": "Security"}
    ]))
    .unwrap();
    let controls: Vec<ControlEntry> = serde_json::from_value(serde_json::json!([
        {"control_id": "C010", "name": "Data Loss Prevention"}
    ]))
    .unwrap();
    let guardrails: Vec<GuardrailRule> = serde_json::from_value(serde_json::json!([
        {"ruleId": "G001", "description": "PII must be masked", "severity": "High"}
    ]))
    .unwrap();
    Arc::new(Catalog::new(risks, controls, guardrails, samples))
}

/// Engine over an in-memory store
pub fn engine(harness: &Arc<ScriptedHarness>) -> (Engine, Arc<StateManager>) {
    let manager = Arc::new(StateManager::in_memory());
    let engine = Engine::new(harness.clone(), catalog(), Arc::clone(&manager));
    (engine, manager)
}
