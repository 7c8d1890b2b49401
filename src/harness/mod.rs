//! Harness abstraction over the text-generation capability
//!
//! The engine only ever asks three things of an LLM backend: run a named
//! step, evaluate guardrails, and revise a run after feedback. Everything
//! about prompts, models and transport lives behind [`Harness`].

mod chat;
mod prompts;

pub use chat::ChatHarness;
pub use prompts::{feedback_instructions, guardrail_instructions, step_instructions};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::workflow::{Step, WorkflowState};
use crate::{Config, Error, Result};

/// Context handed to the capability: the run state plus catalog excerpts
#[derive(Debug, Clone, Serialize)]
pub struct StateSnapshot {
    pub state: WorkflowState,
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub references: Map<String, Value>,
}

impl StateSnapshot {
    pub fn new(state: &WorkflowState) -> Self {
        Self {
            state: state.clone(),
            references: Map::new(),
        }
    }

    /// Attach reference data under `key`
    pub fn with_reference<T: Serialize>(mut self, key: &str, value: T) -> Self {
        let value = serde_json::to_value(value).unwrap_or(Value::Null);
        self.references.insert(key.to_string(), value);
        self
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Harness kind enum for config
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HarnessKind {
    /// OpenAI-compatible chat completions endpoint
    OpenAi,
    /// Azure OpenAI deployment
    Azure,
}

impl std::fmt::Display for HarnessKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HarnessKind::OpenAi => write!(f, "openai"),
            HarnessKind::Azure => write!(f, "azure"),
        }
    }
}

impl std::str::FromStr for HarnessKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "openai" | "open-ai" => Ok(HarnessKind::OpenAi),
            "azure" | "azure-openai" => Ok(HarnessKind::Azure),
            _ => Err(Error::Config(format!("Unknown harness kind: {}", s))),
        }
    }
}

/// Core harness trait
///
/// Transport or service failures are reported as `Error::Capability`.
/// Returned text is not validated here; decoding is the caller's job.
#[async_trait]
pub trait Harness: Send + Sync {
    /// Name of this harness
    fn name(&self) -> &str;

    /// Run one named pipeline step
    async fn execute_step(&self, step: Step, context: &StateSnapshot) -> Result<String>;

    /// Evaluate `content` against guardrail rules; expected to return a JSON array
    async fn evaluate_guardrails(&self, step: Step, content: &str) -> Result<String>;

    /// Revise a run after feedback; expected to return a full state object
    async fn revise(&self, context: &StateSnapshot, step: Step, feedback: &str) -> Result<String>;
}

/// Create a harness based on configuration
pub fn create_harness(config: &Config) -> Result<Box<dyn Harness>> {
    let kind: HarnessKind = config.harness.kind.parse()?;
    Ok(Box::new(ChatHarness::new(kind, &config.harness)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_harness_kind_parse() {
        assert_eq!("OpenAI".parse::<HarnessKind>().unwrap(), HarnessKind::OpenAi);
        assert_eq!("azure".parse::<HarnessKind>().unwrap(), HarnessKind::Azure);
        assert!("bedrock".parse::<HarnessKind>().is_err());
        assert_eq!(HarnessKind::Azure.to_string(), "azure");
    }

    #[test]
    fn test_snapshot_serializes_state_and_references() {
        let state = WorkflowState::new("Vendor onboarding portal");
        let snapshot = StateSnapshot::new(&state).with_reference("risk_catalog", vec!["R1"]);
        let json: Value = serde_json::from_str(&snapshot.to_json().unwrap()).unwrap();

        assert_eq!(json["state"]["project_description"], "Vendor onboarding portal");
        assert_eq!(json["references"]["risk_catalog"][0], "R1");

        let bare = StateSnapshot::new(&state).to_json().unwrap();
        assert!(!bare.contains("references"));
    }
}
