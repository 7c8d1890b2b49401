//! RCSA: multi-agent risk submission workflows
//!
//! Turns a free-text project description into a structured risk control
//! self-assessment submission by driving a fixed chain of LLM agents:
//!
//! ```text
//! ┌────────────────┐   ┌───────────┐   ┌──────────────┐
//! │ generate_draft │ → │ map_risks │ → │ map_controls │ ─┐
//! └────────────────┘   └───────────┘   └──────────────┘  │
//!   ┌────────────────────────────────────────────────────┘
//!   ▼
//! ┌──────────────────────┐   ┌─────────────┐        ┌───────────────────┐
//! │ generate_mitigations │ → │ flag_issues │ → [G] →│ evaluate_decision │
//! └──────────────────────┘   └─────────────┘        └───────────────────┘
//! ```
//!
//! `[G]` is the advisory guardrail checkpoint. Every step is persisted as it
//! lands, so runs can be polled, resumed after interruption, and revised
//! afterwards through human feedback.

pub mod catalog;
pub mod config;
pub mod engine;
pub mod harness;
pub mod workflow;

// Re-exports for convenience
pub use catalog::Catalog;
pub use config::Config;
pub use engine::Engine;
pub use harness::{Harness, HarnessKind, StateSnapshot};
pub use workflow::{
    FeedbackProcessor, GuardrailGate, RunOptions, StateManager, Step, StepExecutor, StepOutput,
    WorkflowRunner, WorkflowState, WorkflowStatus,
};

/// Crate-level error type
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Capability error: {0}")]
    Capability(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Workflow error: {0}")]
    Workflow(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
