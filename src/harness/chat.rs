//! Chat completions harness
//!
//! Talks to an OpenAI-compatible `/chat/completions` endpoint, or to an
//! Azure OpenAI deployment, with one system instruction per agent role.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::prompts::{feedback_instructions, guardrail_instructions, step_instructions};
use super::{Harness, HarnessKind, StateSnapshot};
use crate::config::HarnessConfig;
use crate::workflow::Step;
use crate::{Error, Result};

const DEFAULT_OPENAI_BASE: &str = "https://api.openai.com/v1";
const DEFAULT_AZURE_API_VERSION: &str = "2024-10-21";

/// Harness backed by a chat completions API
pub struct ChatHarness {
    kind: HarnessKind,
    /// Full completions URL
    endpoint: String,
    /// HTTP client with auth headers baked in
    client: reqwest::Client,
    /// Model name (ignored by Azure, which routes by deployment)
    model: String,
    temperature: Option<f32>,
}

/// Chat message format
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

impl ChatMessage {
    fn system(content: &str) -> Self {
        Self {
            role: "system".to_string(),
            content: content.to_string(),
        }
    }

    fn user(content: String) -> Self {
        Self {
            role: "user".to_string(),
            content,
        }
    }
}

/// Chat completion request
#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    model: Option<String>,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

impl ChatHarness {
    /// Create a new chat harness
    pub fn new(kind: HarnessKind, config: &HarnessConfig) -> Result<Self> {
        let timeout = humantime::parse_duration(&config.timeout).map_err(|e| {
            Error::Config(format!("Invalid harness timeout {:?}: {}", config.timeout, e))
        })?;

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let endpoint = match kind {
            HarnessKind::OpenAi => {
                let api_key = config
                    .api_key
                    .clone()
                    .or_else(|| std::env::var("OPENAI_API_KEY").ok())
                    .ok_or_else(|| Error::Config("OpenAI API key not configured".to_string()))?;
                headers.insert(AUTHORIZATION, header_value(&format!("Bearer {}", api_key))?);

                let base = config
                    .api_base
                    .clone()
                    .unwrap_or_else(|| DEFAULT_OPENAI_BASE.to_string());
                openai_endpoint(&base)
            }
            HarnessKind::Azure => {
                let api_key = config
                    .api_key
                    .clone()
                    .or_else(|| std::env::var("AZURE_OPENAI_API_KEY").ok())
                    .ok_or_else(|| Error::Config("Azure OpenAI API key not configured".to_string()))?;
                headers.insert(HeaderName::from_static("api-key"), header_value(&api_key)?);

                let base = config
                    .api_base
                    .clone()
                    .or_else(|| std::env::var("AZURE_OPENAI_ENDPOINT").ok())
                    .ok_or_else(|| Error::Config("Azure OpenAI endpoint not configured".to_string()))?;
                let deployment = config
                    .deployment
                    .clone()
                    .or_else(|| std::env::var("AZURE_OPENAI_DEPLOYMENT").ok())
                    .ok_or_else(|| {
                        Error::Config("Azure OpenAI deployment not configured".to_string())
                    })?;
                let api_version = config
                    .api_version
                    .clone()
                    .or_else(|| std::env::var("AZURE_OPENAI_API_VERSION").ok())
                    .unwrap_or_else(|| DEFAULT_AZURE_API_VERSION.to_string());
                azure_endpoint(&base, &deployment, &api_version)
            }
        };

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Config(format!("Failed to build HTTP client: {}", e)))?;

        info!("Using {} harness at {}", kind, endpoint);

        Ok(Self {
            kind,
            endpoint,
            client,
            model: config.model.clone(),
            temperature: config.temperature,
        })
    }

    /// Send one system + user exchange and return the reply text
    async fn complete(&self, system: &str, user: String) -> Result<String> {
        let request = ChatCompletionRequest {
            model: match self.kind {
                HarnessKind::OpenAi => Some(self.model.clone()),
                HarnessKind::Azure => None,
            },
            messages: vec![ChatMessage::system(system), ChatMessage::user(user)],
            temperature: self.temperature,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::Capability(format!("API request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Capability(format!("API error {}: {}", status, body)));
        }

        let body: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| Error::Capability(format!("Malformed API response: {}", e)))?;

        if let Some(usage) = &body.usage {
            debug!(
                "Tokens: {} in / {} out",
                usage.prompt_tokens, usage.completion_tokens
            );
        }

        body.choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| Error::Capability("API response had no content".to_string()))
    }
}

fn header_value(value: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(value)
        .map_err(|e| Error::Config(format!("Invalid API key format: {}", e)))
}

fn openai_endpoint(base: &str) -> String {
    format!("{}/chat/completions", base.trim_end_matches('/'))
}

fn azure_endpoint(base: &str, deployment: &str, api_version: &str) -> String {
    format!(
        "{}/openai/deployments/{}/chat/completions?api-version={}",
        base.trim_end_matches('/'),
        deployment,
        api_version
    )
}

#[async_trait]
impl Harness for ChatHarness {
    fn name(&self) -> &str {
        match self.kind {
            HarnessKind::OpenAi => "openai",
            HarnessKind::Azure => "azure",
        }
    }

    async fn execute_step(&self, step: Step, context: &StateSnapshot) -> Result<String> {
        self.complete(step_instructions(step), context.to_json()?)
            .await
    }

    async fn evaluate_guardrails(&self, step: Step, content: &str) -> Result<String> {
        let user = format!("Current step: {}\n{}", step, content);
        self.complete(guardrail_instructions(), user).await
    }

    async fn revise(&self, context: &StateSnapshot, step: Step, feedback: &str) -> Result<String> {
        let user = serde_json::json!({
            "context": context.state,
            "step": step,
            "feedback": feedback,
        })
        .to_string();
        self.complete(feedback_instructions(), user).await
    }
}
