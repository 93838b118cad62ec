//! OpenAI-compatible chat-completions client.
//!
//! Speaks the `/chat/completions` protocol against any compatible endpoint.
//! Schema-constrained requests use strict `json_schema` response formatting
//! and the returned content is additionally validated locally, so a
//! non-conforming response surfaces as an error rather than as text.

use anyhow::{Context, Result, anyhow, bail};
use jsonschema::Draft;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, instrument};

use crate::llm::CompletionClient;

pub const DEFAULT_API_BASE: &str = "https://api.openai.com/v1";
pub const DEFAULT_MODEL: &str = "gpt-4.1-mini";

#[derive(Debug, Clone)]
pub struct OpenAiClient {
    http: reqwest::blocking::Client,
    api_base: String,
    api_key: String,
    model: String,
    system_prompt: String,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    content: String,
}

impl OpenAiClient {
    pub fn new(
        api_base: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
        system_prompt: impl Into<String>,
    ) -> Self {
        Self {
            http: reqwest::blocking::Client::new(),
            api_base: api_base.into(),
            api_key: api_key.into(),
            model: model.into(),
            system_prompt: system_prompt.into(),
        }
    }

    fn chat(&self, prompt: &str, response_format: Option<Value>) -> Result<String> {
        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: &self.system_prompt,
                },
                ChatMessage {
                    role: "user",
                    content: prompt,
                },
            ],
            response_format,
        };

        let response = self
            .http
            .post(format!("{}/chat/completions", self.api_base))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .context("send chat completion request")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            bail!("completion service returned {status}: {body}");
        }

        let parsed: ChatResponse = response.json().context("parse chat completion response")?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .ok_or_else(|| anyhow!("completion response contained no choices"))?;
        debug!(bytes = content.len(), "received completion");
        Ok(content)
    }
}

impl CompletionClient for OpenAiClient {
    #[instrument(skip_all, fields(model = %self.model))]
    fn request_completion(&self, prompt: &str) -> Result<String> {
        self.chat(prompt, None)
    }

    #[instrument(skip_all, fields(model = %self.model))]
    fn request_completion_with_schema(&self, prompt: &str, schema: &Value) -> Result<String> {
        let response_format = serde_json::json!({
            "type": "json_schema",
            "json_schema": {
                "name": "response",
                "strict": true,
                "schema": schema,
            },
        });
        let content = self.chat(prompt, Some(response_format))?;
        validate_against_schema(&content, schema)?;
        Ok(content)
    }
}

/// Validate a completion payload against a JSON Schema (Draft 2020-12).
pub fn validate_against_schema(payload: &str, schema: &Value) -> Result<()> {
    let instance: Value = serde_json::from_str(payload)
        .with_context(|| format!("completion is not valid JSON: {payload}"))?;
    let compiled = jsonschema::options()
        .with_draft(Draft::Draft202012)
        .build(schema)
        .context("compile response schema")?;
    let messages: Vec<String> = compiled
        .iter_errors(&instance)
        .map(|err| err.to_string())
        .collect();
    if !messages.is_empty() {
        bail!(
            "completion does not match the declared schema:\n- {}\npayload: {payload}",
            messages.join("\n- ")
        );
    }
    Ok(())
}
