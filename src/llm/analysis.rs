//! Structured analysis responses.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::llm::CompletionClient;

const ANALYSIS_RESPONSE_SCHEMA: &str =
    include_str!("../../schemas/analysis_response.schema.json");

/// The model's structured verdict for one batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisResponse {
    /// Interpretation of the command outputs for the current issue.
    pub analysis: String,
    /// Recommended follow-up commands; empty when nothing is left to check.
    pub recommendations: Vec<String>,
    /// True when the model considers the diagnosis complete.
    #[serde(rename = "final")]
    pub is_final: bool,
}

/// The JSON Schema constraining analysis responses.
pub fn analysis_response_schema() -> Result<Value> {
    serde_json::from_str(ANALYSIS_RESPONSE_SCHEMA).context("parse analysis response schema")
}

/// Ask the completion service to interpret the batch described by `prompt`.
///
/// The completion is constrained to [`AnalysisResponse`]'s schema; a response
/// the service cannot shape accordingly surfaces as an error for the workflow
/// to absorb.
pub fn analyze_batch<C: CompletionClient>(client: &C, prompt: &str) -> Result<AnalysisResponse> {
    let schema = analysis_response_schema()?;
    let raw = client
        .request_completion_with_schema(prompt, &schema)
        .context("request batch analysis")?;
    let response: AnalysisResponse =
        serde_json::from_str(&raw).context("parse batch analysis response")?;
    debug!(
        recommendations = response.recommendations.len(),
        is_final = response.is_final,
        "parsed analysis response"
    );
    Ok(response)
}
