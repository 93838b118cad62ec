//! Completion-service boundary.
//!
//! The [`CompletionClient`] trait decouples the workflow from the actual
//! completion backend. The workflow receives its client at construction time,
//! so tests substitute scripted fakes; there is deliberately no process-wide
//! provider handle.

pub mod analysis;
pub mod openai;
pub mod prompt;

use anyhow::Result;
use serde_json::Value;

/// A language-model completion service.
pub trait CompletionClient {
    /// Request a free-text completion for `prompt`.
    fn request_completion(&self, prompt: &str) -> Result<String>;

    /// Request a completion constrained to `schema` (a JSON Schema). The
    /// returned text is guaranteed to validate against the schema; a response
    /// that does not validate is an error, never a plain-text fallback.
    fn request_completion_with_schema(&self, prompt: &str, schema: &Value) -> Result<String>;
}
