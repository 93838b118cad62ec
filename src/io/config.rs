//! Application configuration (TOML).
//!
//! This file is intended to be edited by humans. Missing fields default to
//! sensible values; a missing file is equivalent to an empty one. CLI flags
//! override whatever is loaded here.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::llm::openai::{DEFAULT_API_BASE, DEFAULT_MODEL};

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a Linux system assistant. Analyze the following system diagnostics and provide a clear, concise summary of system health, notable issues, and recommended actions.";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    /// Chat-completions endpoint base URL.
    pub api_base: String,
    /// Model to request completions from.
    pub model: String,
    /// System prompt for every completion call.
    pub system_prompt: String,
    /// Per-command wall-clock budget in seconds.
    pub command_timeout_secs: u64,
    /// Truncate captured command output beyond this many bytes.
    pub output_limit_bytes: usize,
    /// Width of the command worker pool.
    pub workers: usize,
    /// Default allow-list of command prefixes.
    pub allow_list: Vec<String>,
    /// Default deny-list of command prefixes.
    pub deny_list: Vec<String>,
    /// Skip host-key verification for remote targets.
    pub accept_unknown_hosts: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
            model: DEFAULT_MODEL.to_string(),
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            command_timeout_secs: 15,
            output_limit_bytes: 1024,
            workers: 4,
            allow_list: Vec::new(),
            deny_list: Vec::new(),
            accept_unknown_hosts: false,
        }
    }
}

impl AppConfig {
    pub fn validate(&self) -> Result<()> {
        if self.api_base.trim().is_empty() {
            return Err(anyhow!("api_base must not be empty"));
        }
        if self.model.trim().is_empty() {
            return Err(anyhow!("model must not be empty"));
        }
        if self.command_timeout_secs == 0 {
            return Err(anyhow!("command_timeout_secs must be > 0"));
        }
        if self.output_limit_bytes == 0 {
            return Err(anyhow!("output_limit_bytes must be > 0"));
        }
        if self.workers == 0 {
            return Err(anyhow!("workers must be > 0"));
        }
        Ok(())
    }
}

/// Load config from a TOML file. A missing file yields validated defaults.
pub fn load_config(path: &Path) -> Result<AppConfig> {
    if !path.exists() {
        let cfg = AppConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    info!(path = %path.display(), "loading configuration");
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: AppConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}
