//! Diagnostic session data model.
//!
//! A [`SessionLog`] is an append-only sequence of [`Batch`]es; each batch holds
//! the commands that were run in one round plus the model's interpretation of
//! their output. The serialized session is the sole artifact the workflow
//! produces — report rendering consumes it read-only.

use anyhow::{Result, anyhow};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identity of one command attempt within a session.
///
/// Execution results are correlated by this id, never by the literal command
/// text, so two actions sharing identical text cannot clobber each other.
pub type ActionId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionStatus {
    New,
    Completed,
}

/// One command attempt: the literal command string, its captured output, and
/// its lifecycle status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Action {
    pub id: ActionId,
    /// The literal command string.
    pub name: String,
    pub kind: ActionKind,
    /// Captured output or error text; empty until the action completes.
    pub result: String,
    pub status: ActionStatus,
    /// Completion time; `None` until the action completes.
    pub timestamp: Option<DateTime<Utc>>,
    /// Remote target (`user@host[:port]`) when the command runs over SSH.
    pub remote: Option<String>,
}

impl Action {
    pub fn command(name: impl Into<String>, remote: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            kind: ActionKind::Command,
            result: String::new(),
            status: ActionStatus::New,
            timestamp: None,
            remote,
        }
    }

    pub fn is_remote(&self) -> bool {
        self.remote.is_some()
    }

    /// Record the outcome of this attempt. Transitions New → Completed.
    pub fn complete(&mut self, result: impl Into<String>) {
        self.result = result.into();
        self.status = ActionStatus::Completed;
        self.timestamp = Some(Utc::now());
    }
}

/// One round of diagnostic commands plus their analysis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Batch {
    pub description: String,
    pub actions: Vec<Action>,
    /// The model's interpretation of this round's output.
    pub analysis: String,
    /// Recommended follow-up command strings; empty exactly when no further
    /// batch should be generated from this one.
    pub next_steps: Vec<String>,
    /// True once the analysis adapter has produced an analysis for this batch.
    pub completed: bool,
}

impl Batch {
    /// Build a batch of command actions, each inheriting `remote`.
    pub fn from_commands<I, S>(description: impl Into<String>, commands: I, remote: Option<&str>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            description: description.into(),
            actions: commands
                .into_iter()
                .map(|cmd| Action::command(cmd, remote.map(str::to_string)))
                .collect(),
            analysis: String::new(),
            next_steps: Vec::new(),
            completed: false,
        }
    }
}

/// The full diagnostic run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionLog {
    pub id: Uuid,
    pub issue_description: String,
    /// Insertion order is execution order; never reordered. The last batch is
    /// the current one.
    pub batches: Vec<Batch>,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    /// Closing root-cause summary, written during finalization.
    pub summary: String,
    /// True only once the adapter has signalled the final condition.
    pub diagnosed: bool,
}

impl SessionLog {
    pub fn new(issue_description: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            issue_description: issue_description.into(),
            batches: Vec::new(),
            start_time: Utc::now(),
            end_time: None,
            summary: String::new(),
            diagnosed: false,
        }
    }

    pub fn add_batch(&mut self, batch: Batch) {
        self.batches.push(batch);
    }

    pub fn last_batch(&self) -> Option<&Batch> {
        self.batches.last()
    }

    pub fn last_batch_mut(&mut self) -> Option<&mut Batch> {
        self.batches.last_mut()
    }

    pub fn end(&mut self) {
        if self.end_time.is_none() {
            self.end_time = Some(Utc::now());
        }
    }
}

/// Immutable policy bundle supplied at workflow start.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Free-text description of the issue under investigation.
    pub issue_description: String,
    /// Commands for the first batch.
    pub first_commands: Vec<String>,
    /// Remote target (`user@host[:port]`); commands run locally when unset.
    pub remote: Option<String>,
    /// Instruct the model to prefix (or never prefix) commands with sudo.
    pub use_sudo: bool,
    /// Allow-list of command prefixes. Non-empty list overrides the deny-list.
    pub allow_list: Vec<String>,
    /// Deny-list of command prefixes, consulted only when the allow-list is empty.
    pub deny_list: Vec<String>,
    /// Require confirmation between batches.
    pub interactive: bool,
    /// Upper bound on the number of batches, regardless of recommendations.
    pub max_batches: u32,
    /// Per-command wall-clock budget in seconds.
    pub command_timeout_secs: u64,
    /// Truncate captured command output beyond this many bytes.
    pub output_limit_bytes: usize,
    /// Width of the command worker pool.
    pub workers: usize,
    /// Skip host-key verification for remote targets. Off by default; only
    /// enable for short-lived diagnostics against hosts you already trust.
    pub accept_unknown_hosts: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            issue_description: String::new(),
            first_commands: Vec::new(),
            remote: None,
            use_sudo: false,
            allow_list: Vec::new(),
            deny_list: Vec::new(),
            interactive: false,
            max_batches: 5,
            command_timeout_secs: 15,
            output_limit_bytes: 1024,
            workers: 4,
            accept_unknown_hosts: false,
        }
    }
}

impl SessionConfig {
    pub fn validate(&self) -> Result<()> {
        if self.first_commands.is_empty() {
            return Err(anyhow!("first_commands must not be empty"));
        }
        if self.max_batches == 0 {
            return Err(anyhow!("max_batches must be > 0"));
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
