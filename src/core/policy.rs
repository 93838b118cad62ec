//! Command admission policy.
//!
//! Decides whether a literal command string may run, given configured allow or
//! deny lists of command prefixes. List entries are matched as literal text at
//! the start of the command, followed by whitespace or end-of-string, so
//! `df -h` admits `df -h` and `df -h /var` but not `df -h2` or `df -i`.

use regex::Regex;
use tracing::{debug, warn};

/// Compiled admission policy. Build once per session, query per command.
#[derive(Debug, Default)]
pub struct CommandPolicy {
    allow: Vec<Regex>,
    deny: Vec<Regex>,
}

impl CommandPolicy {
    pub fn new(allow_list: &[String], deny_list: &[String]) -> Self {
        Self {
            allow: compile_prefixes(allow_list),
            deny: compile_prefixes(deny_list),
        }
    }

    /// Whether `command` may run under this policy.
    ///
    /// A non-empty allow-list takes precedence: the command must match one of
    /// its entries and the deny-list is ignored entirely. Otherwise a
    /// non-empty deny-list rejects matching commands. With neither list
    /// configured, everything is allowed.
    pub fn allows(&self, command: &str) -> bool {
        if !self.allow.is_empty() {
            if let Some(matched) = self.allow.iter().find(|re| re.is_match(command)) {
                debug!(command, pattern = matched.as_str(), "command admitted by allow-list");
                return true;
            }
            warn!(command, "command rejected: not on the allow-list");
            return false;
        }

        if !self.deny.is_empty() {
            if let Some(matched) = self.deny.iter().find(|re| re.is_match(command)) {
                warn!(command, pattern = matched.as_str(), "command rejected by deny-list");
                return false;
            }
            debug!(command, "command admitted: not on the deny-list");
            return true;
        }

        debug!(command, "no command restrictions configured");
        true
    }
}

/// Whether `command` may run. An absent policy denies everything: a missing
/// admission configuration must fail closed, not open.
pub fn command_allowed(policy: Option<&CommandPolicy>, command: &str) -> bool {
    match policy {
        Some(policy) => policy.allows(command),
        None => {
            warn!(command, "no admission policy configured, denying");
            false
        }
    }
}

fn compile_prefixes(entries: &[String]) -> Vec<Regex> {
    entries
        .iter()
        .filter_map(|entry| {
            let pattern = format!("^{}(\\s|$)", regex::escape(entry));
            match Regex::new(&pattern) {
                Ok(re) => Some(re),
                Err(err) => {
                    warn!(entry, %err, "skipping unusable policy entry");
                    None
                }
            }
        })
        .collect()
}
