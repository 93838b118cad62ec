//! Deterministic prompt construction for analysis calls.
//!
//! Prompts serialize the issue description and the full batch history in
//! insertion order; command outputs and prior analyses are included only when
//! explicitly requested. Rendering the same session snapshot twice yields
//! byte-identical text.

use anyhow::{Context, Result};
use minijinja::{Environment, context};

use crate::core::session::{SessionConfig, SessionLog};

const BATCH_ANALYSIS_TEMPLATE: &str = include_str!("prompts/batch_analysis.md");
const FINAL_ANALYSIS_TEMPLATE: &str = include_str!("prompts/final_analysis.md");

/// Template engine wrapper around minijinja.
struct PromptEngine {
    env: Environment<'static>,
}

impl PromptEngine {
    fn new() -> Self {
        let mut env = Environment::new();
        env.set_trim_blocks(true);
        env.set_lstrip_blocks(true);
        env.add_template("batch_analysis", BATCH_ANALYSIS_TEMPLATE)
            .expect("batch analysis template should be valid");
        env.add_template("final_analysis", FINAL_ANALYSIS_TEMPLATE)
            .expect("final analysis template should be valid");
        Self { env }
    }
}

/// Build the per-batch analysis prompt from accumulated session state.
///
/// The configured allow or deny list is echoed verbatim into the model's
/// instructions, along with the sudo directive from the session config.
pub fn batch_analysis_prompt(
    session: &SessionLog,
    config: &SessionConfig,
    include_history: bool,
    include_outputs: bool,
) -> Result<String> {
    let engine = PromptEngine::new();
    let template = engine
        .env
        .get_template("batch_analysis")
        .context("load batch analysis template")?;
    template
        .render(context! {
            issue_description => session.issue_description,
            batches => session.batches,
            allow_list => config.allow_list,
            deny_list => config.deny_list,
            use_sudo => config.use_sudo,
            include_history => include_history,
            include_outputs => include_outputs,
        })
        .context("render batch analysis prompt")
}

/// Build the closing summary prompt over the whole session.
pub fn final_analysis_prompt(session: &SessionLog) -> Result<String> {
    let engine = PromptEngine::new();
    let template = engine
        .env
        .get_template("final_analysis")
        .context("load final analysis template")?;
    template
        .render(context! {
            issue_description => session.issue_description,
            batches => session.batches,
        })
        .context("render final analysis prompt")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::session::Batch;

    fn session_with_history() -> (SessionLog, SessionConfig) {
        let mut session = SessionLog::new("host is swapping heavily");
        let mut batch = Batch::from_commands("Initial commands", ["free -h", "vmstat 1 2"], None);
        batch.actions[0].complete("Mem: 15Gi used");
        batch.actions[1].complete("si/so nonzero");
        batch.analysis = "memory pressure confirmed".to_string();
        batch.completed = true;
        session.add_batch(batch);
        let config = SessionConfig {
            issue_description: "host is swapping heavily".to_string(),
            first_commands: vec!["free -h".to_string()],
            ..SessionConfig::default()
        };
        (session, config)
    }

    #[test]
    fn rendering_is_deterministic() {
        let (session, config) = session_with_history();
        let first = batch_analysis_prompt(&session, &config, true, true).expect("render");
        let second = batch_analysis_prompt(&session, &config, true, true).expect("render");
        assert_eq!(first, second);

        let final_first = final_analysis_prompt(&session).expect("render");
        let final_second = final_analysis_prompt(&session).expect("render");
        assert_eq!(final_first, final_second);
    }

    #[test]
    fn includes_issue_and_command_history() {
        let (session, config) = session_with_history();
        let prompt = batch_analysis_prompt(&session, &config, true, true).expect("render");
        assert!(prompt.contains("host is swapping heavily"));
        assert!(prompt.contains("free -h"));
        assert!(prompt.contains("Mem: 15Gi used"));
        assert!(prompt.contains("memory pressure confirmed"));
    }

    #[test]
    fn outputs_and_analyses_are_opt_in() {
        let (session, config) = session_with_history();
        let prompt = batch_analysis_prompt(&session, &config, false, false).expect("render");
        assert!(prompt.contains("free -h"));
        assert!(!prompt.contains("Mem: 15Gi used"));
        assert!(!prompt.contains("memory pressure confirmed"));
    }

    #[test]
    fn allow_list_is_echoed_verbatim() {
        let (session, mut config) = session_with_history();
        config.allow_list = vec!["df -h".to_string(), "free -h".to_string()];
        config.deny_list = vec!["rm".to_string()];
        let prompt = batch_analysis_prompt(&session, &config, true, true).expect("render");
        assert!(prompt.contains("whitelist"));
        assert!(prompt.contains("df -h"));
        // Allow-list presence hides the deny-list entirely.
        assert!(!prompt.contains("blacklist"));
    }

    #[test]
    fn deny_list_is_used_when_no_allow_list() {
        let (session, mut config) = session_with_history();
        config.deny_list = vec!["rm".to_string(), "shutdown".to_string()];
        let prompt = batch_analysis_prompt(&session, &config, true, true).expect("render");
        assert!(prompt.contains("blacklist"));
        assert!(prompt.contains("shutdown"));
    }

    #[test]
    fn sudo_directive_follows_config() {
        let (session, mut config) = session_with_history();
        let prompt = batch_analysis_prompt(&session, &config, true, true).expect("render");
        assert!(prompt.contains("NEVER include 'sudo'"));

        config.use_sudo = true;
        let prompt = batch_analysis_prompt(&session, &config, true, true).expect("render");
        assert!(prompt.contains("ALWAYS use 'sudo'"));
    }

    #[test]
    fn final_prompt_lists_every_batch_in_order() {
        let (mut session, _) = session_with_history();
        let mut second = Batch::from_commands("Follow-up commands", ["dmesg | tail -n 20"], None);
        second.analysis = "oom killer fired".to_string();
        second.completed = true;
        session.add_batch(second);

        let prompt = final_analysis_prompt(&session).expect("render");
        let first_pos = prompt.find("Initial commands").expect("first batch");
        let second_pos = prompt.find("Follow-up commands").expect("second batch");
        assert!(first_pos < second_pos);
        assert!(prompt.contains("oom killer fired"));
    }
}
