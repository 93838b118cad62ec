//! The diagnostic iteration loop.
//!
//! Orchestrates one session: build the first batch from the configured
//! commands, then repeatedly execute the current batch, ask the completion
//! service to interpret the results, and either stop or build a follow-up
//! batch from its recommendations. The loop is bounded by `max_batches`
//! regardless of how eagerly the model keeps recommending commands.
//!
//! Execution and analysis failures are absorbed into the session record
//! (result text, analysis text, summary) rather than propagated; only
//! configuration-level errors escalate to the caller.

use std::collections::HashMap;

use anyhow::{Context, Result};
use tracing::{info, instrument, warn};

use crate::core::policy::{CommandPolicy, command_allowed};
use crate::core::session::{ActionStatus, Batch, SessionConfig, SessionLog};
use crate::io::exec::{CommandExecutor, ExecRequest};
use crate::llm::CompletionClient;
use crate::llm::analysis::analyze_batch;
use crate::llm::prompt::{batch_analysis_prompt, final_analysis_prompt};

pub const INITIAL_BATCH_DESCRIPTION: &str = "Initial commands";
pub const FOLLOW_UP_BATCH_DESCRIPTION: &str = "Follow-up commands";

/// Result text recorded on actions the admission policy rejects.
pub const POLICY_REJECTION_RESULT: &str = "[REJECTED] command not allowed by session policy";

/// Confirmation seam for interactive mode.
pub trait ConfirmPrompt {
    /// Present the completed batch and ask whether to continue. `false` ends
    /// the session immediately, skipping final analysis.
    fn confirm(&self, batch: &Batch) -> Result<bool>;
}

/// What a completed batch tells the loop to do next.
#[derive(Debug, Clone)]
struct BatchOutcome {
    next_steps: Vec<String>,
    is_final: bool,
}

/// Build a session with its first batch from the configured command list.
///
/// An empty command list is a configuration error and escalates; everything
/// past this point degrades into the session record instead of failing.
pub fn init_session(config: &SessionConfig) -> Result<SessionLog> {
    config.validate().context("invalid session configuration")?;
    info!(issue = %config.issue_description, commands = config.first_commands.len(), "initializing debug session");

    let mut session = SessionLog::new(config.issue_description.clone());
    session.add_batch(Batch::from_commands(
        INITIAL_BATCH_DESCRIPTION,
        config.first_commands.iter().cloned(),
        config.remote.as_deref(),
    ));
    Ok(session)
}

/// Run the full diagnostic loop and return the finished session record.
#[instrument(skip_all, fields(max_batches = config.max_batches, interactive = config.interactive))]
pub fn run_diagnosis<E, C, P>(
    config: &SessionConfig,
    executor: &E,
    client: &C,
    confirm: &P,
) -> Result<SessionLog>
where
    E: CommandExecutor,
    C: CompletionClient,
    P: ConfirmPrompt,
{
    let policy = CommandPolicy::new(&config.allow_list, &config.deny_list);
    let mut session = init_session(config)?;

    for turn in 0..config.max_batches {
        let outcome = run_current_batch(&mut session, config, &policy, executor, client)?;

        if outcome.is_final {
            info!("model signalled final analysis, stopping iteration");
            break;
        }

        if config.interactive {
            let proceed = match session.last_batch() {
                Some(batch) => confirm.confirm(batch)?,
                None => true,
            };
            if !proceed {
                info!("session ended at operator request");
                session.end();
                return Ok(session);
            }
        }

        if outcome.next_steps.is_empty() {
            info!("no further recommendations, stopping iteration");
            break;
        }

        if turn + 1 == config.max_batches {
            info!("batch limit reached, stopping iteration");
            break;
        }

        prepare_next_batch(&mut session, &outcome.next_steps, config);
    }

    final_analysis(&mut session, client)?;
    session.end();
    Ok(session)
}

/// Execute and analyze the session's current batch.
#[instrument(skip_all)]
fn run_current_batch<E, C>(
    session: &mut SessionLog,
    config: &SessionConfig,
    policy: &CommandPolicy,
    executor: &E,
    client: &C,
) -> Result<BatchOutcome>
where
    E: CommandExecutor,
    C: CompletionClient,
{
    let mut requests = Vec::new();
    if let Some(batch) = session.last_batch_mut() {
        info!(batch = %batch.description, actions = batch.actions.len(), "running batch");
        for action in &mut batch.actions {
            if action.status != ActionStatus::New {
                continue;
            }
            if !command_allowed(Some(policy), &action.name) {
                action.complete(POLICY_REJECTION_RESULT);
                continue;
            }
            requests.push(ExecRequest {
                id: action.id,
                command: action.name.clone(),
                remote: action.remote.clone(),
            });
        }
    }

    let results = executor.execute(&requests);
    let mut by_id: HashMap<_, _> = results
        .into_iter()
        .map(|result| (result.id, result.output))
        .collect();

    if let Some(batch) = session.last_batch_mut() {
        for action in &mut batch.actions {
            if let Some(output) = by_id.remove(&action.id) {
                action.complete(output);
            } else if action.status == ActionStatus::New {
                // Executed (or admitted) but no result came back; the batch
                // carries on without it.
                warn!(command = %action.name, "no result for admitted action");
            }
        }
    }
    for id in by_id.keys() {
        warn!(%id, "result does not correspond to any action in the batch");
    }

    let prompt = batch_analysis_prompt(session, config, true, true)?;
    let outcome = match analyze_batch(client, &prompt) {
        Ok(response) => {
            let outcome = BatchOutcome {
                next_steps: response.recommendations.clone(),
                is_final: response.is_final,
            };
            if let Some(batch) = session.last_batch_mut() {
                batch.analysis = response.analysis;
                batch.next_steps = response.recommendations;
                batch.completed = true;
            }
            if response.is_final {
                info!("diagnosis complete");
                session.diagnosed = true;
                session.end();
            }
            outcome
        }
        Err(err) => {
            // Completed-with-error: the failure becomes the batch's analysis
            // and iteration winds down as if nothing more were recommended.
            warn!(%err, "batch analysis failed");
            if let Some(batch) = session.last_batch_mut() {
                batch.analysis = format!("Analysis failed: {err:#}");
                batch.next_steps.clear();
                batch.completed = true;
            }
            BatchOutcome {
                next_steps: Vec::new(),
                is_final: false,
            }
        }
    };

    Ok(outcome)
}

/// Append a follow-up batch built from the model's recommendations. Follow-up
/// commands run against the same remote target as the initial batch.
fn prepare_next_batch(session: &mut SessionLog, next_steps: &[String], config: &SessionConfig) {
    info!(commands = next_steps.len(), "preparing next batch");
    session.add_batch(Batch::from_commands(
        FOLLOW_UP_BATCH_DESCRIPTION,
        next_steps.iter().cloned(),
        config.remote.as_deref(),
    ));
}

/// Aggregate every completed batch's analysis into one closing summary.
#[instrument(skip_all, fields(session = %session.id))]
fn final_analysis<C: CompletionClient>(session: &mut SessionLog, client: &C) -> Result<()> {
    info!("performing final analysis");
    let prompt = final_analysis_prompt(session)?;
    session.summary = match client.request_completion(&prompt) {
        Ok(summary) => summary,
        Err(err) => {
            warn!(%err, "final analysis failed");
            format!("Error during final analysis: {err:#}")
        }
    };
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::exec::ExecResult;
    use anyhow::anyhow;
    use serde_json::Value;
    use std::sync::Mutex;

    /// Executor that records what it was asked to run and answers from a map.
    #[derive(Default)]
    struct FakeExecutor {
        seen: Mutex<Vec<String>>,
    }

    impl CommandExecutor for FakeExecutor {
        fn execute(&self, requests: &[ExecRequest]) -> Vec<ExecResult> {
            let mut seen = self.seen.lock().expect("lock");
            requests
                .iter()
                .map(|request| {
                    seen.push(request.command.clone());
                    ExecResult {
                        id: request.id,
                        output: format!("out:{}", request.command),
                    }
                })
                .collect()
        }
    }

    /// Client that replays scripted analysis responses, then keeps repeating
    /// the last one. Tracks final-analysis calls separately.
    struct FakeClient {
        responses: Mutex<Vec<Result<String, String>>>,
        final_calls: Mutex<u32>,
    }

    impl FakeClient {
        fn scripted(responses: Vec<Result<String, String>>) -> Self {
            Self {
                responses: Mutex::new(responses),
                final_calls: Mutex::new(0),
            }
        }

        fn analysis(analysis: &str, recommendations: &[&str], is_final: bool) -> Result<String, String> {
            Ok(serde_json::json!({
                "analysis": analysis,
                "recommendations": recommendations,
                "final": is_final,
            })
            .to_string())
        }

        fn final_calls(&self) -> u32 {
            *self.final_calls.lock().expect("lock")
        }
    }

    impl CompletionClient for FakeClient {
        fn request_completion(&self, _prompt: &str) -> Result<String> {
            *self.final_calls.lock().expect("lock") += 1;
            Ok("summary: all good".to_string())
        }

        fn request_completion_with_schema(&self, _prompt: &str, _schema: &Value) -> Result<String> {
            let mut responses = self.responses.lock().expect("lock");
            let next = if responses.len() > 1 {
                responses.remove(0)
            } else {
                responses.first().cloned().unwrap_or_else(|| {
                    Err("script exhausted".to_string())
                })
            };
            next.map_err(|message| anyhow!("{message}"))
        }
    }

    struct ScriptedConfirm {
        answer: bool,
        calls: Mutex<u32>,
    }

    impl ScriptedConfirm {
        fn answering(answer: bool) -> Self {
            Self {
                answer,
                calls: Mutex::new(0),
            }
        }
    }

    impl ConfirmPrompt for ScriptedConfirm {
        fn confirm(&self, _batch: &Batch) -> Result<bool> {
            *self.calls.lock().expect("lock") += 1;
            Ok(self.answer)
        }
    }

    fn config(commands: &[&str]) -> SessionConfig {
        SessionConfig {
            issue_description: "test issue".to_string(),
            first_commands: commands.iter().map(|s| s.to_string()).collect(),
            ..SessionConfig::default()
        }
    }

    #[test]
    fn empty_recommendations_end_the_loop_after_one_batch() {
        let executor = FakeExecutor::default();
        let client = FakeClient::scripted(vec![FakeClient::analysis("looks fine", &[], false)]);
        let confirm = ScriptedConfirm::answering(true);

        let session =
            run_diagnosis(&config(&["echo A", "echo B"]), &executor, &client, &confirm)
                .expect("run");

        assert_eq!(session.batches.len(), 1);
        assert!(session.batches[0].completed);
        assert_eq!(session.batches[0].analysis, "looks fine");
        assert!(
            session.batches[0]
                .actions
                .iter()
                .all(|a| a.status == ActionStatus::Completed)
        );
        assert_eq!(client.final_calls(), 1);
        assert!(session.summary.contains("all good"));
        assert!(session.end_time.is_some());
        assert!(!session.diagnosed);
    }

    #[test]
    fn loop_is_bounded_even_when_model_keeps_recommending() {
        let executor = FakeExecutor::default();
        let client = FakeClient::scripted(vec![FakeClient::analysis(
            "more to check",
            &["a", "b", "c", "d", "e"],
            false,
        )]);
        let confirm = ScriptedConfirm::answering(true);

        let session = run_diagnosis(&config(&["uptime"]), &executor, &client, &confirm)
            .expect("run");

        assert_eq!(session.batches.len(), 5);
        assert!(session.batches.iter().all(|b| b.completed));
        assert_eq!(client.final_calls(), 1);
    }

    #[test]
    fn final_flag_stops_iteration_and_marks_diagnosed() {
        let executor = FakeExecutor::default();
        let client = FakeClient::scripted(vec![FakeClient::analysis(
            "root cause found",
            &[],
            true,
        )]);
        let confirm = ScriptedConfirm::answering(true);

        let session = run_diagnosis(&config(&["uptime"]), &executor, &client, &confirm)
            .expect("run");

        assert_eq!(session.batches.len(), 1);
        assert!(session.diagnosed);
        assert!(session.end_time.is_some());
        assert_eq!(client.final_calls(), 1);
    }

    #[test]
    fn rejected_commands_never_reach_the_executor() {
        let executor = FakeExecutor::default();
        let client = FakeClient::scripted(vec![FakeClient::analysis("ok", &[], false)]);
        let confirm = ScriptedConfirm::answering(true);
        let mut config = config(&["df -h", "df -i"]);
        config.allow_list = vec!["df -h".to_string()];

        let session = run_diagnosis(&config, &executor, &client, &confirm).expect("run");

        let seen = executor.seen.lock().expect("lock");
        assert_eq!(*seen, vec!["df -h".to_string()]);

        let batch = &session.batches[0];
        let rejected = batch
            .actions
            .iter()
            .find(|a| a.name == "df -i")
            .expect("df -i action");
        assert_eq!(rejected.status, ActionStatus::Completed);
        assert_eq!(rejected.result, POLICY_REJECTION_RESULT);

        let admitted = batch
            .actions
            .iter()
            .find(|a| a.name == "df -h")
            .expect("df -h action");
        assert_eq!(admitted.result, "out:df -h");
    }

    #[test]
    fn analysis_failure_is_recorded_and_ends_the_loop() {
        let executor = FakeExecutor::default();
        let client = FakeClient::scripted(vec![Err("schema mismatch".to_string())]);
        let confirm = ScriptedConfirm::answering(true);

        let session = run_diagnosis(&config(&["uptime"]), &executor, &client, &confirm)
            .expect("run");

        assert_eq!(session.batches.len(), 1);
        let batch = &session.batches[0];
        assert!(batch.completed);
        assert!(batch.analysis.contains("schema mismatch"));
        assert!(batch.next_steps.is_empty());
        // The session still terminates with a summary.
        assert_eq!(client.final_calls(), 1);
    }

    #[test]
    fn interactive_decline_ends_session_without_final_analysis() {
        let executor = FakeExecutor::default();
        let client = FakeClient::scripted(vec![FakeClient::analysis(
            "keep digging",
            &["free -h"],
            false,
        )]);
        let confirm = ScriptedConfirm::answering(false);
        let mut config = config(&["uptime"]);
        config.interactive = true;

        let session = run_diagnosis(&config, &executor, &client, &confirm).expect("run");

        assert_eq!(*confirm.calls.lock().expect("lock"), 1);
        assert_eq!(session.batches.len(), 1);
        assert!(session.summary.is_empty());
        assert_eq!(client.final_calls(), 0);
        assert!(session.end_time.is_some());
    }

    #[test]
    fn follow_up_batches_inherit_the_remote_target() {
        let executor = FakeExecutor::default();
        let client = FakeClient::scripted(vec![
            FakeClient::analysis("first", &["free -h"], false),
            FakeClient::analysis("second", &[], false),
        ]);
        let confirm = ScriptedConfirm::answering(true);
        let mut config = config(&["uptime"]);
        config.remote = Some("alice@10.0.0.5".to_string());

        let session = run_diagnosis(&config, &executor, &client, &confirm).expect("run");

        assert_eq!(session.batches.len(), 2);
        assert_eq!(session.batches[1].description, FOLLOW_UP_BATCH_DESCRIPTION);
        assert!(
            session.batches[1]
                .actions
                .iter()
                .all(|a| a.remote.as_deref() == Some("alice@10.0.0.5"))
        );
    }

    #[test]
    fn final_analysis_failure_is_written_into_the_summary() {
        struct FailingFinalClient;
        impl CompletionClient for FailingFinalClient {
            fn request_completion(&self, _prompt: &str) -> Result<String> {
                Err(anyhow!("completion service down"))
            }
            fn request_completion_with_schema(&self, _: &str, _: &Value) -> Result<String> {
                Ok(serde_json::json!({
                    "analysis": "ok",
                    "recommendations": [],
                    "final": false,
                })
                .to_string())
            }
        }

        let executor = FakeExecutor::default();
        let confirm = ScriptedConfirm::answering(true);
        let session = run_diagnosis(&config(&["uptime"]), &executor, &FailingFinalClient, &confirm)
            .expect("run");

        assert!(session.summary.contains("Error during final analysis"));
        assert!(session.summary.contains("completion service down"));
        assert!(session.end_time.is_some());
    }

    #[test]
    fn init_with_no_commands_is_a_hard_error() {
        let config = config(&[]);
        assert!(init_session(&config).is_err());
    }

    #[test]
    fn initial_actions_inherit_remote_target() {
        let mut config = config(&["uptime"]);
        config.remote = Some("10.0.0.5".to_string());
        let session = init_session(&config).expect("init");
        assert_eq!(session.batches[0].description, INITIAL_BATCH_DESCRIPTION);
        assert_eq!(
            session.batches[0].actions[0].remote.as_deref(),
            Some("10.0.0.5")
        );
    }
}
