//! `sysprobe` — a sysadmin assistant powered by LLMs.

use std::fs;
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};

use sysprobe::core::session::{Batch, SessionConfig};
use sysprobe::io::config::load_config;
use sysprobe::io::exec::WorkerPool;
use sysprobe::io::report::{ReportFormat, ReportOptions, generate_report};
use sysprobe::io::ssh::SshAuth;
use sysprobe::llm::openai::OpenAiClient;
use sysprobe::logging;
use sysprobe::workflow::{ConfirmPrompt, run_diagnosis};

/// Stock health-check commands used when none are given.
const DEFAULT_COMMANDS: &[&str] = &[
    "top -b -n1 | head -20",
    "ps aux | head -10",
    "df -h",
    "free -h",
    "dmesg | tail -n 50",
];

#[derive(Parser)]
#[command(name = "sysprobe", version, about = "A sysadmin assistant powered by LLMs")]
struct Cli {
    /// Path to a TOML configuration file.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Debug a host with targeted diagnostics and LLM analysis.
    Diagnose {
        /// Description of the issue to debug.
        #[arg(short, long)]
        description: String,
        /// Ask for confirmation between batches.
        #[arg(short, long)]
        interactive: bool,
        /// Execute commands on a remote host (`user@host[:port]`) instead of locally.
        #[arg(short, long)]
        remote: Option<String>,
        /// Instruct the model to use sudo in every command.
        #[arg(short, long)]
        sudo: bool,
        /// Command for the first batch; repeatable. Defaults to a stock health-check set.
        #[arg(long = "command")]
        commands: Vec<String>,
        /// Allow-list entry (command prefix); repeatable. Overrides the deny-list.
        #[arg(long = "allow")]
        allow: Vec<String>,
        /// Deny-list entry (command prefix); repeatable.
        #[arg(long = "deny")]
        deny: Vec<String>,
        /// Upper bound on the number of batches.
        #[arg(long, default_value_t = 5)]
        max_batches: u32,
        /// Skip host-key verification for the remote target.
        #[arg(long)]
        accept_unknown_hosts: bool,
        /// Report format.
        #[arg(long, value_enum, default_value = "markdown")]
        format: ReportFormat,
        /// Write the report to a file instead of stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

fn main() {
    logging::init();
    if let Err(err) = run() {
        eprintln!("{err:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(|| PathBuf::from("sysprobe.toml"));
    let app = load_config(&config_path)?;

    match cli.command {
        Command::Diagnose {
            description,
            interactive,
            remote,
            sudo,
            commands,
            allow,
            deny,
            max_batches,
            accept_unknown_hosts,
            format,
            output,
        } => {
            let first_commands = if commands.is_empty() {
                DEFAULT_COMMANDS.iter().map(|s| s.to_string()).collect()
            } else {
                commands
            };
            let session_config = SessionConfig {
                issue_description: description,
                first_commands,
                remote,
                use_sudo: sudo,
                allow_list: if allow.is_empty() { app.allow_list.clone() } else { allow },
                deny_list: if deny.is_empty() { app.deny_list.clone() } else { deny },
                interactive,
                max_batches,
                command_timeout_secs: app.command_timeout_secs,
                output_limit_bytes: app.output_limit_bytes,
                workers: app.workers,
                accept_unknown_hosts: accept_unknown_hosts || app.accept_unknown_hosts,
            };

            let api_key = std::env::var("OPENAI_API_KEY")
                .map_err(|_| anyhow!("OPENAI_API_KEY is not set"))?;
            let client = OpenAiClient::new(&app.api_base, api_key, &app.model, &app.system_prompt);

            let executor = WorkerPool::new(
                session_config.workers,
                Duration::from_secs(session_config.command_timeout_secs),
                session_config.output_limit_bytes,
                SshAuth::discover(session_config.accept_unknown_hosts),
            );

            let session = run_diagnosis(&session_config, &executor, &client, &StdinConfirm)?;

            let options = ReportOptions {
                format,
                ..ReportOptions::default()
            };
            let report = generate_report(&session, &options)?;
            match output {
                Some(path) => fs::write(&path, report)
                    .with_context(|| format!("write report {}", path.display()))?,
                None => print!("{report}"),
            }
            Ok(())
        }
    }
}

/// Interactive confirmation over stdin.
struct StdinConfirm;

impl ConfirmPrompt for StdinConfirm {
    fn confirm(&self, batch: &Batch) -> Result<bool> {
        println!("\nCommands:");
        for action in &batch.actions {
            println!("- {}", action.name);
        }
        println!("\nAnalysis:\n{}", batch.analysis);
        println!("\nNext steps:");
        for command in &batch.next_steps {
            println!("- {command}");
        }
        print!("\nDo you want to continue with the next batch of commands? (yes/no): ");
        std::io::stdout().flush().context("flush stdout")?;

        let mut response = String::new();
        std::io::stdin()
            .read_line(&mut response)
            .context("read confirmation")?;
        Ok(response.trim().eq_ignore_ascii_case("yes"))
    }
}
