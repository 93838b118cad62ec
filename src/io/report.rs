//! Session report rendering.
//!
//! Consumes the finished session record read-only and renders it as markdown
//! or JSON. The JSON report is simply the serialized session.

use anyhow::{Context, Result};
use clap::ValueEnum;
use minijinja::{Environment, context};

use crate::core::session::SessionLog;

const REPORT_TEMPLATE: &str = include_str!("templates/report.md");

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ReportFormat {
    Markdown,
    Json,
}

#[derive(Debug, Clone, Copy)]
pub struct ReportOptions {
    pub format: ReportFormat,
    pub include_command_output: bool,
    pub include_analysis_history: bool,
}

impl Default for ReportOptions {
    fn default() -> Self {
        Self {
            format: ReportFormat::Markdown,
            include_command_output: true,
            include_analysis_history: true,
        }
    }
}

/// Render `session` according to `options`.
pub fn generate_report(session: &SessionLog, options: &ReportOptions) -> Result<String> {
    match options.format {
        ReportFormat::Json => {
            let mut payload =
                serde_json::to_string_pretty(session).context("serialize session report")?;
            payload.push('\n');
            Ok(payload)
        }
        ReportFormat::Markdown => render_markdown(session, options),
    }
}

fn render_markdown(session: &SessionLog, options: &ReportOptions) -> Result<String> {
    let mut env = Environment::new();
    env.set_trim_blocks(true);
    env.set_lstrip_blocks(true);
    env.add_template("report", REPORT_TEMPLATE)
        .expect("report template should be valid");
    let template = env.get_template("report").context("load report template")?;
    template
        .render(context! {
            session => session,
            include_command_output => options.include_command_output,
            include_analysis_history => options.include_analysis_history,
        })
        .context("render markdown report")
}
