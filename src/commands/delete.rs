//! Tear down a sandbox, keeping its storage claim.

use anyhow::Result;
use colored::Colorize;
use std::fmt::Write;

use super::GlobalArgs;
use crate::orchestrator::{StepOutcome, TeardownReport};

/// Format a teardown report as a displayable string
pub fn format_report(report: &TeardownReport) -> String {
    let mut out = String::new();
    let headline = if report.is_clean() {
        format!("{} Sandbox {} deleted", "✓".green(), report.user_id.cyan().bold())
    } else {
        format!(
            "{} Sandbox {} deleted with {} failed step(s)",
            "⚠".yellow(),
            report.user_id.cyan().bold(),
            report.failed()
        )
    };
    writeln!(&mut out, "\n{headline}").unwrap();

    for step in &report.steps {
        let (mark, note) = match &step.outcome {
            StepOutcome::Deleted => ("✗".red(), String::new()),
            StepOutcome::Absent => ("·".dimmed(), "already gone".dimmed().to_string()),
            StepOutcome::Failed(reason) => ("!".yellow().bold(), reason.yellow().to_string()),
        };
        writeln!(&mut out, "  {mark} {} {} {note}", step.kind, step.name.dimmed()).unwrap();
    }
    writeln!(&mut out, "  {}", "storage claim kept".dimmed()).unwrap();
    out
}

pub async fn run(global: &GlobalArgs, user_id: &str) -> Result<()> {
    let id = super::parse_user_id(user_id)?;
    let config = global.load_config()?;
    let orchestrator = super::connect(config).await?;

    let report = orchestrator.delete(&id).await;
    print!("{}", format_report(&report));
    Ok(())
}
