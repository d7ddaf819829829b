//! Reclaim old sandboxes on demand.

use anyhow::{Context, Result};
use chrono::TimeDelta;
use colored::Colorize;
use std::sync::Arc;

use super::GlobalArgs;
use crate::sweeper::{self, Sweeper};

/// Format the outcome of an on-demand sweep
pub fn format_result(reclaimed: usize, older_than_minutes: u32) -> String {
    if reclaimed == 0 {
        format!(
            "\n{} No sandboxes older than {older_than_minutes} minute(s) to reclaim.\n",
            "ℹ".blue()
        )
    } else {
        format!(
            "\n{} Reclaimed {} sandbox(es) older than {older_than_minutes} minute(s).\n",
            "✓".green(),
            reclaimed.to_string().cyan().bold()
        )
    }
}

pub async fn run(global: &GlobalArgs, older_than_minutes: u32, token: &str) -> Result<()> {
    let config = global.load_config()?;
    // Reject bad tokens before touching the cluster
    sweeper::authorize(config.cleanup.auth_token.as_deref(), token)?;

    let orchestrator = super::connect(config).await?;
    let sweeper = Sweeper::new(Arc::new(orchestrator));
    let reclaimed = sweeper
        .sweep_on_demand(TimeDelta::minutes(i64::from(older_than_minutes)), token)
        .await
        .context("On-demand sweep failed")?;

    print!("{}", format_result(reclaimed, older_than_minutes));
    Ok(())
}
