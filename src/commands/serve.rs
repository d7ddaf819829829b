//! Run the periodic expiry sweep until interrupted.

use anyhow::{Context, Result};
use colored::Colorize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::GlobalArgs;
use crate::config::Config;
use crate::sweeper::Sweeper;

/// Banner shown when the sweeper starts
pub fn format_banner(config: &Config) -> String {
    format!(
        "\n{} Reclaiming sandboxes in {} after {} minute(s), checking every {}s. Press Ctrl-C to stop.\n",
        "⏱".cyan(),
        config.cluster.namespace.cyan().bold(),
        config.cleanup.expiration_minutes,
        config.cleanup.interval().as_secs()
    )
}

pub async fn run(global: &GlobalArgs) -> Result<()> {
    let config = global.load_config()?;
    let orchestrator = super::connect(config).await?;
    print!("{}", format_banner(orchestrator.config()));

    let cancel = CancellationToken::new();
    let handle = Sweeper::new(Arc::new(orchestrator)).spawn(cancel.clone());

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    info!("Interrupt received, stopping sweeper");
    cancel.cancel();
    handle.await.context("Sweeper task panicked")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_banner() {
        colored::control::set_override(false);
        let out = format_banner(&Config::default());
        assert!(out.contains("Reclaiming sandboxes in user-sandboxes after 30 minute(s)"));
        assert!(out.contains("checking every 60s"));
    }
}
