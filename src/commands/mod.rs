//! CLI command implementations.
//!
//! Each submodule implements a sandboxer CLI command with pure formatting
//! separated from cluster IO for testability.

pub mod create;
pub mod delete;
pub mod list;
pub mod serve;
pub mod status;
pub mod sweep;

use anyhow::{Context, Result};
use clap::Args;
use colored::{ColoredString, Colorize};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;

use crate::cluster::KubeCluster;
use crate::config::Config;
use crate::identity::SandboxId;
use crate::orchestrator::Orchestrator;
use crate::status::SandboxStatus;

/// Options shared by every command.
#[derive(Debug, Clone, Default, Args)]
pub struct GlobalArgs {
    /// Path to sandboxer.toml (defaults to ./sandboxer.toml if present)
    #[arg(long, global = true, env = "SANDBOXER_CONFIG")]
    pub config: Option<PathBuf>,

    /// Namespace holding the sandboxes (overrides the config file)
    #[arg(short, long, global = true, env = "SANDBOXER_NAMESPACE")]
    pub namespace: Option<String>,
}

impl GlobalArgs {
    /// Loads the configuration and applies command-line overrides.
    pub fn load_config(&self) -> Result<Config> {
        let cwd = std::env::current_dir().context("Failed to get current directory")?;
        let mut config = Config::load(self.config.as_deref(), &cwd)
            .context("Failed to load sandboxer.toml")?;
        if let Some(namespace) = &self.namespace {
            config.cluster.namespace.clone_from(namespace);
        }
        Ok(config)
    }
}

/// Parses a user ID given on the command line.
pub fn parse_user_id(user_id: &str) -> Result<SandboxId> {
    SandboxId::parse(user_id).with_context(|| format!("Invalid user ID '{user_id}'"))
}

/// Connects to the cluster and builds an orchestrator.
pub async fn connect(config: Config) -> Result<Orchestrator<KubeCluster>> {
    let config = Arc::new(config);
    debug!(namespace = %config.cluster.namespace, "Connecting to cluster");
    let cluster = KubeCluster::connect(&config.cluster.namespace, config.cluster.call_timeout())
        .await
        .context("Failed to connect to Kubernetes")?;
    Ok(Orchestrator::new(Arc::new(cluster), config))
}

/// Colors a status by severity.
pub fn paint_status(status: SandboxStatus) -> ColoredString {
    let text = status.to_string();
    if status.is_running() {
        text.green().bold()
    } else if status.is_failing() {
        text.red().bold()
    } else {
        text.yellow()
    }
}
