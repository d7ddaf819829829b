//! Show the detailed status of one sandbox.

use anyhow::{Context, Result};
use colored::Colorize;
use std::fmt::Write;

use super::GlobalArgs;
use crate::status::{ContainerDetail, ContainerPhase, SandboxView};

fn format_container(out: &mut String, container: &ContainerDetail) {
    let state = match container.state {
        ContainerPhase::Running => "running".green(),
        ContainerPhase::Waiting => "waiting".yellow(),
        ContainerPhase::Terminated => "terminated".dimmed(),
        ContainerPhase::Unknown => "unknown".red(),
    };
    let ready = if container.ready {
        "ready".green()
    } else {
        "not ready".yellow()
    };
    writeln!(
        out,
        "    {} {} ({ready}, restarts: {})",
        container.name.bold(),
        state,
        container.restart_count
    )
    .unwrap();
    writeln!(out, "      image:  {}", container.image.dimmed()).unwrap();
    if let Some(reason) = &container.reason {
        writeln!(out, "      reason: {}", reason.cyan()).unwrap();
    }
    if let Some(message) = &container.message {
        writeln!(out, "      {}", message.dimmed()).unwrap();
    }
}

/// Format a sandbox status as a displayable string
pub fn format_view(view: &SandboxView) -> String {
    let mut out = String::new();
    writeln!(&mut out, "\n{}", "━".repeat(50).dimmed()).unwrap();
    writeln!(&mut out, "{}", format!("   Sandbox {}", view.user_id).yellow().bold()).unwrap();
    writeln!(&mut out, "{}", "━".repeat(50).dimmed()).unwrap();

    writeln!(&mut out, "  Status:     {}", super::paint_status(view.status)).unwrap();
    writeln!(
        &mut out,
        "  Created:    {}",
        view.created_at
            .map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
            .unwrap_or_else(|| "unknown".to_string())
            .cyan()
    )
    .unwrap();
    if let Some(reason) = &view.reason {
        writeln!(&mut out, "  Reason:     {}", reason.cyan()).unwrap();
    }
    if let Some(message) = &view.message {
        writeln!(&mut out, "  Message:    {}", message.dimmed()).unwrap();
    }

    if let Some(pod) = &view.pod {
        writeln!(&mut out, "  Pod:        {} ({})", pod.name.cyan(), pod.phase).unwrap();
        if !pod.conditions.is_empty() {
            writeln!(&mut out, "  Conditions: {}", pod.conditions.join(", ")).unwrap();
        }
        if !pod.init_containers.is_empty() {
            writeln!(&mut out, "  Init containers:").unwrap();
            for container in &pod.init_containers {
                format_container(&mut out, container);
            }
        }
        if !pod.containers.is_empty() {
            writeln!(&mut out, "  Containers:").unwrap();
            for container in &pod.containers {
                format_container(&mut out, container);
            }
        }
    }

    writeln!(&mut out, "{}", "━".repeat(50).dimmed()).unwrap();
    out
}

pub async fn run(global: &GlobalArgs, user_id: &str, json: bool) -> Result<()> {
    let id = super::parse_user_id(user_id)?;
    let config = global.load_config()?;
    let orchestrator = super::connect(config).await?;
    let view = match orchestrator.status(id.as_str()).await {
        Ok(view) => view,
        Err(e) if e.is_not_found() => {
            eprintln!(
                "\n{} No sandbox found for {}. Run {} to create one.",
                "ℹ".blue(),
                id.as_str().cyan(),
                format!("sandboxer create {id}").green()
            );
            return Err(e.into());
        }
        Err(e) => return Err(e).with_context(|| format!("Failed to get status of {id}")),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&view)?);
    } else {
        print!("{}", format_view(&view));
    }
    Ok(())
}
