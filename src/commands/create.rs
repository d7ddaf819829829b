//! Provision a sandbox.

use anyhow::{Context, Result};
use colored::Colorize;
use std::collections::BTreeMap;
use std::fmt::Write;

use super::GlobalArgs;
use crate::compose::{self, EndpointRole};
use crate::config::Config;
use crate::identity::SandboxId;

/// Parses a `KEY=VALUE` argument.
pub fn parse_key_val(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got '{s}'"))?;
    if key.is_empty() {
        return Err(format!("empty key in '{s}'"));
    }
    Ok((key.to_string(), value.to_string()))
}

/// Format the endpoints of a freshly created sandbox
pub fn format_created(id: &SandboxId, config: &Config) -> String {
    let mut out = String::new();
    writeln!(
        &mut out,
        "\n{} Sandbox {} created in {}",
        "✓".green(),
        id.as_str().cyan().bold(),
        config.cluster.namespace.cyan()
    )
    .unwrap();
    for role in EndpointRole::ALL {
        writeln!(
            &mut out,
            "  {:<8} https://{}",
            format!("{}:", role.host_label()),
            compose::host(id, role, &config.cluster.domain)
        )
        .unwrap();
    }
    out
}

pub async fn run(
    global: &GlobalArgs,
    user_id: &str,
    env: Vec<(String, String)>,
    app_env: Vec<(String, String)>,
) -> Result<()> {
    let id = super::parse_user_id(user_id)?;
    let config = global.load_config()?;
    let orchestrator = super::connect(config).await?;

    let env: BTreeMap<_, _> = env.into_iter().collect();
    let app_env: BTreeMap<_, _> = app_env.into_iter().collect();
    orchestrator
        .create(id.as_str(), env, app_env)
        .await
        .with_context(|| format!("Failed to create sandbox for {id}"))?;

    print!("{}", format_created(&id, orchestrator.config()));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_key_val() {
        assert_eq!(
            parse_key_val("API_KEY=abc=def").unwrap(),
            ("API_KEY".to_string(), "abc=def".to_string())
        );
        assert_eq!(
            parse_key_val("EMPTY=").unwrap(),
            ("EMPTY".to_string(), String::new())
        );
        assert!(parse_key_val("novalue").is_err());
        assert!(parse_key_val("=x").is_err());
    }

    #[test]
    fn test_format_created_lists_hosts() {
        colored::control::set_override(false);
        let id = SandboxId::parse("alice").unwrap();
        let out = format_created(&id, &Config::default());
        assert!(out.contains("Sandbox alice created in user-sandboxes"));
        assert!(out.contains("https://alice-vnc.tryiris.dev"));
        assert!(out.contains("https://alice-api.tryiris.dev"));
    }
}
