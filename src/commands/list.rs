//! List sandboxes in the namespace.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use colored::Colorize;
use std::fmt::Write;

use super::GlobalArgs;
use crate::status::SandboxView;

/// Human-readable age, e.g. `2h05m`.
pub fn format_age(created: Option<DateTime<Utc>>, now: DateTime<Utc>) -> String {
    let Some(created) = created else {
        return "-".to_string();
    };
    let age = now - created;
    let minutes = age.num_minutes().max(0);
    if minutes < 1 {
        format!("{}s", age.num_seconds().max(0))
    } else if minutes < 60 {
        format!("{minutes}m")
    } else if minutes < 60 * 24 {
        format!("{}h{:02}m", minutes / 60, minutes % 60)
    } else {
        format!("{}d{}h", minutes / (60 * 24), (minutes / 60) % 24)
    }
}

/// Format sandboxes as a table
pub fn format_table(views: &[SandboxView], now: DateTime<Utc>) -> String {
    let mut out = String::new();
    if views.is_empty() {
        writeln!(&mut out, "\n{} No sandboxes found.", "ℹ".blue()).unwrap();
        return out;
    }

    let width = views
        .iter()
        .map(|v| v.user_id.len())
        .max()
        .unwrap_or(0)
        .max("USER".len());

    writeln!(
        &mut out,
        "{}",
        format!("{:<width$}  {:<24}  AGE", "USER", "STATUS").bold()
    )
    .unwrap();
    for view in views {
        writeln!(
            &mut out,
            "{:<width$}  {:<24}  {}",
            view.user_id,
            super::paint_status(view.status),
            format_age(view.created_at, now).dimmed()
        )
        .unwrap();
    }
    out
}

pub async fn run(global: &GlobalArgs, json: bool) -> Result<()> {
    let config = global.load_config()?;
    let orchestrator = super::connect(config).await?;
    let views = orchestrator
        .list()
        .await
        .context("Failed to list sandboxes")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&views)?);
    } else {
        print!("{}", format_table(&views, Utc::now()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::SandboxStatus;
    use chrono::TimeDelta;

    #[test]
    fn test_format_age() {
        let now = Utc::now();
        assert_eq!(format_age(None, now), "-");
        assert_eq!(format_age(Some(now - TimeDelta::seconds(42)), now), "42s");
        assert_eq!(format_age(Some(now - TimeDelta::minutes(7)), now), "7m");
        assert_eq!(format_age(Some(now - TimeDelta::minutes(125)), now), "2h05m");
        assert_eq!(format_age(Some(now - TimeDelta::hours(50)), now), "2d2h");
    }

    #[test]
    fn test_format_table() {
        colored::control::set_override(false);
        let now = Utc::now();
        let views = vec![
            SandboxView::new("alice", SandboxStatus::Running, Some(now - TimeDelta::minutes(3))),
            SandboxView::new("bob", SandboxStatus::Pending, None),
        ];
        let out = format_table(&views, now);
        let lines: Vec<_> = out.lines().collect();
        assert!(lines[0].starts_with("USER"));
        assert!(lines[1].starts_with("alice"));
        assert!(lines[1].contains("Running"));
        assert!(lines[1].ends_with("3m"));
        assert!(lines[2].contains("Pending"));
    }

    #[test]
    fn test_format_empty_table() {
        colored::control::set_override(false);
        assert!(format_table(&[], Utc::now()).contains("No sandboxes found"));
    }
}
