//! Integration tests for the sandboxer CLI.
//!
//! These tests run the actual executable and only exercise paths that fail or
//! finish before a cluster connection is attempted.

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

// -----------------------------------------------------------------------------
// Test helpers
// -----------------------------------------------------------------------------

/// Creates a Command for the sandboxer binary with a clean environment.
#[allow(deprecated)]
fn sandboxer() -> Command {
    let mut cmd = Command::cargo_bin("sandboxer").expect("failed to find sandboxer binary");
    cmd.env_remove("SANDBOXER_CONFIG")
        .env_remove("SANDBOXER_NAMESPACE")
        .env_remove("SANDBOXER_SWEEP_TOKEN");
    cmd
}

/// Creates a Command for sandboxer running in a specific directory.
fn sandboxer_in(dir: &TempDir) -> Command {
    let mut cmd = sandboxer();
    cmd.current_dir(dir.path());
    cmd
}

// -----------------------------------------------------------------------------
// Help and version tests
// -----------------------------------------------------------------------------

#[test]
fn test_help_shows_all_commands() {
    sandboxer()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("sandboxer"))
        .stdout(predicate::str::contains("create"))
        .stdout(predicate::str::contains("delete"))
        .stdout(predicate::str::contains("list"))
        .stdout(predicate::str::contains("status"))
        .stdout(predicate::str::contains("sweep"))
        .stdout(predicate::str::contains("serve"));
}

#[test]
fn test_version_shows_version() {
    sandboxer()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("sandboxer"));
}

#[test]
fn test_create_help_shows_env_options() {
    sandboxer()
        .args(["create", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--env"))
        .stdout(predicate::str::contains("--app-env"))
        .stdout(predicate::str::contains("--namespace"));
}

#[test]
fn test_sweep_help_shows_options() {
    sandboxer()
        .args(["sweep", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--older-than"))
        .stdout(predicate::str::contains("--token"))
        .stdout(predicate::str::contains("SANDBOXER_SWEEP_TOKEN"));
}

// -----------------------------------------------------------------------------
// Identity validation
// -----------------------------------------------------------------------------

#[test]
fn test_create_rejects_invalid_user_id() {
    let dir = TempDir::new().unwrap();
    sandboxer_in(&dir)
        .args(["create", "Bad_Name"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invalid user ID 'Bad_Name'"))
        .stderr(predicate::str::contains(
            "start with an alphabetic character",
        ));
}

#[test]
fn test_create_rejects_too_long_user_id() {
    let dir = TempDir::new().unwrap();
    sandboxer_in(&dir)
        .args(["create", &"a".repeat(64)])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Name must be 63 characters or less"));
}

#[test]
fn test_delete_rejects_empty_user_id() {
    let dir = TempDir::new().unwrap();
    sandboxer_in(&dir)
        .args(["delete", ""])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Name cannot be empty"));
}

#[test]
fn test_status_rejects_invalid_user_id() {
    let dir = TempDir::new().unwrap();
    sandboxer_in(&dir)
        .args(["status", "9lives"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invalid user ID '9lives'"));
}

#[test]
fn test_create_rejects_malformed_env() {
    sandboxer()
        .args(["create", "alice", "--env", "NOVALUE"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("expected KEY=VALUE"));
}

// -----------------------------------------------------------------------------
// Sweep authorization
// -----------------------------------------------------------------------------

#[test]
fn test_sweep_requires_token() {
    sandboxer()
        .args(["sweep", "--older-than", "30"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--token"));
}

#[test]
fn test_sweep_without_configured_token_is_unauthorized() {
    let dir = TempDir::new().unwrap();
    sandboxer_in(&dir)
        .args(["sweep", "--older-than", "30", "--token", "anything"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Unauthorized"));
}

#[test]
fn test_sweep_with_wrong_token_is_unauthorized() {
    let dir = TempDir::new().unwrap();
    fs::write(
        dir.path().join("sandboxer.toml"),
        "[cleanup]\nauth_token = \"s3cret\"\n",
    )
    .unwrap();

    sandboxer_in(&dir)
        .args(["sweep", "--older-than", "30"])
        .env("SANDBOXER_SWEEP_TOKEN", "wrong")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Unauthorized"));
}

// -----------------------------------------------------------------------------
// Configuration
// -----------------------------------------------------------------------------

#[test]
fn test_invalid_config_file_fails() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("sandboxer.toml"), "[cluster\nnamespace = 1").unwrap();

    sandboxer_in(&dir)
        .args(["list"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to load sandboxer.toml"));
}

#[test]
fn test_missing_explicit_config_fails() {
    let dir = TempDir::new().unwrap();
    sandboxer_in(&dir)
        .args(["--config", "nope.toml", "list"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to read config file"));
}

#[test]
fn test_unknown_log_format_rejected() {
    sandboxer()
        .args(["--log-format", "xml", "list"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid value 'xml'"));
}
