//! Smoke tests for the tsk CLI.
//!
//! These tests verify basic CLI functionality:
//! - `tsk --version` outputs version info
//! - `tsk --help` lists the commands
//! - errors are printed as JSON unless `-H` is given

mod common;

use assert_cmd::Command;
use common::{TestEnv, offline_url};
use predicates::prelude::*;

/// Get a Command for the tsk binary.
fn tsk() -> Command {
    Command::new(env!("CARGO_BIN_EXE_tsk"))
}

#[test]
fn test_version_flag() {
    tsk()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("tsk"))
        .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn test_help_flag() {
    tsk()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Usage:"))
        .stdout(predicate::str::contains("Commands:"))
        .stdout(predicate::str::contains("sync"))
        .stdout(predicate::str::contains("outbox"));
}

#[test]
fn test_no_args_is_usage_error() {
    tsk()
        .assert()
        .failure()
        .stderr(predicate::str::contains("Usage:"));
}

#[test]
fn test_error_is_json_by_default() {
    let env = TestEnv::new();
    env.tsk_at(&offline_url())
        .args(["show", "missing"])
        .assert()
        .failure()
        .stderr(predicate::str::starts_with("{\"error\":"));
}

#[test]
fn test_error_is_plain_with_human_flag() {
    let env = TestEnv::new();
    env.tsk_at(&offline_url())
        .args(["-H", "show", "missing"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Error: Task not found: missing"));
}

#[test]
fn test_rejects_non_http_api_url() {
    let env = TestEnv::new();
    env.tsk()
        .args(["--api", "ftp://example.com", "list"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("http://"));
}
