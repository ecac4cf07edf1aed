//! CLI smoke tests for stackup.
//!
//! These tests verify that the commands parse, run without panicking and
//! return the documented exit codes.

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use tempfile::TempDir;

fn stackup_cmd() -> Command {
  cargo_bin_cmd!("stackup")
}

/// A project whose control plane state stays inside the temp directory.
fn temp_project(config: &str) -> TempDir {
  let temp = TempDir::new().unwrap();
  std::fs::write(temp.path().join("stackup.toml"), config).unwrap();
  temp
}

const MINIMAL_CONFIG: &str = r#"
[control_plane]
state_dir = "state"
settle_polls = 0

[environments.dev]
stacks = [{ name = "network", template = "network.yaml" }]
"#;

// =============================================================================
// Help & Version
// =============================================================================

#[test]
fn help_flag_works() {
  stackup_cmd()
    .arg("--help")
    .assert()
    .success()
    .stdout(predicate::str::contains("Usage"))
    .stdout(predicate::str::contains("preview-update"))
    .stdout(predicate::str::contains("teardown"));
}

#[test]
fn version_flag_works() {
  stackup_cmd()
    .arg("--version")
    .assert()
    .success()
    .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn missing_subcommand_fails() {
  stackup_cmd().assert().failure();
}

#[test]
fn apply_requires_all_arguments() {
  stackup_cmd()
    .args(["apply", "network"])
    .assert()
    .failure()
    .stderr(predicate::str::contains("Usage"));
}

// =============================================================================
// Config errors
// =============================================================================

#[test]
fn unknown_environment_fails() {
  let temp = temp_project(MINIMAL_CONFIG);
  stackup_cmd()
    .current_dir(temp.path())
    .args(["status", "staging"])
    .assert()
    .code(1)
    .stderr(predicate::str::contains("staging"));
}

#[test]
fn malformed_config_fails() {
  let temp = temp_project("environments = 3");
  stackup_cmd()
    .current_dir(temp.path())
    .args(["status", "dev"])
    .assert()
    .code(1)
    .stderr(predicate::str::contains("stackup.toml"));
}

#[test]
fn config_path_from_env() {
  let temp = temp_project(MINIMAL_CONFIG);
  let other = TempDir::new().unwrap();
  stackup_cmd()
    .current_dir(other.path())
    .env("STACKUP_CONFIG", temp.path().join("stackup.toml"))
    .args(["status", "dev"])
    .assert()
    .success()
    .stdout(predicate::str::contains("Environment dev"));
}

#[test]
fn invalid_timeout_is_rejected() {
  stackup_cmd()
    .args(["--timeout", "soon", "status", "dev"])
    .assert()
    .failure()
    .stderr(predicate::str::contains("timeout"));
}

// =============================================================================
// Teardown confirmation
// =============================================================================

#[test]
fn teardown_with_wrong_token_is_cancelled() {
  let temp = temp_project(MINIMAL_CONFIG);
  stackup_cmd()
    .current_dir(temp.path())
    .args(["teardown", "dev", "--confirm", "destroy-prod"])
    .assert()
    .code(2)
    .stderr(predicate::str::contains("destroy-dev"));
}

#[test]
fn teardown_without_token_reads_stdin() {
  let temp = temp_project(MINIMAL_CONFIG);
  stackup_cmd()
    .current_dir(temp.path())
    .args(["teardown", "dev"])
    .write_stdin("yes\n")
    .assert()
    .code(2);
}

#[test]
fn teardown_of_never_deployed_environment_succeeds() {
  let temp = temp_project(MINIMAL_CONFIG);
  stackup_cmd()
    .current_dir(temp.path())
    .args(["teardown", "dev"])
    .write_stdin("destroy-dev\n")
    .assert()
    .success()
    .stdout(predicate::str::contains("dev-network already absent"))
    .stdout(predicate::str::contains("complete: 1 stack(s)"));
}
