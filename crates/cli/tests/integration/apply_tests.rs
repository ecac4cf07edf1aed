//! Tests for the apply, deploy, preview-update and status commands.

use predicates::prelude::*;

use super::common::{STORAGE_WITH_QUEUE, TestProject};

#[test]
fn deploy_creates_every_stack() {
  let project = TestProject::new();

  project
    .cmd()
    .args(["deploy", "dev", "--yes"])
    .assert()
    .success()
    .stdout(predicate::str::contains("dev-network created"))
    .stdout(predicate::str::contains("dev-storage created"))
    .stdout(predicate::str::contains("apply dev complete: 2 stack(s)"));

  assert!(project.state_file().exists());
}

#[test]
fn second_deploy_reports_no_updates() {
  let project = TestProject::new();
  project.deploy();

  project
    .cmd()
    .args(["deploy", "dev", "--yes"])
    .assert()
    .success()
    .stdout(predicate::str::contains("dev-network no_updates"))
    .stdout(predicate::str::contains("dev-storage no_updates"));
}

#[test]
fn status_reports_live_state() {
  let project = TestProject::new();

  project
    .cmd()
    .args(["status", "dev"])
    .assert()
    .success()
    .stdout(predicate::str::contains("dev-network  absent"));

  project.deploy();

  project
    .cmd()
    .args(["status", "dev"])
    .assert()
    .success()
    .stdout(predicate::str::contains("dev-network  create_complete"))
    .stdout(predicate::str::contains("VpcId: vpc-dev"));
}

#[test]
fn status_as_json() {
  let project = TestProject::new();
  project.deploy();

  let output = project.cmd().args(["status", "dev", "--json"]).output().unwrap();
  assert!(output.status.success());

  let value: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
  assert_eq!(value["environment"], "dev");
  assert_eq!(value["stacks"][0]["name"], "dev-network");
  assert_eq!(value["stacks"][1]["status"], "create_complete");
  assert_eq!(value["stacks"][1]["outputs"]["Bucket"], "dev-artifacts");
}

#[test]
fn apply_single_stack_uses_upstream_outputs() {
  let project = TestProject::new();
  project
    .cmd()
    .args(["apply", "network", "templates/network.yaml", "dev", "--yes"])
    .assert()
    .success();

  project
    .cmd()
    .args(["apply", "storage", "templates/storage.yaml", "dev", "--yes"])
    .assert()
    .success()
    .stdout(predicate::str::contains("dev-storage created"))
    .stdout(predicate::str::contains("Bucket: dev-artifacts"));
}

#[test]
fn preview_update_never_executes() {
  let project = TestProject::new();
  project.deploy();
  project.write_file("templates/storage-next.yaml", STORAGE_WITH_QUEUE);
  let before = project.state();

  project
    .cmd()
    .args(["preview-update", "storage", "templates/storage-next.yaml", "dev"])
    .assert()
    .success()
    .stdout(predicate::str::contains("+ Queue (messaging::queue)"))
    .stdout(predicate::str::contains("1 to add, 0 to modify, 0 to remove"));

  let after: serde_json::Value = serde_json::from_str(&project.state()).unwrap();
  let before: serde_json::Value = serde_json::from_str(&before).unwrap();
  assert_eq!(after["stacks"], before["stacks"]);

  project
    .cmd()
    .args(["status", "dev"])
    .assert()
    .success()
    .stdout(predicate::str::contains("dev-storage  create_complete"));
}

#[test]
fn preview_of_new_stack_lists_resources() {
  let project = TestProject::new();

  project
    .cmd()
    .args(["preview-update", "network", "templates/network.yaml", "dev"])
    .assert()
    .success()
    .stdout(predicate::str::contains("does not exist"))
    .stdout(predicate::str::contains("+ Vpc (network::vpc)"));

  assert!(!project.state_file().exists() || !project.state().contains("dev-network"));
}

#[test]
fn declined_update_exits_with_cancelled() {
  let project = TestProject::new();
  project.deploy();
  project.write_file("templates/storage-next.yaml", STORAGE_WITH_QUEUE);

  project
    .cmd()
    .args(["apply", "storage", "templates/storage-next.yaml", "dev"])
    .write_stdin("n\n")
    .assert()
    .code(2)
    .stdout(predicate::str::contains("+ Queue"))
    .stderr(predicate::str::contains("cancelled"));

  project
    .cmd()
    .args(["preview-update", "storage", "templates/storage-next.yaml", "dev"])
    .assert()
    .success()
    .stdout(predicate::str::contains("1 to add"));
}

#[test]
fn approved_update_is_executed() {
  let project = TestProject::new();
  project.deploy();
  project.write_file("templates/storage-next.yaml", STORAGE_WITH_QUEUE);

  project
    .cmd()
    .args(["apply", "storage", "templates/storage-next.yaml", "dev"])
    .write_stdin("y\n")
    .assert()
    .success()
    .stdout(predicate::str::contains("dev-storage updated"));

  project
    .cmd()
    .args(["status", "dev"])
    .assert()
    .success()
    .stdout(predicate::str::contains("dev-storage  update_complete"));
}

#[test]
fn apply_with_missing_parameter_names_stack_and_state() {
  let project = TestProject::new();

  project
    .cmd()
    .args(["apply", "storage", "templates/storage.yaml", "qa", "--yes"])
    .assert()
    .code(1)
    .stderr(predicate::str::contains("qa-storage failed in state absent"));
}

#[test]
fn failed_apply_names_the_live_state() {
  let project = TestProject::new();
  project.deploy();
  project.write_file("templates/broken.yaml", "resources: [not, a, map]\n");

  project
    .cmd()
    .args(["apply", "storage", "templates/broken.yaml", "dev", "--yes"])
    .assert()
    .code(1)
    .stderr(predicate::str::contains("dev-storage failed in state create_complete"));
}
