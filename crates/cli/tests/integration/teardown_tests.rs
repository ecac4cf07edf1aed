//! Tests for the teardown command.

use predicates::prelude::*;

use super::common::TestProject;

#[test]
fn teardown_deletes_in_reverse_order() {
  let project = TestProject::new();
  project.deploy();

  let output = project
    .cmd()
    .args(["teardown", "dev", "--confirm", "destroy-dev"])
    .output()
    .unwrap();
  assert!(output.status.success());

  let stdout = String::from_utf8_lossy(&output.stdout);
  let storage = stdout.find("dev-storage deleted").unwrap();
  let network = stdout.find("dev-network deleted").unwrap();
  assert!(storage < network);
  assert!(stdout.contains("teardown dev complete: 2 stack(s)"));

  project
    .cmd()
    .args(["status", "dev"])
    .assert()
    .success()
    .stdout(predicate::str::contains("dev-network  absent"))
    .stdout(predicate::str::contains("dev-storage  absent"));
}

#[test]
fn teardown_twice_is_a_no_op() {
  let project = TestProject::new();
  project.deploy();

  project
    .cmd()
    .args(["teardown", "dev", "--confirm", "destroy-dev"])
    .assert()
    .success();

  project
    .cmd()
    .args(["teardown", "dev", "--confirm", "destroy-dev"])
    .assert()
    .success()
    .stdout(predicate::str::contains("dev-storage already absent"))
    .stdout(predicate::str::contains("dev-network already absent"));
}

#[test]
fn rejected_token_leaves_stacks_alone() {
  let project = TestProject::new();
  project.deploy();
  let before = project.state();

  project
    .cmd()
    .args(["teardown", "dev", "--confirm", "dev"])
    .assert()
    .code(2);

  assert_eq!(project.state(), before);
}

#[test]
fn teardown_of_never_deployed_environment_succeeds() {
  let project = TestProject::new();

  project
    .cmd()
    .args(["teardown", "dev", "--confirm", "destroy-dev"])
    .assert()
    .success()
    .stdout(predicate::str::contains("dev-network already absent"));
}
