//! Declining at the confirmation gate leaves live state untouched.

use stackup_lib::changeset::{AutoApprove, Decision};
use stackup_lib::orchestrate::StackOutcome;

use super::common::{CLUSTER, Project, ScriptedConfirm};

#[tokio::test]
async fn declined_change_set_changes_nothing() {
  let project = Project::new();
  let env = project.env("dev");
  project.orchestrator.apply_environment(&env, &AutoApprove).await;
  project
    .plane
    .push_image("dev-cluster-images", "sha256:abc", Some("v1"))
    .unwrap();
  let before = project.plane.snapshot();
  let calls_before = project.plane.calls().len();

  project.rewrite(
    "templates/cluster.yaml",
    &CLUSTER.replace("  Images:\n    type: image-repository\n", ""),
  );
  let confirm = ScriptedConfirm::new(Decision::Decline);
  let report = project.orchestrator.apply_environment(&env, &confirm).await;

  assert!(!report.is_success());
  assert!(report.failure.is_none());
  assert_eq!(report.cancelled.as_deref(), Some("dev-cluster"));
  assert_eq!(report.outcome_of("dev-network"), Some(StackOutcome::NoUpdates));
  assert_eq!(report.outcome_of("dev-database"), None);

  assert_eq!(project.plane.snapshot(), before);
  assert!(project.plane.change_set_ids().is_empty());
  let new_calls: Vec<_> = project.calls().into_iter().skip(calls_before).collect();
  assert!(
    new_calls
      .iter()
      .all(|(op, _)| *op == "create_change_set" || *op == "delete_change_set"),
    "unexpected mutation: {new_calls:?}"
  );
}

#[tokio::test]
async fn cancellation_is_not_sticky() {
  let project = Project::new();
  let env = project.env("dev");
  project.orchestrator.apply_environment(&env, &AutoApprove).await;
  project.rewrite(
    "templates/cluster.yaml",
    &CLUSTER.replace("compute::cluster", "compute::cluster-v2"),
  );

  let declined = ScriptedConfirm::new(Decision::Decline);
  project.orchestrator.apply_environment(&env, &declined).await;
  let report = project.orchestrator.apply_environment(&env, &AutoApprove).await;

  assert!(report.is_success());
  assert_eq!(report.outcome_of("dev-cluster"), Some(StackOutcome::Updated));
}
