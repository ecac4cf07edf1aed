//! The dev chain: network -> cluster -> database.

use stackup_lib::changeset::{AutoApprove, Decision};
use stackup_lib::orchestrate::{Direction, StackOutcome};
use stackup_lib::stack::StackStatus;

use super::common::{CLUSTER, Project, ScriptedConfirm};

#[tokio::test]
async fn first_apply_creates_the_chain_in_order() {
  let project = Project::new();
  let env = project.env("dev");

  let report = project.orchestrator.apply_environment(&env, &AutoApprove).await;

  assert!(report.is_success(), "{:?}", report.failure);
  assert_eq!(report.direction, Direction::Apply);
  let order: Vec<_> = report.completed.iter().map(|r| (r.stack.as_str(), r.outcome)).collect();
  assert_eq!(
    order,
    vec![
      ("dev-network", StackOutcome::Created),
      ("dev-cluster", StackOutcome::Created),
      ("dev-database", StackOutcome::Created),
    ]
  );
  assert_eq!(
    project.targets_of("create_stack"),
    vec!["dev-network", "dev-cluster", "dev-database"]
  );
  assert!(project.targets_of("update_stack").is_empty());
  assert!(project.targets_of("create_change_set").is_empty());

  let stacks = project.orchestrator.status(&env).await.unwrap();
  let cluster = &stacks[1];
  assert_eq!(cluster.status, StackStatus::CreateComplete);
  assert_eq!(cluster.parameters["VpcId"], "vpc-dev");
  assert_eq!(cluster.parameters["SubnetIds"], "subnet-dev-a,subnet-dev-b");

  let database = &stacks[2];
  assert_eq!(database.parameters["ClusterName"], "dev-cluster");
  assert_eq!(database.parameters["InstanceClass"], "small");
  assert_eq!(database.outputs["Endpoint"], "dev-db.internal:5432");
}

#[tokio::test]
async fn second_apply_reports_no_updates() {
  let project = Project::new();
  let env = project.env("dev");
  project.orchestrator.apply_environment(&env, &AutoApprove).await;
  let confirm = ScriptedConfirm::new(Decision::Approve);

  let report = project.orchestrator.apply_environment(&env, &confirm).await;

  assert!(report.is_success());
  assert!(
    report
      .completed
      .iter()
      .all(|r| r.outcome == StackOutcome::NoUpdates)
  );
  // One change set per existing stack, none executed, none left behind.
  assert_eq!(project.targets_of("create_change_set").len(), 3);
  assert!(project.targets_of("execute_change_set").is_empty());
  assert!(project.plane.change_set_ids().is_empty());
  assert!(confirm.prompted().is_empty());
}

#[tokio::test]
async fn template_change_updates_only_that_stack() {
  let project = Project::new();
  let env = project.env("dev");
  project.orchestrator.apply_environment(&env, &AutoApprove).await;
  project.rewrite(
    "templates/cluster.yaml",
    &CLUSTER.replace("type: compute::cluster", "type: compute::cluster-v2"),
  );
  let confirm = ScriptedConfirm::new(Decision::Approve);

  let report = project.orchestrator.apply_environment(&env, &confirm).await;

  assert_eq!(report.outcome_of("dev-network"), Some(StackOutcome::NoUpdates));
  assert_eq!(report.outcome_of("dev-cluster"), Some(StackOutcome::Updated));
  assert_eq!(report.outcome_of("dev-database"), Some(StackOutcome::NoUpdates));
  assert_eq!(confirm.prompted(), vec!["dev-cluster".to_string()]);

  // Exactly one change set was created for the cluster before it was executed.
  let calls = project.calls();
  let execute = calls.iter().position(|(op, _)| *op == "execute_change_set").unwrap();
  let cluster_change_sets: Vec<_> = calls[..execute]
    .iter()
    .filter(|(op, target)| *op == "create_change_set" && target == "dev-cluster")
    .collect();
  assert_eq!(cluster_change_sets.len(), 1);
}

#[tokio::test]
async fn teardown_runs_in_reverse_order() {
  let project = Project::new();
  let env = project.env("dev");
  project.orchestrator.apply_environment(&env, &AutoApprove).await;

  let report = project.orchestrator.teardown_environment(&env).await;

  assert!(report.is_success(), "{:?}", report.failure);
  assert_eq!(report.direction, Direction::Teardown);
  assert_eq!(
    project.targets_of("delete_stack"),
    vec!["dev-database", "dev-cluster", "dev-network"]
  );
  let stacks = project.orchestrator.status(&env).await.unwrap();
  assert!(stacks.iter().all(|s| s.status == StackStatus::Absent));

  // A second teardown has nothing left to delete.
  let again = project.orchestrator.teardown_environment(&env).await;
  assert!(again.is_success());
  assert!(
    again
      .completed
      .iter()
      .all(|r| r.outcome == StackOutcome::AlreadyAbsent)
  );
}

#[tokio::test]
async fn environments_are_independent() {
  let project = Project::new();
  project
    .orchestrator
    .apply_environment(&project.env("dev"), &AutoApprove)
    .await;

  let prod = project.env("prod");
  let report = project.orchestrator.apply_environment(&prod, &AutoApprove).await;

  assert_eq!(report.outcome_of("prod-network"), Some(StackOutcome::Created));
  let stacks = project.orchestrator.status(&prod).await.unwrap();
  assert_eq!(stacks[0].outputs["VpcId"], "vpc-prod");

  project.orchestrator.teardown_environment(&prod).await;
  let dev = project.orchestrator.status(&project.env("dev")).await.unwrap();
  assert_eq!(dev[0].status, StackStatus::CreateComplete);
}
