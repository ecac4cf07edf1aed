//! Teardown sweeps stateful child resources before deleting their stack.

use std::time::Duration;

use stackup_lib::changeset::AutoApprove;
use stackup_lib::control_plane::ResourceKind;
use stackup_lib::orchestrate::{Orchestrator, StackOutcome};
use stackup_lib::sweep::Sweeper;

use super::common::Project;

const BACKUPS: &str = "dev-database-backups";
const IMAGES: &str = "dev-cluster-images";

async fn seeded() -> Project {
  let project = Project::new();
  let report = project
    .orchestrator
    .apply_environment(&project.env("dev"), &AutoApprove)
    .await;
  assert!(report.is_success());

  // N = 40 objects with M = 3 versions each, and delete markers on a quarter.
  for i in 0..40 {
    let key = format!("backups/{i:03}.dump");
    for _ in 0..3 {
      project.plane.put_object(BACKUPS, &key).unwrap();
    }
    if i % 4 == 0 {
      project.plane.delete_object(BACKUPS, &key).unwrap();
    }
  }
  for i in 0..120 {
    project
      .plane
      .push_image(IMAGES, &format!("sha256:{i:064}"), Some(&format!("build-{i}")))
      .unwrap();
  }
  assert_eq!(project.plane.object_versions(BACKUPS).unwrap().len(), 130);
  project
}

#[tokio::test]
async fn teardown_purges_every_version_and_marker() {
  let project = seeded().await;
  let orchestrator = Orchestrator::new(project.client.clone(), Duration::from_secs(10))
    .with_sweeper(Sweeper::new(project.client.clone()).with_page_size(25));

  let report = orchestrator.teardown_environment(&project.env("dev")).await;

  assert!(report.is_success(), "{:?}", report.failure);
  let database = &report.completed[0];
  assert_eq!(database.stack, "dev-database");
  assert_eq!(database.outcome, StackOutcome::Deleted);
  assert_eq!(database.swept.as_ref().unwrap().total_removed(), 130);
  let cluster = &report.completed[1];
  assert_eq!(cluster.swept.as_ref().unwrap().total_removed(), 120);

  // The stores are gone together with their stacks.
  assert_eq!(project.plane.object_versions(BACKUPS), None);
  assert_eq!(project.plane.images(IMAGES), None);
}

#[tokio::test]
async fn delete_is_issued_only_after_the_sweep() {
  let project = seeded().await;

  project
    .orchestrator
    .teardown_environment(&project.env("dev"))
    .await;

  let calls = project.calls();
  let position = |operation: &str, target: &str| {
    calls
      .iter()
      .rposition(|(op, t)| *op == operation && t == target)
      .unwrap()
  };
  assert!(position("delete_object_versions", BACKUPS) < position("delete_stack", "dev-database"));
  assert!(position("batch_delete_images", IMAGES) < position("delete_stack", "dev-cluster"));
}

#[tokio::test]
async fn sweeping_empty_and_absent_resources_succeeds() {
  let project = Project::new();
  project
    .orchestrator
    .apply_environment(&project.env("dev"), &AutoApprove)
    .await;
  let sweeper = Sweeper::new(project.client.clone());

  let empty = sweeper
    .sweep("dev-database", &[ResourceKind::ObjectStore])
    .await
    .unwrap();
  assert_eq!(empty.report().total_removed(), 0);

  // The network stack owns no image repository at all.
  let absent = sweeper
    .sweep("dev-network", &[ResourceKind::ImageRepository])
    .await
    .unwrap();
  assert!(absent.report().purged.is_empty());

  let gone = sweeper.sweep("dev-nothing", &ResourceKind::ALL).await.unwrap();
  assert!(gone.report().purged.is_empty());
}

#[tokio::test]
async fn undeclared_data_blocks_only_its_stack() {
  let project = Project::new();
  let mut env = project.env("dev");
  project.orchestrator.apply_environment(&env, &AutoApprove).await;
  project.plane.put_object(BACKUPS, "late.dump").unwrap();
  // Drop the sweep declaration for the database.
  env.stacks[2].sweep.clear();

  let report = project.orchestrator.teardown_environment(&env).await;

  let failure = report.failure.unwrap();
  assert_eq!(failure.stack, "dev-database");
  assert!(failure.to_string().contains("delete_failed"));
  assert_eq!(project.targets_of("delete_stack"), vec!["dev-database"]);
}
