//! Shared fixtures for library integration tests.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use stackup_lib::changeset::{Confirm, ConfirmRequest, Decision};
use stackup_lib::config::{Environment, ProjectConfig};
use stackup_lib::control_plane::{ControlPlaneClient, LocalControlPlane, RetryPolicy, WaitPolicy};
use stackup_lib::orchestrate::Orchestrator;
use tempfile::TempDir;

pub const NETWORK: &str = r#"
parameters: [EnvironmentName, Cidr]
resources:
  Vpc:
    type: network::vpc
    properties:
      cidr: "${Cidr}"
outputs:
  VpcId: "vpc-${EnvironmentName}"
  SubnetIds: "subnet-${EnvironmentName}-a,subnet-${EnvironmentName}-b"
"#;

pub const CLUSTER: &str = r#"
parameters: [EnvironmentName, VpcId, SubnetIds]
resources:
  Cluster:
    type: compute::cluster
    properties:
      vpc: "${VpcId}"
      subnets: "${SubnetIds}"
  Images:
    type: image-repository
outputs:
  ClusterName: "${EnvironmentName}-cluster"
  ImageRepository: "${EnvironmentName}-cluster-images"
"#;

pub const DATABASE: &str = r#"
parameters: [EnvironmentName, VpcId, ClusterName, InstanceClass]
resources:
  Database:
    type: database::instance
    properties:
      vpc: "${VpcId}"
      class: "${InstanceClass}"
      allowed: "${ClusterName}"
  Backups:
    type: object-store
    properties:
      versioned: true
outputs:
  Endpoint: "${EnvironmentName}-db.internal:5432"
"#;

const CONFIG: &str = r#"
default_region = "local"

[environments.dev]
stacks = [
  { name = "network", template = "templates/network.yaml" },
  { name = "cluster", template = "templates/cluster.yaml", sweep = ["image-repository"] },
  { name = "database", template = "templates/database.yaml", sweep = ["object-store"] },
]

[environments.prod]
stacks = [
  { name = "network", template = "templates/network.yaml" },
]
"#;

/// A project directory with templates, parameter files and a config, plus
/// an in-memory control plane.
pub struct Project {
  pub temp: TempDir,
  pub plane: Arc<LocalControlPlane>,
  pub client: ControlPlaneClient,
  pub orchestrator: Orchestrator,
  pub config: ProjectConfig,
}

impl Project {
  pub fn new() -> Self {
    let temp = TempDir::new().unwrap();
    let project = |relative: &str, content: &str| {
      let path = temp.path().join(relative);
      std::fs::create_dir_all(path.parent().unwrap()).unwrap();
      std::fs::write(path, content).unwrap();
    };

    project("templates/network.yaml", NETWORK);
    project("templates/cluster.yaml", CLUSTER);
    project("templates/database.yaml", DATABASE);
    project(
      "parameters/dev/network.json",
      r#"{"EnvironmentName": "dev", "Cidr": "10.0.0.0/16"}"#,
    );
    project(
      "parameters/dev/database.json",
      r#"[
        {"ParameterKey": "EnvironmentName", "ParameterValue": "dev"},
        {"ParameterKey": "InstanceClass", "ParameterValue": "small"}
      ]"#,
    );
    project(
      "parameters/prod/network.json",
      r#"{"EnvironmentName": "prod", "Cidr": "10.1.0.0/16"}"#,
    );
    project("stackup.toml", CONFIG);

    let config = ProjectConfig::load(&temp.path().join("stackup.toml")).unwrap();
    let plane = Arc::new(LocalControlPlane::in_memory().with_settle_polls(2));
    let client = ControlPlaneClient::new(plane.clone())
      .with_retry(RetryPolicy {
        max_attempts: 3,
        initial_backoff: Duration::from_millis(1),
        max_backoff: Duration::from_millis(2),
      })
      .with_wait(WaitPolicy {
        initial_interval: Duration::from_millis(1),
        max_interval: Duration::from_millis(4),
      });
    let orchestrator = Orchestrator::new(client.clone(), Duration::from_secs(10));

    Self {
      temp,
      plane,
      client,
      orchestrator,
      config,
    }
  }

  pub fn env(&self, name: &str) -> Environment {
    self.config.environment(name).unwrap()
  }

  pub fn path(&self, relative: &str) -> PathBuf {
    self.temp.path().join(relative)
  }

  pub fn rewrite(&self, relative: &str, content: &str) {
    std::fs::write(self.path(relative), content).unwrap();
  }

  /// Mutating control-plane calls as `(operation, target)`.
  pub fn calls(&self) -> Vec<(&'static str, String)> {
    self
      .plane
      .calls()
      .into_iter()
      .map(|c| (c.operation, c.target))
      .collect()
  }

  /// Targets of one operation, in call order.
  pub fn targets_of(&self, operation: &str) -> Vec<String> {
    self
      .calls()
      .into_iter()
      .filter(|(op, _)| *op == operation)
      .map(|(_, target)| target)
      .collect()
  }
}

/// Answers every change set with a fixed decision and counts the prompts.
pub struct ScriptedConfirm {
  decision: Decision,
  prompts: Mutex<Vec<String>>,
}

impl ScriptedConfirm {
  pub fn new(decision: Decision) -> Self {
    Self {
      decision,
      prompts: Mutex::new(Vec::new()),
    }
  }

  /// Stacks the operator was asked about.
  pub fn prompted(&self) -> Vec<String> {
    self.prompts.lock().unwrap().clone()
  }
}

#[async_trait]
impl Confirm for ScriptedConfirm {
  async fn confirm(&self, request: &ConfirmRequest<'_>) -> Decision {
    self.prompts.lock().unwrap().push(request.stack.to_string());
    self.decision
  }
}
