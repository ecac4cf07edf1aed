//! Shared test helpers for CLI integration tests.

use std::path::PathBuf;

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
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
"#;

pub const STORAGE: &str = r#"
parameters: [EnvironmentName, VpcId]
resources:
  Artifacts:
    type: object-store
    properties:
      vpc: "${VpcId}"
  Images:
    type: image-repository
outputs:
  Bucket: "${EnvironmentName}-artifacts"
"#;

/// `STORAGE` with one resource added.
pub const STORAGE_WITH_QUEUE: &str = r#"
parameters: [EnvironmentName, VpcId]
resources:
  Artifacts:
    type: object-store
    properties:
      vpc: "${VpcId}"
  Images:
    type: image-repository
  Queue:
    type: messaging::queue
outputs:
  Bucket: "${EnvironmentName}-artifacts"
"#;

const CONFIG: &str = r#"
[control_plane]
state_dir = "state"
settle_polls = 0

[wait]
timeout_secs = 30
initial_interval_ms = 1
max_interval_ms = 5

[retry]
max_attempts = 3
initial_backoff_ms = 1
max_backoff_ms = 5

[environments.dev]
stacks = [
  { name = "network", template = "templates/network.yaml" },
  { name = "storage", template = "templates/storage.yaml", sweep = ["object-store", "image-repository"] },
]
"#;

/// Isolated project directory.
///
/// Each test gets its own config, templates, parameters and control plane
/// state under a temporary directory.
pub struct TestProject {
  pub temp: TempDir,
}

impl TestProject {
  pub fn new() -> Self {
    let project = Self {
      temp: TempDir::new().unwrap(),
    };
    project.write_file("stackup.toml", CONFIG);
    project.write_file("templates/network.yaml", NETWORK);
    project.write_file("templates/storage.yaml", STORAGE);
    project.write_file(
      "parameters/dev/network.json",
      r#"{"EnvironmentName": "dev", "Cidr": "10.0.0.0/16"}"#,
    );
    project.write_file("parameters/dev/storage.json", r#"{"EnvironmentName": "dev"}"#);
    project
  }

  /// Write a file relative to the project directory.
  pub fn write_file(&self, relative_path: &str, content: &str) {
    let path = self.temp.path().join(relative_path);
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(&path, content).unwrap();
  }

  /// State file of the default region.
  pub fn state_file(&self) -> PathBuf {
    self.temp.path().join("state").join("local.json")
  }

  pub fn state(&self) -> String {
    std::fs::read_to_string(self.state_file()).unwrap_or_default()
  }

  /// `stackup` running inside the project directory.
  pub fn cmd(&self) -> Command {
    let mut cmd = cargo_bin_cmd!("stackup");
    cmd.current_dir(self.temp.path()).env_remove("STACKUP_CONFIG");
    cmd
  }

  /// Deploy `dev` without prompting and assert success.
  pub fn deploy(&self) {
    self.cmd().args(["deploy", "dev", "--yes"]).assert().success();
  }
}
