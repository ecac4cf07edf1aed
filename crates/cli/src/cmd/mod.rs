mod apply;
mod deploy;
mod preview;
mod status;
mod teardown;

pub use apply::cmd_apply;
pub use deploy::cmd_deploy;
pub use preview::cmd_preview_update;
pub use status::cmd_status;
pub use teardown::cmd_teardown;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::debug;

use stackup_lib::config::ProjectConfig;
use stackup_lib::control_plane::{ControlPlaneClient, LocalControlPlane};
use stackup_lib::orchestrate::{Orchestrator, RunReport};

/// How a command finished, mapped to the process exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandStatus {
  Done,
  /// The operator declined; nothing was executed.
  Cancelled,
  /// The command ran but a stack ended in a failed state.
  Failed,
}

impl From<&RunReport> for CommandStatus {
  fn from(report: &RunReport) -> Self {
    if report.failure.is_some() {
      CommandStatus::Failed
    } else if report.cancelled.is_some() {
      CommandStatus::Cancelled
    } else {
      CommandStatus::Done
    }
  }
}

/// Settings shared by every command.
pub struct Session {
  pub config: ProjectConfig,
  pub timeout: Duration,
}

impl Session {
  pub fn load(config_path: &Path, timeout: Option<Duration>) -> Result<Self> {
    let config = ProjectConfig::load_or_default(config_path)
      .with_context(|| format!("Failed to load config {}", config_path.display()))?;
    let timeout = timeout.unwrap_or_else(|| config.wait.timeout());
    Ok(Self { config, timeout })
  }

  /// Orchestrator talking to the local control plane of `region`.
  pub fn orchestrator(&self, region: &str) -> Result<Orchestrator> {
    let state_file = self.config.state_file(region);
    let plane = LocalControlPlane::open(&state_file)
      .with_context(|| format!("Failed to open control plane state {}", state_file.display()))?
      .with_settle_polls(self.config.control_plane.settle_polls);
    debug!(region, state = %state_file.display(), "control plane ready");

    let client = ControlPlaneClient::new(Arc::new(plane))
      .with_retry(self.config.retry.policy())
      .with_wait(self.config.wait.policy());
    Ok(Orchestrator::new(client, self.timeout))
  }
}

pub fn runtime() -> Result<tokio::runtime::Runtime> {
  tokio::runtime::Runtime::new().context("Failed to create async runtime")
}
