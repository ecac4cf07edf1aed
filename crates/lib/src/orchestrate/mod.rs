//! Dependency-ordered orchestration.
//!
//! Walks an environment's declared stack chain forward for apply and in
//! exact reverse for teardown, one stack at a time. Outputs of earlier stacks
//! fill parameters later stacks declare but were not given. The first failure
//! or cancellation halts the run; nothing is rolled back across stacks.

use std::fmt;
use std::path::Path;
use std::time::{Duration, Instant};

use tracing::{error, info, warn};

use crate::changeset::{ChangePreview, Confirm};
use crate::config::{Environment, StackDecl};
use crate::control_plane::ControlPlaneClient;
use crate::lifecycle::{ApplyOutcome, DeleteOutcome, LifecycleError, PreviewResult, StackLifecycle};
use crate::stack::{Outputs, Stack, StackId, StackInput, StackStatus};
use crate::sweep::{SweepError, SweepReport, Sweeper};
use crate::template::{Template, TemplateError, fill_from_upstream, resolve_parameters};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
  Apply,
  Teardown,
}

impl fmt::Display for Direction {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Direction::Apply => f.write_str("apply"),
      Direction::Teardown => f.write_str("teardown"),
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StackOutcome {
  Created,
  Updated,
  NoUpdates,
  Deleted,
  AlreadyAbsent,
}

impl fmt::Display for StackOutcome {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let s = match self {
      StackOutcome::Created => "created",
      StackOutcome::Updated => "updated",
      StackOutcome::NoUpdates => "no_updates",
      StackOutcome::Deleted => "deleted",
      StackOutcome::AlreadyAbsent => "already absent",
    };
    f.write_str(s)
  }
}

/// A stack the run finished with.
#[derive(Debug, Clone, PartialEq)]
pub struct StackReport {
  /// Physical name.
  pub stack: String,
  pub outcome: StackOutcome,
  pub outputs: Outputs,
  /// Set on teardown.
  pub swept: Option<SweepReport>,
}

/// The stack that halted a run.
#[derive(Debug, Clone, PartialEq)]
pub struct StackFailure {
  pub stack: String,
  /// Last known lifecycle state, if it could be determined.
  pub status: Option<StackStatus>,
  pub error: String,
}

impl fmt::Display for StackFailure {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self.status {
      Some(status) => write!(f, "{} failed in state {}: {}", self.stack, status, self.error),
      None => write!(f, "{} failed: {}", self.stack, self.error),
    }
  }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
  pub direction: Direction,
  pub environment: String,
  /// In processing order.
  pub completed: Vec<StackReport>,
  pub failure: Option<StackFailure>,
  /// Stack declined at the confirmation gate.
  pub cancelled: Option<String>,
  pub elapsed: Duration,
}

impl RunReport {
  fn new(direction: Direction, environment: &str) -> Self {
    Self {
      direction,
      environment: environment.to_string(),
      completed: Vec::new(),
      failure: None,
      cancelled: None,
      elapsed: Duration::ZERO,
    }
  }

  pub fn is_success(&self) -> bool {
    self.failure.is_none() && self.cancelled.is_none()
  }

  pub fn outcome_of(&self, stack: &str) -> Option<StackOutcome> {
    self.completed.iter().find(|r| r.stack == stack).map(|r| r.outcome)
  }
}

/// Load a stack's template and parameters, filling declared-but-unset
/// parameters from `upstream`.
pub fn stack_input(
  id: &StackId,
  template_path: &Path,
  parameters_dir: &Path,
  upstream: &Outputs,
) -> Result<StackInput, TemplateError> {
  let template = Template::load(template_path)?;
  let mut parameters = resolve_parameters(parameters_dir, &id.environment, &id.name)?;
  let declared = template.document()?.parameters;
  let filled = fill_from_upstream(&mut parameters, &declared, upstream);
  if !filled.is_empty() {
    info!(stack = %id, filled = ?filled, "parameters filled from upstream outputs");
  }
  Ok(StackInput::new(id.physical_name(), template, parameters))
}

pub struct Orchestrator {
  client: ControlPlaneClient,
  lifecycle: StackLifecycle,
  sweeper: Sweeper,
  timeout: Duration,
}

impl Orchestrator {
  pub fn new(client: ControlPlaneClient, timeout: Duration) -> Self {
    Self {
      lifecycle: StackLifecycle::new(client.clone(), timeout),
      sweeper: Sweeper::new(client.clone()),
      client,
      timeout,
    }
  }

  pub fn with_sweeper(mut self, sweeper: Sweeper) -> Self {
    self.sweeper = sweeper;
    self
  }

  /// Apply every declared stack, in order.
  pub async fn apply_environment(&self, env: &Environment, confirm: &dyn Confirm) -> RunReport {
    let started = Instant::now();
    let mut report = RunReport::new(Direction::Apply, &env.name);
    let mut upstream = Outputs::new();
    info!(environment = %env.name, stacks = env.stacks.len(), "apply started");

    for decl in &env.stacks {
      let id = StackId::new(&env.name, &decl.name);
      let physical = id.physical_name();

      let result = match stack_input(&id, &decl.template, &env.parameters_dir, &upstream) {
        Ok(input) => self.apply_input(&input, confirm).await,
        Err(e) => Err(e.into()),
      };

      let (stack_outcome, stack) = match result {
        Ok(ApplyOutcome::Created(s)) => (StackOutcome::Created, s),
        Ok(ApplyOutcome::Updated(s)) => (StackOutcome::Updated, s),
        Ok(ApplyOutcome::NoUpdates(s)) => (StackOutcome::NoUpdates, s),
        Ok(ApplyOutcome::Cancelled) => {
          warn!(stack = %physical, "cancelled at confirmation");
          report.cancelled = Some(physical);
          break;
        }
        Err(e) => {
          report.failure = Some(self.failure(&physical, &e).await);
          break;
        }
      };

      upstream.extend(stack.outputs.clone());
      report.completed.push(StackReport {
        stack: physical,
        outcome: stack_outcome,
        outputs: stack.outputs,
        swept: None,
      });
    }

    report.elapsed = started.elapsed();
    self.log_finish(&report);
    report
  }

  /// Apply one stack. When the environment declares it, outputs of the
  /// stacks before it are read and offered as parameters.
  pub async fn apply_stack(
    &self,
    env: &Environment,
    stack: &str,
    template: &Path,
    confirm: &dyn Confirm,
  ) -> Result<ApplyOutcome, LifecycleError> {
    let id = StackId::new(&env.name, stack);
    let upstream = self.upstream_outputs(env, stack).await?;
    let input = stack_input(&id, template, &env.parameters_dir, &upstream)?;
    self.apply_input(&input, confirm).await
  }

  /// Preview one stack without mutating anything.
  pub async fn preview_stack(
    &self,
    env: &Environment,
    stack: &str,
    template: &Path,
  ) -> Result<PreviewResult, LifecycleError> {
    let id = StackId::new(&env.name, stack);
    let upstream = self.upstream_outputs(env, stack).await?;
    let input = stack_input(&id, template, &env.parameters_dir, &upstream)?;
    let no_confirm = crate::changeset::AutoApprove;
    let preview = ChangePreview::new(&self.client, &no_confirm, self.timeout);
    self.lifecycle.preview(&input, &preview).await
  }

  /// Sweep and delete every declared stack, in reverse order.
  pub async fn teardown_environment(&self, env: &Environment) -> RunReport {
    let started = Instant::now();
    let mut report = RunReport::new(Direction::Teardown, &env.name);
    info!(environment = %env.name, stacks = env.stacks.len(), "teardown started");

    for decl in env.stacks.iter().rev() {
      let physical = StackId::new(&env.name, &decl.name).physical_name();

      match self.teardown_stack(&physical, decl).await {
        Ok(stack_report) => report.completed.push(stack_report),
        Err(e) => {
          report.failure = Some(self.failure(&physical, &e).await);
          break;
        }
      }
    }

    report.elapsed = started.elapsed();
    self.log_finish(&report);
    report
  }

  /// Live state of every declared stack, without waiting on in-flight
  /// operations.
  pub async fn status(&self, env: &Environment) -> Result<Vec<Stack>, LifecycleError> {
    let mut stacks = Vec::with_capacity(env.stacks.len());
    for decl in &env.stacks {
      let physical = StackId::new(&env.name, &decl.name).physical_name();
      match self.client.describe_stack(&physical).await {
        Ok(stack) => stacks.push(stack),
        Err(e) if e.is_not_found() => stacks.push(Stack::absent(physical)),
        Err(e) => return Err(e.into()),
      }
    }
    Ok(stacks)
  }

  async fn apply_input(&self, input: &StackInput, confirm: &dyn Confirm) -> Result<ApplyOutcome, LifecycleError> {
    let preview = ChangePreview::new(&self.client, confirm, self.timeout);
    self.lifecycle.apply(input, &preview).await
  }

  async fn teardown_stack(&self, physical: &str, decl: &StackDecl) -> Result<StackReport, TeardownError> {
    let receipt = self.sweeper.sweep(physical, &decl.sweep).await?;
    let swept = receipt.report().clone();
    let outcome = match self.lifecycle.delete(receipt).await? {
      DeleteOutcome::Deleted => StackOutcome::Deleted,
      DeleteOutcome::AlreadyAbsent => StackOutcome::AlreadyAbsent,
    };
    Ok(StackReport {
      stack: physical.to_string(),
      outcome,
      outputs: Outputs::new(),
      swept: Some(swept),
    })
  }

  /// Outputs of the declared stacks before `stack`, read live.
  async fn upstream_outputs(&self, env: &Environment, stack: &str) -> Result<Outputs, LifecycleError> {
    let mut outputs = Outputs::new();
    for decl in env.upstream_of(stack) {
      let physical = StackId::new(&env.name, &decl.name).physical_name();
      let upstream = self.lifecycle.observe(&physical).await?;
      outputs.extend(upstream.outputs);
    }
    Ok(outputs)
  }

  /// Failure of a single-stack command, with the stack's last known state.
  pub async fn stack_failure(&self, stack: &str, error: &LifecycleError) -> StackFailure {
    self.failure(stack, error).await
  }

  async fn failure(&self, stack: &str, error: &dyn StatusError) -> StackFailure {
    let status = match error.status() {
      Some(status) => Some(status),
      None => match self.client.describe_stack(stack).await {
        Ok(live) => Some(live.status),
        Err(e) if e.is_not_found() => Some(StackStatus::Absent),
        Err(_) => None,
      },
    };
    error!(stack = %stack, status = ?status, error = %error, "stack failed");
    StackFailure {
      stack: stack.to_string(),
      status,
      error: error.to_string(),
    }
  }

  fn log_finish(&self, report: &RunReport) {
    info!(
      direction = %report.direction,
      environment = %report.environment,
      completed = report.completed.len(),
      success = report.is_success(),
      elapsed_ms = report.elapsed.as_millis() as u64,
      "run finished"
    );
  }
}

/// Why a stack could not be torn down.
#[derive(Debug, thiserror::Error)]
enum TeardownError {
  #[error(transparent)]
  Sweep(#[from] SweepError),
  #[error(transparent)]
  Lifecycle(#[from] LifecycleError),
}

/// Errors that may know the lifecycle state they stopped in.
trait StatusError: fmt::Display {
  fn status(&self) -> Option<StackStatus>;
}

impl StatusError for LifecycleError {
  fn status(&self) -> Option<StackStatus> {
    LifecycleError::status(self)
  }
}

impl StatusError for TeardownError {
  fn status(&self) -> Option<StackStatus> {
    match self {
      TeardownError::Sweep(_) => None,
      TeardownError::Lifecycle(e) => e.status(),
    }
  }
}
