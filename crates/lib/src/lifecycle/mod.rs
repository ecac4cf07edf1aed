//! Stack lifecycle state machine.
//!
//! ```text
//! absent --create--> creating --> create_complete | create_failed
//! complete/failed --update--> updating --> update_complete | update_failed
//! complete/failed --no changes--> no_updates
//! complete/failed --delete--> deleting --> delete_complete --> absent
//!                                      \--> delete_failed
//! ```
//!
//! Status is always read from the control plane before a decision. A stack
//! with an operation in flight is waited on, then re-evaluated.

use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info};

use crate::changeset::{ChangePreview, ChangeSetError, PreviewOutcome, Proposal};
use crate::control_plane::{ChangeAction, ClientError, ControlPlaneClient, ResourceChange};
use crate::stack::{OperationHandle, OperationKind, Stack, StackInput, StackStatus};
use crate::sweep::SweepReceipt;
use crate::template::TemplateError;

#[derive(Debug, Error)]
pub enum LifecycleError {
  #[error(transparent)]
  Client(#[from] ClientError),

  #[error(transparent)]
  ChangeSet(#[from] ChangeSetError),

  #[error(transparent)]
  Template(#[from] TemplateError),

  /// The control plane reported a terminal failure. Any rollback was its own.
  #[error("{stack} ended in {status}: {reason}")]
  OperationFailed {
    stack: String,
    status: StackStatus,
    reason: String,
  },

  #[error("{stack} moved from {from} to {to}, which is not a legal transition")]
  IllegalTransition {
    stack: String,
    from: StackStatus,
    to: StackStatus,
  },
}

impl LifecycleError {
  /// Last lifecycle state known from the error itself.
  pub fn status(&self) -> Option<StackStatus> {
    match self {
      LifecycleError::OperationFailed { status, .. } => Some(*status),
      LifecycleError::IllegalTransition { to, .. } => Some(*to),
      _ => None,
    }
  }
}

/// Whether `from -> to` is an edge of the lifecycle graph.
pub fn can_transition(from: StackStatus, to: StackStatus) -> bool {
  use StackStatus::*;

  let settled = matches!(
    from,
    CreateComplete | UpdateComplete | NoUpdates | CreateFailed | UpdateFailed | DeleteFailed
  );

  match (from, to) {
    (Absent, Creating) => true,
    (Creating, CreateComplete | CreateFailed) => true,
    (Updating, UpdateComplete | UpdateFailed) => true,
    (Deleting, DeleteComplete | DeleteFailed) => true,
    (DeleteComplete, Absent) => true,
    (_, Updating | NoUpdates | Deleting) => settled,
    _ => false,
  }
}

/// Path taken by apply for an observed status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyPath {
  Create,
  /// Always through a change set.
  Update,
  /// An operation is in flight; wait and re-evaluate.
  Wait,
}

pub fn decide_apply(status: StackStatus) -> ApplyPath {
  match status {
    StackStatus::Absent | StackStatus::DeleteComplete => ApplyPath::Create,
    s if s.is_in_progress() => ApplyPath::Wait,
    _ => ApplyPath::Update,
  }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ApplyOutcome {
  Created(Stack),
  Updated(Stack),
  /// Already at the desired state. The stack carries status `no_updates`
  /// and its current outputs.
  NoUpdates(Stack),
  /// Declined at the confirmation gate.
  Cancelled,
}

impl ApplyOutcome {
  pub fn stack(&self) -> Option<&Stack> {
    match self {
      ApplyOutcome::Created(s) | ApplyOutcome::Updated(s) | ApplyOutcome::NoUpdates(s) => Some(s),
      ApplyOutcome::Cancelled => None,
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
  Deleted,
  AlreadyAbsent,
}

/// Result of previewing an apply without mutating anything.
#[derive(Debug, Clone, PartialEq)]
pub enum PreviewResult {
  /// The stack does not exist; applying would create these resources.
  NewStack(Vec<ResourceChange>),
  Existing(Proposal),
}

fn in_flight_kind(status: StackStatus) -> OperationKind {
  match status {
    StackStatus::Creating => OperationKind::Create,
    StackStatus::Deleting => OperationKind::Delete,
    _ => OperationKind::Update,
  }
}

fn in_flight_status(kind: OperationKind) -> StackStatus {
  match kind {
    OperationKind::Create => StackStatus::Creating,
    OperationKind::Update => StackStatus::Updating,
    OperationKind::Delete => StackStatus::Deleting,
  }
}

/// Drives one stack through its lifecycle.
#[derive(Debug, Clone)]
pub struct StackLifecycle {
  client: ControlPlaneClient,
  timeout: Duration,
}

impl StackLifecycle {
  pub fn new(client: ControlPlaneClient, timeout: Duration) -> Self {
    Self { client, timeout }
  }

  /// Current settled state of a stack.
  ///
  /// Blocks while an operation is in flight. A stack the control plane does
  /// not know, or one observed as `delete_complete`, is `absent`.
  pub async fn observe(&self, name: &str) -> Result<Stack, LifecycleError> {
    loop {
      let stack = match self.client.describe_stack(name).await {
        Ok(stack) => stack,
        Err(e) if e.is_not_found() => return Ok(Stack::absent(name)),
        Err(e) => return Err(e.into()),
      };

      match decide_apply(stack.status) {
        ApplyPath::Wait => {
          info!(stack = %name, status = %stack.status, "operation in flight, waiting");
          let handle = OperationHandle {
            id: format!("observed-{name}"),
            stack: name.to_string(),
            kind: in_flight_kind(stack.status),
          };
          self.client.wait_for_completion(&handle, self.timeout).await?;
        }
        _ if stack.status == StackStatus::DeleteComplete => return Ok(Stack::absent(name)),
        _ => return Ok(stack),
      }
    }
  }

  /// Bring a stack to the state described by `input`.
  ///
  /// Absent stacks are created directly; every other settled stack is
  /// updated through a reviewed change set.
  pub async fn apply(&self, input: &StackInput, preview: &ChangePreview<'_>) -> Result<ApplyOutcome, LifecycleError> {
    let current = self.observe(&input.name).await?;
    debug!(stack = %input.name, status = %current.status, "observed");

    match decide_apply(current.status) {
      ApplyPath::Create => {
        let handle = self.client.create_stack(input).await?;
        let stack = self.settle(&handle).await?;
        info!(stack = %input.name, "created");
        Ok(ApplyOutcome::Created(stack))
      }
      ApplyPath::Update => match preview.review_and_execute(input).await? {
        PreviewOutcome::NoChanges if current.status.is_failed() => Err(LifecycleError::OperationFailed {
          stack: input.name.clone(),
          status: current.status,
          reason: current
            .status_reason
            .unwrap_or_else(|| "no changes to move the stack out of its failed state".to_string()),
        }),
        PreviewOutcome::NoChanges => {
          info!(stack = %input.name, "no updates");
          Ok(ApplyOutcome::NoUpdates(Stack {
            status: StackStatus::NoUpdates,
            ..current
          }))
        }
        PreviewOutcome::Cancelled => Ok(ApplyOutcome::Cancelled),
        PreviewOutcome::Executed { handle, .. } => {
          let stack = self.settle(&handle).await?;
          info!(stack = %input.name, "updated");
          Ok(ApplyOutcome::Updated(stack))
        }
      },
      ApplyPath::Wait => Err(LifecycleError::IllegalTransition {
        stack: input.name.clone(),
        from: current.status,
        to: current.status,
      }),
    }
  }

  /// Show what apply would do, without mutating anything.
  pub async fn preview(&self, input: &StackInput, preview: &ChangePreview<'_>) -> Result<PreviewResult, LifecycleError> {
    let current = self.observe(&input.name).await?;
    if current.status == StackStatus::Absent {
      let document = input.template.document()?;
      let changes = document
        .resources
        .iter()
        .map(|(logical_id, decl)| ResourceChange {
          action: ChangeAction::Add,
          resource_id: logical_id.clone(),
          resource_type: decl.resource_type.clone(),
        })
        .collect();
      return Ok(PreviewResult::NewStack(changes));
    }
    Ok(PreviewResult::Existing(preview.preview(input).await?))
  }

  /// Delete a swept stack.
  ///
  /// Requires the receipt of a completed sweep of the same stack.
  pub async fn delete(&self, receipt: SweepReceipt) -> Result<DeleteOutcome, LifecycleError> {
    let name = receipt.stack();
    let current = self.observe(name).await?;
    if current.status == StackStatus::Absent {
      debug!(stack = %name, "already absent");
      return Ok(DeleteOutcome::AlreadyAbsent);
    }

    let handle = self.client.delete_stack(name).await?;
    self.settle(&handle).await?;
    info!(stack = %name, "deleted");
    Ok(DeleteOutcome::Deleted)
  }

  /// Wait for an issued operation and validate where it ended.
  async fn settle(&self, handle: &OperationHandle) -> Result<Stack, LifecycleError> {
    let stack = self.client.wait_for_completion(handle, self.timeout).await?;
    let from = in_flight_status(handle.kind);

    if !can_transition(from, stack.status) {
      return Err(LifecycleError::IllegalTransition {
        stack: handle.stack.clone(),
        from,
        to: stack.status,
      });
    }
    if stack.status.is_failed() {
      return Err(LifecycleError::OperationFailed {
        stack: handle.stack.clone(),
        status: stack.status,
        reason: stack
          .status_reason
          .unwrap_or_else(|| "no reason reported".to_string()),
      });
    }
    Ok(stack)
  }
}
