//! Change preview and confirmation.
//!
//! Every update goes through a change set: it is computed against the live
//! stack, rendered, and executed only after an explicit affirmative
//! [`Decision`]. Whatever happens, the change set is deleted before the
//! engine returns.

use std::fmt::Write as _;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::consts::NO_CHANGES_REASON;
use crate::control_plane::{ChangeAction, ChangeSet, ChangeSetStatus, ClientError, ControlPlaneClient};
use crate::stack::{OperationHandle, StackInput};

/// Reason the control plane reports for a blind update without changes.
const NO_UPDATES_REASON: &str = "No updates are to be performed.";

#[derive(Debug, Error)]
pub enum ChangeSetError {
  /// The control plane rejected the change set for a reason other than
  /// "nothing to change".
  #[error("change set for {stack} could not be created: {reason}")]
  CreateFailed { stack: String, reason: String },

  #[error(transparent)]
  Client(#[from] ClientError),
}

/// Operator answer at the confirmation gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
  Approve,
  Decline,
}

impl Decision {
  /// Parse a free-form answer. Only `y`/`yes` approve; anything else,
  /// including empty or unreadable input, declines.
  pub fn parse(input: &str) -> Self {
    match input.trim().to_ascii_lowercase().as_str() {
      "y" | "yes" => Decision::Approve,
      _ => Decision::Decline,
    }
  }
}

/// What the operator is asked to approve.
#[derive(Debug, Clone, Copy)]
pub struct ConfirmRequest<'a> {
  pub stack: &'a str,
  pub change_set: &'a ChangeSet,
}

/// Operator confirmation channel.
#[async_trait]
pub trait Confirm: Send + Sync {
  async fn confirm(&self, request: &ConfirmRequest<'_>) -> Decision;
}

/// Approves every change set. Used for `--yes`.
#[derive(Debug, Clone, Copy, Default)]
pub struct AutoApprove;

#[async_trait]
impl Confirm for AutoApprove {
  async fn confirm(&self, request: &ConfirmRequest<'_>) -> Decision {
    debug!(stack = %request.stack, change_set = %request.change_set.id, "auto-approved");
    Decision::Approve
  }
}

/// Result of computing a change set.
#[derive(Debug, Clone, PartialEq)]
pub enum Proposal {
  /// The stack is already at the desired state.
  NoChanges,
  Ready(ChangeSet),
}

/// Result of the full review cycle.
#[derive(Debug, Clone, PartialEq)]
pub enum PreviewOutcome {
  NoChanges,
  /// The operator declined; nothing was executed.
  Cancelled,
  Executed {
    handle: OperationHandle,
    change_set: ChangeSet,
  },
}

fn symbol(action: ChangeAction) -> char {
  match action {
    ChangeAction::Add => '+',
    ChangeAction::Modify => '~',
    ChangeAction::Remove => '-',
  }
}

/// Render a change set for operator review.
pub fn render(change_set: &ChangeSet) -> String {
  let mut out = String::new();
  let _ = writeln!(out, "Change set {} for {}:", change_set.id, change_set.stack);
  for change in &change_set.changes {
    let _ = writeln!(
      out,
      "  {} {} ({})",
      symbol(change.action),
      change.resource_id,
      change.resource_type
    );
  }
  let _ = write!(
    out,
    "{} change(s): {} to add, {} to modify, {} to remove",
    change_set.changes.len(),
    change_set.count(ChangeAction::Add),
    change_set.count(ChangeAction::Modify),
    change_set.count(ChangeAction::Remove),
  );
  out
}

fn means_no_changes(reason: Option<&str>) -> bool {
  reason.is_some_and(|r| r.contains(NO_CHANGES_REASON) || r.contains(NO_UPDATES_REASON))
}

/// Change preview engine for one run.
pub struct ChangePreview<'a> {
  client: &'a ControlPlaneClient,
  confirm: &'a dyn Confirm,
  timeout: Duration,
}

impl<'a> ChangePreview<'a> {
  pub fn new(client: &'a ControlPlaneClient, confirm: &'a dyn Confirm, timeout: Duration) -> Self {
    Self {
      client,
      confirm,
      timeout,
    }
  }

  /// Compute a change set and wait until it is ready.
  ///
  /// An empty change set (or one rejected for having no changes) is deleted
  /// and reported as [`Proposal::NoChanges`]. A ready change set is left in
  /// place for the caller, who must execute or [`discard`](Self::discard) it.
  pub async fn propose(&self, input: &StackInput) -> Result<Proposal, ChangeSetError> {
    let created = self.client.create_change_set(input).await?;
    debug!(stack = %input.name, change_set = %created.id, "change set requested");

    let settled = match self.client.wait_for_change_set(&created.id, self.timeout).await {
      Ok(change_set) => change_set,
      Err(e) => {
        self.discard_quietly(&created.id).await;
        return Err(e.into());
      }
    };

    match settled.status {
      ChangeSetStatus::Ready if !settled.is_empty() => {
        info!(
          stack = %input.name,
          change_set = %settled.id,
          changes = settled.changes.len(),
          "change set ready"
        );
        Ok(Proposal::Ready(settled))
      }
      ChangeSetStatus::Ready => {
        self.discard(&settled.id).await?;
        Ok(Proposal::NoChanges)
      }
      ChangeSetStatus::Failed if means_no_changes(settled.status_reason.as_deref()) => {
        info!(stack = %input.name, "no changes to apply");
        self.discard(&settled.id).await?;
        Ok(Proposal::NoChanges)
      }
      status => {
        self.discard_quietly(&settled.id).await;
        Err(ChangeSetError::CreateFailed {
          stack: input.name.clone(),
          reason: settled
            .status_reason
            .unwrap_or_else(|| format!("change set ended in status {status}")),
        })
      }
    }
  }

  /// Compute a change set, then delete it without executing.
  pub async fn preview(&self, input: &StackInput) -> Result<Proposal, ChangeSetError> {
    let proposal = self.propose(input).await?;
    if let Proposal::Ready(change_set) = &proposal {
      self.discard(&change_set.id).await?;
    }
    Ok(proposal)
  }

  /// Compute, render through the confirmation channel, and execute only on
  /// approval.
  pub async fn review_and_execute(&self, input: &StackInput) -> Result<PreviewOutcome, ChangeSetError> {
    let change_set = match self.propose(input).await? {
      Proposal::NoChanges => return Ok(PreviewOutcome::NoChanges),
      Proposal::Ready(change_set) => change_set,
    };

    let request = ConfirmRequest {
      stack: &input.name,
      change_set: &change_set,
    };
    if self.confirm.confirm(&request).await != Decision::Approve {
      info!(stack = %input.name, change_set = %change_set.id, "change set declined");
      self.discard(&change_set.id).await?;
      return Ok(PreviewOutcome::Cancelled);
    }

    let handle = match self.client.execute_change_set(&change_set.id).await {
      Ok(handle) => handle,
      Err(e) => {
        self.discard_quietly(&change_set.id).await;
        return Err(e.into());
      }
    };
    self.discard_quietly(&change_set.id).await;

    Ok(PreviewOutcome::Executed { handle, change_set })
  }

  /// Delete a change set. A change set that no longer exists is fine.
  pub async fn discard(&self, id: &str) -> Result<(), ChangeSetError> {
    match self.client.delete_change_set(id).await {
      Ok(()) => {
        debug!(change_set = %id, "change set deleted");
        Ok(())
      }
      Err(e) if e.is_not_found() => Ok(()),
      Err(e) => Err(e.into()),
    }
  }

  async fn discard_quietly(&self, id: &str) {
    if let Err(e) = self.discard(id).await {
      warn!(change_set = %id, error = %e, "failed to delete change set");
    }
  }
}
