//! Stack data model.
//!
//! A [`Stack`] is a snapshot of what the control plane reports for one named
//! deployable unit. Nothing here is cached across runs: every decision made
//! by the lifecycle state machine starts from a fresh describe.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::template::Template;
use crate::util::hash::TemplateRef;

/// Ordered key/value parameters supplied to a stack.
pub type Parameters = BTreeMap<String, String>;

/// Ordered key/value outputs published by a stack.
pub type Outputs = BTreeMap<String, String>;

/// Lifecycle status of a stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StackStatus {
  Absent,
  Creating,
  CreateComplete,
  CreateFailed,
  Updating,
  UpdateComplete,
  UpdateFailed,
  NoUpdates,
  Deleting,
  DeleteComplete,
  DeleteFailed,
}

impl StackStatus {
  pub fn as_str(&self) -> &'static str {
    match self {
      StackStatus::Absent => "absent",
      StackStatus::Creating => "creating",
      StackStatus::CreateComplete => "create_complete",
      StackStatus::CreateFailed => "create_failed",
      StackStatus::Updating => "updating",
      StackStatus::UpdateComplete => "update_complete",
      StackStatus::UpdateFailed => "update_failed",
      StackStatus::NoUpdates => "no_updates",
      StackStatus::Deleting => "deleting",
      StackStatus::DeleteComplete => "delete_complete",
      StackStatus::DeleteFailed => "delete_failed",
    }
  }

  /// An operation is in flight; no new operation may be issued.
  pub fn is_in_progress(&self) -> bool {
    matches!(
      self,
      StackStatus::Creating | StackStatus::Updating | StackStatus::Deleting
    )
  }

  /// No further automatic transition happens without a new operation.
  pub fn is_terminal(&self) -> bool {
    !self.is_in_progress()
  }

  pub fn is_failed(&self) -> bool {
    matches!(
      self,
      StackStatus::CreateFailed | StackStatus::UpdateFailed | StackStatus::DeleteFailed
    )
  }

  /// The stack exists and its last operation succeeded.
  pub fn is_complete(&self) -> bool {
    matches!(
      self,
      StackStatus::CreateComplete | StackStatus::UpdateComplete | StackStatus::NoUpdates
    )
  }

  /// Outputs are only published in these states.
  pub fn publishes_outputs(&self) -> bool {
    matches!(self, StackStatus::CreateComplete | StackStatus::UpdateComplete)
  }
}

impl fmt::Display for StackStatus {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// A stack as last reported by the control plane.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stack {
  /// Physical (environment-qualified) name.
  pub name: String,
  pub template_ref: Option<TemplateRef>,
  pub parameters: Parameters,
  pub status: StackStatus,
  /// Human-readable reason attached to the last status change, e.g. a
  /// control-plane rollback notice.
  pub status_reason: Option<String>,
  pub outputs: Outputs,
}

impl Stack {
  /// A stack the control plane does not know about.
  pub fn absent(name: impl Into<String>) -> Self {
    Self::with_status(name, StackStatus::Absent)
  }

  /// A stack whose deletion was observed to finish.
  pub fn deleted(name: impl Into<String>) -> Self {
    Self::with_status(name, StackStatus::DeleteComplete)
  }

  fn with_status(name: impl Into<String>, status: StackStatus) -> Self {
    Self {
      name: name.into(),
      template_ref: None,
      parameters: Parameters::new(),
      status,
      status_reason: None,
      outputs: Outputs::new(),
    }
  }
}

/// Identity of a stack inside an environment.
///
/// The same logical name in two environments maps to two independent
/// control-plane stacks.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StackId {
  pub environment: String,
  pub name: String,
}

impl StackId {
  pub fn new(environment: impl Into<String>, name: impl Into<String>) -> Self {
    Self {
      environment: environment.into(),
      name: name.into(),
    }
  }

  /// Name used at the control-plane boundary.
  pub fn physical_name(&self) -> String {
    format!("{}-{}", self.environment, self.name)
  }
}

impl fmt::Display for StackId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}/{}", self.environment, self.name)
  }
}

/// Everything the control plane needs to create or update a stack.
#[derive(Debug, Clone, PartialEq)]
pub struct StackInput {
  /// Physical name.
  pub name: String,
  pub template: Template,
  pub parameters: Parameters,
}

impl StackInput {
  pub fn new(name: impl Into<String>, template: Template, parameters: Parameters) -> Self {
    Self {
      name: name.into(),
      template,
      parameters,
    }
  }
}

/// Kind of control-plane operation behind an [`OperationHandle`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
  Create,
  Update,
  Delete,
}

impl fmt::Display for OperationKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      OperationKind::Create => f.write_str("create"),
      OperationKind::Update => f.write_str("update"),
      OperationKind::Delete => f.write_str("delete"),
    }
  }
}

/// Reference to an issued, possibly still running, mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationHandle {
  pub id: String,
  /// Physical stack name the operation targets.
  pub stack: String,
  pub kind: OperationKind,
}
