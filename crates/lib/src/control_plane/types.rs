//! Types exchanged with the control plane.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Mutation proposed by a change set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeAction {
  Add,
  Modify,
  Remove,
}

impl fmt::Display for ChangeAction {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      ChangeAction::Add => f.write_str("add"),
      ChangeAction::Modify => f.write_str("modify"),
      ChangeAction::Remove => f.write_str("remove"),
    }
  }
}

/// Resource type of change set entries describing a stack output.
pub const OUTPUT_RESOURCE_TYPE: &str = "output";

/// One entry of a change set.
///
/// Output changes are listed too, with resource type [`OUTPUT_RESOURCE_TYPE`]
/// and the output name as the resource id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceChange {
  pub action: ChangeAction,
  /// Logical resource id.
  pub resource_id: String,
  pub resource_type: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeSetStatus {
  CreatePending,
  Ready,
  Failed,
  Executed,
}

impl ChangeSetStatus {
  pub fn is_settled(&self) -> bool {
    !matches!(self, ChangeSetStatus::CreatePending)
  }
}

impl fmt::Display for ChangeSetStatus {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      ChangeSetStatus::CreatePending => f.write_str("create_pending"),
      ChangeSetStatus::Ready => f.write_str("ready"),
      ChangeSetStatus::Failed => f.write_str("failed"),
      ChangeSetStatus::Executed => f.write_str("executed"),
    }
  }
}

/// A named, ephemeral proposal of mutations against one stack.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeSet {
  pub id: String,
  /// Physical stack name.
  pub stack: String,
  pub status: ChangeSetStatus,
  pub status_reason: Option<String>,
  pub changes: Vec<ResourceChange>,
}

impl ChangeSet {
  pub fn is_empty(&self) -> bool {
    self.changes.is_empty()
  }

  pub fn count(&self, action: ChangeAction) -> usize {
    self.changes.iter().filter(|c| c.action == action).count()
  }
}

/// Stateful child resource kinds that must be emptied before stack deletion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResourceKind {
  ObjectStore,
  ImageRepository,
}

impl ResourceKind {
  pub const ALL: [ResourceKind; 2] = [ResourceKind::ObjectStore, ResourceKind::ImageRepository];

  /// Resource type string used in template documents.
  pub fn as_str(&self) -> &'static str {
    match self {
      ResourceKind::ObjectStore => "object-store",
      ResourceKind::ImageRepository => "image-repository",
    }
  }

  pub fn from_resource_type(resource_type: &str) -> Option<Self> {
    resource_type.parse().ok()
  }
}

impl fmt::Display for ResourceKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for ResourceKind {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "object-store" => Ok(ResourceKind::ObjectStore),
      "image-repository" => Ok(ResourceKind::ImageRepository),
      other => Err(format!("unknown resource kind: {other}")),
    }
  }
}

/// One stored object version or delete marker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectVersion {
  pub key: String,
  pub version_id: String,
  pub is_delete_marker: bool,
}

/// Identifies a single object version for deletion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectIdentifier {
  pub key: String,
  pub version_id: String,
}

impl From<&ObjectVersion> for ObjectIdentifier {
  fn from(version: &ObjectVersion) -> Self {
    Self {
      key: version.key.clone(),
      version_id: version.version_id.clone(),
    }
  }
}

/// A bounded page of object versions and delete markers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionPage {
  pub versions: Vec<ObjectVersion>,
  /// More entries exist beyond this page.
  pub is_truncated: bool,
}

/// A stored container image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageId {
  pub digest: String,
  pub tag: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteFailure {
  pub id: String,
  pub reason: String,
}

/// Result of a batch delete call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchDeleteOutcome {
  pub deleted: usize,
  pub failures: Vec<DeleteFailure>,
}
