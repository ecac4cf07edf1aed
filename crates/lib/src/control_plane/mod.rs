//! Control-plane boundary.
//!
//! [`ControlPlane`] is the raw capability set of the external system.
//! [`ControlPlaneClient`] wraps a backend with retry on transient failures and
//! bounded polling, and is the only type the rest of the crate talks to.
//! [`LocalControlPlane`] is a self-contained backend used by the CLI and tests.

mod client;
mod local;
mod types;

use async_trait::async_trait;
use thiserror::Error;

use crate::stack::{OperationHandle, Stack, StackInput, StackStatus};

pub use client::{ClientError, ControlPlaneClient, RetryPolicy, WaitPolicy};
pub use local::{LocalControlPlane, PlaneCall};
pub use types::{
  BatchDeleteOutcome, ChangeAction, ChangeSet, ChangeSetStatus, DeleteFailure, ImageId, OUTPUT_RESOURCE_TYPE,
  ObjectIdentifier, ObjectVersion, ResourceChange, ResourceKind, VersionPage,
};

/// Errors reported by a control-plane backend.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ControlPlaneError {
  /// Network-level failure; the call may be retried.
  #[error("transient network error: {0}")]
  Transient(String),

  #[error("stack not found: {0}")]
  StackNotFound(String),

  #[error("change set not found: {0}")]
  ChangeSetNotFound(String),

  /// Child resource (object store, image repository) does not exist.
  #[error("resource not found: {0}")]
  ResourceNotFound(String),

  /// The stack has an operation in flight.
  #[error("stack {name} is busy ({status})")]
  StackBusy { name: String, status: StackStatus },

  #[error("stack already exists: {0}")]
  AlreadyExists(String),

  /// The request was rejected as invalid.
  #[error("validation failed: {0}")]
  Validation(String),

  #[error("batch of {size} exceeds the limit of {limit}")]
  BatchTooLarge { size: usize, limit: usize },

  /// The backend could not load or persist its own state.
  #[error("backend state error: {0}")]
  State(String),
}

impl ControlPlaneError {
  pub fn is_transient(&self) -> bool {
    matches!(self, ControlPlaneError::Transient(_))
  }
}

/// Capability set of the external control plane.
///
/// Mutating calls must be idempotent by stack name: re-issuing a create or
/// delete for a stack whose identical operation is already in flight returns
/// the in-flight handle instead of failing.
#[async_trait]
pub trait ControlPlane: Send + Sync {
  /// Describe a stack; `StackNotFound` when it does not exist.
  async fn describe_stack(&self, name: &str) -> Result<Stack, ControlPlaneError>;

  async fn create_stack(&self, input: &StackInput) -> Result<OperationHandle, ControlPlaneError>;

  async fn update_stack(&self, input: &StackInput) -> Result<OperationHandle, ControlPlaneError>;

  async fn delete_stack(&self, name: &str) -> Result<OperationHandle, ControlPlaneError>;

  async fn create_change_set(&self, input: &StackInput) -> Result<ChangeSet, ControlPlaneError>;

  async fn describe_change_set(&self, id: &str) -> Result<ChangeSet, ControlPlaneError>;

  async fn execute_change_set(&self, id: &str) -> Result<OperationHandle, ControlPlaneError>;

  async fn delete_change_set(&self, id: &str) -> Result<(), ControlPlaneError>;

  /// Physical ids of a stack's child resources of one kind.
  async fn list_child_resources(&self, stack: &str, kind: ResourceKind) -> Result<Vec<String>, ControlPlaneError>;

  /// First `max` object versions and delete markers in a store.
  async fn list_object_versions(&self, store: &str, max: usize) -> Result<VersionPage, ControlPlaneError>;

  async fn delete_object_versions(
    &self,
    store: &str,
    objects: &[ObjectIdentifier],
  ) -> Result<BatchDeleteOutcome, ControlPlaneError>;

  async fn list_images(&self, repository: &str) -> Result<Vec<ImageId>, ControlPlaneError>;

  async fn batch_delete_images(
    &self,
    repository: &str,
    images: &[ImageId],
  ) -> Result<BatchDeleteOutcome, ControlPlaneError>;

  /// Backend identifier for logging.
  fn backend_name(&self) -> &'static str;
}
