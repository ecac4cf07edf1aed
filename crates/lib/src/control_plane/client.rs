//! Control-plane client adapter.
//!
//! Every outbound call goes through [`ControlPlaneClient`]. Transient network
//! failures are retried with exponential backoff (mutations are idempotent by
//! stack name, so re-issuing them is safe); completion is awaited by polling
//! with a bounded exponential interval until a caller-supplied deadline.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::time::{Instant, sleep};
use tracing::{debug, info, warn};

use super::types::{BatchDeleteOutcome, ChangeSet, ImageId, ObjectIdentifier, ResourceKind, VersionPage};
use super::{ControlPlane, ControlPlaneError};
use crate::stack::{OperationHandle, OperationKind, Stack, StackInput};

/// Retry behaviour for transient failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
  /// Total attempts, including the first one.
  pub max_attempts: u32,
  pub initial_backoff: Duration,
  pub max_backoff: Duration,
}

impl Default for RetryPolicy {
  fn default() -> Self {
    Self {
      max_attempts: 5,
      initial_backoff: Duration::from_millis(100),
      max_backoff: Duration::from_secs(2),
    }
  }
}

impl RetryPolicy {
  /// Delay before retrying after the given (1-based) failed attempt.
  pub fn backoff(&self, attempt: u32) -> Duration {
    let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
    self.initial_backoff.saturating_mul(factor).min(self.max_backoff)
  }
}

/// Polling cadence while waiting for an operation to settle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WaitPolicy {
  pub initial_interval: Duration,
  pub max_interval: Duration,
}

impl Default for WaitPolicy {
  fn default() -> Self {
    Self {
      initial_interval: Duration::from_millis(250),
      max_interval: Duration::from_secs(5),
    }
  }
}

/// Errors surfaced by the client adapter.
#[derive(Debug, Error)]
pub enum ClientError {
  /// Non-transient error reported by the backend.
  #[error(transparent)]
  ControlPlane(#[from] ControlPlaneError),

  #[error("{operation} still failing after {attempts} attempts: {source}")]
  RetriesExhausted {
    operation: &'static str,
    attempts: u32,
    #[source]
    source: ControlPlaneError,
  },

  /// The awaited operation did not reach a terminal state in time.
  #[error("timed out after {timeout:?} waiting for {target} to finish {operation} (last status {last_status})")]
  OperationTimeout {
    target: String,
    operation: String,
    last_status: String,
    timeout: Duration,
  },
}

impl ClientError {
  pub fn is_not_found(&self) -> bool {
    matches!(
      self,
      ClientError::ControlPlane(
        ControlPlaneError::StackNotFound(_)
          | ControlPlaneError::ChangeSetNotFound(_)
          | ControlPlaneError::ResourceNotFound(_)
      )
    )
  }
}

/// Bounded exponential polling schedule with a hard deadline.
struct PollSchedule {
  next: Duration,
  max: Duration,
  deadline: Instant,
}

impl PollSchedule {
  fn new(policy: &WaitPolicy, timeout: Duration) -> Self {
    Self {
      next: policy.initial_interval,
      max: policy.max_interval,
      deadline: Instant::now() + timeout,
    }
  }

  /// Sleep until the next poll. Returns false once the deadline has passed.
  async fn pause(&mut self) -> bool {
    let now = Instant::now();
    if now >= self.deadline {
      return false;
    }
    sleep(self.next.min(self.deadline - now)).await;
    self.next = self.next.saturating_mul(2).min(self.max);
    true
  }
}

/// Adapter over a [`ControlPlane`] backend.
///
/// Cheap to clone; clones share the backend.
#[derive(Clone)]
pub struct ControlPlaneClient {
  backend: Arc<dyn ControlPlane>,
  retry: RetryPolicy,
  wait: WaitPolicy,
}

impl std::fmt::Debug for ControlPlaneClient {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("ControlPlaneClient")
      .field("backend", &self.backend.backend_name())
      .field("retry", &self.retry)
      .field("wait", &self.wait)
      .finish()
  }
}

impl ControlPlaneClient {
  pub fn new(backend: Arc<dyn ControlPlane>) -> Self {
    Self {
      backend,
      retry: RetryPolicy::default(),
      wait: WaitPolicy::default(),
    }
  }

  pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
    self.retry = retry;
    self
  }

  pub fn with_wait(mut self, wait: WaitPolicy) -> Self {
    self.wait = wait;
    self
  }

  pub fn backend_name(&self) -> &'static str {
    self.backend.backend_name()
  }

  /// Run a backend call, retrying transient failures.
  async fn call<T, F, Fut>(&self, operation: &'static str, mut f: F) -> Result<T, ClientError>
  where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ControlPlaneError>>,
  {
    let mut attempt = 1;
    loop {
      match f().await {
        Ok(value) => return Ok(value),
        Err(e) if e.is_transient() => {
          if attempt >= self.retry.max_attempts {
            warn!(operation, attempts = attempt, error = %e, "giving up after transient failures");
            return Err(ClientError::RetriesExhausted {
              operation,
              attempts: attempt,
              source: e,
            });
          }
          let delay = self.retry.backoff(attempt);
          warn!(
            operation,
            attempt,
            delay_ms = delay.as_millis() as u64,
            error = %e,
            "transient control plane error, retrying"
          );
          sleep(delay).await;
          attempt += 1;
        }
        Err(e) => return Err(e.into()),
      }
    }
  }

  pub async fn describe_stack(&self, name: &str) -> Result<Stack, ClientError> {
    let backend = self.backend.as_ref();
    self.call("describe_stack", move || backend.describe_stack(name)).await
  }

  pub async fn create_stack(&self, input: &StackInput) -> Result<OperationHandle, ClientError> {
    let backend = self.backend.as_ref();
    info!(stack = %input.name, template = %input.template.reference, "issuing create");
    self.call("create_stack", move || backend.create_stack(input)).await
  }

  pub async fn update_stack(&self, input: &StackInput) -> Result<OperationHandle, ClientError> {
    let backend = self.backend.as_ref();
    info!(stack = %input.name, template = %input.template.reference, "issuing update");
    self.call("update_stack", move || backend.update_stack(input)).await
  }

  pub async fn delete_stack(&self, name: &str) -> Result<OperationHandle, ClientError> {
    let backend = self.backend.as_ref();
    info!(stack = %name, "issuing delete");
    self.call("delete_stack", move || backend.delete_stack(name)).await
  }

  pub async fn create_change_set(&self, input: &StackInput) -> Result<ChangeSet, ClientError> {
    let backend = self.backend.as_ref();
    self.call("create_change_set", move || backend.create_change_set(input)).await
  }

  pub async fn describe_change_set(&self, id: &str) -> Result<ChangeSet, ClientError> {
    let backend = self.backend.as_ref();
    self.call("describe_change_set", move || backend.describe_change_set(id)).await
  }

  pub async fn execute_change_set(&self, id: &str) -> Result<OperationHandle, ClientError> {
    let backend = self.backend.as_ref();
    info!(change_set = %id, "executing change set");
    self.call("execute_change_set", move || backend.execute_change_set(id)).await
  }

  pub async fn delete_change_set(&self, id: &str) -> Result<(), ClientError> {
    let backend = self.backend.as_ref();
    self.call("delete_change_set", move || backend.delete_change_set(id)).await
  }

  pub async fn list_child_resources(&self, stack: &str, kind: ResourceKind) -> Result<Vec<String>, ClientError> {
    let backend = self.backend.as_ref();
    self
      .call("list_child_resources", move || backend.list_child_resources(stack, kind))
      .await
  }

  pub async fn list_object_versions(&self, store: &str, max: usize) -> Result<VersionPage, ClientError> {
    let backend = self.backend.as_ref();
    self
      .call("list_object_versions", move || backend.list_object_versions(store, max))
      .await
  }

  pub async fn delete_object_versions(
    &self,
    store: &str,
    objects: &[ObjectIdentifier],
  ) -> Result<BatchDeleteOutcome, ClientError> {
    let backend = self.backend.as_ref();
    self
      .call("delete_object_versions", move || backend.delete_object_versions(store, objects))
      .await
  }

  pub async fn list_images(&self, repository: &str) -> Result<Vec<ImageId>, ClientError> {
    let backend = self.backend.as_ref();
    self.call("list_images", move || backend.list_images(repository)).await
  }

  pub async fn batch_delete_images(
    &self,
    repository: &str,
    images: &[ImageId],
  ) -> Result<BatchDeleteOutcome, ClientError> {
    let backend = self.backend.as_ref();
    self
      .call("batch_delete_images", move || backend.batch_delete_images(repository, images))
      .await
  }

  /// Poll until the operation behind `handle` reaches a terminal status.
  ///
  /// A stack that disappears while a delete is awaited is reported as
  /// `delete_complete`.
  pub async fn wait_for_completion(&self, handle: &OperationHandle, timeout: Duration) -> Result<Stack, ClientError> {
    let mut schedule = PollSchedule::new(&self.wait, timeout);

    loop {
      let stack = match self.describe_stack(&handle.stack).await {
        Ok(stack) => stack,
        Err(ClientError::ControlPlane(ControlPlaneError::StackNotFound(_))) if handle.kind == OperationKind::Delete => {
          debug!(stack = %handle.stack, "stack gone, delete complete");
          return Ok(Stack::deleted(&handle.stack));
        }
        Err(e) => return Err(e),
      };

      if stack.status.is_terminal() {
        debug!(stack = %handle.stack, operation = %handle.kind, status = %stack.status, "operation settled");
        return Ok(stack);
      }

      debug!(stack = %handle.stack, status = %stack.status, "operation in progress");
      if !schedule.pause().await {
        return Err(ClientError::OperationTimeout {
          target: handle.stack.clone(),
          operation: handle.kind.to_string(),
          last_status: stack.status.to_string(),
          timeout,
        });
      }
    }
  }

  /// Poll until a change set has been computed (ready or failed).
  pub async fn wait_for_change_set(&self, id: &str, timeout: Duration) -> Result<ChangeSet, ClientError> {
    let mut schedule = PollSchedule::new(&self.wait, timeout);

    loop {
      let change_set = self.describe_change_set(id).await?;
      if change_set.status.is_settled() {
        return Ok(change_set);
      }

      debug!(change_set = %id, status = %change_set.status, "change set pending");
      if !schedule.pause().await {
        return Err(ClientError::OperationTimeout {
          target: change_set.stack.clone(),
          operation: format!("change set {id}"),
          last_status: change_set.status.to_string(),
          timeout,
        });
      }
    }
  }
}
