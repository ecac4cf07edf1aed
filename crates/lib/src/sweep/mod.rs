//! Stateful-resource sweeper.
//!
//! Empties a stack's object stores (every version and delete marker) and
//! image repositories so the stack can be deleted. Child resources are purged
//! concurrently and joined before a [`SweepReceipt`] is handed out; the
//! receipt is the only way to request a stack delete.

use std::collections::{BTreeSet, HashMap};
use std::fmt;

use thiserror::Error;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::consts::{MAX_IMAGE_DELETE_BATCH, MAX_OBJECT_DELETE_BATCH};
use crate::control_plane::{ClientError, ControlPlaneClient, ObjectIdentifier, ResourceKind};

/// A child resource that could not be emptied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SweepFailure {
  pub kind: ResourceKind,
  pub resource_id: String,
  pub reason: String,
}

impl fmt::Display for SweepFailure {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{} {}: {}", self.kind, self.resource_id, self.reason)
  }
}

fn summarize(failures: &[SweepFailure]) -> String {
  failures.iter().map(ToString::to_string).collect::<Vec<_>>().join("; ")
}

#[derive(Debug, Error)]
pub enum SweepError {
  /// At least one child resource still holds data; the stack must not be
  /// deleted.
  #[error("sweep of {stack} incomplete: {}", summarize(.failures))]
  Incomplete { stack: String, failures: Vec<SweepFailure> },

  #[error(transparent)]
  Client(#[from] ClientError),
}

/// One emptied child resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PurgedResource {
  pub kind: ResourceKind,
  pub id: String,
  /// Entries removed (object versions and markers, or images).
  pub removed: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
  pub purged: Vec<PurgedResource>,
}

impl SweepReport {
  pub fn total_removed(&self) -> usize {
    self.purged.iter().map(|p| p.removed).sum()
  }
}

/// Proof that every declared child resource of a stack was emptied.
#[derive(Debug)]
pub struct SweepReceipt {
  stack: String,
  report: SweepReport,
}

impl SweepReceipt {
  pub fn stack(&self) -> &str {
    &self.stack
  }

  pub fn report(&self) -> &SweepReport {
    &self.report
  }
}

#[derive(Debug, Clone)]
pub struct Sweeper {
  client: ControlPlaneClient,
  page_size: usize,
}

impl Sweeper {
  pub fn new(client: ControlPlaneClient) -> Self {
    Self {
      client,
      page_size: MAX_OBJECT_DELETE_BATCH,
    }
  }

  /// Object versions fetched and deleted per call, capped at the control
  /// plane's batch limit.
  pub fn with_page_size(mut self, page_size: usize) -> Self {
    self.page_size = page_size.clamp(1, MAX_OBJECT_DELETE_BATCH);
    self
  }

  /// Purge every child resource of `kinds` owned by `stack`.
  ///
  /// An absent stack, store or repository counts as already swept.
  pub async fn sweep(&self, stack: &str, kinds: &[ResourceKind]) -> Result<SweepReceipt, SweepError> {
    let kinds: BTreeSet<ResourceKind> = kinds.iter().copied().collect();
    let mut targets = Vec::new();

    for kind in kinds {
      match self.client.list_child_resources(stack, kind).await {
        Ok(ids) => targets.extend(ids.into_iter().map(|id| (kind, id))),
        Err(e) if e.is_not_found() => {
          debug!(stack = %stack, "stack absent, nothing to sweep");
          return Ok(SweepReceipt {
            stack: stack.to_string(),
            report: SweepReport::default(),
          });
        }
        Err(e) => return Err(e.into()),
      }
    }

    info!(stack = %stack, resources = targets.len(), "sweeping child resources");

    let mut join_set = JoinSet::new();
    let mut spawned = HashMap::new();
    for (kind, id) in targets {
      let client = self.client.clone();
      let page_size = self.page_size;
      let resource_id = id.clone();
      let handle = join_set.spawn(async move {
        match kind {
          ResourceKind::ObjectStore => purge_object_store(&client, &resource_id, page_size).await,
          ResourceKind::ImageRepository => purge_image_repository(&client, &resource_id).await,
        }
      });
      spawned.insert(handle.id(), (kind, id));
    }

    let mut report = SweepReport::default();
    let mut failures = Vec::new();

    while let Some(joined) = join_set.join_next_with_id().await {
      let (task_id, result) = match joined {
        Ok((task_id, result)) => (task_id, result),
        Err(e) => {
          error!(error = %e, "sweep task panicked");
          (e.id(), Err(format!("purge task failed: {e}")))
        }
      };
      let Some((kind, id)) = spawned.remove(&task_id) else {
        continue;
      };
      match result {
        Ok(removed) => {
          debug!(resource = %id, kind = %kind, removed, "purged");
          report.purged.push(PurgedResource { kind, id, removed });
        }
        Err(reason) => {
          warn!(resource = %id, kind = %kind, reason = %reason, "purge failed");
          failures.push(SweepFailure {
            kind,
            resource_id: id,
            reason,
          });
        }
      }
    }

    if !failures.is_empty() {
      failures.sort_by(|a, b| a.resource_id.cmp(&b.resource_id));
      return Err(SweepError::Incomplete {
        stack: stack.to_string(),
        failures,
      });
    }

    report.purged.sort_by(|a, b| a.id.cmp(&b.id));
    info!(stack = %stack, removed = report.total_removed(), "sweep complete");
    Ok(SweepReceipt {
      stack: stack.to_string(),
      report,
    })
  }
}

/// Delete pages of versions and delete markers until the store lists empty.
async fn purge_object_store(client: &ControlPlaneClient, store: &str, page_size: usize) -> Result<usize, String> {
  let mut removed = 0;
  let mut pages = 0;

  loop {
    let page = match client.list_object_versions(store, page_size).await {
      Ok(page) => page,
      Err(e) if e.is_not_found() => return Ok(removed),
      Err(e) => return Err(e.to_string()),
    };
    if page.versions.is_empty() {
      return Ok(removed);
    }

    let batch: Vec<ObjectIdentifier> = page.versions.iter().map(ObjectIdentifier::from).collect();
    let outcome = match client.delete_object_versions(store, &batch).await {
      Ok(outcome) => outcome,
      Err(e) if e.is_not_found() => return Ok(removed),
      Err(e) => return Err(e.to_string()),
    };

    if let Some(failure) = outcome.failures.first() {
      return Err(format!(
        "{} of {} entries not deleted (first: {}: {})",
        outcome.failures.len(),
        batch.len(),
        failure.id,
        failure.reason
      ));
    }
    if outcome.deleted == 0 {
      return Err(format!("no progress deleting {} listed entries", batch.len()));
    }

    removed += outcome.deleted;
    pages += 1;
    debug!(store = %store, page = pages, removed, truncated = page.is_truncated, "purged page");
  }
}

/// Delete images in batches until the repository lists empty.
async fn purge_image_repository(client: &ControlPlaneClient, repository: &str) -> Result<usize, String> {
  let mut removed = 0;

  loop {
    let images = match client.list_images(repository).await {
      Ok(images) => images,
      Err(e) if e.is_not_found() => return Ok(removed),
      Err(e) => return Err(e.to_string()),
    };
    if images.is_empty() {
      return Ok(removed);
    }

    let mut progressed = 0;
    for chunk in images.chunks(MAX_IMAGE_DELETE_BATCH) {
      let outcome = match client.batch_delete_images(repository, chunk).await {
        Ok(outcome) => outcome,
        Err(e) if e.is_not_found() => return Ok(removed + progressed),
        Err(e) => return Err(e.to_string()),
      };
      if let Some(failure) = outcome.failures.first() {
        return Err(format!("image {} not deleted: {}", failure.id, failure.reason));
      }
      progressed += outcome.deleted;
    }

    if progressed == 0 {
      return Err(format!("no progress deleting {} listed images", images.len()));
    }
    removed += progressed;
  }
}
