//! Self-contained control plane.
//!
//! Materializes stacks from template documents and keeps the result either in
//! memory or in a JSON state file (one per region). Operations stay in flight
//! for a configurable number of describe calls so callers really poll.
//!
//! # Storage Layout
//!
//! ```text
//! {state_dir}/
//! ├── <region>.json        # PlaneState
//! └── <region>.json.tmp    # transient, atomic write
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::types::{
  BatchDeleteOutcome, ChangeAction, ChangeSet, ChangeSetStatus, ImageId, OUTPUT_RESOURCE_TYPE, ObjectIdentifier,
  ObjectVersion, ResourceChange, ResourceKind, VersionPage,
};
use super::{ControlPlane, ControlPlaneError};
use crate::consts::{MAX_IMAGE_DELETE_BATCH, MAX_OBJECT_DELETE_BATCH, NO_CHANGES_REASON};
use crate::stack::{OperationHandle, OperationKind, Outputs, Parameters, Stack, StackInput, StackStatus};
use crate::template::{Template, TemplateDocument};

const ROLLBACK_REASON: &str = "resource provisioning failed; control plane rolled back the stack";

/// A mutating call that reached the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaneCall {
  pub operation: &'static str,
  pub target: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct LiveResource {
  resource_type: String,
  properties: BTreeMap<String, serde_json::Value>,
  physical_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct PendingOperation {
  id: String,
  kind: OperationKind,
  polls_remaining: u32,
  fail: bool,
  /// Desired configuration for updates.
  target: Option<(Template, Parameters)>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct StackRecord {
  template: Template,
  parameters: Parameters,
  status: StackStatus,
  status_reason: Option<String>,
  outputs: Outputs,
  resources: BTreeMap<String, LiveResource>,
  pending: Option<PendingOperation>,
}

impl StackRecord {
  fn describe(&self, name: &str) -> Stack {
    Stack {
      name: name.to_string(),
      template_ref: Some(self.template.reference.clone()),
      parameters: self.parameters.clone(),
      status: self.status,
      status_reason: self.status_reason.clone(),
      outputs: if self.status.publishes_outputs() {
        self.outputs.clone()
      } else {
        Outputs::new()
      },
    }
  }

  fn handle(&self, name: &str) -> Option<OperationHandle> {
    self.pending.as_ref().map(|p| OperationHandle {
      id: p.id.clone(),
      stack: name.to_string(),
      kind: p.kind,
    })
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct ChangeSetRecord {
  change_set: ChangeSet,
  template: Template,
  parameters: Parameters,
  computed: Vec<ResourceChange>,
  polls_remaining: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct ObjectStoreRecord {
  owner: String,
  versioned: bool,
  versions: Vec<ObjectVersion>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct ImageRepositoryRecord {
  owner: String,
  images: Vec<ImageId>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct PlaneState {
  stacks: BTreeMap<String, StackRecord>,
  change_sets: BTreeMap<String, ChangeSetRecord>,
  object_stores: BTreeMap<String, ObjectStoreRecord>,
  image_repositories: BTreeMap<String, ImageRepositoryRecord>,
  next_id: u64,
}

struct Inner {
  state: PlaneState,
  transient_failures: u32,
  fail_next: BTreeSet<String>,
  calls: Vec<PlaneCall>,
}

/// Local control-plane backend.
pub struct LocalControlPlane {
  inner: Mutex<Inner>,
  path: Option<PathBuf>,
  settle_polls: u32,
}

fn physical_id(stack: &str, logical_id: &str) -> String {
  format!("{stack}-{logical_id}").to_lowercase()
}

/// Resolve a template document into the resources it would materialize.
fn plan_resources(
  stack: &str,
  document: &TemplateDocument,
  parameters: &Parameters,
) -> BTreeMap<String, LiveResource> {
  document
    .resources
    .iter()
    .map(|(logical_id, decl)| {
      (
        logical_id.clone(),
        LiveResource {
          resource_type: decl.resource_type.clone(),
          properties: decl.resolved_properties(parameters),
          physical_id: physical_id(stack, logical_id),
        },
      )
    })
    .collect()
}

/// Diff live resources against a proposed set. Removals come last.
fn diff_resources(
  live: &BTreeMap<String, LiveResource>,
  proposed: &BTreeMap<String, LiveResource>,
) -> Vec<ResourceChange> {
  let mut changes = Vec::new();

  for (logical_id, resource) in proposed {
    let action = match live.get(logical_id) {
      None => ChangeAction::Add,
      Some(current) if current != resource => ChangeAction::Modify,
      Some(_) => continue,
    };
    changes.push(ResourceChange {
      action,
      resource_id: logical_id.clone(),
      resource_type: resource.resource_type.clone(),
    });
  }

  for (logical_id, resource) in live {
    if !proposed.contains_key(logical_id) {
      changes.push(ResourceChange {
        action: ChangeAction::Remove,
        resource_id: logical_id.clone(),
        resource_type: resource.resource_type.clone(),
      });
    }
  }

  changes
}

/// Diff published outputs against the outputs a proposal would publish.
fn diff_outputs(live: &Outputs, proposed: &Outputs) -> Vec<ResourceChange> {
  let changed = proposed.iter().filter_map(|(name, value)| match live.get(name) {
    None => Some((ChangeAction::Add, name)),
    Some(current) if current != value => Some((ChangeAction::Modify, name)),
    Some(_) => None,
  });
  let removed = live
    .keys()
    .filter(|name| !proposed.contains_key(*name))
    .map(|name| (ChangeAction::Remove, name));

  changed
    .chain(removed)
    .map(|(action, name)| ResourceChange {
      action,
      resource_id: name.clone(),
      resource_type: OUTPUT_RESOURCE_TYPE.to_string(),
    })
    .collect()
}

fn validate_input(input: &StackInput) -> Result<TemplateDocument, ControlPlaneError> {
  let document = input
    .template
    .document()
    .map_err(|e| ControlPlaneError::Validation(e.to_string()))?;
  let missing = document.missing_parameters(&input.parameters);
  if !missing.is_empty() {
    return Err(ControlPlaneError::Validation(format!(
      "parameters must have values: {}",
      missing.join(", ")
    )));
  }
  Ok(document)
}

impl PlaneState {
  fn next_id(&mut self, prefix: &str) -> String {
    self.next_id += 1;
    format!("{prefix}-{:06}", self.next_id)
  }

  /// Describe a stack, advancing its in-flight operation by one poll.
  fn advance(&mut self, name: &str) -> Result<Stack, ControlPlaneError> {
    let pending = {
      let record = self
        .stacks
        .get_mut(name)
        .ok_or_else(|| ControlPlaneError::StackNotFound(name.to_string()))?;
      let Some(pending) = record.pending.as_mut() else {
        return Ok(record.describe(name));
      };
      if pending.polls_remaining > 0 {
        pending.polls_remaining -= 1;
        return Ok(record.describe(name));
      }
      record.pending.take()
    };

    let Some(pending) = pending else {
      return Err(ControlPlaneError::State(format!("lost pending operation for {name}")));
    };

    match pending.kind {
      OperationKind::Create => self.finish_create(name, pending.fail),
      OperationKind::Update => self.finish_update(name, pending),
      OperationKind::Delete => self.finish_delete(name, pending.fail),
    }
  }

  fn finish_create(&mut self, name: &str, fail: bool) -> Result<Stack, ControlPlaneError> {
    let record = self
      .stacks
      .get(name)
      .ok_or_else(|| ControlPlaneError::StackNotFound(name.to_string()))?;

    let outcome = if fail {
      Err(ROLLBACK_REASON.to_string())
    } else {
      record
        .template
        .document()
        .map_err(|e| e.to_string())
        .map(|doc| {
          (
            plan_resources(name, &doc, &record.parameters),
            doc.resolved_outputs(&record.parameters),
          )
        })
    };

    match outcome {
      Ok((resources, outputs)) => {
        let empty = BTreeMap::new();
        self.reconcile_children(name, &empty, &resources);
        let record = self.record_mut(name)?;
        record.resources = resources;
        record.outputs = outputs;
        record.status = StackStatus::CreateComplete;
        record.status_reason = None;
      }
      Err(reason) => {
        let record = self.record_mut(name)?;
        record.status = StackStatus::CreateFailed;
        record.status_reason = Some(reason);
      }
    }

    info!(stack = %name, status = %self.record_mut(name)?.status, "create finished");
    Ok(self.record_mut(name)?.describe(name))
  }

  fn finish_update(&mut self, name: &str, pending: PendingOperation) -> Result<Stack, ControlPlaneError> {
    let Some((template, parameters)) = pending.target else {
      return Err(ControlPlaneError::State(format!("update for {name} has no target")));
    };

    let live = self.record_mut(name)?.resources.clone();
    let planned = template
      .document()
      .map_err(|e| e.to_string())
      .map(|doc| (plan_resources(name, &doc, &parameters), doc.resolved_outputs(&parameters)));

    let outcome = match planned {
      _ if pending.fail => Err(ROLLBACK_REASON.to_string()),
      Ok((resources, outputs)) => match self.blocking_removal(&live, &resources) {
        Some(reason) => Err(reason),
        None => Ok((resources, outputs)),
      },
      Err(reason) => Err(reason),
    };

    match outcome {
      Ok((resources, outputs)) => {
        self.reconcile_children(name, &live, &resources);
        let record = self.record_mut(name)?;
        record.template = template;
        record.parameters = parameters;
        record.resources = resources;
        record.outputs = outputs;
        record.status = StackStatus::UpdateComplete;
        record.status_reason = None;
      }
      Err(reason) => {
        let record = self.record_mut(name)?;
        record.status = StackStatus::UpdateFailed;
        record.status_reason = Some(reason);
      }
    }

    info!(stack = %name, status = %self.record_mut(name)?.status, "update finished");
    Ok(self.record_mut(name)?.describe(name))
  }

  fn finish_delete(&mut self, name: &str, fail: bool) -> Result<Stack, ControlPlaneError> {
    let blocking = if fail {
      Some("resource deletion failed".to_string())
    } else {
      self.first_non_empty_child(name)
    };

    if let Some(reason) = blocking {
      let record = self.record_mut(name)?;
      record.status = StackStatus::DeleteFailed;
      record.status_reason = Some(reason);
      info!(stack = %name, "delete failed");
      return Ok(record.describe(name));
    }

    self.object_stores.retain(|_, store| store.owner != name);
    self.image_repositories.retain(|_, repo| repo.owner != name);
    self.change_sets.retain(|_, cs| cs.change_set.stack != name);
    self.stacks.remove(name);
    info!(stack = %name, "delete finished");
    Ok(Stack::deleted(name))
  }

  fn record_mut(&mut self, name: &str) -> Result<&mut StackRecord, ControlPlaneError> {
    self
      .stacks
      .get_mut(name)
      .ok_or_else(|| ControlPlaneError::StackNotFound(name.to_string()))
  }

  fn first_non_empty_child(&self, owner: &str) -> Option<String> {
    let store = self
      .object_stores
      .iter()
      .find(|(_, store)| store.owner == owner && !store.versions.is_empty())
      .map(|(id, _)| format!("object store {id} is not empty"));
    store.or_else(|| {
      self
        .image_repositories
        .iter()
        .find(|(_, repo)| repo.owner == owner && !repo.images.is_empty())
        .map(|(id, _)| format!("image repository {id} is not empty"))
    })
  }

  /// A removed child resource that still holds data blocks the update.
  fn blocking_removal(
    &self,
    live: &BTreeMap<String, LiveResource>,
    proposed: &BTreeMap<String, LiveResource>,
  ) -> Option<String> {
    live
      .iter()
      .filter(|(logical_id, _)| !proposed.contains_key(*logical_id))
      .find_map(|(_, resource)| {
        let id = &resource.physical_id;
        match ResourceKind::from_resource_type(&resource.resource_type)? {
          ResourceKind::ObjectStore => self
            .object_stores
            .get(id)
            .filter(|s| !s.versions.is_empty())
            .map(|_| format!("object store {id} is not empty")),
          ResourceKind::ImageRepository => self
            .image_repositories
            .get(id)
            .filter(|r| !r.images.is_empty())
            .map(|_| format!("image repository {id} is not empty")),
        }
      })
  }

  /// Create and drop child resource records to match `proposed`.
  fn reconcile_children(
    &mut self,
    owner: &str,
    live: &BTreeMap<String, LiveResource>,
    proposed: &BTreeMap<String, LiveResource>,
  ) {
    for (logical_id, resource) in live {
      if proposed.contains_key(logical_id) {
        continue;
      }
      self.object_stores.remove(&resource.physical_id);
      self.image_repositories.remove(&resource.physical_id);
    }

    for resource in proposed.values() {
      match ResourceKind::from_resource_type(&resource.resource_type) {
        Some(ResourceKind::ObjectStore) => {
          let versioned = matches!(resource.properties.get("versioned"), Some(serde_json::Value::Bool(true)));
          self
            .object_stores
            .entry(resource.physical_id.clone())
            .and_modify(|store| store.versioned = versioned)
            .or_insert_with(|| ObjectStoreRecord {
              owner: owner.to_string(),
              versioned,
              versions: Vec::new(),
            });
        }
        Some(ResourceKind::ImageRepository) => {
          self
            .image_repositories
            .entry(resource.physical_id.clone())
            .or_insert_with(|| ImageRepositoryRecord {
              owner: owner.to_string(),
              images: Vec::new(),
            });
        }
        None => {}
      }
    }
  }

  fn advance_change_set(&mut self, id: &str) -> Result<ChangeSet, ControlPlaneError> {
    let record = self
      .change_sets
      .get_mut(id)
      .ok_or_else(|| ControlPlaneError::ChangeSetNotFound(id.to_string()))?;

    if record.change_set.status == ChangeSetStatus::CreatePending {
      if record.polls_remaining > 0 {
        record.polls_remaining -= 1;
      } else if record.computed.is_empty() {
        record.change_set.status = ChangeSetStatus::Failed;
        record.change_set.status_reason = Some(NO_CHANGES_REASON.to_string());
      } else {
        record.change_set.status = ChangeSetStatus::Ready;
        record.change_set.changes = record.computed.clone();
      }
    }

    Ok(record.change_set.clone())
  }
}

impl LocalControlPlane {
  /// A backend that keeps all state in memory.
  pub fn in_memory() -> Self {
    Self::from_state(PlaneState::default(), None)
  }

  /// Open (or start) a backend persisted at `path`.
  pub fn open(path: &Path) -> Result<Self, ControlPlaneError> {
    let state = match fs::read_to_string(path) {
      Ok(content) => serde_json::from_str(&content)
        .map_err(|e| ControlPlaneError::State(format!("failed to parse {}: {e}", path.display())))?,
      Err(e) if e.kind() == io::ErrorKind::NotFound => PlaneState::default(),
      Err(e) => {
        return Err(ControlPlaneError::State(format!(
          "failed to read {}: {e}",
          path.display()
        )));
      }
    };
    debug!(path = %path.display(), stacks = state.stacks.len(), "opened local control plane");
    Ok(Self::from_state(state, Some(path.to_path_buf())))
  }

  fn from_state(state: PlaneState, path: Option<PathBuf>) -> Self {
    Self {
      inner: Mutex::new(Inner {
        state,
        transient_failures: 0,
        fail_next: BTreeSet::new(),
        calls: Vec::new(),
      }),
      path,
      settle_polls: 1,
    }
  }

  /// Number of describe calls an operation stays in flight.
  pub fn with_settle_polls(mut self, polls: u32) -> Self {
    self.settle_polls = polls;
    self
  }

  /// Make the next `count` calls fail with a transient error.
  pub fn inject_transient_failures(&self, count: u32) {
    self.guard().transient_failures = count;
  }

  /// Make the next operation on `stack` end in its failed state.
  pub fn fail_next_operation(&self, stack: &str) {
    self.guard().fail_next.insert(stack.to_string());
  }

  /// Mutating calls that reached the backend, in order.
  pub fn calls(&self) -> Vec<PlaneCall> {
    self.guard().calls.clone()
  }

  /// Serialized stacks and child resources, excluding change sets and id
  /// counters. Two equal snapshots mean nothing observable changed.
  pub fn snapshot(&self) -> serde_json::Value {
    let inner = self.guard();
    serde_json::json!({
      "stacks": inner.state.stacks,
      "object_stores": inner.state.object_stores,
      "image_repositories": inner.state.image_repositories,
    })
  }

  /// Store an object; returns the new version id.
  pub fn put_object(&self, store: &str, key: &str) -> Result<String, ControlPlaneError> {
    let mut inner = self.guard();
    let version_id = inner.state.next_id("ver");
    let record = inner
      .state
      .object_stores
      .get_mut(store)
      .ok_or_else(|| ControlPlaneError::ResourceNotFound(store.to_string()))?;
    if !record.versioned {
      record.versions.retain(|v| v.key != key);
    }
    record.versions.push(ObjectVersion {
      key: key.to_string(),
      version_id: version_id.clone(),
      is_delete_marker: false,
    });
    self.persist(&inner)?;
    Ok(version_id)
  }

  /// Delete an object the way a client would: versioned stores gain a
  /// delete marker and keep every prior version.
  pub fn delete_object(&self, store: &str, key: &str) -> Result<(), ControlPlaneError> {
    let mut inner = self.guard();
    let version_id = inner.state.next_id("ver");
    let record = inner
      .state
      .object_stores
      .get_mut(store)
      .ok_or_else(|| ControlPlaneError::ResourceNotFound(store.to_string()))?;
    if record.versioned {
      record.versions.push(ObjectVersion {
        key: key.to_string(),
        version_id,
        is_delete_marker: true,
      });
    } else {
      record.versions.retain(|v| v.key != key);
    }
    self.persist(&inner)
  }

  pub fn push_image(&self, repository: &str, digest: &str, tag: Option<&str>) -> Result<(), ControlPlaneError> {
    let mut inner = self.guard();
    let record = inner
      .state
      .image_repositories
      .get_mut(repository)
      .ok_or_else(|| ControlPlaneError::ResourceNotFound(repository.to_string()))?;
    record.images.push(ImageId {
      digest: digest.to_string(),
      tag: tag.map(str::to_string),
    });
    self.persist(&inner)
  }

  /// Every version and delete marker in a store, `None` when absent.
  pub fn object_versions(&self, store: &str) -> Option<Vec<ObjectVersion>> {
    self.guard().state.object_stores.get(store).map(|s| s.versions.clone())
  }

  /// Every image in a repository, `None` when absent.
  pub fn images(&self, repository: &str) -> Option<Vec<ImageId>> {
    self
      .guard()
      .state
      .image_repositories
      .get(repository)
      .map(|r| r.images.clone())
  }

  /// Ids of change sets that still exist.
  pub fn change_set_ids(&self) -> Vec<String> {
    self.guard().state.change_sets.keys().cloned().collect()
  }

  fn guard(&self) -> MutexGuard<'_, Inner> {
    self.inner.lock().unwrap_or_else(PoisonError::into_inner)
  }

  /// Lock state for a backend call, consuming an injected transient failure.
  fn enter(&self, operation: &'static str) -> Result<MutexGuard<'_, Inner>, ControlPlaneError> {
    let mut inner = self.guard();
    if inner.transient_failures > 0 {
      inner.transient_failures -= 1;
      debug!(operation, "injected transient failure");
      return Err(ControlPlaneError::Transient(format!("{operation}: connection reset")));
    }
    Ok(inner)
  }

  fn record_call(inner: &mut Inner, operation: &'static str, target: &str) {
    inner.calls.push(PlaneCall {
      operation,
      target: target.to_string(),
    });
  }

  /// Write state atomically (temp file, then rename).
  fn persist(&self, inner: &Inner) -> Result<(), ControlPlaneError> {
    let Some(path) = &self.path else {
      return Ok(());
    };
    let to_state_error = |e: io::Error| ControlPlaneError::State(format!("failed to write {}: {e}", path.display()));

    if let Some(parent) = path.parent() {
      fs::create_dir_all(parent).map_err(to_state_error)?;
    }
    let content = serde_json::to_string_pretty(&inner.state)
      .map_err(|e| ControlPlaneError::State(format!("failed to serialize state: {e}")))?;
    let temp_path = path.with_extension("json.tmp");
    fs::write(&temp_path, content).map_err(to_state_error)?;
    fs::rename(&temp_path, path).map_err(to_state_error)?;
    Ok(())
  }

  fn start_update(
    &self,
    inner: &mut Inner,
    name: &str,
    template: Template,
    parameters: Parameters,
  ) -> Result<OperationHandle, ControlPlaneError> {
    let id = inner.state.next_id("op");
    let fail = inner.fail_next.remove(name);
    let record = inner.state.record_mut(name)?;
    record.status = StackStatus::Updating;
    record.status_reason = None;
    record.pending = Some(PendingOperation {
      id: id.clone(),
      kind: OperationKind::Update,
      polls_remaining: self.settle_polls,
      fail,
      target: Some((template, parameters)),
    });
    Ok(OperationHandle {
      id,
      stack: name.to_string(),
      kind: OperationKind::Update,
    })
  }
}

#[async_trait]
impl ControlPlane for LocalControlPlane {
  async fn describe_stack(&self, name: &str) -> Result<Stack, ControlPlaneError> {
    let mut inner = self.enter("describe_stack")?;
    let stack = inner.state.advance(name)?;
    self.persist(&inner)?;
    Ok(stack)
  }

  async fn create_stack(&self, input: &StackInput) -> Result<OperationHandle, ControlPlaneError> {
    let mut inner = self.enter("create_stack")?;
    Self::record_call(&mut inner, "create_stack", &input.name);

    if let Some(existing) = inner.state.stacks.get(&input.name) {
      if existing.status == StackStatus::Creating
        && existing.template.reference == input.template.reference
        && let Some(handle) = existing.handle(&input.name)
      {
        debug!(stack = %input.name, "create already in flight");
        return Ok(handle);
      }
      if existing.status.is_in_progress() {
        return Err(ControlPlaneError::StackBusy {
          name: input.name.clone(),
          status: existing.status,
        });
      }
      return Err(ControlPlaneError::AlreadyExists(input.name.clone()));
    }

    validate_input(input)?;

    let id = inner.state.next_id("op");
    let fail = inner.fail_next.remove(&input.name);
    inner.state.stacks.insert(
      input.name.clone(),
      StackRecord {
        template: input.template.clone(),
        parameters: input.parameters.clone(),
        status: StackStatus::Creating,
        status_reason: None,
        outputs: Outputs::new(),
        resources: BTreeMap::new(),
        pending: Some(PendingOperation {
          id: id.clone(),
          kind: OperationKind::Create,
          polls_remaining: self.settle_polls,
          fail,
          target: None,
        }),
      },
    );
    self.persist(&inner)?;

    Ok(OperationHandle {
      id,
      stack: input.name.clone(),
      kind: OperationKind::Create,
    })
  }

  async fn update_stack(&self, input: &StackInput) -> Result<OperationHandle, ControlPlaneError> {
    let mut inner = self.enter("update_stack")?;
    Self::record_call(&mut inner, "update_stack", &input.name);

    let record = inner
      .state
      .stacks
      .get(&input.name)
      .ok_or_else(|| ControlPlaneError::StackNotFound(input.name.clone()))?;

    if record.status == StackStatus::Updating
      && let Some(PendingOperation {
        target: Some((template, parameters)),
        ..
      }) = &record.pending
      && template.reference == input.template.reference
      && *parameters == input.parameters
      && let Some(handle) = record.handle(&input.name)
    {
      return Ok(handle);
    }
    if record.status.is_in_progress() {
      return Err(ControlPlaneError::StackBusy {
        name: input.name.clone(),
        status: record.status,
      });
    }
    if record.template.reference == input.template.reference && record.parameters == input.parameters {
      return Err(ControlPlaneError::Validation("No updates are to be performed.".to_string()));
    }

    validate_input(input)?;
    let handle = self.start_update(&mut inner, &input.name, input.template.clone(), input.parameters.clone())?;
    self.persist(&inner)?;
    Ok(handle)
  }

  async fn delete_stack(&self, name: &str) -> Result<OperationHandle, ControlPlaneError> {
    let mut inner = self.enter("delete_stack")?;
    Self::record_call(&mut inner, "delete_stack", name);

    let Some(record) = inner.state.stacks.get(name) else {
      let id = inner.state.next_id("op");
      debug!(stack = %name, "delete of absent stack");
      return Ok(OperationHandle {
        id,
        stack: name.to_string(),
        kind: OperationKind::Delete,
      });
    };

    if record.status == StackStatus::Deleting
      && let Some(handle) = record.handle(name)
    {
      return Ok(handle);
    }
    if record.status.is_in_progress() {
      return Err(ControlPlaneError::StackBusy {
        name: name.to_string(),
        status: record.status,
      });
    }

    let id = inner.state.next_id("op");
    let fail = inner.fail_next.remove(name);
    let record = inner.state.record_mut(name)?;
    record.status = StackStatus::Deleting;
    record.status_reason = None;
    record.pending = Some(PendingOperation {
      id: id.clone(),
      kind: OperationKind::Delete,
      polls_remaining: self.settle_polls,
      fail,
      target: None,
    });
    self.persist(&inner)?;

    Ok(OperationHandle {
      id,
      stack: name.to_string(),
      kind: OperationKind::Delete,
    })
  }

  async fn create_change_set(&self, input: &StackInput) -> Result<ChangeSet, ControlPlaneError> {
    let mut inner = self.enter("create_change_set")?;
    Self::record_call(&mut inner, "create_change_set", &input.name);

    let record = inner
      .state
      .stacks
      .get(&input.name)
      .ok_or_else(|| ControlPlaneError::StackNotFound(input.name.clone()))?;
    if record.status.is_in_progress() {
      return Err(ControlPlaneError::StackBusy {
        name: input.name.clone(),
        status: record.status,
      });
    }

    let document = validate_input(input)?;
    let proposed = plan_resources(&input.name, &document, &input.parameters);
    let mut computed = diff_resources(&record.resources, &proposed);
    computed.extend(diff_outputs(
      &record.outputs,
      &document.resolved_outputs(&input.parameters),
    ));

    let id = inner.state.next_id("cs");
    let change_set = ChangeSet {
      id: id.clone(),
      stack: input.name.clone(),
      status: ChangeSetStatus::CreatePending,
      status_reason: None,
      changes: Vec::new(),
    };
    debug!(change_set = %id, stack = %input.name, changes = computed.len(), "change set computed");
    inner.state.change_sets.insert(
      id,
      ChangeSetRecord {
        change_set: change_set.clone(),
        template: input.template.clone(),
        parameters: input.parameters.clone(),
        computed,
        polls_remaining: self.settle_polls,
      },
    );
    self.persist(&inner)?;
    Ok(change_set)
  }

  async fn describe_change_set(&self, id: &str) -> Result<ChangeSet, ControlPlaneError> {
    let mut inner = self.enter("describe_change_set")?;
    let change_set = inner.state.advance_change_set(id)?;
    self.persist(&inner)?;
    Ok(change_set)
  }

  async fn execute_change_set(&self, id: &str) -> Result<OperationHandle, ControlPlaneError> {
    let mut inner = self.enter("execute_change_set")?;
    Self::record_call(&mut inner, "execute_change_set", id);

    let record = inner
      .state
      .change_sets
      .get(id)
      .ok_or_else(|| ControlPlaneError::ChangeSetNotFound(id.to_string()))?;
    let stack_name = record.change_set.stack.clone();

    if record.change_set.status == ChangeSetStatus::Executed
      && let Some(handle) = inner.state.stacks.get(&stack_name).and_then(|s| s.handle(&stack_name))
    {
      return Ok(handle);
    }
    if record.change_set.status != ChangeSetStatus::Ready {
      return Err(ControlPlaneError::Validation(format!(
        "change set {id} is not executable in status {}",
        record.change_set.status
      )));
    }

    let template = record.template.clone();
    let parameters = record.parameters.clone();
    let stack_status = inner.state.record_mut(&stack_name)?.status;
    if stack_status.is_in_progress() {
      return Err(ControlPlaneError::StackBusy {
        name: stack_name,
        status: stack_status,
      });
    }

    let handle = self.start_update(&mut inner, &stack_name, template, parameters)?;
    if let Some(record) = inner.state.change_sets.get_mut(id) {
      record.change_set.status = ChangeSetStatus::Executed;
    }
    self.persist(&inner)?;
    Ok(handle)
  }

  async fn delete_change_set(&self, id: &str) -> Result<(), ControlPlaneError> {
    let mut inner = self.enter("delete_change_set")?;
    Self::record_call(&mut inner, "delete_change_set", id);
    inner
      .state
      .change_sets
      .remove(id)
      .ok_or_else(|| ControlPlaneError::ChangeSetNotFound(id.to_string()))?;
    self.persist(&inner)
  }

  async fn list_child_resources(&self, stack: &str, kind: ResourceKind) -> Result<Vec<String>, ControlPlaneError> {
    let inner = self.enter("list_child_resources")?;
    let record = inner
      .state
      .stacks
      .get(stack)
      .ok_or_else(|| ControlPlaneError::StackNotFound(stack.to_string()))?;

    Ok(
      record
        .resources
        .values()
        .filter(|r| ResourceKind::from_resource_type(&r.resource_type) == Some(kind))
        .map(|r| r.physical_id.clone())
        .collect(),
    )
  }

  async fn list_object_versions(&self, store: &str, max: usize) -> Result<VersionPage, ControlPlaneError> {
    let inner = self.enter("list_object_versions")?;
    let record = inner
      .state
      .object_stores
      .get(store)
      .ok_or_else(|| ControlPlaneError::ResourceNotFound(store.to_string()))?;

    let limit = max.min(MAX_OBJECT_DELETE_BATCH);
    Ok(VersionPage {
      versions: record.versions.iter().take(limit).cloned().collect(),
      is_truncated: record.versions.len() > limit,
    })
  }

  async fn delete_object_versions(
    &self,
    store: &str,
    objects: &[ObjectIdentifier],
  ) -> Result<BatchDeleteOutcome, ControlPlaneError> {
    let mut inner = self.enter("delete_object_versions")?;
    if objects.len() > MAX_OBJECT_DELETE_BATCH {
      return Err(ControlPlaneError::BatchTooLarge {
        size: objects.len(),
        limit: MAX_OBJECT_DELETE_BATCH,
      });
    }
    Self::record_call(&mut inner, "delete_object_versions", store);

    let record = inner
      .state
      .object_stores
      .get_mut(store)
      .ok_or_else(|| ControlPlaneError::ResourceNotFound(store.to_string()))?;

    let before = record.versions.len();
    record
      .versions
      .retain(|v| !objects.iter().any(|o| o.key == v.key && o.version_id == v.version_id));
    let deleted = before - record.versions.len();

    self.persist(&inner)?;
    Ok(BatchDeleteOutcome {
      deleted,
      failures: Vec::new(),
    })
  }

  async fn list_images(&self, repository: &str) -> Result<Vec<ImageId>, ControlPlaneError> {
    let inner = self.enter("list_images")?;
    inner
      .state
      .image_repositories
      .get(repository)
      .map(|r| r.images.clone())
      .ok_or_else(|| ControlPlaneError::ResourceNotFound(repository.to_string()))
  }

  async fn batch_delete_images(
    &self,
    repository: &str,
    images: &[ImageId],
  ) -> Result<BatchDeleteOutcome, ControlPlaneError> {
    let mut inner = self.enter("batch_delete_images")?;
    if images.len() > MAX_IMAGE_DELETE_BATCH {
      return Err(ControlPlaneError::BatchTooLarge {
        size: images.len(),
        limit: MAX_IMAGE_DELETE_BATCH,
      });
    }
    Self::record_call(&mut inner, "batch_delete_images", repository);

    let record = inner
      .state
      .image_repositories
      .get_mut(repository)
      .ok_or_else(|| ControlPlaneError::ResourceNotFound(repository.to_string()))?;

    let before = record.images.len();
    record.images.retain(|i| !images.iter().any(|d| d.digest == i.digest));
    let deleted = before - record.images.len();

    self.persist(&inner)?;
    Ok(BatchDeleteOutcome {
      deleted,
      failures: Vec::new(),
    })
  }

  fn backend_name(&self) -> &'static str {
    "local"
  }
}
