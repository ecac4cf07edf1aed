//! Implementation of the `stackup preview-update` command.
//!
//! Computes the change set an apply would execute, prints it, and deletes
//! it. Nothing is ever executed.

use std::path::Path;

use anyhow::{Context, Result};

use stackup_lib::changeset::Proposal;
use stackup_lib::control_plane::ChangeAction;
use stackup_lib::lifecycle::PreviewResult;
use stackup_lib::stack::StackId;

use super::{CommandStatus, Session, runtime};
use crate::output::{print_changes, print_info};

pub fn cmd_preview_update(session: &Session, stack: &str, template: &Path, environment: &str) -> Result<CommandStatus> {
  let env = session.config.environment_or_adhoc(environment);
  let orchestrator = session.orchestrator(&env.region)?;
  let physical = StackId::new(environment, stack).physical_name();

  let rt = runtime()?;
  let result = rt
    .block_on(orchestrator.preview_stack(&env, stack, template))
    .with_context(|| format!("Preview of {physical} failed"))?;

  match result {
    PreviewResult::NewStack(changes) => {
      print_info(&format!("{physical} does not exist; apply would create it with:"));
      print_changes(&changes);
    }
    PreviewResult::Existing(Proposal::NoChanges) => {
      print_info(&format!("{physical} is up to date (no_updates)"));
    }
    PreviewResult::Existing(Proposal::Ready(change_set)) => {
      print_info(&format!("Changes for {physical}:"));
      print_changes(&change_set.changes);
      println!();
      println!(
        "{} to add, {} to modify, {} to remove",
        change_set.count(ChangeAction::Add),
        change_set.count(ChangeAction::Modify),
        change_set.count(ChangeAction::Remove),
      );
    }
  }

  Ok(CommandStatus::Done)
}
