//! Implementation of the `stackup apply` command.
//!
//! Applies one stack: created if absent, otherwise updated through a
//! reviewed change set.

use std::path::Path;

use anyhow::{Result, bail};

use stackup_lib::changeset::{AutoApprove, Confirm};
use stackup_lib::lifecycle::ApplyOutcome;
use stackup_lib::stack::StackId;

use super::{CommandStatus, Session, runtime};
use crate::output::{print_info, print_stat, print_success, print_warning};
use crate::prompts::TerminalConfirm;

pub fn cmd_apply(session: &Session, stack: &str, template: &Path, environment: &str, yes: bool) -> Result<CommandStatus> {
  let env = session.config.environment_or_adhoc(environment);
  let orchestrator = session.orchestrator(&env.region)?;
  let id = StackId::new(environment, stack);
  let confirm: &dyn Confirm = if yes { &AutoApprove } else { &TerminalConfirm };

  let rt = runtime()?;
  let outcome = match rt.block_on(orchestrator.apply_stack(&env, stack, template, confirm)) {
    Ok(outcome) => outcome,
    Err(e) => {
      let failure = rt.block_on(orchestrator.stack_failure(&id.physical_name(), &e));
      bail!("Apply halted: {failure}");
    }
  };

  match &outcome {
    ApplyOutcome::Created(stack) => print_success(&format!("{} created", stack.name)),
    ApplyOutcome::Updated(stack) => print_success(&format!("{} updated", stack.name)),
    ApplyOutcome::NoUpdates(stack) => print_info(&format!("{} is up to date (no_updates)", stack.name)),
    ApplyOutcome::Cancelled => {
      print_warning(&format!("Apply of {} cancelled; nothing was executed", id.physical_name()));
      return Ok(CommandStatus::Cancelled);
    }
  }

  if let Some(stack) = outcome.stack()
    && !stack.outputs.is_empty()
  {
    println!();
    println!("Outputs:");
    for (key, value) in &stack.outputs {
      print_stat(key, value);
    }
  }

  Ok(CommandStatus::Done)
}
