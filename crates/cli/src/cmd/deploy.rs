//! Implementation of the `stackup deploy` command.
//!
//! Applies every stack an environment declares, in order.

use anyhow::{Context, Result};

use stackup_lib::changeset::{AutoApprove, Confirm};

use super::{CommandStatus, Session, runtime};
use crate::output::print_report;
use crate::prompts::TerminalConfirm;

pub fn cmd_deploy(session: &Session, environment: &str, yes: bool) -> Result<CommandStatus> {
  let env = session
    .config
    .environment(environment)
    .context("Deploy needs the environment's stack chain")?;
  let orchestrator = session.orchestrator(&env.region)?;
  let confirm: &dyn Confirm = if yes { &AutoApprove } else { &TerminalConfirm };

  let rt = runtime()?;
  let report = rt.block_on(orchestrator.apply_environment(&env, confirm));

  print_report(&report);
  Ok(CommandStatus::from(&report))
}
