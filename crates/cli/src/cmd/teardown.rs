//! Implementation of the `stackup teardown` command.
//!
//! Deletes every stack an environment declares, in reverse order, sweeping
//! declared object stores and image repositories first. Requires the literal
//! token `destroy-<environment>`.

use anyhow::{Context, Result};

use super::{CommandStatus, Session, runtime};
use crate::output::{print_report, print_warning};
use crate::prompts::{confirm_teardown, teardown_token};

pub fn cmd_teardown(session: &Session, environment: &str, token: Option<&str>) -> Result<CommandStatus> {
  let env = session
    .config
    .environment(environment)
    .context("Teardown needs the environment's stack chain")?;

  if !confirm_teardown(environment, token) {
    print_warning(&format!(
      "Teardown of {environment} cancelled; confirmation token {} not given",
      teardown_token(environment)
    ));
    return Ok(CommandStatus::Cancelled);
  }

  let orchestrator = session.orchestrator(&env.region)?;
  let rt = runtime()?;
  let report = rt.block_on(orchestrator.teardown_environment(&env));

  print_report(&report);
  Ok(CommandStatus::from(&report))
}
