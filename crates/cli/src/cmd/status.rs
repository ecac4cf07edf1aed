//! Status command implementation.
//!
//! Re-reads every declared stack of an environment from the control plane.

use anyhow::{Context, Result};

use super::{CommandStatus, Session, runtime};
use crate::output::{print_json, print_stack_status, print_stat};

pub fn cmd_status(session: &Session, environment: &str, json: bool) -> Result<CommandStatus> {
  let env = session.config.environment(environment)?;
  let orchestrator = session.orchestrator(&env.region)?;

  let rt = runtime()?;
  let stacks = rt
    .block_on(orchestrator.status(&env))
    .with_context(|| format!("Failed to read status of {environment}"))?;

  if json {
    let items: Vec<_> = stacks
      .iter()
      .map(|stack| {
        serde_json::json!({
          "name": stack.name,
          "status": stack.status,
          "status_reason": stack.status_reason,
          "template_ref": stack.template_ref,
          "outputs": stack.outputs,
        })
      })
      .collect();
    print_json(&serde_json::json!({ "environment": environment, "region": env.region, "stacks": items }))?;
    return Ok(CommandStatus::Done);
  }

  println!("Environment {} ({})", environment, env.region);
  for stack in &stacks {
    print_stack_status(&stack.name, stack.status);
    if let Some(reason) = &stack.status_reason {
      print_stat("reason", reason);
    }
    for (key, value) in &stack.outputs {
      print_stat(key, value);
    }
  }

  Ok(CommandStatus::Done)
}
