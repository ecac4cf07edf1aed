//! Operator confirmation channel.
//!
//! Prompts go to stderr and answers are read from stdin, which may be piped.
//! End of input, read errors and anything but an explicit yes decline.

use std::io::{self, BufRead, Write};

use async_trait::async_trait;
use tracing::debug;

use stackup_lib::changeset::{Confirm, ConfirmRequest, Decision};

use crate::output::print_changes;

/// Read one line from stdin; `None` on end of input or error.
fn read_answer(prompt: &str) -> Option<String> {
  let mut stderr = io::stderr();
  let _ = write!(stderr, "{prompt} ");
  let _ = stderr.flush();

  let mut input = String::new();
  match io::stdin().lock().read_line(&mut input) {
    Ok(0) => None,
    Ok(_) => Some(input),
    Err(e) => {
      debug!(error = %e, "failed to read answer");
      None
    }
  }
}

/// Asks on the terminal before each change set is executed.
#[derive(Debug, Clone, Copy, Default)]
pub struct TerminalConfirm;

#[async_trait]
impl Confirm for TerminalConfirm {
  async fn confirm(&self, request: &ConfirmRequest<'_>) -> Decision {
    println!();
    println!("Change set {} for {}:", request.change_set.id, request.stack);
    print_changes(&request.change_set.changes);

    let prompt = format!("Execute {} change(s) on {}? [y/N]", request.change_set.changes.len(), request.stack);
    let answer = tokio::task::spawn_blocking(move || read_answer(&prompt)).await;

    match answer {
      Ok(Some(line)) => Decision::parse(&line),
      _ => Decision::Decline,
    }
  }
}

/// Token that must be typed to tear an environment down.
pub fn teardown_token(environment: &str) -> String {
  format!("destroy-{environment}")
}

/// Check a provided token, or ask for one. Only an exact match confirms.
pub fn confirm_teardown(environment: &str, provided: Option<&str>) -> bool {
  let expected = teardown_token(environment);
  let answer = match provided {
    Some(token) => token.to_string(),
    None => {
      eprintln!("This deletes every stack in {environment}, including stored objects and images.");
      match read_answer(&format!("Type {expected} to continue:")) {
        Some(line) => line,
        None => return false,
      }
    }
  };
  answer.trim() == expected
}
