//! CLI output formatting utilities.
//!
//! Colored status lines, change set listings and run summaries. User-facing
//! text goes to stdout; warnings, errors and prompts go to stderr.

use std::time::Duration;

use anyhow::Context;
use owo_colors::{OwoColorize, Stream};

use stackup_lib::control_plane::{ChangeAction, ResourceChange};
use stackup_lib::orchestrate::{RunReport, StackOutcome};
use stackup_lib::stack::StackStatus;

pub mod symbols {
  pub const SUCCESS: &str = "✓";
  pub const ERROR: &str = "✗";
  pub const WARNING: &str = "⚠";
  pub const INFO: &str = "•";
  pub const ARROW: &str = "→";
  pub const ADD: &str = "+";
  pub const MODIFY: &str = "~";
  pub const REMOVE: &str = "-";
}

pub fn format_duration(duration: Duration) -> String {
  let secs = duration.as_secs();
  let millis = duration.subsec_millis();

  if secs >= 60 {
    let mins = secs / 60;
    let remaining_secs = secs % 60;
    format!("{}m {}s", mins, remaining_secs)
  } else if secs > 0 {
    format!("{}.{:02}s", secs, millis / 10)
  } else {
    format!("{}ms", millis)
  }
}

pub fn print_success(message: &str) {
  println!(
    "{} {}",
    symbols::SUCCESS.if_supports_color(Stream::Stdout, |s| s.green()),
    message
  );
}

pub fn print_error(message: &str) {
  eprintln!(
    "{} {}",
    symbols::ERROR.if_supports_color(Stream::Stderr, |s| s.red()),
    message.if_supports_color(Stream::Stderr, |s| s.red())
  );
}

pub fn print_warning(message: &str) {
  eprintln!(
    "{} {}",
    symbols::WARNING.if_supports_color(Stream::Stderr, |s| s.yellow()),
    message.if_supports_color(Stream::Stderr, |s| s.yellow())
  );
}

pub fn print_info(message: &str) {
  println!(
    "{} {}",
    symbols::INFO.if_supports_color(Stream::Stdout, |s| s.blue()),
    message
  );
}

pub fn print_stat(label: &str, value: &str) {
  println!(
    "  {}: {}",
    label.if_supports_color(Stream::Stdout, |s| s.dimmed()),
    value
  );
}

pub fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
  let json = serde_json::to_string_pretty(value).context("Failed to serialize to JSON")?;
  println!("{}", json);
  Ok(())
}

/// One change line, e.g. `  + Queue (messaging::queue)`.
pub fn change_line(change: &ResourceChange) -> String {
  let detail = format!("({})", change.resource_type);
  let detail = detail.if_supports_color(Stream::Stdout, |s| s.dimmed());
  match change.action {
    ChangeAction::Add => format!(
      "  {} {} {}",
      symbols::ADD.if_supports_color(Stream::Stdout, |s| s.green()),
      change.resource_id,
      detail
    ),
    ChangeAction::Modify => format!(
      "  {} {} {}",
      symbols::MODIFY.if_supports_color(Stream::Stdout, |s| s.yellow()),
      change.resource_id,
      detail
    ),
    ChangeAction::Remove => format!(
      "  {} {} {}",
      symbols::REMOVE.if_supports_color(Stream::Stdout, |s| s.red()),
      change.resource_id,
      detail
    ),
  }
}

pub fn print_changes(changes: &[ResourceChange]) {
  for change in changes {
    println!("{}", change_line(change));
  }
}

fn status_label(status: StackStatus) -> String {
  let text = status.to_string();
  if status.is_failed() {
    text.if_supports_color(Stream::Stdout, |s| s.red()).to_string()
  } else if status.is_in_progress() {
    text.if_supports_color(Stream::Stdout, |s| s.yellow()).to_string()
  } else if status.is_complete() {
    text.if_supports_color(Stream::Stdout, |s| s.green()).to_string()
  } else {
    text
  }
}

pub fn print_stack_status(name: &str, status: StackStatus) {
  println!("{} {}  {}", symbols::INFO, name, status_label(status));
}

/// Per-stack lines and the closing summary of an orchestrator run.
pub fn print_report(report: &RunReport) {
  for stack in &report.completed {
    let mut line = format!("{} {}", stack.stack, stack.outcome);
    if let Some(swept) = &stack.swept
      && swept.total_removed() > 0
    {
      line.push_str(&format!(
        " (swept {} entr{} from {} resource(s))",
        swept.total_removed(),
        if swept.total_removed() == 1 { "y" } else { "ies" },
        swept.purged.len()
      ));
    }
    match stack.outcome {
      StackOutcome::NoUpdates | StackOutcome::AlreadyAbsent => print_info(&line),
      _ => print_success(&line),
    }
  }

  println!();
  let elapsed = format_duration(report.elapsed);
  if let Some(failure) = &report.failure {
    print_error(&format!("{} {} halted: {}", report.direction, report.environment, failure));
  } else if let Some(stack) = &report.cancelled {
    print_warning(&format!(
      "{} {} cancelled at {} {} nothing was executed for it",
      report.direction,
      report.environment,
      stack,
      symbols::ARROW
    ));
  } else {
    print_success(&format!(
      "{} {} complete: {} stack(s) in {}",
      report.direction,
      report.environment,
      report.completed.len(),
      elapsed
    ));
  }
}
