mod cmd;
mod output;
mod prompts;

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use cmd::{CommandStatus, Session};
use output::print_error;

/// stackup - multi-stack deployment orchestrator
#[derive(Parser)]
#[command(name = "stackup")]
#[command(author, version, about, long_about = None)]
struct Cli {
  /// Project configuration file
  #[arg(short, long, global = true, env = "STACKUP_CONFIG", default_value = "stackup.toml")]
  config: PathBuf,

  /// Bound on each wait for a stack operation, e.g. `30m` or `90s`
  #[arg(long, global = true, value_parser = humantime::parse_duration)]
  timeout: Option<Duration>,

  /// Enable verbose output
  #[arg(short, long, global = true)]
  verbose: bool,

  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum Commands {
  /// Create or update a single stack
  Apply {
    /// Logical stack name
    stack: String,

    /// Template file describing the stack's resources
    template: PathBuf,

    /// Environment the stack belongs to
    environment: String,

    /// Execute change sets without asking
    #[arg(short, long)]
    yes: bool,
  },

  /// Show what applying a template would change, without executing it
  PreviewUpdate {
    /// Logical stack name
    stack: String,

    /// Template file describing the stack's resources
    template: PathBuf,

    /// Environment the stack belongs to
    environment: String,
  },

  /// Apply every stack of an environment, in declared order
  Deploy {
    /// Environment to deploy
    environment: String,

    /// Execute change sets without asking
    #[arg(short, long)]
    yes: bool,
  },

  /// Sweep and delete every stack of an environment, in reverse order
  Teardown {
    /// Environment to tear down
    environment: String,

    /// Confirmation token, `destroy-<environment>`
    #[arg(long)]
    confirm: Option<String>,
  },

  /// Show the state of every stack of an environment
  Status {
    /// Environment to inspect
    environment: String,

    /// Output as JSON
    #[arg(long)]
    json: bool,
  },
}

fn main() -> ExitCode {
  let cli = Cli::parse();

  let filter = if cli.verbose {
    EnvFilter::new("debug")
  } else {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
  };
  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(std::io::stderr)
    .without_time()
    .init();

  match run(cli) {
    Ok(CommandStatus::Done) => ExitCode::SUCCESS,
    Ok(CommandStatus::Failed) => ExitCode::from(1),
    Ok(CommandStatus::Cancelled) => ExitCode::from(2),
    Err(e) => {
      print_error(&format!("{e:#}"));
      ExitCode::from(1)
    }
  }
}

fn run(cli: Cli) -> anyhow::Result<CommandStatus> {
  let session = Session::load(&cli.config, cli.timeout)?;

  match cli.command {
    Commands::Apply {
      stack,
      template,
      environment,
      yes,
    } => cmd::cmd_apply(&session, &stack, &template, &environment, yes),
    Commands::PreviewUpdate {
      stack,
      template,
      environment,
    } => cmd::cmd_preview_update(&session, &stack, &template, &environment),
    Commands::Deploy { environment, yes } => cmd::cmd_deploy(&session, &environment, yes),
    Commands::Teardown { environment, confirm } => cmd::cmd_teardown(&session, &environment, confirm.as_deref()),
    Commands::Status { environment, json } => cmd::cmd_status(&session, &environment, json),
  }
}
