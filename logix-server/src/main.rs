//! logix-server: bus listener, consume pipeline and query CLI.
//!
//! ```bash
//! # Run the ingestion server (default)
//! logix-server serve --config logix.json
//!
//! # Query the store
//! logix-server logs --app orders --level error
//! logix-server tail --app orders --follow
//! logix-server trace 6A1F00C2B3D44000
//! logix-server apps
//! ```

mod query;
mod serve;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use logix::config::ServerConfig;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "logix-server", version, about, long_about = None)]
struct Cli {
  #[command(subcommand)]
  command: Option<Command>,

  /// JSON configuration file; defaults plus LOGIX_* environment overrides when absent
  #[arg(short, long, global = true, env = "LOGIX_CONFIG")]
  config: Option<PathBuf>,

  /// Log filter (trace, debug, info, warn, error or an EnvFilter directive)
  #[arg(short, long, default_value = "info", global = true)]
  log_level: String,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Accept bus connections and persist events to the store
  Serve,

  /// Page through run logs, newest first
  Logs(query::LogsArgs),

  /// Print run logs in arrival order, optionally following new ones
  Tail(query::TailArgs),

  /// Rebuild the call tree of one trace
  Trace(query::TraceArgs),

  /// List known applications and environments
  Apps,
}

fn main() -> ExitCode {
  let cli = Cli::parse();
  init_logging(&cli.log_level);

  let config = match load_config(cli.config.as_deref()) {
    Ok(config) => config,
    Err(e) => {
      tracing::error!(error = %e, "invalid configuration");
      return ExitCode::FAILURE;
    },
  };

  let result = match cli.command.unwrap_or(Command::Serve) {
    Command::Serve => serve::run(config),
    Command::Logs(args) => query::logs(&config, args),
    Command::Tail(args) => query::tail(&config, args),
    Command::Trace(args) => query::trace(&config, args),
    Command::Apps => query::apps(&config),
  };

  match result {
    Ok(()) => ExitCode::SUCCESS,
    Err(e) => {
      tracing::error!(error = %e, "command failed");
      ExitCode::FAILURE
    },
  }
}

fn load_config(path: Option<&std::path::Path>) -> logix::Result<ServerConfig> {
  match path {
    Some(path) => ServerConfig::load(path),
    None => ServerConfig::from_env(),
  }
}

/// Logs go to stderr so query output on stdout stays machine-readable.
fn init_logging(level: &str) {
  let filter = EnvFilter::try_from_default_env()
    .or_else(|_| EnvFilter::try_new(level))
    .unwrap_or_else(|_| EnvFilter::new("info"));

  tracing_subscriber::registry()
    .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
    .with(filter)
    .init();
}
