#![forbid(unsafe_code)]

mod cmd;
mod output;
mod remote;

use anyhow::Context as _;
use clap::{CommandFactory, Parser, Subcommand};
use ferry_core::config::resolve_config;
use ferry_core::{ErrorCode, MigrateError, TransportError};
use output::{CliError, OutputMode, render_error};
use std::env;
use std::fmt;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::debug;
use tracing_subscriber::{EnvFilter, fmt as log_fmt, prelude::*};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "ferry: replay tracker case history into another tracker",
    long_about = None
)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON output instead of human-readable text.
    #[arg(long, global = true)]
    json: bool,

    /// Suppress non-essential output.
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Configuration file (default: ./ferry.toml, then the user config).
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    #[command(
        about = "Migrate cases with their full history",
        long_about = "Reconstruct every matching source case's history and replay it, in global \
                      time order, against the destination tracker. Without a destination the run \
                      is a dry run that logs each command.",
        after_help = "EXAMPLES:\n    # Dry run over an export\n    ferry migrate --export cases.json\n\n    # Live migration between two trackers\n    ferry migrate https://ann:pw@old.example.com/ https://ann:pw@new.example.com/\n\n    # Map a renamed person and emit JSON\n    ferry migrate --export cases.json --user \"Ann Smith:Ann S.\" --json"
    )]
    Migrate(cmd::migrate::MigrateArgs),

    #[command(
        about = "Show reconstructed case history",
        long_about = "Print the coalesced snapshots a migration would replay, without writing anywhere.",
        after_help = "EXAMPLES:\n    # Every case in an export\n    ferry history --export cases.json\n\n    # One case as JSON\n    ferry history --export cases.json --case 42 --json"
    )]
    History(cmd::history::HistoryArgs),

    #[command(
        about = "Generate shell completion scripts",
        after_help = "EXAMPLES:\n    # Generate bash completions\n    ferry completions bash"
    )]
    Completions(cmd::completions::CompletionsArgs),
}

/// Marks configuration failures for error-code rendering.
#[derive(Debug)]
struct ConfigLoad;

impl fmt::Display for ConfigLoad {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("failed to load configuration")
    }
}

fn init_tracing(verbose: bool, quiet: bool) {
    let filter = EnvFilter::try_from_env("FERRY_LOG").unwrap_or_else(|_| {
        EnvFilter::new(if verbose || env::var("DEBUG").is_ok() {
            "ferry=debug,ferry_core=debug,info"
        } else if quiet {
            "warn"
        } else {
            "ferry=info,ferry_core=info,warn"
        })
    });

    let format = env::var("FERRY_LOG_FORMAT").unwrap_or_else(|_| "compact".to_string());

    let registry = tracing_subscriber::registry().with(filter);

    match format.as_str() {
        "json" => {
            registry
                .with(
                    log_fmt::layer()
                        .json()
                        .with_ansi(false)
                        .with_writer(std::io::stderr),
                )
                .init();
        }
        _ => {
            registry
                .with(log_fmt::layer().compact().with_writer(std::io::stderr))
                .init();
        }
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    if let Commands::Completions(args) = &cli.command {
        let mut command = Cli::command();
        return cmd::completions::run_completions(args.shell, &mut command);
    }

    let project_root = env::current_dir()?;
    let effective =
        resolve_config(cli.config.as_deref(), &project_root, cli.json).context(ConfigLoad)?;
    for path in &effective.sources {
        debug!(path = %path.display(), "loaded configuration layer");
    }
    let output = OutputMode::from_resolved(&effective.resolved_output);

    match cli.command {
        Commands::Migrate(args) => {
            cmd::migrate::run_migrate(&args, effective.config, output, cli.quiet)
        }
        Commands::History(args) => cmd::history::run_history(&args, effective.config, output),
        Commands::Completions(_) => Ok(()),
    }
}

/// Classify a failure by the stable code of its root cause.
fn cli_error(err: &anyhow::Error) -> CliError {
    if let Some(migrate) = err.downcast_ref::<MigrateError>() {
        return CliError::from(migrate);
    }
    let code = if err.downcast_ref::<ConfigLoad>().is_some() {
        Some(ErrorCode::ConfigParseError)
    } else if err.downcast_ref::<TransportError>().is_some() {
        Some(ErrorCode::TransportFailed)
    } else {
        None
    };
    let mut error = CliError::new(format!("{err:#}"));
    if let Some(code) = code {
        error.error_code = Some(code.code().to_string());
        error.hint = code.hint().map(String::from);
    }
    error
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);
    let mode = if cli.json {
        OutputMode::Json
    } else {
        OutputMode::Text
    };

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            let stderr = std::io::stderr();
            let mut out = stderr.lock();
            if render_error(&mut out, mode, &cli_error(&err)).is_err() {
                eprintln!("error: {err:#}");
            }
            ExitCode::FAILURE
        }
    }
}
