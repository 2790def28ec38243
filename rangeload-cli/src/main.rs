//! rangeload CLI - Command-line interface
//!
//! Downloads a file over HTTP with several concurrent range requests, writing
//! each range straight into its place in the output file.

mod commands;
mod error;
mod logging;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use console::style;

use commands::config::ConfigCommands;
use commands::download::DownloadArgs;
use error::CliError;

#[derive(Debug, Parser)]
#[command(name = "rangeload")]
#[command(version = rangeload::VERSION)]
#[command(about = "Concurrent HTTP range downloader", long_about = None)]
struct Cli {
    /// Path to config.ini [default: <config dir>/rangeload/config.ini]
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Also write logs to this file
    #[arg(long, global = true, value_name = "FILE")]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Download a file using concurrent range requests
    Download(DownloadArgs),

    /// Inspect configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let _log_guard = match logging::init(cli.verbose, cli.log_file.as_deref()) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("{} {}", style("Error:").red().bold(), e);
            return ExitCode::from(e.exit_code());
        }
    };

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            match &e {
                CliError::Cancelled { .. } => eprintln!("{}", style(&e).yellow()),
                _ => eprintln!("{} {}", style("Error:").red().bold(), e),
            }
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let config_file = cli.config.as_deref();
    match cli.command {
        Commands::Download(args) => commands::download::run(args, config_file).await,
        Commands::Config { command } => commands::config::run(command, config_file),
    }
}
