//! Configuration CLI commands.
//!
//! Provides `config path` and `config show`.

use std::path::Path;

use clap::Subcommand;

use super::common::{config_path, load_config};
use crate::error::CliError;

/// Config subcommands.
#[derive(Debug, Subcommand)]
pub enum ConfigCommands {
    /// Show the configuration file path
    Path,

    /// Show the effective settings (file values over defaults)
    Show,
}

/// Run a config subcommand.
pub fn run(command: ConfigCommands, config_file: Option<&Path>) -> Result<(), CliError> {
    match command {
        ConfigCommands::Path => {
            println!("{}", config_path(config_file)?.display());
            Ok(())
        }
        ConfigCommands::Show => {
            let config = load_config(config_file)?;
            print!("{}", config.to_ini_string());
            Ok(())
        }
    }
}
