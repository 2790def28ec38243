//! Settings resolution shared across CLI commands.

use std::path::{Path, PathBuf};
use std::time::Duration;

use rangeload::{ConfigFile, DownloaderConfig};

use crate::error::CliError;

/// Load the config file from `path`, or from the default location.
pub fn load_config(path: Option<&Path>) -> Result<ConfigFile, CliError> {
    match path {
        Some(path) => Ok(ConfigFile::load_from(path)?),
        None => Ok(ConfigFile::load()?),
    }
}

/// Path of the config file in use.
pub fn config_path(path: Option<&Path>) -> Result<PathBuf, CliError> {
    match path {
        Some(path) => Ok(path.to_path_buf()),
        None => ConfigFile::default_path().ok_or_else(|| {
            CliError::Config("could not determine the user config directory".to_string())
        }),
    }
}

/// Destination directory: CLI > config > current directory.
pub fn resolve_output_dir(cli_output: Option<PathBuf>, config: &ConfigFile) -> PathBuf {
    cli_output
        .or_else(|| config.output_dir.clone())
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Downloader settings: CLI flags override the config file, which overrides
/// the defaults.
pub fn resolve_downloader_config(
    cli_workers: Option<usize>,
    cli_stall_timeout_secs: Option<u64>,
    config: &ConfigFile,
) -> Result<DownloaderConfig, CliError> {
    let mut resolved = config.to_downloader_config();

    if let Some(workers) = cli_workers {
        if workers == 0 {
            return Err(CliError::Config(
                "--workers must be at least 1".to_string(),
            ));
        }
        resolved = resolved.with_workers(workers);
    }

    if let Some(secs) = cli_stall_timeout_secs {
        if secs == 0 {
            return Err(CliError::Config(
                "--stall-timeout must be at least 1 second".to_string(),
            ));
        }
        resolved = resolved.with_stall_timeout(Duration::from_secs(secs));
    }

    Ok(resolved)
}
