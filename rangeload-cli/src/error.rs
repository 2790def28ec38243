//! CLI error type and exit codes.

use std::fmt;

use rangeload::{ConfigError, DownloadError};

/// Exit code for a download stopped with Ctrl+C (128 + SIGINT).
pub const EXIT_CANCELLED: u8 = 130;

/// Exit code for any failure.
pub const EXIT_FAILURE: u8 = 1;

/// Errors surfaced by CLI commands.
#[derive(Debug)]
pub enum CliError {
    /// Invalid command-line arguments or settings.
    Config(String),
    /// The configuration file could not be loaded.
    ConfigFile(ConfigError),
    /// The download failed.
    Download(DownloadError),
    /// The download was stopped by the user.
    Cancelled { bytes_done: u64 },
    /// Logging could not be set up.
    Logging(String),
}

impl CliError {
    /// Process exit code for this error.
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Cancelled { .. } => EXIT_CANCELLED,
            _ => EXIT_FAILURE,
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "Configuration error: {}", msg),
            Self::ConfigFile(e) => write!(f, "Config file error: {}", e),
            Self::Download(e) => write!(f, "Download failed: {}", e),
            Self::Cancelled { bytes_done } => {
                write!(f, "Download cancelled after {} bytes", bytes_done)
            }
            Self::Logging(msg) => write!(f, "Failed to initialize logging: {}", msg),
        }
    }
}

impl std::error::Error for CliError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::ConfigFile(e) => Some(e),
            Self::Download(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ConfigError> for CliError {
    fn from(e: ConfigError) -> Self {
        Self::ConfigFile(e)
    }
}

impl From<DownloadError> for CliError {
    fn from(e: DownloadError) -> Self {
        match e {
            DownloadError::Cancelled => Self::Cancelled { bytes_done: 0 },
            other => Self::Download(other),
        }
    }
}
