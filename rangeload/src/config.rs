//! Downloader configuration.
//!
//! [`DownloaderConfig`] holds the tunables used by the coordinator and its
//! workers. [`ConfigFile`] reads the optional `config.ini` that front ends
//! layer underneath their own command-line flags.
//!
//! # File format
//!
//! ```ini
//! [download]
//! workers = 8
//! buffer_size = 65536
//! stall_timeout_secs = 30
//! connect_timeout_secs = 30
//! progress_interval_ms = 100
//! user_agent = my-agent/1.0
//!
//! [output]
//! directory = /home/me/Downloads
//! ```

use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use ini::{Ini, Properties};
use thiserror::Error;

/// Default number of chunk workers per download.
pub const DEFAULT_WORKERS: usize = 4;

/// Default largest single write into the output file (32 KiB).
pub const DEFAULT_BUFFER_SIZE: usize = 32 * 1024;

/// Default time a chunk may go without receiving data.
pub const DEFAULT_STALL_TIMEOUT: Duration = Duration::from_secs(30);

/// Default TCP/TLS connect timeout.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default minimum spacing of per-chunk progress reports.
pub const DEFAULT_PROGRESS_INTERVAL: Duration = Duration::from_millis(100);

/// Default capacity of the worker-to-coordinator report channel.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 64;

/// Default `User-Agent` header.
pub const DEFAULT_USER_AGENT: &str = concat!("rangeload/", env!("CARGO_PKG_VERSION"));

const SECTION_DOWNLOAD: &str = "download";
const SECTION_OUTPUT: &str = "output";

/// Tunables for a download session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloaderConfig {
    /// Number of concurrent chunk workers (and chunks).
    pub workers: usize,

    /// Largest single write into the output file.
    pub buffer_size: usize,

    /// A chunk that receives no bytes for this long fails.
    pub stall_timeout: Duration,

    /// Connect timeout for HTTP requests.
    pub connect_timeout: Duration,

    /// Minimum spacing of intermediate progress reports per chunk.
    pub progress_interval: Duration,

    /// Capacity of the bounded report channel between workers and coordinator.
    pub channel_capacity: usize,

    /// `User-Agent` sent with every request.
    pub user_agent: String,
}

impl Default for DownloaderConfig {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            buffer_size: DEFAULT_BUFFER_SIZE,
            stall_timeout: DEFAULT_STALL_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

impl DownloaderConfig {
    /// Set the number of workers (minimum 1).
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// Set the write buffer size (minimum 1 byte).
    pub fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size.max(1);
        self
    }

    /// Set the stall timeout.
    pub fn with_stall_timeout(mut self, timeout: Duration) -> Self {
        self.stall_timeout = timeout;
        self
    }

    /// Set the connect timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the progress reporting interval.
    pub fn with_progress_interval(mut self, interval: Duration) -> Self {
        self.progress_interval = interval;
        self
    }

    /// Set the report channel capacity (minimum 1).
    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity.max(1);
        self
    }

    /// Set the `User-Agent` header.
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }
}

/// Errors from reading a configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file exists but could not be read.
    #[error("failed to read {}: {source}", .path.display())]
    Read { path: PathBuf, source: io::Error },

    /// The file is not valid INI.
    #[error("failed to parse config: {0}")]
    Parse(String),

    /// A key holds a value of the wrong type or out of range.
    #[error("invalid value for [{section}] {key} = {value:?}: {reason}")]
    InvalidValue {
        section: &'static str,
        key: &'static str,
        value: String,
        reason: String,
    },
}

/// Settings read from `config.ini`.
///
/// Every field is optional; unset fields fall back to the
/// [`DownloaderConfig`] defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigFile {
    pub workers: Option<usize>,
    pub buffer_size: Option<usize>,
    pub stall_timeout_secs: Option<u64>,
    pub connect_timeout_secs: Option<u64>,
    pub progress_interval_ms: Option<u64>,
    pub user_agent: Option<String>,
    /// Default destination directory for downloads.
    pub output_dir: Option<PathBuf>,
}

impl ConfigFile {
    /// Default location: `<config_dir>/rangeload/config.ini`.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("rangeload").join("config.ini"))
    }

    /// Load from the default location. A missing file yields defaults.
    pub fn load() -> Result<Self, ConfigError> {
        match Self::default_path() {
            Some(path) => Self::load_from(&path),
            None => Ok(Self::default()),
        }
    }

    /// Load from `path`. A missing file yields defaults.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(source) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        Self::parse(&contents)
    }

    /// Parse INI text.
    pub fn parse(contents: &str) -> Result<Self, ConfigError> {
        let ini = Ini::load_from_str(contents).map_err(|e| ConfigError::Parse(e.to_string()))?;

        let mut config = Self::default();

        if let Some(section) = ini.section(Some(SECTION_DOWNLOAD)) {
            config.workers = positive(section, "workers")?;
            config.buffer_size = positive(section, "buffer_size")?;
            config.stall_timeout_secs = positive(section, "stall_timeout_secs")?;
            config.connect_timeout_secs = positive(section, "connect_timeout_secs")?;
            config.progress_interval_ms = value(SECTION_DOWNLOAD, section, "progress_interval_ms")?;
            config.user_agent = section
                .get("user_agent")
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from);
        }

        if let Some(section) = ini.section(Some(SECTION_OUTPUT)) {
            config.output_dir = section
                .get("directory")
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(expand_tilde);
        }

        Ok(config)
    }

    /// Overlay the file's settings on the defaults.
    pub fn to_downloader_config(&self) -> DownloaderConfig {
        let mut config = DownloaderConfig::default();
        if let Some(workers) = self.workers {
            config = config.with_workers(workers);
        }
        if let Some(size) = self.buffer_size {
            config = config.with_buffer_size(size);
        }
        if let Some(secs) = self.stall_timeout_secs {
            config = config.with_stall_timeout(Duration::from_secs(secs));
        }
        if let Some(secs) = self.connect_timeout_secs {
            config = config.with_connect_timeout(Duration::from_secs(secs));
        }
        if let Some(ms) = self.progress_interval_ms {
            config = config.with_progress_interval(Duration::from_millis(ms));
        }
        if let Some(agent) = &self.user_agent {
            config = config.with_user_agent(agent.clone());
        }
        config
    }

    /// Render the effective settings as INI text.
    pub fn to_ini_string(&self) -> String {
        let effective = self.to_downloader_config();
        let mut ini = Ini::new();
        ini.with_section(Some(SECTION_DOWNLOAD))
            .set("workers", effective.workers.to_string())
            .set("buffer_size", effective.buffer_size.to_string())
            .set(
                "stall_timeout_secs",
                effective.stall_timeout.as_secs().to_string(),
            )
            .set(
                "connect_timeout_secs",
                effective.connect_timeout.as_secs().to_string(),
            )
            .set(
                "progress_interval_ms",
                effective.progress_interval.as_millis().to_string(),
            )
            .set("user_agent", effective.user_agent);
        if let Some(dir) = &self.output_dir {
            ini.with_section(Some(SECTION_OUTPUT))
                .set("directory", dir.display().to_string());
        }

        let mut out = Vec::new();
        // Writing into a Vec cannot fail.
        let _ = ini.write_to(&mut out);
        String::from_utf8_lossy(&out).into_owned()
    }
}

fn value<T>(
    section_name: &'static str,
    section: &Properties,
    key: &'static str,
) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match section.get(key).map(str::trim).filter(|s| !s.is_empty()) {
        None => Ok(None),
        Some(raw) => raw
            .parse()
            .map(Some)
            .map_err(|e: T::Err| ConfigError::InvalidValue {
                section: section_name,
                key,
                value: raw.to_string(),
                reason: e.to_string(),
            }),
    }
}

fn positive<T>(section: &Properties, key: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr + Default + PartialEq + ToString,
    T::Err: std::fmt::Display,
{
    let parsed: Option<T> = value(SECTION_DOWNLOAD, section, key)?;
    match parsed {
        Some(v) if v == T::default() => Err(ConfigError::InvalidValue {
            section: SECTION_DOWNLOAD,
            key,
            value: v.to_string(),
            reason: "must be greater than zero".to_string(),
        }),
        other => Ok(other),
    }
}

fn expand_tilde(raw: &str) -> PathBuf {
    match raw.strip_prefix("~/") {
        Some(rest) => dirs::home_dir()
            .map(|home| home.join(rest))
            .unwrap_or_else(|| PathBuf::from(raw)),
        None => PathBuf::from(raw),
    }
}
