//! rangeload - concurrent HTTP range downloads
//!
//! Splits a remote file into contiguous byte ranges, fetches each range on
//! its own worker with an HTTP `Range` request, and writes every range
//! straight into its offset of a pre-sized output file.
//!
//! Front ends drive a download through [`DownloadCoordinator::start`] and the
//! returned [`SessionHandle`]: cancel it, subscribe to progress, and wait
//! for the outcome.

pub mod config;
pub mod download;
pub mod error;

pub use config::{ConfigError, ConfigFile, DownloaderConfig};
pub use download::{
    DownloadCoordinator, DownloadReport, ProgressEvent, ProgressSubscription, RangeClient,
    ReqwestClient, SessionHandle, SessionOutcome, SessionStatus,
};
pub use error::{DownloadError, DownloadResult};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
