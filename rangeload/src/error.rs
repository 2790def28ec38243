//! Error types for range downloads.

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Result type for download operations.
pub type DownloadResult<T> = Result<T, DownloadError>;

/// Errors that can occur while planning, fetching or writing a download.
///
/// Every variant except [`DownloadError::Cancelled`] ends a session in the
/// `Failed` state. Cancellation is reported as an outcome, not a failure.
#[derive(Debug, Error)]
pub enum DownloadError {
    /// The planner was asked to split an empty file.
    #[error("invalid total size: {0} (must be greater than zero)")]
    InvalidSize(u64),

    /// The planner was asked for zero workers.
    #[error("invalid worker count: {0} (must be at least one)")]
    InvalidWorkerCount(usize),

    /// The URL is malformed or has no file name to save under.
    #[error("invalid URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    /// The metadata probe could not be completed.
    #[error("failed to query {url}: {reason}")]
    Probe { url: String, reason: String },

    /// The server did not report a usable content length.
    #[error("server did not report a content length for {url}")]
    SizeUnknown { url: String },

    /// The server ignored the `Range` header and sent the whole body.
    #[error("server ignored the range request for {url} (status {status})")]
    RangeUnsupported { url: String, status: u16 },

    /// The destination file could not be created or sized.
    #[error("failed to create {}: {source}", .path.display())]
    FileCreate { path: PathBuf, source: io::Error },

    /// A positioned write into the destination file failed.
    #[error("failed to write {}: {source}", .path.display())]
    Write { path: PathBuf, source: io::Error },

    /// Network or disk failure while transferring one chunk.
    #[error("chunk {chunk} failed: {reason}")]
    ChunkIo { chunk: usize, reason: String },

    /// A chunk received no bytes within the stall interval.
    #[error("chunk {chunk} stalled: no data for {}s", .timeout.as_secs_f64())]
    StallTimeout { chunk: usize, timeout: Duration },

    /// A chunk finished without writing its whole range.
    #[error("chunk {chunk} incomplete: wrote {written} of {expected} bytes")]
    Incomplete {
        chunk: usize,
        written: u64,
        expected: u64,
    },

    /// Invalid configuration or client setup.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// A worker task panicked or was aborted.
    #[error("worker task failed: {0}")]
    Worker(String),

    /// The download was cancelled by the caller.
    #[error("download cancelled")]
    Cancelled,
}

impl DownloadError {
    /// Returns true for errors raised while transferring a single chunk.
    ///
    /// Stalls are chunk failures: they take the same path as an I/O error.
    pub fn is_chunk_failure(&self) -> bool {
        matches!(
            self,
            Self::ChunkIo { .. } | Self::StallTimeout { .. } | Self::Write { .. }
        )
    }

    /// Returns true if this error only records a cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    pub(crate) fn chunk_io(chunk: usize, reason: impl Into<String>) -> Self {
        Self::ChunkIo {
            chunk,
            reason: reason.into(),
        }
    }
}
