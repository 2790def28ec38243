//! Byte-range planning.
//!
//! Splits a file of known size into contiguous, non-overlapping inclusive
//! ranges, one per worker.

use std::fmt;

use crate::error::{DownloadError, DownloadResult};

/// An inclusive byte range `[start, end]` of the remote file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ByteRange {
    /// First byte offset.
    pub start: u64,
    /// Last byte offset (inclusive).
    pub end: u64,
}

impl ByteRange {
    /// Create a new range. `start` must not exceed `end`.
    pub fn new(start: u64, end: u64) -> Self {
        debug_assert!(start <= end, "inverted range {}-{}", start, end);
        Self { start, end }
    }

    /// Number of bytes covered by the range.
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }

    /// Always false: a range covers at least one byte.
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Value for the HTTP `Range` request header.
    pub fn header_value(&self) -> String {
        format!("bytes={}-{}", self.start, self.end)
    }
}

impl fmt::Display for ByteRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

/// The partition of a download into per-worker ranges.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadPlan {
    /// Total size of the remote file in bytes.
    pub total_size: u64,
    /// Ranges in ascending offset order; index is the chunk index.
    pub ranges: Vec<ByteRange>,
}

impl DownloadPlan {
    /// Number of workers the plan needs (one per range).
    pub fn worker_count(&self) -> usize {
        self.ranges.len()
    }
}

/// Partition `total_size` bytes across `workers` workers.
///
/// `chunk_size = total_size / workers`; the last range absorbs the remainder.
/// When the file is smaller than the worker count the plan collapses to
/// `total_size` single-byte ranges, so no range is ever empty or inverted.
///
/// # Errors
///
/// * [`DownloadError::InvalidSize`] if `total_size` is zero
/// * [`DownloadError::InvalidWorkerCount`] if `workers` is zero
pub fn plan(total_size: u64, workers: usize) -> DownloadResult<DownloadPlan> {
    if total_size == 0 {
        return Err(DownloadError::InvalidSize(total_size));
    }
    if workers == 0 {
        return Err(DownloadError::InvalidWorkerCount(workers));
    }

    let workers = (workers as u64).min(total_size);
    let chunk_size = total_size / workers;

    let ranges = (0..workers)
        .map(|i| {
            let start = i * chunk_size;
            let end = if i == workers - 1 {
                total_size - 1
            } else {
                start + chunk_size - 1
            };
            ByteRange::new(start, end)
        })
        .collect();

    Ok(DownloadPlan { total_size, ranges })
}
