//! Progress aggregation for range downloads.
//!
//! Workers report cumulative per-chunk byte counts; the coordinator folds
//! them into a [`ProgressAggregator`] and publishes [`ProgressEvent`]s.
//! Overall progress is the sum of bytes written per chunk over the file size.

use super::fetcher::ChunkReport;
use super::planner::DownloadPlan;
use super::state::SessionStatus;

/// A snapshot of session progress as seen by subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressEvent {
    /// Bytes written into the output file across all chunks.
    pub bytes_done: u64,
    /// Remote file size, once known.
    pub total_bytes: Option<u64>,
    /// Session status at the time of the event.
    pub status: SessionStatus,
    /// Chunks whose whole range has been written.
    pub chunks_completed: usize,
    /// Number of chunks in the plan (0 before planning).
    pub total_chunks: usize,
    /// Cause of failure; set only on the terminal `Failed` event.
    pub failure: Option<String>,
}

impl ProgressEvent {
    /// An event with no progress in the given status.
    pub fn new(status: SessionStatus) -> Self {
        Self {
            bytes_done: 0,
            total_bytes: None,
            status,
            chunks_completed: 0,
            total_chunks: 0,
            failure: None,
        }
    }

    /// Get the progress as a percentage based on bytes.
    ///
    /// Falls back to chunk-based progress if the total size is unknown.
    pub fn percent(&self) -> f64 {
        match self.total_bytes {
            Some(total) if total > 0 => (self.bytes_done as f64 / total as f64) * 100.0,
            _ if self.total_chunks > 0 => {
                (self.chunks_completed as f64 / self.total_chunks as f64) * 100.0
            }
            _ if self.status == SessionStatus::Completed => 100.0,
            _ => 0.0,
        }
    }

    /// Whether this is the last event of the session.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

impl Default for ProgressEvent {
    fn default() -> Self {
        Self::new(SessionStatus::Idle)
    }
}

/// Per-chunk byte counters owned by the coordinator.
///
/// Each counter only moves forward: a report lower than what was already
/// recorded for its chunk is stale and dropped.
#[derive(Debug, Clone)]
pub struct ProgressAggregator {
    chunk_bytes: Vec<u64>,
    chunk_lengths: Vec<u64>,
    total_size: u64,
}

impl ProgressAggregator {
    /// Create counters for every chunk of `plan`.
    pub fn new(plan: &DownloadPlan) -> Self {
        Self {
            chunk_bytes: vec![0; plan.ranges.len()],
            chunk_lengths: plan.ranges.iter().map(|r| r.len()).collect(),
            total_size: plan.total_size,
        }
    }

    /// Record a worker report. Returns true if the counter advanced.
    ///
    /// Reports for unknown chunks, stale reports and reports past the
    /// chunk's length are ignored.
    pub fn record(&mut self, report: ChunkReport) -> bool {
        let (Some(current), Some(&length)) = (
            self.chunk_bytes.get_mut(report.index),
            self.chunk_lengths.get(report.index),
        ) else {
            return false;
        };

        if report.bytes_written <= *current || report.bytes_written > length {
            return false;
        }
        *current = report.bytes_written;
        true
    }

    /// Bytes recorded for one chunk.
    pub fn chunk_bytes(&self, index: usize) -> u64 {
        self.chunk_bytes.get(index).copied().unwrap_or(0)
    }

    /// Sum of bytes across all chunks.
    pub fn bytes_done(&self) -> u64 {
        self.chunk_bytes.iter().sum()
    }

    /// Number of chunks whose full length has been recorded.
    pub fn completed_chunks(&self) -> usize {
        self.chunk_bytes
            .iter()
            .zip(&self.chunk_lengths)
            .filter(|(done, len)| done == len)
            .count()
    }

    /// Number of chunks tracked.
    pub fn total_chunks(&self) -> usize {
        self.chunk_bytes.len()
    }

    /// Build an event for the given status.
    pub fn event(&self, status: SessionStatus) -> ProgressEvent {
        ProgressEvent {
            bytes_done: self.bytes_done(),
            total_bytes: Some(self.total_size),
            status,
            chunks_completed: self.completed_chunks(),
            total_chunks: self.total_chunks(),
            failure: None,
        }
    }
}
