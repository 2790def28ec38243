//! Session and chunk state for range downloads.
//!
//! The coordinator's session task is the only writer of these types. Front
//! ends see them as snapshots through the session handle.

use std::fmt;
use std::path::{Path, PathBuf};

use super::fetcher::ChunkReport;
use super::planner::{ByteRange, DownloadPlan};
use super::progress::{ProgressAggregator, ProgressEvent};
use crate::error::{DownloadError, DownloadResult};

/// Lifecycle of a download session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionStatus {
    /// Created, not yet started.
    Idle,
    /// Probing the server and planning ranges.
    Planning,
    /// Chunk workers are running.
    Downloading,
    /// Every chunk was written in full.
    Completed,
    /// A chunk or the planning phase failed.
    Failed,
    /// Stopped by the caller.
    Cancelled,
    /// A current copy of the file already existed.
    SkippedAlreadyCurrent,
}

impl SessionStatus {
    /// Whether no further transitions can happen.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::Cancelled | Self::SkippedAlreadyCurrent
        )
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Planning => "planning",
            Self::Downloading => "downloading",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::SkippedAlreadyCurrent => "already current",
        };
        f.write_str(s)
    }
}

/// Lifecycle of one chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChunkStatus {
    /// Planned, worker not started.
    Pending,
    /// Worker is transferring the range.
    InFlight,
    /// Whole range written.
    Completed,
    /// Worker stopped on an error.
    Failed,
    /// Worker stopped on cancellation.
    Cancelled,
}

/// State of one chunk of a download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkState {
    /// Byte range this chunk covers.
    pub range: ByteRange,
    /// Bytes written into the output file so far.
    pub bytes_written: u64,
    /// Current status.
    pub status: ChunkStatus,
    /// Message of the error that ended the chunk, if any.
    pub last_error: Option<String>,
}

impl ChunkState {
    fn new(range: ByteRange) -> Self {
        Self {
            range,
            bytes_written: 0,
            status: ChunkStatus::Pending,
            last_error: None,
        }
    }

    /// Whether the chunk completed with its whole range written.
    pub fn is_complete(&self) -> bool {
        self.status == ChunkStatus::Completed && self.bytes_written == self.range.len()
    }
}

/// Everything the coordinator tracks for one download.
#[derive(Debug, Clone)]
pub struct DownloadSession {
    destination: PathBuf,
    plan: DownloadPlan,
    chunks: Vec<ChunkState>,
    progress: ProgressAggregator,
}

impl DownloadSession {
    /// Create a session with every chunk pending.
    pub fn new(destination: PathBuf, plan: DownloadPlan) -> Self {
        let chunks = plan.ranges.iter().copied().map(ChunkState::new).collect();
        let progress = ProgressAggregator::new(&plan);
        Self {
            destination,
            plan,
            chunks,
            progress,
        }
    }

    /// Destination file path.
    pub fn destination(&self) -> &Path {
        &self.destination
    }

    /// The range plan.
    pub fn plan(&self) -> &DownloadPlan {
        &self.plan
    }

    /// Per-chunk state in chunk index order.
    pub fn chunks(&self) -> &[ChunkState] {
        &self.chunks
    }

    /// Sum of bytes written across chunks.
    pub fn bytes_done(&self) -> u64 {
        self.progress.bytes_done()
    }

    /// Mark a chunk's worker as started.
    pub fn mark_in_flight(&mut self, index: usize) {
        if let Some(chunk) = self.chunks.get_mut(index) {
            if chunk.status == ChunkStatus::Pending {
                chunk.status = ChunkStatus::InFlight;
            }
        }
    }

    /// Apply a worker's progress report.
    ///
    /// Returns true if aggregate progress advanced. Stale reports are ignored.
    pub fn apply_report(&mut self, report: ChunkReport) -> bool {
        if !self.progress.record(report) {
            return false;
        }
        if let Some(chunk) = self.chunks.get_mut(report.index) {
            chunk.bytes_written = self.progress.chunk_bytes(report.index);
        }
        true
    }

    /// Record that a chunk's worker finished successfully.
    pub fn record_success(&mut self, index: usize, bytes: u64) {
        self.apply_report(ChunkReport {
            index,
            bytes_written: bytes,
        });
        if let Some(chunk) = self.chunks.get_mut(index) {
            chunk.status = ChunkStatus::Completed;
        }
    }

    /// Record that a chunk's worker failed.
    pub fn record_failure(&mut self, index: usize, error: &DownloadError) {
        if let Some(chunk) = self.chunks.get_mut(index) {
            chunk.status = ChunkStatus::Failed;
            chunk.last_error = Some(error.to_string());
        }
    }

    /// Record that a chunk's worker stopped on cancellation.
    pub fn record_cancelled(&mut self, index: usize) {
        if let Some(chunk) = self.chunks.get_mut(index) {
            chunk.status = ChunkStatus::Cancelled;
        }
    }

    /// Mark every chunk that has not reached a final status as failed.
    ///
    /// Used when a worker ended without reporting its own result, so no
    /// chunk is left looking in flight after the session has failed.
    pub fn fail_unfinished(&mut self, error: &DownloadError) {
        for chunk in &mut self.chunks {
            if matches!(chunk.status, ChunkStatus::Pending | ChunkStatus::InFlight) {
                chunk.status = ChunkStatus::Failed;
                chunk.last_error = Some(error.to_string());
            }
        }
    }

    /// Whether every chunk completed with its full range written.
    pub fn is_complete(&self) -> bool {
        self.chunks.iter().all(ChunkState::is_complete)
    }

    /// Verify every chunk is complete.
    ///
    /// # Errors
    ///
    /// [`DownloadError::Incomplete`] naming the first chunk that is not.
    pub fn verify_complete(&self) -> DownloadResult<()> {
        match self
            .chunks
            .iter()
            .enumerate()
            .find(|(_, chunk)| !chunk.is_complete())
        {
            None => Ok(()),
            Some((index, chunk)) => Err(DownloadError::Incomplete {
                chunk: index,
                written: chunk.bytes_written,
                expected: chunk.range.len(),
            }),
        }
    }

    /// Progress event reflecting the current state.
    pub fn event(&self, status: SessionStatus) -> ProgressEvent {
        self.progress.event(status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::download::planner::plan;

    fn session(total: u64, workers: usize) -> DownloadSession {
        DownloadSession::new(PathBuf::from("/tmp/f.bin"), plan(total, workers).unwrap())
    }

    fn report(index: usize, bytes_written: u64) -> ChunkReport {
        ChunkReport {
            index,
            bytes_written,
        }
    }

    #[test]
    fn test_session_status_terminal() {
        assert!(!SessionStatus::Idle.is_terminal());
        assert!(!SessionStatus::Planning.is_terminal());
        assert!(!SessionStatus::Downloading.is_terminal());
        assert!(SessionStatus::Completed.is_terminal());
        assert!(SessionStatus::Failed.is_terminal());
        assert!(SessionStatus::Cancelled.is_terminal());
        assert!(SessionStatus::SkippedAlreadyCurrent.is_terminal());
    }

    #[test]
    fn test_session_new() {
        let session = session(1000, 4);

        assert_eq!(session.chunks().len(), 4);
        assert!(session
            .chunks()
            .iter()
            .all(|c| c.status == ChunkStatus::Pending));
        assert_eq!(session.bytes_done(), 0);
        assert!(!session.is_complete());
        assert_eq!(session.destination(), Path::new("/tmp/f.bin"));
    }

    #[test]
    fn test_session_apply_report_is_monotonic() {
        let mut session = session(1000, 4);

        assert!(session.apply_report(report(1, 100)));
        assert!(!session.apply_report(report(1, 50)));
        assert_eq!(session.chunks()[1].bytes_written, 100);
        assert_eq!(session.bytes_done(), 100);
    }

    #[test]
    fn test_session_complete() {
        let mut session = session(1000, 4);
        for i in 0..4 {
            session.mark_in_flight(i);
            session.record_success(i, 250);
        }

        assert!(session.is_complete());
        assert!(session.verify_complete().is_ok());
        assert_eq!(session.bytes_done(), 1000);
    }

    #[test]
    fn test_session_incomplete_chunk() {
        let mut session = session(1000, 4);
        for i in 0..4 {
            session.record_success(i, 250);
        }
        // A chunk marked complete with a short count is not complete.
        session.chunks[2].bytes_written = 200;

        assert!(matches!(
            session.verify_complete(),
            Err(DownloadError::Incomplete {
                chunk: 2,
                written: 200,
                expected: 250
            })
        ));
    }

    #[test]
    fn test_session_record_failure() {
        let mut session = session(1000, 4);

        session.record_failure(3, &DownloadError::chunk_io(3, "reset"));
        session.record_cancelled(0);

        assert_eq!(session.chunks()[3].status, ChunkStatus::Failed);
        assert_eq!(
            session.chunks()[3].last_error.as_deref(),
            Some("chunk 3 failed: reset")
        );
        assert_eq!(session.chunks()[0].status, ChunkStatus::Cancelled);
    }

    #[test]
    fn test_session_fail_unfinished() {
        let mut session = session(1000, 4);
        for i in 0..3 {
            session.mark_in_flight(i);
        }
        session.record_success(0, 250);
        session.record_cancelled(1);

        session.fail_unfinished(&DownloadError::Worker("task panicked".to_string()));

        let statuses: Vec<_> = session.chunks().iter().map(|c| c.status).collect();
        assert_eq!(
            statuses,
            vec![
                ChunkStatus::Completed,
                ChunkStatus::Cancelled,
                ChunkStatus::Failed,
                ChunkStatus::Failed,
            ]
        );
        assert_eq!(
            session.chunks()[2].last_error.as_deref(),
            Some("worker task failed: task panicked")
        );
        assert!(session.chunks()[0].last_error.is_none());
    }

    #[test]
    fn test_session_event() {
        let mut session = session(1000, 4);
        session.apply_report(report(0, 250));
        session.record_success(0, 250);

        let event = session.event(SessionStatus::Downloading);
        assert_eq!(event.bytes_done, 250);
        assert_eq!(event.total_bytes, Some(1000));
        assert_eq!(event.chunks_completed, 1);
        assert_eq!(event.total_chunks, 4);
    }
}
