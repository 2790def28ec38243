//! Caller-facing handle to a running download.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::progress::ProgressEvent;
use super::state::{ChunkState, SessionStatus};
use crate::error::{DownloadError, DownloadResult};

/// Summary of a completed download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadReport {
    /// Where the file was written.
    pub path: PathBuf,
    /// Size of the file in bytes.
    pub total_bytes: u64,
    /// Number of chunks it was fetched in.
    pub chunks: usize,
    /// Wall time from start to completion.
    pub elapsed: Duration,
}

/// How a session ended, other than by failing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionOutcome {
    /// Every chunk was written.
    Completed(DownloadReport),
    /// Stopped by [`SessionHandle::cancel`]. Partial output stays on disk.
    Cancelled { bytes_done: u64 },
    /// The destination already held a current copy.
    SkippedAlreadyCurrent { path: PathBuf, size: u64 },
}

impl SessionOutcome {
    /// Session status corresponding to this outcome.
    pub fn status(&self) -> SessionStatus {
        match self {
            Self::Completed(_) => SessionStatus::Completed,
            Self::Cancelled { .. } => SessionStatus::Cancelled,
            Self::SkippedAlreadyCurrent { .. } => SessionStatus::SkippedAlreadyCurrent,
        }
    }
}

/// Cloneable cancel trigger for a session.
///
/// Lets a signal handler cancel a download while another task awaits
/// [`SessionHandle::wait`].
#[derive(Debug, Clone)]
pub struct Canceller {
    token: CancellationToken,
}

impl Canceller {
    /// Request cancellation. Repeated calls are no-ops.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// Handle to a download started by the coordinator.
///
/// Dropping the handle does not stop the download; call
/// [`cancel`](Self::cancel) for that.
#[derive(Debug)]
pub struct SessionHandle {
    cancel: CancellationToken,
    progress: watch::Receiver<ProgressEvent>,
    chunks: Arc<RwLock<Vec<ChunkState>>>,
    task: JoinHandle<DownloadResult<SessionOutcome>>,
}

impl SessionHandle {
    pub(crate) fn new(
        cancel: CancellationToken,
        progress: watch::Receiver<ProgressEvent>,
        chunks: Arc<RwLock<Vec<ChunkState>>>,
        task: JoinHandle<DownloadResult<SessionOutcome>>,
    ) -> Self {
        Self {
            cancel,
            progress,
            chunks,
            task,
        }
    }

    /// Request cancellation.
    ///
    /// Valid at any time. Repeated calls, and calls after the session has
    /// ended, do nothing.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// A cancel trigger that outlives borrows of this handle.
    pub fn canceller(&self) -> Canceller {
        Canceller {
            token: self.cancel.clone(),
        }
    }

    /// Current session status.
    pub fn status(&self) -> SessionStatus {
        self.progress.borrow().status
    }

    /// Snapshot of per-chunk state. Empty until planning finishes.
    pub fn chunks(&self) -> Vec<ChunkState> {
        self.chunks.read().clone()
    }

    /// Subscribe to progress events.
    pub fn subscribe(&self) -> ProgressSubscription {
        ProgressSubscription {
            rx: self.progress.clone(),
            started: false,
            finished: false,
        }
    }

    /// Wait for the session to end.
    ///
    /// # Errors
    ///
    /// The first failure that ended the session. Cancellation is not an
    /// error; it returns [`SessionOutcome::Cancelled`].
    pub async fn wait(self) -> DownloadResult<SessionOutcome> {
        self.task
            .await
            .map_err(|e| DownloadError::Worker(format!("session task failed: {}", e)))?
    }
}

/// Stream of progress events for one session.
///
/// Yields the current event first, then the latest event after each change.
/// Intermediate events may be coalesced when the subscriber is slow; the
/// terminal event is always delivered, after which [`next`](Self::next)
/// returns `None`.
#[derive(Debug)]
pub struct ProgressSubscription {
    rx: watch::Receiver<ProgressEvent>,
    started: bool,
    finished: bool,
}

impl ProgressSubscription {
    /// Wait for the next event.
    pub async fn next(&mut self) -> Option<ProgressEvent> {
        if self.finished {
            return None;
        }

        // An error means the publisher is gone and its last value was seen.
        if self.started && self.rx.changed().await.is_err() {
            self.finished = true;
            return None;
        }
        self.started = true;

        let event = self.rx.borrow_and_update().clone();
        if event.is_terminal() {
            self.finished = true;
        }
        Some(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle_with(
        tx_event: ProgressEvent,
    ) -> (
        watch::Sender<ProgressEvent>,
        SessionHandle,
        tokio::sync::oneshot::Sender<DownloadResult<SessionOutcome>>,
    ) {
        let (tx, rx) = watch::channel(tx_event);
        let (done_tx, done_rx) = tokio::sync::oneshot::channel();
        let task = tokio::spawn(async move {
            done_rx
                .await
                .unwrap_or(Err(DownloadError::Worker("dropped".to_string())))
        });
        let handle = SessionHandle::new(
            CancellationToken::new(),
            rx,
            Arc::new(RwLock::new(Vec::new())),
            task,
        );
        (tx, handle, done_tx)
    }

    #[tokio::test]
    async fn test_subscription_ends_after_terminal() {
        let (tx, handle, _done) = handle_with(ProgressEvent::new(SessionStatus::Planning));
        let mut sub = handle.subscribe();

        assert_eq!(sub.next().await.unwrap().status, SessionStatus::Planning);

        tx.send_replace(ProgressEvent::new(SessionStatus::Downloading));
        assert_eq!(sub.next().await.unwrap().status, SessionStatus::Downloading);

        tx.send_replace(ProgressEvent::new(SessionStatus::Completed));
        drop(tx);
        assert_eq!(sub.next().await.unwrap().status, SessionStatus::Completed);
        assert!(sub.next().await.is_none());
    }

    #[tokio::test]
    async fn test_late_subscriber_sees_terminal() {
        let (tx, handle, _done) = handle_with(ProgressEvent::new(SessionStatus::Planning));
        tx.send_replace(ProgressEvent::new(SessionStatus::Cancelled));
        drop(tx);

        let mut sub = handle.subscribe();
        assert_eq!(sub.next().await.unwrap().status, SessionStatus::Cancelled);
        assert!(sub.next().await.is_none());
        assert_eq!(handle.status(), SessionStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_subscription_ends_when_publisher_dropped() {
        let (tx, handle, _done) = handle_with(ProgressEvent::new(SessionStatus::Downloading));
        let mut sub = handle.subscribe();

        assert!(sub.next().await.is_some());
        drop(tx);
        assert!(sub.next().await.is_none());
    }

    #[tokio::test]
    async fn test_cancel_is_idempotent() {
        let (_tx, handle, done) = handle_with(ProgressEvent::default());
        let canceller = handle.canceller();

        handle.cancel();
        handle.cancel();
        canceller.cancel();
        assert!(canceller.is_cancelled());

        done.send(Ok(SessionOutcome::Cancelled { bytes_done: 0 }))
            .unwrap();
        let outcome = handle.wait().await.unwrap();
        assert_eq!(outcome.status(), SessionStatus::Cancelled);
    }
}
