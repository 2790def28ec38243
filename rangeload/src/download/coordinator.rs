//! Download coordinator.
//!
//! Runs one session per [`DownloadCoordinator::start`] call:
//!
//! ```text
//! Idle -> Planning -> Downloading -> Completed | Failed | Cancelled
//!            |
//!            +-> SkippedAlreadyCurrent | Failed | Cancelled
//! ```
//!
//! The session task owns all session state. Workers send it one-way
//! [`ChunkReport`]s; it publishes [`ProgressEvent`]s to subscribers through a
//! watch channel whose final value is the terminal event.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;
use reqwest::Url;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::existing::{ExistingFileCheck, SizeMatch};
use super::fetcher::{ChunkFetcher, ChunkReport};
use super::http::{RangeClient, ReqwestClient};
use super::planner::plan;
use super::progress::ProgressEvent;
use super::session::{DownloadReport, SessionHandle, SessionOutcome};
use super::sink::OutputSink;
use super::state::{ChunkState, DownloadSession, SessionStatus};
use crate::config::DownloaderConfig;
use crate::error::{DownloadError, DownloadResult};

/// Starts and runs range-download sessions.
#[derive(Clone)]
pub struct DownloadCoordinator {
    client: Arc<dyn RangeClient>,
    config: DownloaderConfig,
    existing: Arc<dyn ExistingFileCheck>,
}

impl std::fmt::Debug for DownloadCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DownloadCoordinator")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl DownloadCoordinator {
    /// Create a coordinator over `client`.
    ///
    /// Existing destination files are skipped when their size matches the
    /// remote length; see [`with_existing_check`](Self::with_existing_check).
    pub fn new(client: Arc<dyn RangeClient>, config: DownloaderConfig) -> Self {
        Self {
            client,
            config,
            existing: Arc::new(SizeMatch),
        }
    }

    /// Create a coordinator with a [`ReqwestClient`] built from `config`.
    pub fn with_reqwest(config: DownloaderConfig) -> DownloadResult<Self> {
        let client = ReqwestClient::with_settings(config.connect_timeout, Some(&config.user_agent))?;
        Ok(Self::new(Arc::new(client), config))
    }

    /// Replace the pre-existing file check.
    pub fn with_existing_check(mut self, check: impl ExistingFileCheck) -> Self {
        self.existing = Arc::new(check);
        self
    }

    /// Configuration used for new sessions.
    pub fn config(&self) -> &DownloaderConfig {
        &self.config
    }

    /// Start downloading `url` into `destination_dir` with `workers` chunks.
    ///
    /// Returns immediately; the session runs on the current tokio runtime.
    /// The file is saved under the last path segment of the URL. Errors,
    /// including invalid arguments, surface through
    /// [`SessionHandle::wait`] and the terminal progress event.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    pub fn start(
        &self,
        url: impl Into<String>,
        destination_dir: impl Into<PathBuf>,
        workers: usize,
    ) -> SessionHandle {
        let cancel = CancellationToken::new();
        let (progress_tx, progress_rx) = watch::channel(ProgressEvent::new(SessionStatus::Idle));
        let chunks = Arc::new(RwLock::new(Vec::new()));

        let task = SessionTask {
            client: Arc::clone(&self.client),
            config: self.config.clone(),
            existing: Arc::clone(&self.existing),
            url: url.into(),
            destination_dir: destination_dir.into(),
            workers,
            cancel: cancel.clone(),
            progress: progress_tx,
            chunks: Arc::clone(&chunks),
        };

        let join = tokio::spawn(task.run());
        SessionHandle::new(cancel, progress_rx, chunks, join)
    }
}

/// State owned by one running session.
struct SessionTask {
    client: Arc<dyn RangeClient>,
    config: DownloaderConfig,
    existing: Arc<dyn ExistingFileCheck>,
    url: String,
    destination_dir: PathBuf,
    workers: usize,
    cancel: CancellationToken,
    progress: watch::Sender<ProgressEvent>,
    chunks: Arc<RwLock<Vec<ChunkState>>>,
}

impl SessionTask {
    async fn run(self) -> DownloadResult<SessionOutcome> {
        let started = Instant::now();
        self.publish_status(SessionStatus::Planning);

        let result = self.execute(started).await;

        let mut terminal = self.progress.borrow().clone();
        match &result {
            Ok(outcome) => {
                terminal.status = outcome.status();
                match outcome {
                    SessionOutcome::Completed(report) => {
                        info!(
                            url = %self.url,
                            path = %report.path.display(),
                            bytes = report.total_bytes,
                            elapsed_ms = report.elapsed.as_millis() as u64,
                            "Download completed"
                        );
                    }
                    SessionOutcome::Cancelled { bytes_done } => {
                        info!(url = %self.url, bytes_done, "Download cancelled");
                    }
                    SessionOutcome::SkippedAlreadyCurrent { path, size } => {
                        terminal.total_bytes = Some(*size);
                        info!(
                            url = %self.url,
                            path = %path.display(),
                            size,
                            "Destination already current, skipping"
                        );
                    }
                }
            }
            Err(e) => {
                terminal.status = SessionStatus::Failed;
                terminal.failure = Some(e.to_string());
                warn!(url = %self.url, error = %e, "Download failed");
            }
        }
        self.progress.send_replace(terminal);

        result
    }

    async fn execute(&self, started: Instant) -> DownloadResult<SessionOutcome> {
        let file_name = file_name_from_url(&self.url)?;
        let destination = self.destination_dir.join(file_name);
        info!(
            url = %self.url,
            destination = %destination.display(),
            workers = self.workers,
            "Starting download"
        );

        let probe = timeout(self.config.stall_timeout, self.client.probe(&self.url));
        let metadata = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Ok(SessionOutcome::Cancelled { bytes_done: 0 }),
            metadata = probe => match metadata {
                Ok(metadata) => metadata?,
                Err(_) => {
                    return Err(DownloadError::Probe {
                        url: self.url.clone(),
                        reason: format!(
                            "no response within {:?}",
                            self.config.stall_timeout
                        ),
                    })
                }
            },
        };

        let total_size = match metadata.content_length {
            Some(len) if len > 0 => len,
            _ => {
                return Err(DownloadError::SizeUnknown {
                    url: self.url.clone(),
                })
            }
        };
        if !metadata.accepts_ranges {
            debug!(url = %self.url, "Server did not advertise byte ranges");
        }
        self.progress.send_modify(|event| event.total_bytes = Some(total_size));

        if self.is_current(&destination, total_size).await? {
            return Ok(SessionOutcome::SkippedAlreadyCurrent {
                path: destination,
                size: total_size,
            });
        }

        let plan = plan(total_size, self.workers)?;
        debug!(
            total_size,
            chunks = plan.worker_count(),
            "Planned ranges"
        );

        if self.cancel.is_cancelled() {
            return Ok(SessionOutcome::Cancelled { bytes_done: 0 });
        }

        let sink = Arc::new(OutputSink::open(&destination, total_size).await?);
        let mut session = DownloadSession::new(destination, plan);

        let downloaded = self.download(&mut session, &sink).await;

        // Every worker has returned; nothing can write after this.
        let closed = sink.close().await;
        let bytes_done = downloaded?;
        closed?;

        if self.cancel.is_cancelled() && !session.is_complete() {
            return Ok(SessionOutcome::Cancelled { bytes_done });
        }

        session.verify_complete()?;
        Ok(SessionOutcome::Completed(DownloadReport {
            path: session.destination().to_path_buf(),
            total_bytes: bytes_done,
            chunks: session.chunks().len(),
            elapsed: started.elapsed(),
        }))
    }

    /// Run one worker per range until all of them have returned.
    ///
    /// Returns the first chunk failure, or the bytes written if no chunk
    /// failed. Cancelled chunks are not failures.
    async fn download(
        &self,
        session: &mut DownloadSession,
        sink: &Arc<OutputSink>,
    ) -> DownloadResult<u64> {
        let fetcher = Arc::new(
            ChunkFetcher::new(Arc::clone(&self.client), self.url.clone())
                .with_buffer_size(self.config.buffer_size)
                .with_stall_timeout(self.config.stall_timeout)
                .with_progress_interval(self.config.progress_interval),
        );

        // Child token: a chunk failure stops the workers without looking
        // like a caller cancel.
        let workers_token = self.cancel.child_token();
        let (report_tx, mut report_rx) =
            mpsc::channel::<ChunkReport>(self.config.channel_capacity.max(1));
        let mut workers = JoinSet::new();

        for (index, range) in session.plan().ranges.clone().into_iter().enumerate() {
            let fetcher = Arc::clone(&fetcher);
            let sink = Arc::clone(sink);
            let token = workers_token.clone();
            let reports = report_tx.clone();
            workers.spawn(async move {
                let result = fetcher.fetch(index, range, &sink, &token, &reports).await;
                (index, result)
            });
            session.mark_in_flight(index);
        }
        drop(report_tx);

        self.publish(session, SessionStatus::Downloading);

        let mut first_failure: Option<DownloadError> = None;
        let mut reports_open = true;

        while reports_open || !workers.is_empty() {
            tokio::select! {
                report = report_rx.recv(), if reports_open => match report {
                    Some(report) => {
                        if session.apply_report(report) {
                            self.publish(session, SessionStatus::Downloading);
                        }
                    }
                    None => reports_open = false,
                },
                joined = workers.join_next(), if !workers.is_empty() => {
                    let failure = match joined {
                        Some(Ok((index, Ok(bytes)))) => {
                            debug!(chunk = index, bytes, "Chunk finished");
                            session.record_success(index, bytes);
                            None
                        }
                        Some(Ok((index, Err(e)))) if e.is_cancelled() => {
                            session.record_cancelled(index);
                            None
                        }
                        Some(Ok((index, Err(e)))) => {
                            warn!(chunk = index, error = %e, "Chunk failed");
                            session.record_failure(index, &e);
                            Some(e)
                        }
                        Some(Err(e)) => Some(DownloadError::Worker(e.to_string())),
                        None => None,
                    };

                    if let Some(e) = failure {
                        if first_failure.is_none() {
                            workers_token.cancel();
                            first_failure = Some(e);
                        }
                    }
                    self.publish(session, SessionStatus::Downloading);
                }
            }
        }

        match first_failure {
            Some(e) => {
                // Only chunks whose worker panicked are still in flight here.
                session.fail_unfinished(&e);
                self.publish(session, SessionStatus::Downloading);
                Err(e)
            }
            None => Ok(session.bytes_done()),
        }
    }

    async fn is_current(&self, path: &Path, size: u64) -> DownloadResult<bool> {
        let check = Arc::clone(&self.existing);
        let path = path.to_path_buf();
        tokio::task::spawn_blocking(move || check.is_current(&path, size))
            .await
            .map_err(|e| DownloadError::Worker(e.to_string()))
    }

    fn publish(&self, session: &DownloadSession, status: SessionStatus) {
        *self.chunks.write() = session.chunks().to_vec();
        self.progress.send_replace(session.event(status));
    }

    fn publish_status(&self, status: SessionStatus) {
        self.progress.send_modify(|event| event.status = status);
    }
}

/// Derive the destination file name from the last non-empty URL path segment.
fn file_name_from_url(url: &str) -> DownloadResult<String> {
    let invalid = |reason: &str| DownloadError::InvalidUrl {
        url: url.to_string(),
        reason: reason.to_string(),
    };

    let parsed = Url::parse(url).map_err(|e| invalid(&e.to_string()))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(invalid("only http and https are supported"));
    }

    parsed
        .path_segments()
        .and_then(|segments| segments.filter(|s| !s.is_empty()).last())
        .map(String::from)
        .ok_or_else(|| invalid("no file name in URL path"))
}
