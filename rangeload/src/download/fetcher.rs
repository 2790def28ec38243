//! Per-chunk range fetching.
//!
//! A [`ChunkFetcher`] performs one `Range` request and streams the body into
//! the shared [`OutputSink`] at the chunk's offset. Progress leaves the worker
//! only as [`ChunkReport`] messages; the coordinator is the single aggregator.
//!
//! Cancellation is raced against every network await. Disk writes are never
//! raced: a write that has started always finishes, so the reported byte
//! count matches the file and no write can outlive the worker.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::time::{timeout, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use super::http::{BodyStream, RangeClient};
use super::planner::ByteRange;
use super::sink::OutputSink;
use crate::config::{DEFAULT_BUFFER_SIZE, DEFAULT_PROGRESS_INTERVAL, DEFAULT_STALL_TIMEOUT};
use crate::error::{DownloadError, DownloadResult};

/// HTTP status for a satisfied range request.
const STATUS_PARTIAL_CONTENT: u16 = 206;

/// HTTP status for a full-body response.
const STATUS_OK: u16 = 200;

/// Cumulative bytes written by one chunk, sent from worker to coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkReport {
    /// Chunk index within the plan.
    pub index: usize,
    /// Bytes written so far (cumulative, never decreasing).
    pub bytes_written: u64,
}

/// Downloads single byte ranges of one URL.
///
/// One fetcher is shared by all workers of a session; each call to
/// [`fetch`](Self::fetch) handles one chunk.
pub struct ChunkFetcher {
    client: Arc<dyn RangeClient>,
    url: String,
    buffer_size: usize,
    stall_timeout: Duration,
    progress_interval: Duration,
}

impl std::fmt::Debug for ChunkFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkFetcher")
            .field("url", &self.url)
            .field("buffer_size", &self.buffer_size)
            .field("stall_timeout", &self.stall_timeout)
            .field("progress_interval", &self.progress_interval)
            .finish_non_exhaustive()
    }
}

impl ChunkFetcher {
    /// Create a fetcher with default buffer size, stall timeout and
    /// reporting interval.
    pub fn new(client: Arc<dyn RangeClient>, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
            buffer_size: DEFAULT_BUFFER_SIZE,
            stall_timeout: DEFAULT_STALL_TIMEOUT,
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
        }
    }

    /// Set the largest single write into the sink.
    pub fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size.max(1);
        self
    }

    /// Set how long a chunk may go without receiving bytes.
    pub fn with_stall_timeout(mut self, stall_timeout: Duration) -> Self {
        self.stall_timeout = stall_timeout;
        self
    }

    /// Set the minimum spacing between intermediate progress reports.
    pub fn with_progress_interval(mut self, progress_interval: Duration) -> Self {
        self.progress_interval = progress_interval;
        self
    }

    /// Fetch `range` as chunk `index` and write it into `sink`.
    ///
    /// Returns the number of bytes written, which equals `range.len()` on
    /// success. A final [`ChunkReport`] is sent on every exit path, so the
    /// coordinator always learns how far the chunk got.
    ///
    /// # Errors
    ///
    /// * [`DownloadError::Cancelled`] if `cancel` fires
    /// * [`DownloadError::RangeUnsupported`] if the server answers 200
    /// * [`DownloadError::StallTimeout`] if no bytes arrive within the stall interval
    /// * [`DownloadError::ChunkIo`] for any other transfer failure
    /// * [`DownloadError::Write`] if the sink rejects a write
    pub async fn fetch(
        &self,
        index: usize,
        range: ByteRange,
        sink: &OutputSink,
        cancel: &CancellationToken,
        reports: &mpsc::Sender<ChunkReport>,
    ) -> DownloadResult<u64> {
        let mut written = 0u64;
        let result = self
            .transfer(index, range, sink, cancel, reports, &mut written)
            .await;

        // Receiver gone means the session is already tearing down.
        let _ = reports
            .send(ChunkReport {
                index,
                bytes_written: written,
            })
            .await;

        match &result {
            Ok(()) => debug!(chunk = index, range = %range, bytes = written, "Chunk complete"),
            Err(e) => debug!(chunk = index, range = %range, bytes = written, error = %e, "Chunk stopped"),
        }

        result.map(|()| written)
    }

    async fn transfer(
        &self,
        index: usize,
        range: ByteRange,
        sink: &OutputSink,
        cancel: &CancellationToken,
        reports: &mpsc::Sender<ChunkReport>,
        written: &mut u64,
    ) -> DownloadResult<()> {
        let expected = range.len();

        trace!(chunk = index, range = %range, "Requesting range");
        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(DownloadError::Cancelled),
            result = timeout(self.stall_timeout, self.client.get_range(&self.url, range)) => {
                match result {
                    Err(_) => return Err(self.stalled(index)),
                    Ok(Err(reason)) => return Err(DownloadError::chunk_io(index, reason)),
                    Ok(Ok(response)) => response,
                }
            }
        };

        match response.status {
            STATUS_PARTIAL_CONTENT => {}
            STATUS_OK => {
                return Err(DownloadError::RangeUnsupported {
                    url: self.url.clone(),
                    status: response.status,
                })
            }
            status => {
                return Err(DownloadError::chunk_io(
                    index,
                    format!("unexpected status {}", status),
                ))
            }
        }

        if let Some(length) = response.content_length {
            if length != expected {
                return Err(DownloadError::chunk_io(
                    index,
                    format!(
                        "content length {} does not match range length {}",
                        length, expected
                    ),
                ));
            }
        }

        if let Some(served) = response.content_range {
            if served != range {
                return Err(DownloadError::chunk_io(
                    index,
                    format!("server sent bytes {} for requested {}", served, range),
                ));
            }
        }

        let mut body: BodyStream = response.body;
        let mut last_report = Instant::now();

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(DownloadError::Cancelled),
                next = timeout(self.stall_timeout, body.next()) => next,
            };

            let piece = match next {
                Err(_) => return Err(self.stalled(index)),
                Ok(None) => break,
                Ok(Some(Err(reason))) => return Err(DownloadError::chunk_io(index, reason)),
                Ok(Some(Ok(piece))) => piece,
            };

            if *written + piece.len() as u64 > expected {
                return Err(DownloadError::chunk_io(
                    index,
                    format!("body overran range length {}", expected),
                ));
            }

            self.write_piece(range, sink, piece, written).await?;

            if last_report.elapsed() >= self.progress_interval {
                let _ = reports
                    .send(ChunkReport {
                        index,
                        bytes_written: *written,
                    })
                    .await;
                last_report = Instant::now();
            }
        }

        if *written != expected {
            return Err(DownloadError::chunk_io(
                index,
                format!("body ended after {} of {} bytes", written, expected),
            ));
        }

        Ok(())
    }

    /// Write one network piece in writes of at most `buffer_size` bytes.
    async fn write_piece(
        &self,
        range: ByteRange,
        sink: &OutputSink,
        mut piece: Bytes,
        written: &mut u64,
    ) -> DownloadResult<()> {
        while !piece.is_empty() {
            let n = piece.len().min(self.buffer_size);
            let part = piece.split_to(n);
            sink.write_at(range.start + *written, part).await?;
            *written += n as u64;
        }
        Ok(())
    }

    fn stalled(&self, index: usize) -> DownloadError {
        DownloadError::StallTimeout {
            chunk: index,
            timeout: self.stall_timeout,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::download::http::tests::MockRangeClient;
    use crate::download::http::{BoxFuture, RangeResponse, RemoteMetadata};
    use futures::stream;
    use tempfile::TempDir;

    /// Client that answers every range request with the same canned response.
    struct CannedClient {
        status: u16,
        content_length: Option<u64>,
        content_range: Option<ByteRange>,
        pieces: Vec<Result<Bytes, String>>,
        hang_after: bool,
    }

    impl CannedClient {
        fn new(status: u16, pieces: Vec<Result<Bytes, String>>) -> Self {
            Self {
                status,
                content_length: None,
                content_range: None,
                pieces,
                hang_after: false,
            }
        }
    }

    impl RangeClient for CannedClient {
        fn probe<'a>(&'a self, _url: &'a str) -> BoxFuture<'a, DownloadResult<RemoteMetadata>> {
            Box::pin(async {
                Ok(RemoteMetadata {
                    content_length: None,
                    accepts_ranges: true,
                })
            })
        }

        fn get_range<'a>(
            &'a self,
            _url: &'a str,
            _range: ByteRange,
        ) -> BoxFuture<'a, Result<RangeResponse, String>> {
            let pieces = stream::iter(self.pieces.clone());
            let body = if self.hang_after {
                pieces.chain(stream::pending()).boxed()
            } else {
                pieces.boxed()
            };
            let status = self.status;
            let content_length = self.content_length;
            let content_range = self.content_range;
            Box::pin(async move {
                Ok(RangeResponse {
                    status,
                    content_length,
                    content_range,
                    body,
                })
            })
        }
    }

    struct Fixture {
        _dir: TempDir,
        sink: OutputSink,
        cancel: CancellationToken,
        tx: mpsc::Sender<ChunkReport>,
        rx: mpsc::Receiver<ChunkReport>,
    }

    impl Fixture {
        async fn new(size: u64) -> Self {
            let dir = TempDir::new().unwrap();
            let sink = OutputSink::open(dir.path().join("out.bin"), size)
                .await
                .unwrap();
            let (tx, rx) = mpsc::channel(64);
            Self {
                _dir: dir,
                sink,
                cancel: CancellationToken::new(),
                tx,
                rx,
            }
        }

        async fn fetch(&self, fetcher: &ChunkFetcher, range: ByteRange) -> DownloadResult<u64> {
            fetcher
                .fetch(0, range, &self.sink, &self.cancel, &self.tx)
                .await
        }

        fn last_report(&mut self) -> Option<ChunkReport> {
            let mut last = None;
            while let Ok(report) = self.rx.try_recv() {
                last = Some(report);
            }
            last
        }

        fn contents(&self) -> Vec<u8> {
            std::fs::read(self.sink.path()).unwrap()
        }
    }

    fn ok(data: &'static [u8]) -> Result<Bytes, String> {
        Ok(Bytes::from_static(data))
    }

    #[tokio::test]
    async fn test_fetch_writes_range_at_offset() {
        let mut fx = Fixture::new(20).await;
        let client = Arc::new(MockRangeClient::new(&b"abcdefghijklmnopqrst"[..]));
        let fetcher = ChunkFetcher::new(client, "http://example.com/f.bin");

        let written = fx.fetch(&fetcher, ByteRange::new(5, 14)).await.unwrap();
        assert_eq!(written, 10);

        let contents = fx.contents();
        assert_eq!(&contents[5..15], b"fghijklmno");
        assert!(contents[..5].iter().all(|&b| b == 0));
        assert_eq!(
            fx.last_report(),
            Some(ChunkReport {
                index: 0,
                bytes_written: 10
            })
        );
    }

    #[tokio::test]
    async fn test_fetch_splits_large_pieces() {
        let fx = Fixture::new(16).await;
        let client = CannedClient::new(206, vec![ok(b"0123456789abcdef")]);
        let fetcher =
            ChunkFetcher::new(Arc::new(client), "http://example.com/f.bin").with_buffer_size(3);

        let written = fx.fetch(&fetcher, ByteRange::new(0, 15)).await.unwrap();
        assert_eq!(written, 16);
        assert_eq!(fx.contents(), b"0123456789abcdef");
    }

    #[tokio::test]
    async fn test_fetch_status_200_is_range_unsupported() {
        let fx = Fixture::new(4).await;
        let client = CannedClient::new(200, vec![ok(b"abcd")]);
        let fetcher = ChunkFetcher::new(Arc::new(client), "http://example.com/f.bin");

        let result = fx.fetch(&fetcher, ByteRange::new(0, 3)).await;
        assert!(matches!(
            result,
            Err(DownloadError::RangeUnsupported { status: 200, .. })
        ));
    }

    #[tokio::test]
    async fn test_fetch_server_error_is_chunk_failure() {
        let fx = Fixture::new(4).await;
        let client = CannedClient::new(503, vec![]);
        let fetcher = ChunkFetcher::new(Arc::new(client), "http://example.com/f.bin");

        let err = fx.fetch(&fetcher, ByteRange::new(0, 3)).await.unwrap_err();
        assert!(err.is_chunk_failure());
        assert!(err.to_string().contains("503"));
    }

    #[tokio::test]
    async fn test_fetch_content_length_mismatch() {
        let fx = Fixture::new(8).await;
        let mut client = CannedClient::new(206, vec![ok(b"abcd")]);
        client.content_length = Some(4);
        let fetcher = ChunkFetcher::new(Arc::new(client), "http://example.com/f.bin");

        let err = fx.fetch(&fetcher, ByteRange::new(0, 7)).await.unwrap_err();
        assert!(matches!(err, DownloadError::ChunkIo { chunk: 0, .. }));
    }

    #[tokio::test]
    async fn test_fetch_shifted_content_range() {
        let fx = Fixture::new(8).await;
        let mut client = CannedClient::new(206, vec![ok(b"efgh")]);
        client.content_length = Some(4);
        client.content_range = Some(ByteRange::new(4, 7));
        let fetcher = ChunkFetcher::new(Arc::new(client), "http://example.com/f.bin");

        let err = fx.fetch(&fetcher, ByteRange::new(0, 3)).await.unwrap_err();
        assert!(matches!(err, DownloadError::ChunkIo { chunk: 0, .. }));
        assert!(err.to_string().contains("4-7"));
        assert_eq!(fx.contents(), vec![0u8; 8]);
    }

    #[tokio::test]
    async fn test_fetch_short_body() {
        let mut fx = Fixture::new(8).await;
        let client = CannedClient::new(206, vec![ok(b"abc")]);
        let fetcher = ChunkFetcher::new(Arc::new(client), "http://example.com/f.bin");

        let err = fx.fetch(&fetcher, ByteRange::new(0, 7)).await.unwrap_err();
        assert!(err.to_string().contains("body ended after 3 of 8 bytes"));
        assert_eq!(fx.last_report().map(|r| r.bytes_written), Some(3));
    }

    #[tokio::test]
    async fn test_fetch_body_overrun() {
        let fx = Fixture::new(8).await;
        let client = CannedClient::new(206, vec![ok(b"abc"), ok(b"defgh")]);
        let fetcher = ChunkFetcher::new(Arc::new(client), "http://example.com/f.bin");

        let err = fx.fetch(&fetcher, ByteRange::new(0, 3)).await.unwrap_err();
        assert!(err.to_string().contains("overran"));
        // Nothing past the range was written.
        assert_eq!(&fx.contents()[..4], b"abc\0");
    }

    #[tokio::test]
    async fn test_fetch_body_error() {
        let fx = Fixture::new(8).await;
        let client = CannedClient::new(206, vec![ok(b"ab"), Err("connection reset".to_string())]);
        let fetcher = ChunkFetcher::new(Arc::new(client), "http://example.com/f.bin");

        let err = fx.fetch(&fetcher, ByteRange::new(0, 7)).await.unwrap_err();
        assert!(err.to_string().contains("connection reset"));
    }

    #[tokio::test]
    async fn test_fetch_stall_timeout() {
        let fx = Fixture::new(8).await;
        let mut client = CannedClient::new(206, vec![ok(b"ab")]);
        client.hang_after = true;
        let fetcher = ChunkFetcher::new(Arc::new(client), "http://example.com/f.bin")
            .with_stall_timeout(Duration::from_millis(50));

        let err = fx.fetch(&fetcher, ByteRange::new(0, 7)).await.unwrap_err();
        assert!(matches!(err, DownloadError::StallTimeout { chunk: 0, .. }));
        assert!(err.is_chunk_failure());
    }

    #[tokio::test]
    async fn test_fetch_already_cancelled() {
        let fx = Fixture::new(4).await;
        let client = Arc::new(MockRangeClient::new(&b"abcd"[..]));
        let fetcher = ChunkFetcher::new(client.clone(), "http://example.com/f.bin");

        fx.cancel.cancel();
        let result = fx.fetch(&fetcher, ByteRange::new(0, 3)).await;
        assert!(matches!(result, Err(DownloadError::Cancelled)));
        assert_eq!(client.requests(), 0);
    }

    #[tokio::test]
    async fn test_fetch_cancelled_mid_stream() {
        let mut fx = Fixture::new(8).await;
        let mut client = CannedClient::new(206, vec![ok(b"abcd")]);
        client.hang_after = true;
        let fetcher = ChunkFetcher::new(Arc::new(client), "http://example.com/f.bin");

        let cancel = fx.cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            cancel.cancel();
        });

        let result = fx.fetch(&fetcher, ByteRange::new(0, 7)).await;
        assert!(matches!(result, Err(DownloadError::Cancelled)));
        assert_eq!(fx.last_report().map(|r| r.bytes_written), Some(4));
        assert_eq!(&fx.contents()[..4], b"abcd");
    }
}
