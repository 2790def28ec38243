//! HTTP transport abstraction for range downloads.
//!
//! The coordinator and fetchers only talk to a [`RangeClient`], which keeps
//! them testable with in-memory mock servers. [`ReqwestClient`] is the
//! production implementation.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use bytes::Bytes;
use futures::stream::{BoxStream, StreamExt};
use reqwest::header::{ACCEPT_RANGES, CONTENT_LENGTH, CONTENT_RANGE, RANGE};

use super::planner::ByteRange;
use crate::config::DEFAULT_CONNECT_TIMEOUT;
use crate::error::{DownloadError, DownloadResult};

/// Boxed future type for dyn-compatible async methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Response body as a stream of byte chunks.
pub type BodyStream = BoxStream<'static, Result<Bytes, String>>;

/// What the metadata probe learned about the remote file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemoteMetadata {
    /// Value of `Content-Length`, if the server sent one.
    pub content_length: Option<u64>,
    /// Whether the server advertised `Accept-Ranges: bytes`.
    pub accepts_ranges: bool,
}

/// Response to a single range request.
pub struct RangeResponse {
    /// HTTP status code.
    pub status: u16,
    /// Value of `Content-Length`, if present.
    pub content_length: Option<u64>,
    /// Span named by `Content-Range`, if present and well formed.
    pub content_range: Option<ByteRange>,
    /// Streaming body.
    pub body: BodyStream,
}

impl std::fmt::Debug for RangeResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RangeResponse")
            .field("status", &self.status)
            .field("content_length", &self.content_length)
            .field("content_range", &self.content_range)
            .finish_non_exhaustive()
    }
}

/// Trait for the HTTP operations a range download needs.
///
/// Implementations return the raw status of range requests; interpreting
/// 200 versus 206 is the fetcher's job.
pub trait RangeClient: Send + Sync + 'static {
    /// Query content length and range support without downloading the body.
    fn probe<'a>(&'a self, url: &'a str) -> BoxFuture<'a, DownloadResult<RemoteMetadata>>;

    /// Issue a GET carrying `Range: bytes=<start>-<end>`.
    fn get_range<'a>(
        &'a self,
        url: &'a str,
        range: ByteRange,
    ) -> BoxFuture<'a, Result<RangeResponse, String>>;
}

/// Real HTTP client implementation using reqwest.
#[derive(Debug, Clone)]
pub struct ReqwestClient {
    client: reqwest::Client,
}

impl ReqwestClient {
    /// Creates a new ReqwestClient with default configuration.
    pub fn new() -> DownloadResult<Self> {
        Self::with_settings(DEFAULT_CONNECT_TIMEOUT, None)
    }

    /// Creates a new ReqwestClient with a custom connect timeout and user agent.
    ///
    /// Only the connect phase is bounded here; body reads are bounded by the
    /// fetcher's stall timeout so that long downloads are not cut off.
    pub fn with_settings(
        connect_timeout: Duration,
        user_agent: Option<&str>,
    ) -> DownloadResult<Self> {
        let mut builder = reqwest::Client::builder().connect_timeout(connect_timeout);
        if let Some(agent) = user_agent {
            builder = builder.user_agent(agent.to_string());
        }
        let client = builder
            .build()
            .map_err(|e| DownloadError::Config(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self { client })
    }

    async fn probe_inner(&self, url: &str) -> DownloadResult<RemoteMetadata> {
        let probe_err = |reason: String| DownloadError::Probe {
            url: url.to_string(),
            reason,
        };

        // Some servers reject HEAD or omit the length there; fall back to a
        // GET whose body is dropped unread.
        if let Ok(response) = self.client.head(url).send().await {
            if response.status().is_success() {
                let metadata = metadata_from_headers(response.headers());
                if metadata.content_length.is_some() {
                    return Ok(metadata);
                }
            }
        }

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| probe_err(e.to_string()))?;

        if !response.status().is_success() {
            return Err(probe_err(format!(
                "GET request failed with status {}",
                response.status()
            )));
        }

        Ok(metadata_from_headers(response.headers()))
    }

    async fn get_range_inner(&self, url: &str, range: ByteRange) -> Result<RangeResponse, String> {
        let response = self
            .client
            .get(url)
            .header(RANGE, range.header_value())
            .send()
            .await
            .map_err(|e| format!("request failed: {}", e))?;

        let status = response.status();
        let content_length = if status.is_success() {
            response.content_length()
        } else {
            None
        };
        let content_range = response
            .headers()
            .get(CONTENT_RANGE)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_content_range);

        let body = response
            .bytes_stream()
            .map(|item| item.map_err(|e| format!("read error: {}", e)))
            .boxed();

        Ok(RangeResponse {
            status: status.as_u16(),
            content_length,
            content_range,
            body,
        })
    }
}

impl RangeClient for ReqwestClient {
    fn probe<'a>(&'a self, url: &'a str) -> BoxFuture<'a, DownloadResult<RemoteMetadata>> {
        Box::pin(self.probe_inner(url))
    }

    fn get_range<'a>(
        &'a self,
        url: &'a str,
        range: ByteRange,
    ) -> BoxFuture<'a, Result<RangeResponse, String>> {
        Box::pin(self.get_range_inner(url, range))
    }
}

/// Parse `bytes <start>-<end>/<total>` into the span it names.
fn parse_content_range(value: &str) -> Option<ByteRange> {
    let spec = value.trim().strip_prefix("bytes")?.trim_start();
    let (span, _total) = spec.split_once('/')?;
    let (start, end) = span.split_once('-')?;
    let start = start.trim().parse::<u64>().ok()?;
    let end = end.trim().parse::<u64>().ok()?;
    (start <= end).then(|| ByteRange::new(start, end))
}

fn metadata_from_headers(headers: &reqwest::header::HeaderMap) -> RemoteMetadata {
    let content_length = headers
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse::<u64>().ok());

    let accepts_ranges = headers
        .get(ACCEPT_RANGES)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim().eq_ignore_ascii_case("bytes"))
        .unwrap_or(false);

    RemoteMetadata {
        content_length,
        accepts_ranges,
    }
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use futures::stream;
    use reqwest::header::{HeaderMap, HeaderValue};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// In-memory server holding one file.
    ///
    /// Serves 206 with the requested slice in `piece_size` pieces.
    pub struct MockRangeClient {
        pub data: Bytes,
        pub piece_size: usize,
        pub ignore_range: bool,
        pub requests: AtomicUsize,
    }

    impl MockRangeClient {
        pub fn new(data: impl Into<Bytes>) -> Self {
            Self {
                data: data.into(),
                piece_size: 7,
                ignore_range: false,
                requests: AtomicUsize::new(0),
            }
        }

        pub fn requests(&self) -> usize {
            self.requests.load(Ordering::SeqCst)
        }
    }

    impl RangeClient for MockRangeClient {
        fn probe<'a>(&'a self, _url: &'a str) -> BoxFuture<'a, DownloadResult<RemoteMetadata>> {
            let len = self.data.len() as u64;
            Box::pin(async move {
                Ok(RemoteMetadata {
                    content_length: Some(len),
                    accepts_ranges: true,
                })
            })
        }

        fn get_range<'a>(
            &'a self,
            _url: &'a str,
            range: ByteRange,
        ) -> BoxFuture<'a, Result<RangeResponse, String>> {
            self.requests.fetch_add(1, Ordering::SeqCst);
            let (status, slice) = if self.ignore_range {
                (200, self.data.clone())
            } else {
                (
                    206,
                    self.data.slice(range.start as usize..=range.end as usize),
                )
            };
            let pieces: Vec<Result<Bytes, String>> = slice
                .chunks(self.piece_size)
                .map(|c| Ok(Bytes::copy_from_slice(c)))
                .collect();
            let content_length = Some(slice.len() as u64);
            let content_range = (status == 206).then_some(range);
            Box::pin(async move {
                Ok(RangeResponse {
                    status,
                    content_length,
                    content_range,
                    body: stream::iter(pieces).boxed(),
                })
            })
        }
    }

    #[test]
    fn test_metadata_from_headers() {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_LENGTH, HeaderValue::from_static("1000"));
        headers.insert(ACCEPT_RANGES, HeaderValue::from_static("bytes"));

        let metadata = metadata_from_headers(&headers);
        assert_eq!(metadata.content_length, Some(1000));
        assert!(metadata.accepts_ranges);
    }

    #[test]
    fn test_metadata_without_length() {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT_RANGES, HeaderValue::from_static("none"));

        let metadata = metadata_from_headers(&headers);
        assert_eq!(metadata.content_length, None);
        assert!(!metadata.accepts_ranges);
    }

    #[test]
    fn test_parse_content_range() {
        assert_eq!(
            parse_content_range("bytes 250-499/1000"),
            Some(ByteRange::new(250, 499))
        );
        assert_eq!(
            parse_content_range("bytes 0-9/*"),
            Some(ByteRange::new(0, 9))
        );
        assert_eq!(parse_content_range("bytes */1000"), None);
        assert_eq!(parse_content_range("bytes 9-0/10"), None);
        assert_eq!(parse_content_range("items 0-9/10"), None);
    }

    #[test]
    fn test_reqwest_client_new() {
        assert!(ReqwestClient::new().is_ok());
    }

    #[tokio::test]
    async fn test_mock_client_serves_slice() {
        let mock = MockRangeClient::new(&b"0123456789"[..]);
        let response = mock
            .get_range("http://example.com/f", ByteRange::new(2, 5))
            .await
            .unwrap();
        assert_eq!(response.status, 206);
        assert_eq!(response.content_length, Some(4));
        assert_eq!(response.content_range, Some(ByteRange::new(2, 5)));

        let body: Vec<u8> = response
            .body
            .map(|piece| piece.unwrap().to_vec())
            .concat()
            .await;
        assert_eq!(body, b"2345");
        assert_eq!(mock.requests(), 1);
    }
}
