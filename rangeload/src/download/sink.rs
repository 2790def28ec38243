//! Destination file shared by all chunk workers.
//!
//! The file is created and truncated to its final size before any worker
//! starts. Workers write with positioned writes, so there is no shared cursor
//! and no locking: ranges never overlap, and each byte has exactly one writer.

use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tracing::debug;

use crate::error::{DownloadError, DownloadResult};

/// Pre-sized output file accepting offset-addressed writes.
#[derive(Debug)]
pub struct OutputSink {
    file: Arc<File>,
    path: PathBuf,
    size: u64,
    closed: AtomicBool,
}

impl OutputSink {
    /// Create (or truncate) `path` and size it to exactly `size` bytes.
    ///
    /// Missing parent directories are created.
    pub async fn open(path: impl Into<PathBuf>, size: u64) -> DownloadResult<Self> {
        let path = path.into();
        let task_path = path.clone();

        let file = tokio::task::spawn_blocking(move || create_sized(&task_path, size))
            .await
            .map_err(|e| DownloadError::Worker(e.to_string()))?
            .map_err(|source| DownloadError::FileCreate {
                path: path.clone(),
                source,
            })?;

        debug!(path = %path.display(), size, "Output file created");

        Ok(Self {
            file: Arc::new(file),
            path,
            size,
            closed: AtomicBool::new(false),
        })
    }

    /// Path of the destination file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Write `data` at `offset`.
    ///
    /// Safe to call concurrently from several tasks as long as their byte
    /// ranges are disjoint. Fails if the write would extend past the file's
    /// planned size or if the sink is closed.
    pub async fn write_at(&self, offset: u64, data: Bytes) -> DownloadResult<()> {
        if self.is_closed() {
            return Err(self.write_error(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "write after close",
            )));
        }

        let end = offset.checked_add(data.len() as u64);
        if end.map_or(true, |end| end > self.size) {
            return Err(self.write_error(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!(
                    "write of {} bytes at offset {} exceeds file size {}",
                    data.len(),
                    offset,
                    self.size
                ),
            )));
        }

        let file = Arc::clone(&self.file);
        tokio::task::spawn_blocking(move || write_all_at(&file, &data, offset))
            .await
            .map_err(|e| DownloadError::Worker(e.to_string()))?
            .map_err(|e| self.write_error(e))
    }

    /// Flush file contents to disk and refuse further writes.
    ///
    /// The handle itself is released when the sink is dropped.
    pub async fn close(&self) -> DownloadResult<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let file = Arc::clone(&self.file);
        tokio::task::spawn_blocking(move || file.sync_all())
            .await
            .map_err(|e| DownloadError::Worker(e.to_string()))?
            .map_err(|e| self.write_error(e))?;

        debug!(path = %self.path.display(), "Output file closed");
        Ok(())
    }

    fn write_error(&self, source: io::Error) -> DownloadError {
        DownloadError::Write {
            path: self.path.clone(),
            source,
        }
    }
}

fn create_sized(path: &Path, size: u64) -> io::Result<File> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)?;
    file.set_len(size)?;
    Ok(file)
}

#[cfg(unix)]
fn write_all_at(file: &File, buf: &[u8], offset: u64) -> io::Result<()> {
    use std::os::unix::fs::FileExt;
    file.write_all_at(buf, offset)
}

#[cfg(windows)]
fn write_all_at(file: &File, mut buf: &[u8], mut offset: u64) -> io::Result<()> {
    use std::os::windows::fs::FileExt;
    while !buf.is_empty() {
        match file.seek_write(buf, offset) {
            Ok(0) => {
                return Err(io::Error::new(
                    io::ErrorKind::WriteZero,
                    "failed to write whole buffer",
                ))
            }
            Ok(n) => {
                buf = &buf[n..];
                offset += n as u64;
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_open_truncates_to_size() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out.bin");
        std::fs::write(&path, vec![9u8; 4096]).unwrap();

        let sink = OutputSink::open(&path, 100).await.unwrap();
        sink.close().await.unwrap();

        let contents = std::fs::read(&path).unwrap();
        assert_eq!(contents.len(), 100);
        assert!(contents.iter().all(|&b| b == 0));
    }

    #[tokio::test]
    async fn test_open_creates_parent_directories() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested/deeper/out.bin");

        let sink = OutputSink::open(&path, 10).await.unwrap();
        assert_eq!(sink.path(), path.as_path());
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 10);
    }

    #[tokio::test]
    async fn test_open_fails_on_directory_path() {
        let dir = TempDir::new().unwrap();

        let result = OutputSink::open(dir.path(), 10).await;
        assert!(matches!(result, Err(DownloadError::FileCreate { .. })));
    }

    #[tokio::test]
    async fn test_concurrent_disjoint_writes() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out.bin");
        let sink = Arc::new(OutputSink::open(&path, 40).await.unwrap());

        let mut handles = Vec::new();
        for i in 0..4u8 {
            let sink = Arc::clone(&sink);
            handles.push(tokio::spawn(async move {
                let data = Bytes::from(vec![b'a' + i; 10]);
                sink.write_at(i as u64 * 10, data).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        sink.close().await.unwrap();

        let contents = std::fs::read(&path).unwrap();
        assert_eq!(&contents[..10], &[b'a'; 10]);
        assert_eq!(&contents[30..], &[b'd'; 10]);
    }

    #[tokio::test]
    async fn test_write_past_end_rejected() {
        let dir = TempDir::new().unwrap();
        let sink = OutputSink::open(dir.path().join("out.bin"), 8).await.unwrap();

        let result = sink.write_at(5, Bytes::from_static(b"toolong")).await;
        assert!(matches!(result, Err(DownloadError::Write { .. })));
    }

    #[tokio::test]
    async fn test_write_after_close_rejected() {
        let dir = TempDir::new().unwrap();
        let sink = OutputSink::open(dir.path().join("out.bin"), 8).await.unwrap();

        sink.close().await.unwrap();
        assert!(sink.is_closed());
        // Closing twice is fine.
        sink.close().await.unwrap();

        let result = sink.write_at(0, Bytes::from_static(b"x")).await;
        assert!(matches!(result, Err(DownloadError::Write { .. })));
    }
}
