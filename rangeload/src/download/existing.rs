//! Pre-existing destination file check.
//!
//! Before planning, the coordinator asks an [`ExistingFileCheck`] whether the
//! destination already holds a current copy of the remote file. If it does,
//! the session ends as `SkippedAlreadyCurrent` without any range request.

use std::path::Path;

/// Decides whether a local file is already a current copy of the remote one.
pub trait ExistingFileCheck: Send + Sync + 'static {
    /// Return true if `path` should be kept as-is for a remote file of
    /// `remote_size` bytes.
    fn is_current(&self, path: &Path, remote_size: u64) -> bool;
}

impl<F> ExistingFileCheck for F
where
    F: Fn(&Path, u64) -> bool + Send + Sync + 'static,
{
    fn is_current(&self, path: &Path, remote_size: u64) -> bool {
        self(path, remote_size)
    }
}

/// Treats a regular file whose size equals the remote length as current.
///
/// Size equality only: contents are not compared.
#[derive(Debug, Clone, Copy, Default)]
pub struct SizeMatch;

impl ExistingFileCheck for SizeMatch {
    fn is_current(&self, path: &Path, remote_size: u64) -> bool {
        std::fs::metadata(path)
            .map(|meta| meta.is_file() && meta.len() == remote_size)
            .unwrap_or(false)
    }
}

/// Never skips; every download runs.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysDownload;

impl ExistingFileCheck for AlwaysDownload {
    fn is_current(&self, _path: &Path, _remote_size: u64) -> bool {
        false
    }
}
