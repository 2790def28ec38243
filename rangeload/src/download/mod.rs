//! Concurrent HTTP range downloads.
//!
//! This module provides:
//! - Byte-range planning (`planner`)
//! - The HTTP transport seam and its reqwest implementation (`http`)
//! - The shared, pre-sized output file (`sink`)
//! - Per-chunk range fetching (`fetcher`)
//! - Progress aggregation (`progress`) and session state (`state`)
//! - The caller-facing session handle (`session`)
//! - Session orchestration (`coordinator`)
//!
//! # Architecture
//!
//! ```text
//! DownloadCoordinator
//!         │ start(url, dir, workers) -> SessionHandle
//!         │
//!         ├── RangeClient (trait)        probe + ranged GET
//!         │       └── ReqwestClient
//!         │
//!         ├── plan()                     size -> contiguous ByteRanges
//!         │
//!         ├── OutputSink                 pre-sized file, positioned writes
//!         │
//!         ├── ChunkFetcher × N           one worker per range
//!         │       └── ChunkReport ──mpsc──┐
//!         │                               ▼
//!         └── DownloadSession + ProgressAggregator
//!                         └── ProgressEvent ──watch──> ProgressSubscription
//! ```
//!
//! # Example
//!
//! ```ignore
//! use rangeload::{DownloadCoordinator, DownloaderConfig, SessionOutcome};
//!
//! let coordinator = DownloadCoordinator::with_reqwest(DownloaderConfig::default())?;
//! let handle = coordinator.start("https://example.com/big.iso", "/tmp", 4);
//!
//! let mut progress = handle.subscribe();
//! tokio::spawn(async move {
//!     while let Some(event) = progress.next().await {
//!         println!("{:.1}%", event.percent());
//!     }
//! });
//!
//! match handle.wait().await? {
//!     SessionOutcome::Completed(report) => println!("saved {}", report.path.display()),
//!     other => println!("{:?}", other),
//! }
//! ```

mod coordinator;
mod existing;
mod fetcher;
mod http;
mod planner;
mod progress;
mod session;
mod sink;
mod state;

pub use coordinator::DownloadCoordinator;
pub use existing::{AlwaysDownload, ExistingFileCheck, SizeMatch};
pub use fetcher::{ChunkFetcher, ChunkReport};
pub use http::{
    BodyStream, BoxFuture, RangeClient, RangeResponse, RemoteMetadata, ReqwestClient,
};
pub use planner::{plan, ByteRange, DownloadPlan};
pub use progress::{ProgressAggregator, ProgressEvent};
pub use session::{Canceller, DownloadReport, ProgressSubscription, SessionHandle, SessionOutcome};
pub use sink::OutputSink;
pub use state::{ChunkState, ChunkStatus, DownloadSession, SessionStatus};
