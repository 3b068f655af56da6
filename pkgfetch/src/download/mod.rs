//! Chunked, resumable package transfers.
//!
//! This module holds everything below the task level:
//!
//! - [`chunk`]: the segment planner turning a size and optional
//!   [`IntegrityManifest`] into an ordered list of [`DownloadChunk`]s
//! - [`RangeExecutor`]: fetches one chunk with an HTTP range request and
//!   writes it at its offset
//! - [`ChunkStateStore`]: per-package chunk checkpoints (`.chunkstate` files)
//! - [`TransferCoordinator`]: runs all chunks of one package in order
//! - [`checksum`]: SHA-256 verification of ranges already on disk
//!
//! # Example
//!
//! ```ignore
//! use pkgfetch::download::{PackageRequest, TransferCoordinator};
//!
//! let outcome = coordinator.transfer(&request, &handle, &on_progress).await?;
//! println!("{} bytes from the network", outcome.bytes_downloaded);
//! ```

pub mod checksum;
pub mod chunk;
mod coordinator;
mod error;
mod http;
mod progress;
mod state;

pub use chunk::{plan_chunks, DownloadChunk, IntegrityManifest, PlanOptions, SegmentHash, DEFAULT_CHUNK_SIZE};
pub use coordinator::{PackageOutcome, PackageRequest, TransferCoordinator};
pub use error::{codes, DownloadError, DownloadResult};
pub use http::{ChunkFetch, RangeExecutor, RemoteObject, DEFAULT_TIMEOUT_SECS};
pub use progress::{
    ChunkTick, ProgressCallback, ProgressThrottle, SpeedTracker, TransferProgress,
    DEFAULT_PROGRESS_INTERVAL, DEFAULT_SPEED_SAMPLE_INTERVAL,
};
pub use state::{ChunkStateStore, ChunkedTransferState};

pub(crate) use state::write_atomic;
