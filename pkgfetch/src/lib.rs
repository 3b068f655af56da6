//! pkgfetch - resumable, chunked package download engine.
//!
//! The library fetches the packages that make up a product version into a
//! destination directory. Each package is split into byte ranges that are
//! fetched sequentially with HTTP range requests, checkpointed to disk after
//! every range, and verified against optional segment hashes. Whole download
//! tasks are persisted as JSON so they survive process restarts.
//!
//! # Layout
//!
//! ```text
//! DownloadManager (engine)
//!     │
//!     ├── Catalog (product lookup + raw manifests, external)
//!     ├── CancelRegistry (live transfer handles, pause/cancel flags)
//!     ├── TaskStore (one JSON file per task)
//!     └── TransferCoordinator (one package at a time)
//!             ├── planner (byte ranges)
//!             ├── RangeExecutor (HTTP range fetch + offset writes)
//!             └── ChunkStateStore (per-package chunk checkpoints)
//! ```

pub mod catalog;
pub mod config;
pub mod download;
pub mod engine;
pub mod logging;
pub mod persistence;
pub mod registry;
pub mod retry;
pub mod task;

pub use download::{DownloadError, DownloadResult};
pub use engine::{CreateTaskRequest, DownloadManager, EngineEvent};
pub use task::{DownloadStatus, DownloadTask, TaskId};

/// Version string of the library, taken from Cargo metadata.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
