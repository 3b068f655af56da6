//! Download tasks: data model, lifecycle status, naming and package
//! selection.

mod model;
pub mod naming;
pub mod selection;
mod status;

pub use model::{
    ComponentGroup, DownloadTask, Package, PackageKind, PackageProgress, PackageRef, TaskId,
    TaskProgress,
};
pub use status::{
    CompletionInfo, DownloadInfo, DownloadStatus, FailureInfo, PackageStatus, PauseInfo,
    PauseReason, PrepareInfo, PrepareStage, RetryInfo,
};
