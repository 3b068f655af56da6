//! Download task data model.
//!
//! A [`DownloadTask`] owns an ordered list of [`ComponentGroup`]s (the
//! product plus its dependencies), each owning the [`Package`]s to fetch.
//! Aggregate counters on the task are always recomputed from the packages.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::naming;
use super::status::{DownloadStatus, PackageStatus};
use crate::download::{DownloadError, DownloadResult, IntegrityManifest};
use crate::registry::ResumeToken;

/// Stable task identifier.
pub type TaskId = Uuid;

/// Package type tag from the manifest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum PackageKind {
    #[serde(rename = "core")]
    Core,
    #[default]
    #[serde(rename = "non-core")]
    NonCore,
}

impl PackageKind {
    pub fn from_manifest(value: &str) -> Self {
        if value.eq_ignore_ascii_case("core") {
            Self::Core
        } else {
            Self::NonCore
        }
    }
}

/// One downloadable file of a component group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Package {
    #[serde(rename = "type")]
    pub kind: PackageKind,
    pub full_package_name: String,
    pub download_size: u64,
    /// Path relative to the CDN base, or an absolute URL.
    pub download_url: String,
    #[serde(default)]
    pub package_version: String,
    #[serde(default)]
    pub condition: String,
    #[serde(default)]
    pub is_required: bool,
    #[serde(default)]
    pub is_selected: bool,
    #[serde(default)]
    pub status: PackageStatus,
    #[serde(default)]
    pub downloaded_size: u64,
    #[serde(default)]
    pub progress: f64,
    #[serde(default)]
    pub speed: f64,
    #[serde(default)]
    pub downloaded: bool,
    /// Segment hashes published for this package, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub integrity: Option<IntegrityManifest>,
}

impl Package {
    pub fn new(
        kind: PackageKind,
        full_package_name: impl Into<String>,
        download_size: u64,
        download_url: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            full_package_name: full_package_name.into(),
            download_size,
            download_url: download_url.into(),
            package_version: String::new(),
            condition: String::new(),
            is_required: false,
            is_selected: true,
            status: PackageStatus::Waiting,
            downloaded_size: 0,
            progress: 0.0,
            speed: 0.0,
            downloaded: false,
            integrity: None,
        }
    }

    /// Record transfer progress. `downloaded_size` never goes backwards.
    pub fn update_progress(&mut self, downloaded: u64, total: u64, speed: f64) {
        if total > 0 && total != self.download_size {
            self.download_size = total;
        }
        self.downloaded_size = self.downloaded_size.max(downloaded);
        self.progress = if self.download_size > 0 {
            (self.downloaded_size as f64 / self.download_size as f64).min(1.0)
        } else {
            0.0
        };
        self.speed = speed;
    }

    /// Mark the package as fully downloaded.
    pub fn mark_completed(&mut self) {
        self.downloaded = true;
        self.downloaded_size = self.download_size;
        self.progress = 1.0;
        self.speed = 0.0;
        self.status = PackageStatus::Completed;
    }

    /// Forget all progress, e.g. before re-fetching after corruption.
    pub fn reset(&mut self) {
        self.downloaded = false;
        self.downloaded_size = 0;
        self.progress = 0.0;
        self.speed = 0.0;
        self.status = PackageStatus::Waiting;
    }
}

/// One product or dependency within a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentGroup {
    pub code: String,
    pub version: String,
    pub build_id: String,
    /// Raw application manifest the packages were read from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manifest: Option<String>,
    #[serde(default)]
    pub packages: Vec<Package>,
}

impl ComponentGroup {
    pub fn new(code: impl Into<String>, version: impl Into<String>, build_id: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            version: version.into(),
            build_id: build_id.into(),
            manifest: None,
            packages: Vec::new(),
        }
    }

    pub fn total_packages(&self) -> usize {
        self.packages.len()
    }

    pub fn completed_packages(&self) -> usize {
        self.packages.iter().filter(|p| p.downloaded).count()
    }
}

/// Position of a package inside a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageRef {
    pub group: usize,
    pub package: usize,
}

/// Progress snapshot of one package, for display.
#[derive(Debug, Clone, PartialEq)]
pub struct PackageProgress {
    pub component: String,
    pub name: String,
    pub status: PackageStatus,
    pub downloaded_size: u64,
    pub size: u64,
    pub speed: f64,
}

/// Progress snapshot of a whole task, for display.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskProgress {
    pub total_progress: f64,
    pub total_downloaded_size: u64,
    pub total_size: u64,
    pub total_speed: f64,
    pub packages: Vec<PackageProgress>,
}

/// One acquisition of a product version into a directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadTask {
    pub id: TaskId,
    pub product_id: String,
    pub version: String,
    pub language: String,
    pub display_name: String,
    pub directory: PathBuf,
    pub platform: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default)]
    pub groups: Vec<ComponentGroup>,
    /// Package names requested explicitly; empty means the default selection.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub requested_packages: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_package: Option<PackageRef>,
    #[serde(default)]
    pub status: DownloadStatus,
    #[serde(default)]
    pub total_size: u64,
    #[serde(default)]
    pub total_downloaded_size: u64,
    #[serde(default)]
    pub total_progress: f64,
    #[serde(default)]
    pub total_speed: f64,
    /// Resume token of the current package, embedded when persisted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resume_token: Option<ResumeToken>,
}

impl DownloadTask {
    pub fn new(
        product_id: impl Into<String>,
        version: impl Into<String>,
        language: impl Into<String>,
        display_name: impl Into<String>,
        directory: impl Into<PathBuf>,
        platform: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            product_id: product_id.into(),
            version: version.into(),
            language: language.into(),
            display_name: display_name.into(),
            directory: directory.into(),
            platform: platform.into(),
            created_at: Utc::now(),
            retry_count: 0,
            groups: Vec::new(),
            requested_packages: Vec::new(),
            current_package: None,
            status: DownloadStatus::Waiting,
            total_size: 0,
            total_downloaded_size: 0,
            total_progress: 0.0,
            total_speed: 0.0,
            resume_token: None,
        }
    }

    /// Persisted file name of this task.
    pub fn file_name(&self) -> String {
        naming::task_file_name(&self.product_id, &self.version, &self.language, &self.platform)
    }

    /// True once package lists have been resolved from the catalog.
    pub fn is_resolved(&self) -> bool {
        !self.groups.is_empty()
    }

    pub fn total_packages(&self) -> usize {
        self.groups.iter().map(ComponentGroup::total_packages).sum()
    }

    pub fn completed_packages(&self) -> usize {
        self.groups.iter().map(ComponentGroup::completed_packages).sum()
    }

    /// True if every package in every group is downloaded.
    pub fn all_packages_downloaded(&self) -> bool {
        self.is_resolved()
            && self
                .groups
                .iter()
                .all(|g| g.packages.iter().all(|p| p.downloaded))
    }

    /// Positions of all packages, in transfer order.
    pub fn package_refs(&self) -> Vec<PackageRef> {
        self.groups
            .iter()
            .enumerate()
            .flat_map(|(g, group)| {
                (0..group.packages.len()).map(move |p| PackageRef { group: g, package: p })
            })
            .collect()
    }

    pub fn package(&self, at: PackageRef) -> Option<&Package> {
        self.groups.get(at.group)?.packages.get(at.package)
    }

    pub fn package_mut(&mut self, at: PackageRef) -> Option<&mut Package> {
        self.groups.get_mut(at.group)?.packages.get_mut(at.package)
    }

    pub fn current_package(&self) -> Option<&Package> {
        self.current_package.and_then(|at| self.package(at))
    }

    /// Stable identifier of the package at `at`.
    pub fn package_identifier(&self, at: PackageRef) -> Option<String> {
        let group = self.groups.get(at.group)?;
        let package = group.packages.get(at.package)?;
        Some(naming::package_identifier(
            &self.product_id,
            &self.version,
            &group.code,
            &package.full_package_name,
        ))
    }

    /// Destination path of the package at `at`.
    pub fn package_destination(&self, at: PackageRef) -> Option<PathBuf> {
        let group = self.groups.get(at.group)?;
        let package = group.packages.get(at.package)?;
        Some(naming::package_destination(
            &self.directory,
            &group.code,
            &package.full_package_name,
        ))
    }

    /// Directory of a component group.
    pub fn group_dir(&self, code: &str) -> PathBuf {
        self.directory.join(code)
    }

    /// Recompute the aggregate counters from the packages.
    pub fn refresh_totals(&mut self) {
        let packages = self.groups.iter().flat_map(|g| g.packages.iter());
        let (size, downloaded, speed) = packages.fold((0u64, 0u64, 0f64), |acc, p| {
            (acc.0 + p.download_size, acc.1 + p.downloaded_size.min(p.download_size), acc.2 + p.speed)
        });
        self.total_size = size;
        self.total_downloaded_size = downloaded;
        self.total_speed = speed;
        self.total_progress = if size > 0 {
            downloaded as f64 / size as f64
        } else {
            0.0
        };
    }

    /// Estimated seconds until completion at the current speed.
    pub fn eta_secs(&self) -> Option<f64> {
        (self.total_speed > 0.0).then(|| {
            self.total_size.saturating_sub(self.total_downloaded_size) as f64 / self.total_speed
        })
    }

    /// Move to `next`, rejecting transitions the state machine does not
    /// allow. `Completed` additionally requires every package downloaded.
    pub fn set_status(&mut self, next: DownloadStatus) -> DownloadResult<()> {
        let allowed = self.status.can_transition_to(&next)
            && (!matches!(next, DownloadStatus::Completed(_)) || self.all_packages_downloaded());
        if !allowed {
            return Err(DownloadError::InvalidTransition {
                action: format!("move to {}", next.kind()),
                status: self.status.kind().to_string(),
            });
        }
        self.status = next;
        Ok(())
    }

    /// Display snapshot of the task's progress.
    pub fn progress(&self) -> TaskProgress {
        let packages = self
            .groups
            .iter()
            .flat_map(|g| {
                g.packages.iter().map(move |p| PackageProgress {
                    component: g.code.clone(),
                    name: p.full_package_name.clone(),
                    status: p.status.clone(),
                    downloaded_size: p.downloaded_size,
                    size: p.download_size,
                    speed: p.speed,
                })
            })
            .collect();
        TaskProgress {
            total_progress: self.total_progress,
            total_downloaded_size: self.total_downloaded_size,
            total_size: self.total_size,
            total_speed: self.total_speed,
            packages,
        }
    }

    /// True if `path` lies inside the task directory.
    pub fn owns_path(&self, path: &Path) -> bool {
        path.starts_with(&self.directory)
    }
}
