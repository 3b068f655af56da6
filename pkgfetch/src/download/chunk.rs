//! Byte-range planning for a single remote object.
//!
//! A remote object is split into an ordered list of [`DownloadChunk`]s that
//! cover `0..total_size` without gaps or overlaps. Boundaries come from an
//! [`IntegrityManifest`] when one is supplied; otherwise the object is cut
//! into fixed-size chunks when the server accepts range requests, or fetched
//! as one chunk when it does not.
//!
//! Planning is a pure function of its inputs. Resume relies on this: a
//! persisted chunk plan is only reused when a fresh plan over the same
//! inputs produces identical boundaries.

use serde::{Deserialize, Serialize};

use super::error::{DownloadError, DownloadResult};

/// Default chunk size for fixed-size planning (2 MiB).
pub const DEFAULT_CHUNK_SIZE: u64 = 2 * 1024 * 1024;

/// One byte range of a remote object.
///
/// `start_offset` and `end_offset` are inclusive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadChunk {
    pub index: usize,
    pub start_offset: u64,
    pub end_offset: u64,
    pub size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_hash: Option<String>,
    #[serde(default)]
    pub downloaded_size: u64,
    #[serde(default)]
    pub is_completed: bool,
    #[serde(default)]
    pub is_paused: bool,
}

impl DownloadChunk {
    /// Create a chunk covering `start..=end`.
    pub fn new(index: usize, start_offset: u64, end_offset: u64, expected_hash: Option<String>) -> Self {
        Self {
            index,
            start_offset,
            end_offset,
            size: end_offset - start_offset + 1,
            expected_hash,
            downloaded_size: 0,
            is_completed: false,
            is_paused: false,
        }
    }

    /// Absolute file offset the next byte of this chunk goes to.
    pub fn resume_offset(&self) -> u64 {
        self.start_offset + self.downloaded_size
    }

    /// Bytes still missing from this chunk.
    pub fn remaining(&self) -> u64 {
        self.size.saturating_sub(self.downloaded_size)
    }

    /// Fraction of the chunk on disk (0.0 - 1.0).
    pub fn progress(&self) -> f64 {
        if self.size == 0 {
            return 0.0;
        }
        self.downloaded_size as f64 / self.size as f64
    }

    pub fn mark_completed(&mut self) {
        self.downloaded_size = self.size;
        self.is_completed = true;
        self.is_paused = false;
    }

    /// Forget all progress so the chunk is fetched again from its start.
    pub fn reset(&mut self) {
        self.downloaded_size = 0;
        self.is_completed = false;
        self.is_paused = false;
    }

    /// True if the range (and hash) of `other` is the same as this chunk's.
    pub fn same_range(&self, other: &DownloadChunk) -> bool {
        self.index == other.index
            && self.start_offset == other.start_offset
            && self.end_offset == other.end_offset
            && self.expected_hash == other.expected_hash
    }
}

/// Hash of one segment in an integrity manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SegmentHash {
    /// 1-based segment number.
    pub segment_number: u32,
    /// Lowercase hex SHA-256 of the segment bytes.
    pub hash: String,
}

/// Segment layout and hashes for a remote object.
///
/// Every segment is `segment_size` bytes long except the last, which is
/// `last_segment_size` bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntegrityManifest {
    pub segment_size: u64,
    pub last_segment_size: u64,
    pub segments: Vec<SegmentHash>,
}

impl IntegrityManifest {
    /// Total object size described by the manifest.
    pub fn total_size(&self) -> u64 {
        match self.segments.len() as u64 {
            0 => 0,
            n => (n - 1) * self.segment_size + self.last_segment_size,
        }
    }

    fn validate(&self) -> DownloadResult<Vec<&SegmentHash>> {
        if self.segments.is_empty() {
            return Err(DownloadError::InvalidData(
                "integrity manifest has no segments".to_string(),
            ));
        }
        if self.segment_size == 0 || self.last_segment_size == 0 {
            return Err(DownloadError::InvalidData(
                "integrity manifest segment size must be non-zero".to_string(),
            ));
        }
        if self.last_segment_size > self.segment_size {
            return Err(DownloadError::InvalidData(format!(
                "last segment ({} bytes) larger than segment size ({} bytes)",
                self.last_segment_size, self.segment_size
            )));
        }

        let mut ordered: Vec<&SegmentHash> = self.segments.iter().collect();
        ordered.sort_by_key(|s| s.segment_number);
        for (i, segment) in ordered.iter().enumerate() {
            if segment.segment_number as usize != i + 1 {
                return Err(DownloadError::InvalidData(format!(
                    "integrity manifest segment {} out of sequence (expected {})",
                    segment.segment_number,
                    i + 1
                )));
            }
        }
        Ok(ordered)
    }
}

/// Inputs to fixed-size planning that do not come from the remote object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlanOptions {
    /// Size of each fixed-size chunk.
    pub chunk_size: u64,
    /// Objects larger than this are split when ranges are supported.
    pub threshold: u64,
}

impl Default for PlanOptions {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            threshold: DEFAULT_CHUNK_SIZE,
        }
    }
}

impl PlanOptions {
    /// Chunking parameter recorded in persisted state for this plan.
    pub fn fingerprint(&self, manifest: Option<&IntegrityManifest>) -> u64 {
        manifest.map_or(self.chunk_size, |m| m.segment_size)
    }
}

/// Plan the chunks of an object of `total_size` bytes.
///
/// A manifest, when present, fully determines boundaries and hashes and must
/// describe exactly `total_size` bytes. Without one, the object is cut into
/// `options.chunk_size` pieces if it exceeds `options.threshold` and the
/// server supports ranges, and is a single chunk otherwise. An empty object
/// has no chunks.
pub fn plan_chunks(
    total_size: u64,
    manifest: Option<&IntegrityManifest>,
    supports_ranges: bool,
    options: &PlanOptions,
) -> DownloadResult<Vec<DownloadChunk>> {
    if let Some(manifest) = manifest {
        return plan_from_manifest(total_size, manifest);
    }

    if total_size == 0 {
        return Ok(Vec::new());
    }

    if !supports_ranges || total_size <= options.threshold || options.chunk_size == 0 {
        return Ok(vec![DownloadChunk::new(0, 0, total_size - 1, None)]);
    }

    let count = total_size.div_ceil(options.chunk_size);
    let chunks = (0..count)
        .map(|i| {
            let start = i * options.chunk_size;
            let end = (start + options.chunk_size - 1).min(total_size - 1);
            DownloadChunk::new(i as usize, start, end, None)
        })
        .collect();
    Ok(chunks)
}

fn plan_from_manifest(
    total_size: u64,
    manifest: &IntegrityManifest,
) -> DownloadResult<Vec<DownloadChunk>> {
    let ordered = manifest.validate()?;

    let described = manifest.total_size();
    if described != total_size {
        return Err(DownloadError::InvalidData(format!(
            "integrity manifest describes {} bytes but object is {} bytes",
            described, total_size
        )));
    }

    let last = ordered.len() - 1;
    let chunks = ordered
        .into_iter()
        .enumerate()
        .map(|(i, segment)| {
            let start = i as u64 * manifest.segment_size;
            let size = if i == last {
                manifest.last_segment_size
            } else {
                manifest.segment_size
            };
            DownloadChunk::new(i, start, start + size - 1, Some(segment.hash.to_lowercase()))
        })
        .collect();
    Ok(chunks)
}
