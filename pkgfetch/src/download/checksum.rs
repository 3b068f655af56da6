//! SHA-256 verification of byte ranges already on disk.
//!
//! Chunk hashes are checked straight from the destination file, so a chunk
//! written in an earlier run can be validated without touching the network.
//! Hashing is blocking file I/O and runs on the blocking pool when called
//! from async code.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use super::chunk::{DownloadChunk, IntegrityManifest};
use super::error::{DownloadError, DownloadResult};

/// Buffer size for reading files during hashing (64KB).
const BUFFER_SIZE: usize = 64 * 1024;

/// Lowercase hex SHA-256 of an in-memory buffer.
pub fn sha256_hex(data: &[u8]) -> String {
    format!("{:x}", Sha256::digest(data))
}

/// Calculate the SHA-256 of `len` bytes of `path` starting at `start`.
///
/// Fails with [`DownloadError::SizeMismatch`] if the file ends before the
/// range does.
pub fn range_checksum(path: &Path, start: u64, len: u64) -> DownloadResult<String> {
    let mut file = File::open(path).map_err(|e| DownloadError::io(path, e))?;
    file.seek(SeekFrom::Start(start))
        .map_err(|e| DownloadError::io(path, e))?;

    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; BUFFER_SIZE];
    let mut remaining = len;

    while remaining > 0 {
        let want = remaining.min(BUFFER_SIZE as u64) as usize;
        let bytes_read = file
            .read(&mut buffer[..want])
            .map_err(|e| DownloadError::io(path, e))?;
        if bytes_read == 0 {
            return Err(DownloadError::SizeMismatch {
                path: path.to_path_buf(),
                expected: start + len,
                actual: start + len - remaining,
            });
        }
        hasher.update(&buffer[..bytes_read]);
        remaining -= bytes_read as u64;
    }

    Ok(format!("{:x}", hasher.finalize()))
}

/// Check a chunk's bytes on disk against its expected hash.
///
/// Returns `Ok(None)` when the chunk has no hash, `Ok(Some(true))` on match
/// and `Ok(Some(false))` on mismatch.
pub fn chunk_matches(path: &Path, chunk: &DownloadChunk) -> DownloadResult<Option<bool>> {
    let Some(expected) = chunk.expected_hash.as_deref() else {
        return Ok(None);
    };
    let actual = range_checksum(path, chunk.start_offset, chunk.size)?;
    Ok(Some(actual.eq_ignore_ascii_case(expected)))
}

/// Verify a chunk's bytes on disk, failing with a hash mismatch.
pub fn verify_chunk(path: &Path, chunk: &DownloadChunk) -> DownloadResult<()> {
    let Some(expected) = chunk.expected_hash.as_deref() else {
        return Ok(());
    };
    let actual = range_checksum(path, chunk.start_offset, chunk.size)?;
    if !actual.eq_ignore_ascii_case(expected) {
        return Err(DownloadError::HashMismatch {
            what: format!("chunk {} of {}", chunk.index, display_name(path)),
            expected: expected.to_string(),
            actual,
        });
    }
    Ok(())
}

/// Verify a finished file against every segment of its manifest and its
/// expected total size.
///
/// Any failure is reported as [`DownloadError::IntegrityFailed`].
pub fn verify_file(path: &Path, chunks: &[DownloadChunk], manifest: &IntegrityManifest) -> DownloadResult<()> {
    let expected_size = manifest.total_size();
    let actual_size = std::fs::metadata(path)
        .map_err(|e| DownloadError::io(path, e))?
        .len();
    if actual_size != expected_size {
        return Err(DownloadError::IntegrityFailed {
            path: path.to_path_buf(),
            reason: format!("expected {} bytes, found {}", expected_size, actual_size),
        });
    }

    for chunk in chunks {
        match chunk_matches(path, chunk)? {
            Some(false) => {
                return Err(DownloadError::IntegrityFailed {
                    path: path.to_path_buf(),
                    reason: format!("segment {} hash mismatch", chunk.index + 1),
                })
            }
            Some(true) | None => {}
        }
    }
    Ok(())
}

/// Async wrapper running [`chunk_matches`] on the blocking pool.
pub async fn chunk_matches_async(path: PathBuf, chunk: DownloadChunk) -> DownloadResult<Option<bool>> {
    run_blocking(path.clone(), move || chunk_matches(&path, &chunk)).await
}

/// Async wrapper running [`verify_chunk`] on the blocking pool.
pub async fn verify_chunk_async(path: PathBuf, chunk: DownloadChunk) -> DownloadResult<()> {
    run_blocking(path.clone(), move || verify_chunk(&path, &chunk)).await
}

/// Async wrapper running [`verify_file`] on the blocking pool.
pub async fn verify_file_async(
    path: PathBuf,
    chunks: Vec<DownloadChunk>,
    manifest: IntegrityManifest,
) -> DownloadResult<()> {
    run_blocking(path.clone(), move || verify_file(&path, &chunks, &manifest)).await
}

async fn run_blocking<T, F>(path: PathBuf, f: F) -> DownloadResult<T>
where
    T: Send + 'static,
    F: FnOnce() -> DownloadResult<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| DownloadError::io(path, std::io::Error::other(e)))?
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .unwrap_or_default()
        .to_string_lossy()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::download::chunk::{plan_chunks, PlanOptions, SegmentHash};
    use std::io::Write;
    use tempfile::TempDir;

    const HELLO_WORLD_SHA256: &str =
        "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9";

    fn write_file(dir: &TempDir, name: &str, data: &[u8]) -> PathBuf {
        let path = dir.path().join(name);
        let mut file = File::create(&path).unwrap();
        file.write_all(data).unwrap();
        path
    }

    #[test]
    fn test_sha256_hex() {
        assert_eq!(sha256_hex(b"hello world"), HELLO_WORLD_SHA256);
        assert_eq!(
            sha256_hex(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_range_checksum_of_middle() {
        let temp = TempDir::new().unwrap();
        let path = write_file(&temp, "data.bin", b"xxhello worldyy");
        assert_eq!(range_checksum(&path, 2, 11).unwrap(), HELLO_WORLD_SHA256);
    }

    #[test]
    fn test_range_past_end_is_size_mismatch() {
        let temp = TempDir::new().unwrap();
        let path = write_file(&temp, "short.bin", b"abc");
        let err = range_checksum(&path, 1, 10).unwrap_err();
        assert!(matches!(
            err,
            DownloadError::SizeMismatch {
                expected: 11,
                actual: 3,
                ..
            }
        ));
    }

    #[test]
    fn test_range_checksum_spanning_buffers() {
        let temp = TempDir::new().unwrap();
        let data = vec![0xABu8; 200_000];
        let path = write_file(&temp, "large.bin", &data);
        assert_eq!(
            range_checksum(&path, 1_000, 150_000).unwrap(),
            sha256_hex(&data[1_000..151_000])
        );
    }

    #[test]
    fn test_verify_chunk_mismatch_names_chunk() {
        let temp = TempDir::new().unwrap();
        let path = write_file(&temp, "pkg.zip", b"hello world");
        let chunk = DownloadChunk::new(0, 0, 10, Some("00".repeat(32)));
        match verify_chunk(&path, &chunk) {
            Err(DownloadError::HashMismatch { what, .. }) => assert_eq!(what, "chunk 0 of pkg.zip"),
            other => panic!("expected HashMismatch, got {:?}", other),
        }
    }

    #[test]
    fn test_chunk_without_hash_is_unknown() {
        let temp = TempDir::new().unwrap();
        let path = write_file(&temp, "pkg.zip", b"hello world");
        let chunk = DownloadChunk::new(0, 0, 10, None);
        assert_eq!(chunk_matches(&path, &chunk).unwrap(), None);
        assert!(verify_chunk(&path, &chunk).is_ok());
    }

    #[test]
    fn test_verify_file_against_manifest() {
        let temp = TempDir::new().unwrap();
        let data: Vec<u8> = (0..250u32).map(|i| (i % 251) as u8).collect();
        let path = write_file(&temp, "pkg.zip", &data);

        let manifest = IntegrityManifest {
            segment_size: 100,
            last_segment_size: 50,
            segments: vec![
                SegmentHash { segment_number: 1, hash: sha256_hex(&data[0..100]) },
                SegmentHash { segment_number: 2, hash: sha256_hex(&data[100..200]) },
                SegmentHash { segment_number: 3, hash: sha256_hex(&data[200..250]) },
            ],
        };
        let chunks = plan_chunks(250, Some(&manifest), true, &PlanOptions::default()).unwrap();
        assert!(verify_file(&path, &chunks, &manifest).is_ok());

        let mut corrupted = data.clone();
        corrupted[150] ^= 0xFF;
        let path = write_file(&temp, "pkg.zip", &corrupted);
        let err = verify_file(&path, &chunks, &manifest).unwrap_err();
        assert!(matches!(err, DownloadError::IntegrityFailed { .. }));
    }

    #[test]
    fn test_verify_file_rejects_wrong_size() {
        let temp = TempDir::new().unwrap();
        let path = write_file(&temp, "pkg.zip", &[0u8; 120]);
        let manifest = IntegrityManifest {
            segment_size: 100,
            last_segment_size: 10,
            segments: vec![
                SegmentHash { segment_number: 1, hash: "a".repeat(64) },
                SegmentHash { segment_number: 2, hash: "b".repeat(64) },
            ],
        };
        let err = verify_file(&path, &[], &manifest).unwrap_err();
        match err {
            DownloadError::IntegrityFailed { reason, .. } => {
                assert_eq!(reason, "expected 110 bytes, found 120")
            }
            other => panic!("expected IntegrityFailed, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_async_wrappers() {
        let temp = TempDir::new().unwrap();
        let path = write_file(&temp, "pkg.zip", b"hello world");
        let chunk = DownloadChunk::new(0, 0, 10, Some(HELLO_WORLD_SHA256.to_uppercase()));
        assert_eq!(chunk_matches_async(path.clone(), chunk.clone()).await.unwrap(), Some(true));
        assert!(verify_chunk_async(path, chunk).await.is_ok());
    }
}
