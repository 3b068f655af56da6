//! HTTP range transfer executor.
//!
//! [`RangeExecutor`] fetches exactly one [`DownloadChunk`] with a range
//! request and writes the body at the chunk's offset in the destination
//! file. It never retries; every failure is returned to the caller.

use std::io::SeekFrom;
use std::path::Path;
use std::time::Duration;

use bytes::Bytes;
use futures_util::StreamExt;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT_RANGES, CONTENT_LENGTH, ETAG, RANGE};
use reqwest::{Client, Response, StatusCode, Url};
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use super::checksum;
use super::chunk::DownloadChunk;
use super::error::{DownloadError, DownloadResult};
use super::progress::ChunkTick;

/// Default timeout for HTTP requests in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 300; // 5 minutes

/// What a HEAD request reported about a remote object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteObject {
    /// Content-Length, 0 when the server did not send one.
    pub total_size: u64,
    /// True if the server sent `Accept-Ranges: bytes`.
    pub supports_ranges: bool,
    pub etag: Option<String>,
}

/// Outcome of a successful chunk fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkFetch {
    /// Bytes were received from the network.
    Downloaded { bytes: u64 },
    /// The chunk was already complete on disk; no request was made.
    AlreadyOnDisk,
}

/// Fetches single chunks over HTTP.
#[derive(Debug, Clone)]
pub struct RangeExecutor {
    client: Client,
    timeout: Duration,
    headers: HeaderMap,
}

impl RangeExecutor {
    /// Create an executor with the default timeout and no extra headers.
    pub fn new() -> DownloadResult<Self> {
        Self::with_settings(Duration::from_secs(DEFAULT_TIMEOUT_SECS), &[])
    }

    /// Create an executor with a custom timeout and extra request headers.
    ///
    /// The timeout bounds connecting, waiting for response headers and each
    /// wait for the next body buffer.
    pub fn with_settings(timeout: Duration, headers: &[(String, String)]) -> DownloadResult<Self> {
        let client = Client::builder()
            .connect_timeout(timeout)
            .build()
            .map_err(|e| DownloadError::InvalidRequest(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            timeout,
            headers: build_headers(headers)?,
        })
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Query size, range support and ETag of `url` with a HEAD request.
    pub async fn probe(&self, url: &str) -> DownloadResult<RemoteObject> {
        let parsed = parse_url(url)?;
        let request = self.client.head(parsed).headers(self.headers.clone()).send();
        let response = tokio::time::timeout(self.timeout, request)
            .await
            .map_err(|_| DownloadError::timeout(url, self.timeout))?
            .map_err(|e| DownloadError::transport(url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(DownloadError::Http {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        let headers = response.headers();
        let total_size = headers
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(0);
        let supports_ranges = headers
            .get(ACCEPT_RANGES)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.eq_ignore_ascii_case("bytes"));
        let etag = headers
            .get(ETAG)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        debug!(url, total_size, supports_ranges, "Probed remote object");
        Ok(RemoteObject {
            total_size,
            supports_ranges,
            etag,
        })
    }

    /// Fetch the missing bytes of `chunk` into `destination`.
    ///
    /// Requests `start + downloaded ..= end` and writes the body at that
    /// offset. `chunk.downloaded_size` is advanced per written buffer and
    /// `on_tick` is called after each write. If `abort` is cancelled before or
    /// during the request the chunk is marked paused and
    /// [`DownloadError::Cancelled`] is returned.
    ///
    /// Bytes already on disk are used as follows: a hashed chunk whose full
    /// range is present is verified from disk and skipped on a match (a
    /// mismatch restarts the chunk); an un-hashed chunk only trusts its
    /// recorded `downloaded_size`, clamped to the file length.
    pub async fn fetch_chunk(
        &self,
        url: &str,
        destination: &Path,
        chunk: &mut DownloadChunk,
        abort: &CancellationToken,
        on_tick: &mut (dyn FnMut(ChunkTick) + Send),
    ) -> DownloadResult<ChunkFetch> {
        if abort.is_cancelled() {
            chunk.is_paused = true;
            return Err(DownloadError::Cancelled);
        }
        if chunk.is_completed {
            return Ok(ChunkFetch::AlreadyOnDisk);
        }

        let on_disk = file_len(destination).await?;
        if on_disk > chunk.end_offset && chunk.expected_hash.is_some() {
            match checksum::chunk_matches_async(destination.to_path_buf(), chunk.clone()).await? {
                Some(true) => {
                    debug!(chunk = chunk.index, "Chunk already on disk with matching hash");
                    chunk.mark_completed();
                    return Ok(ChunkFetch::AlreadyOnDisk);
                }
                _ => {
                    debug!(chunk = chunk.index, "Chunk on disk fails hash check, refetching");
                    chunk.reset();
                }
            }
        }

        let present = on_disk.saturating_sub(chunk.start_offset).min(chunk.size);
        if chunk.downloaded_size > present {
            debug!(
                chunk = chunk.index,
                recorded = chunk.downloaded_size,
                present,
                "Recorded chunk progress exceeds file length"
            );
            chunk.downloaded_size = present;
        }
        if chunk.remaining() == 0 && chunk.expected_hash.is_none() {
            chunk.mark_completed();
            return Ok(ChunkFetch::AlreadyOnDisk);
        }

        let parsed = parse_url(url)?;
        let from = chunk.resume_offset();
        let request = self
            .client
            .get(parsed)
            .headers(self.headers.clone())
            .header(RANGE, format!("bytes={}-{}", from, chunk.end_offset))
            .send();

        trace!(url, chunk = chunk.index, from, to = chunk.end_offset, "Requesting range");
        let response = tokio::select! {
            biased;
            _ = abort.cancelled() => {
                chunk.is_paused = true;
                return Err(DownloadError::Cancelled);
            }
            sent = tokio::time::timeout(self.timeout, request) => sent
                .map_err(|_| DownloadError::timeout(url, self.timeout))?
                .map_err(|e| DownloadError::transport(url, e))?,
        };

        let status = response.status();
        if !status.is_success() {
            return Err(DownloadError::Http {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }
        if status == StatusCode::OK && from > 0 {
            // The server ignored the range and is sending the whole object.
            if chunk.start_offset != 0 {
                return Err(DownloadError::InvalidData(format!(
                    "server ignored range request for {}",
                    url
                )));
            }
            chunk.downloaded_size = 0;
        }

        if let Some(parent) = destination.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| DownloadError::io(parent, e))?;
        }
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(destination)
            .await
            .map_err(|e| DownloadError::io(destination, e))?;
        file.seek(SeekFrom::Start(chunk.resume_offset()))
            .await
            .map_err(|e| DownloadError::io(destination, e))?;

        let streamed = self
            .stream_body(url, response, &mut file, destination, chunk, abort, on_tick)
            .await;
        let flushed = file
            .flush()
            .await
            .map_err(|e| DownloadError::io(destination, e));
        let bytes = streamed?;
        flushed?;

        chunk.mark_completed();
        if chunk.expected_hash.is_some() {
            if let Err(e) = checksum::verify_chunk_async(destination.to_path_buf(), chunk.clone()).await {
                chunk.reset();
                return Err(e);
            }
        }

        Ok(ChunkFetch::Downloaded { bytes })
    }

    #[allow(clippy::too_many_arguments)]
    async fn stream_body(
        &self,
        url: &str,
        response: Response,
        file: &mut File,
        destination: &Path,
        chunk: &mut DownloadChunk,
        abort: &CancellationToken,
        on_tick: &mut (dyn FnMut(ChunkTick) + Send),
    ) -> DownloadResult<u64> {
        let mut stream = response.bytes_stream();
        let mut written = 0u64;

        while chunk.downloaded_size < chunk.size {
            let next = tokio::select! {
                biased;
                _ = abort.cancelled() => {
                    chunk.is_paused = true;
                    return Err(DownloadError::Cancelled);
                }
                next = tokio::time::timeout(self.timeout, stream.next()) => next,
            };

            let Some(item) = next.map_err(|_| DownloadError::timeout(url, self.timeout))? else {
                break;
            };
            let bytes: Bytes = item.map_err(|e| DownloadError::transport(url, e))?;

            let take = (bytes.len() as u64).min(chunk.remaining()) as usize;
            file.write_all(&bytes[..take])
                .await
                .map_err(|e| DownloadError::io(destination, e))?;

            chunk.downloaded_size += take as u64;
            written += take as u64;
            on_tick(ChunkTick {
                index: chunk.index,
                chunk_downloaded: chunk.downloaded_size,
                delta: take as u64,
            });
        }

        if chunk.downloaded_size < chunk.size {
            return Err(DownloadError::Truncated {
                url: url.to_string(),
                expected: chunk.size,
                received: chunk.downloaded_size,
            });
        }
        Ok(written)
    }
}

fn parse_url(url: &str) -> DownloadResult<Url> {
    Url::parse(url).map_err(|e| DownloadError::InvalidUrl(format!("{}: {}", url, e)))
}

fn build_headers(pairs: &[(String, String)]) -> DownloadResult<HeaderMap> {
    let mut headers = HeaderMap::new();
    for (name, value) in pairs {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| DownloadError::InvalidRequest(format!("invalid header name '{}': {}", name, e)))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| DownloadError::InvalidRequest(format!("invalid value for header '{}': {}", name, e)))?;
        headers.insert(name, value);
    }
    Ok(headers)
}

/// Length of `path`, 0 when it does not exist.
pub(crate) async fn file_len(path: &Path) -> DownloadResult<u64> {
    match tokio::fs::metadata(path).await {
        Ok(meta) => Ok(meta.len()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(0),
        Err(e) => Err(DownloadError::io(path, e)),
    }
}
