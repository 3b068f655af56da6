//! Progress reporting for package transfers.
//!
//! The coordinator turns per-buffer byte counts into [`TransferProgress`]
//! events. Events are rate-limited by a [`ProgressThrottle`] and carry a
//! speed estimate from a [`SpeedTracker`].

use std::sync::Arc;
use std::time::{Duration, Instant};

/// Default minimum interval between speed samples.
pub const DEFAULT_SPEED_SAMPLE_INTERVAL: Duration = Duration::from_millis(500);

/// Default minimum interval between progress events.
pub const DEFAULT_PROGRESS_INTERVAL: Duration = Duration::from_secs(1);

/// Progress of one package transfer.
#[derive(Debug, Clone, PartialEq)]
pub struct TransferProgress {
    /// Stable package identifier.
    pub package_id: String,
    /// Bytes of the package on disk.
    pub downloaded: u64,
    /// Total package size in bytes.
    pub total: u64,
    /// Bytes per second, 0.0 between samples.
    pub speed: f64,
}

impl TransferProgress {
    /// Fraction complete (0.0 - 1.0).
    pub fn fraction(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        (self.downloaded as f64 / self.total as f64).min(1.0)
    }
}

/// Callback receiving transfer progress events.
pub type ProgressCallback = Arc<dyn Fn(TransferProgress) + Send + Sync>;

/// Bytes received for one chunk, reported once per written buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkTick {
    pub index: usize,
    /// Bytes of this chunk on disk after the write.
    pub chunk_downloaded: u64,
    /// Bytes written by this buffer.
    pub delta: u64,
}

/// Rolling transfer speed from a monotonically increasing byte counter.
///
/// A new speed is computed only once `interval` has elapsed since the last
/// sample; calls in between report zero.
#[derive(Debug)]
pub struct SpeedTracker {
    interval: Duration,
    last_sample: Instant,
    last_bytes: u64,
}

impl SpeedTracker {
    /// Start tracking from `initial_bytes` already downloaded.
    pub fn new(interval: Duration, initial_bytes: u64) -> Self {
        Self::starting_at(interval, initial_bytes, Instant::now())
    }

    pub fn starting_at(interval: Duration, initial_bytes: u64, now: Instant) -> Self {
        Self {
            interval,
            last_sample: now,
            last_bytes: initial_bytes,
        }
    }

    /// Sample the speed for `total_bytes` downloaded so far.
    pub fn sample(&mut self, total_bytes: u64) -> f64 {
        self.sample_at(total_bytes, Instant::now())
    }

    pub fn sample_at(&mut self, total_bytes: u64, now: Instant) -> f64 {
        let elapsed = now.saturating_duration_since(self.last_sample);
        if elapsed < self.interval || elapsed.is_zero() {
            return 0.0;
        }
        let delta = total_bytes.saturating_sub(self.last_bytes);
        self.last_sample = now;
        self.last_bytes = total_bytes;
        delta as f64 / elapsed.as_secs_f64()
    }
}

/// Limits how often progress events are emitted.
#[derive(Debug)]
pub struct ProgressThrottle {
    interval: Duration,
    last_emit: Option<Instant>,
}

impl ProgressThrottle {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_emit: None,
        }
    }

    /// Returns true if an event may be emitted at `now`. The first call
    /// always passes.
    pub fn ready_at(&mut self, now: Instant) -> bool {
        match self.last_emit {
            Some(last) if now.saturating_duration_since(last) < self.interval => false,
            _ => {
                self.last_emit = Some(now);
                true
            }
        }
    }

    pub fn ready(&mut self) -> bool {
        self.ready_at(Instant::now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_speed_zero_below_interval() {
        let start = Instant::now();
        let mut tracker = SpeedTracker::starting_at(Duration::from_millis(500), 0, start);
        assert_eq!(tracker.sample_at(10_000, start + Duration::from_millis(100)), 0.0);
        assert_eq!(tracker.sample_at(20_000, start + Duration::from_millis(499)), 0.0);
    }

    #[test]
    fn test_speed_after_interval() {
        let start = Instant::now();
        let mut tracker = SpeedTracker::starting_at(Duration::from_millis(500), 1_000, start);
        let speed = tracker.sample_at(2_000, start + Duration::from_secs(1));
        assert!((speed - 1_000.0).abs() < 1e-6);

        // Next window measures from the previous sample.
        let speed = tracker.sample_at(5_000, start + Duration::from_secs(2));
        assert!((speed - 3_000.0).abs() < 1e-6);
    }

    #[test]
    fn test_throttle_first_call_passes() {
        let now = Instant::now();
        let mut throttle = ProgressThrottle::new(Duration::from_secs(1));
        assert!(throttle.ready_at(now));
        assert!(!throttle.ready_at(now + Duration::from_millis(500)));
        assert!(throttle.ready_at(now + Duration::from_secs(1)));
    }

    #[test]
    fn test_progress_fraction() {
        let progress = TransferProgress {
            package_id: "p".to_string(),
            downloaded: 50,
            total: 200,
            speed: 0.0,
        };
        assert_eq!(progress.fraction(), 0.25);

        let empty = TransferProgress { total: 0, ..progress };
        assert_eq!(empty.fraction(), 0.0);
    }
}
