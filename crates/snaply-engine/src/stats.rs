//! Recording counters.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use parking_lot::RwLock;

use snaply_ipc::RecordingStatsSnapshot;

/// Counters for one recording session, shared with the scheduler thread.
pub struct RecordingStats {
    start_time: RwLock<Option<Instant>>,
    frames_submitted: AtomicU64,
    frames_skipped: AtomicU64,
    samples_written: AtomicU64,
    write_failures: AtomicU64,
}

impl RecordingStats {
    /// Create a new collector.
    pub fn new() -> Self {
        Self {
            start_time: RwLock::new(None),
            frames_submitted: AtomicU64::new(0),
            frames_skipped: AtomicU64::new(0),
            samples_written: AtomicU64::new(0),
            write_failures: AtomicU64::new(0),
        }
    }

    /// Start the uptime clock.
    pub fn start(&self) {
        *self.start_time.write() = Some(Instant::now());
    }

    /// Record a frame drawn into the encoder.
    pub fn record_frame(&self) {
        self.frames_submitted.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a tick without a usable frame.
    pub fn record_skip(&self) {
        self.frames_skipped.fetch_add(1, Ordering::Relaxed);
    }

    /// Update pipeline-side counters.
    pub fn update_pipeline(&self, samples_written: u64, write_failures: u64) {
        self.samples_written.store(samples_written, Ordering::Relaxed);
        self.write_failures.store(write_failures, Ordering::Relaxed);
    }

    /// Frames drawn into the encoder so far.
    pub fn frames_submitted(&self) -> u64 {
        self.frames_submitted.load(Ordering::Relaxed)
    }

    /// Get current counters.
    pub fn snapshot(&self) -> RecordingStatsSnapshot {
        let uptime_ms = self
            .start_time
            .read()
            .map(|s| s.elapsed().as_millis() as u64)
            .unwrap_or(0);

        RecordingStatsSnapshot {
            frames_submitted: self.frames_submitted.load(Ordering::Relaxed),
            frames_skipped: self.frames_skipped.load(Ordering::Relaxed),
            samples_written: self.samples_written.load(Ordering::Relaxed),
            write_failures: self.write_failures.load(Ordering::Relaxed),
            uptime_ms,
        }
    }
}

impl Default for RecordingStats {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_counts() {
        let stats = RecordingStats::new();
        assert_eq!(stats.snapshot().uptime_ms, 0);

        stats.start();
        stats.record_frame();
        stats.record_frame();
        stats.record_skip();
        stats.update_pipeline(1, 1);

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.frames_submitted, 2);
        assert_eq!(snapshot.frames_skipped, 1);
        assert_eq!(snapshot.samples_written, 1);
        assert_eq!(snapshot.write_failures, 1);
    }
}
