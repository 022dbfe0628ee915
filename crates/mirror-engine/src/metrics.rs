//! Metrics collection and reporting.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use parking_lot::RwLock;

use mirror_ipc::SessionMetrics;

/// Collects per-session counters from the reader threads.
pub struct MetricsCollector {
    start_time: RwLock<Option<Instant>>,
    video_units: AtomicU64,
    pictures: AtomicU64,
    pictures_dropped: AtomicU64,
    audio_packets: AtomicU64,
    corrupt_frames: AtomicU64,
    decode_errors: AtomicU64,
    bytes_received: AtomicU64,
    audio_samples_discarded: AtomicU64,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            start_time: RwLock::new(None),
            video_units: AtomicU64::new(0),
            pictures: AtomicU64::new(0),
            pictures_dropped: AtomicU64::new(0),
            audio_packets: AtomicU64::new(0),
            corrupt_frames: AtomicU64::new(0),
            decode_errors: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            audio_samples_discarded: AtomicU64::new(0),
        }
    }

    /// Start the uptime clock.
    pub fn start(&self) {
        *self.start_time.write() = Some(Instant::now());
    }

    /// Stop the uptime clock.
    pub fn stop(&self) {
        *self.start_time.write() = None;
    }

    pub fn record_video_unit(&self) {
        self.video_units.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_picture(&self) {
        self.pictures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_picture_dropped(&self) {
        self.pictures_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_audio_packet(&self) {
        self.audio_packets.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_corrupt_frames(&self, count: u64) {
        self.corrupt_frames.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_decode_error(&self) {
        self.decode_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_bytes_received(&self, bytes: u64) {
        self.bytes_received.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Latest mixer discard total. The mixer keeps the running count.
    pub fn update_audio_samples_discarded(&self, samples: u64) {
        self.audio_samples_discarded
            .store(samples, Ordering::Relaxed);
    }

    /// Get current metrics snapshot.
    pub fn snapshot(&self) -> SessionMetrics {
        let uptime_seconds = self
            .start_time
            .read()
            .map(|s| s.elapsed().as_secs())
            .unwrap_or(0);

        SessionMetrics {
            video_units: self.video_units.load(Ordering::Relaxed),
            pictures: self.pictures.load(Ordering::Relaxed),
            pictures_dropped: self.pictures_dropped.load(Ordering::Relaxed),
            audio_packets: self.audio_packets.load(Ordering::Relaxed),
            corrupt_frames: self.corrupt_frames.load(Ordering::Relaxed),
            decode_errors: self.decode_errors.load(Ordering::Relaxed),
            audio_samples_discarded: self.audio_samples_discarded.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            uptime_seconds,
        }
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}
