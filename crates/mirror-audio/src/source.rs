//! One registered PCM producer.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use tracing::debug;

use mirror_ipc::MixerSettings;

use crate::convert::FormatConverter;
use crate::{duration_of_samples, samples_for_ms, AudioResult, SourceId};

/// Buffer levels that trigger latency trimming, in interleaved samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct LatencyBounds {
    pub high_water: usize,
    pub target: usize,
}

impl LatencyBounds {
    pub fn from_settings(settings: &MixerSettings) -> Self {
        Self {
            high_water: samples_for_ms(settings.high_water_ms),
            target: samples_for_ms(settings.target_latency_ms),
        }
    }
}

struct SourceBuffer {
    converter: FormatConverter,
    pending: VecDeque<i16>,
}

/// A PCM producer feeding the mixer.
///
/// Holds converted 48 kHz stereo samples that the mixer has not read yet.
/// Each source has its own locks, so pushing to one never waits on another.
pub struct AudioSource {
    id: SourceId,
    buffer: Mutex<SourceBuffer>,
    volume: RwLock<f32>,
    last_activity: Mutex<Instant>,
    discarded_samples: AtomicU64,
}

impl AudioSource {
    pub fn new(id: SourceId, sample_rate: u32, channels: u16) -> AudioResult<Self> {
        Ok(Self {
            id,
            buffer: Mutex::new(SourceBuffer {
                converter: FormatConverter::new(sample_rate, channels)?,
                pending: VecDeque::new(),
            }),
            volume: RwLock::new(1.0),
            last_activity: Mutex::new(Instant::now()),
            discarded_samples: AtomicU64::new(0),
        })
    }

    pub fn id(&self) -> SourceId {
        self.id
    }

    /// Input sample rate and channel count.
    pub fn format(&self) -> (u32, u16) {
        let buffer = self.buffer.lock();
        (buffer.converter.sample_rate(), buffer.converter.channels())
    }

    /// Convert and queue interleaved samples.
    pub fn push(&self, samples: &[i16]) {
        self.touch();
        let mut buffer = self.buffer.lock();
        let SourceBuffer { converter, pending } = &mut *buffer;
        converter.process(samples, pending);
    }

    /// Queue little-endian 16-bit PCM bytes. A trailing odd byte is ignored.
    pub fn push_bytes(&self, bytes: &[u8]) {
        let samples: Vec<i16> = bytes
            .chunks_exact(2)
            .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
            .collect();
        self.push(&samples);
    }

    /// Trim the queue if it grew past the high-water mark, then move up to
    /// `out.len()` samples into `out`. Returns the number of samples read.
    pub(crate) fn pull(&self, out: &mut [i16], bounds: LatencyBounds) -> usize {
        let read = {
            let mut buffer = self.buffer.lock();
            let queued = buffer.pending.len();
            if queued > bounds.high_water {
                let excess = queued - bounds.target.min(queued);
                buffer.pending.drain(..excess);
                self.discarded_samples
                    .fetch_add(excess as u64, Ordering::Relaxed);
                debug!(
                    source_id = %self.id,
                    buffered_ms = duration_of_samples(queued).as_millis() as u64,
                    discarded_ms = duration_of_samples(excess).as_millis() as u64,
                    "Source latency too high, dropping oldest audio"
                );
            }

            let read = out.len().min(buffer.pending.len());
            for (slot, sample) in out.iter_mut().zip(buffer.pending.drain(..read)) {
                *slot = sample;
            }
            read
        };

        if read > 0 {
            self.touch();
        }
        read
    }

    /// Drop everything queued.
    pub fn clear(&self) {
        let mut buffer = self.buffer.lock();
        buffer.pending.clear();
        buffer.converter.reset();
    }

    /// Playback time of the queued samples.
    pub fn buffered(&self) -> Duration {
        duration_of_samples(self.buffer.lock().pending.len())
    }

    pub fn set_volume(&self, volume: f32) {
        *self.volume.write() = volume.max(0.0);
    }

    pub fn volume(&self) -> f32 {
        *self.volume.read()
    }

    /// Time since the last push or successful read.
    pub fn idle_for(&self) -> Duration {
        self.last_activity.lock().elapsed()
    }

    /// Samples dropped by latency trimming.
    pub fn discarded_samples(&self) -> u64 {
        self.discarded_samples.load(Ordering::Relaxed)
    }

    fn touch(&self) {
        *self.last_activity.lock() = Instant::now();
    }
}
