//! Multi-source PCM mixing and playback.
//!
//! Every decoded stream registers a source with the [`AudioMixer`], pushes
//! interleaved 16-bit PCM in its own format, and the mixer thread sums all
//! sources into one 48 kHz stereo stream for the output device.

mod convert;
mod device;
mod error;
mod memory;
mod mixer;
mod source;

use std::fmt;
use std::time::Duration;

pub use convert::FormatConverter;
pub use device::{CpalBackend, OutputBackend, OutputDevice};
pub use error::AudioError;
pub use memory::MemoryBackend;
pub use mixer::{AudioMixer, MixerStats};
pub use source::AudioSource;

/// Result type for audio operations.
pub type AudioResult<T> = Result<T, AudioError>;

/// Output sample rate in Hz.
pub const SAMPLE_RATE: u32 = 48000;

/// Number of output channels.
pub const CHANNELS: u16 = 2;

/// Time allowed for a backend to report whether a device opened.
pub const DEVICE_OPEN_TIMEOUT: Duration = Duration::from_secs(2);

/// How long shutdown waits for the mixer thread.
pub const MIXER_JOIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Identifies a mixer source. Ids are never reused within one mixer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SourceId(pub u32);

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Interleaved output samples (both channels) covering `ms` milliseconds.
pub fn samples_for_ms(ms: u64) -> usize {
    (SAMPLE_RATE as u64 * ms / 1000) as usize * CHANNELS as usize
}

/// Playback duration of `samples` interleaved output samples.
pub fn duration_of_samples(samples: usize) -> Duration {
    let frames = (samples / CHANNELS as usize) as u64;
    Duration::from_micros(frames * 1_000_000 / SAMPLE_RATE as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_durations() {
        assert_eq!(samples_for_ms(20), 1920);
        assert_eq!(samples_for_ms(1000), 96000);
        assert_eq!(duration_of_samples(9600), Duration::from_millis(100));
    }
}
