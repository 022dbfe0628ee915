//! Common types shared between the engine and its front end.

use serde::{Deserialize, Serialize};

use crate::state::StreamKind;

/// Configuration for one mirroring session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Receive and decode the video stream.
    pub video: bool,

    /// Receive and play the audio stream.
    pub audio: bool,

    /// Open the control channel for input injection.
    pub control: bool,

    /// Which stream starts with the 65-byte device-name header. Only the
    /// first stream of a session carries it.
    pub handshake_on: StreamKind,

    /// Playback device name (None for the system default).
    pub audio_output_device: Option<String>,

    /// Initial global playback volume.
    pub global_volume: f32,

    /// Initial volume of the session's audio source.
    pub source_volume: f32,

    /// Mixer tuning.
    pub mixer: MixerSettings,

    /// Remove mixer sources that stayed silent this long (0 disables).
    pub idle_source_timeout_ms: u64,

    /// Interval of the playback device refresh task (0 disables).
    pub device_refresh_interval_ms: u64,

    /// Capacity of the decoded picture channel handed to the presenter.
    pub picture_channel_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            video: true,
            audio: true,
            control: true,
            handshake_on: StreamKind::Video,
            audio_output_device: None,
            global_volume: 1.0,
            source_volume: 1.0,
            mixer: MixerSettings::default(),
            idle_source_timeout_ms: 0,
            device_refresh_interval_ms: 2000,
            picture_channel_capacity: 4,
        }
    }
}

impl SessionConfig {
    /// The stream that actually reads the device-name header, given which
    /// streams are enabled. Falls back to audio when video is off.
    pub fn handshake_stream(&self) -> Option<StreamKind> {
        match self.handshake_on {
            StreamKind::Video if self.video => Some(StreamKind::Video),
            StreamKind::Audio if self.audio => Some(StreamKind::Audio),
            _ if self.video => Some(StreamKind::Video),
            _ if self.audio => Some(StreamKind::Audio),
            _ => None,
        }
    }
}

/// Mixer tuning knobs. The defaults were found empirically.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MixerSettings {
    /// Audio pulled from each source per mixing pass.
    pub quantum_ms: u64,

    /// Sleep between mixing passes.
    pub interval_ms: u64,

    /// Buffered duration above which a source is trimmed.
    pub high_water_ms: u64,

    /// Buffered duration a trimmed source is brought back to.
    pub target_latency_ms: u64,

    /// Maximum mixed audio queued ahead of the output device.
    pub max_device_backlog_ms: u64,
}

impl Default for MixerSettings {
    fn default() -> Self {
        Self {
            quantum_ms: 20,
            interval_ms: 10,
            high_water_ms: 300,
            target_latency_ms: 100,
            max_device_backlog_ms: 250,
        }
    }
}

/// A playback device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioOutputDevice {
    /// Display name, also used to select the device.
    pub name: String,

    /// Whether this is the system default.
    pub is_default: bool,
}

/// Counters for one session.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionMetrics {
    /// Video access units handed to the decoder.
    pub video_units: u64,

    /// Decoded pictures forwarded to the presenter.
    pub pictures: u64,

    /// Pictures dropped because the presenter was behind.
    pub pictures_dropped: u64,

    /// Audio packets read from the socket.
    pub audio_packets: u64,

    /// Frames skipped because of a bad size or parse error.
    pub corrupt_frames: u64,

    /// Units the decoder rejected.
    pub decode_errors: u64,

    /// Audio samples dropped by the mixer's latency control.
    pub audio_samples_discarded: u64,

    /// Total bytes read across all streams.
    pub bytes_received: u64,

    /// Session uptime in seconds.
    pub uptime_seconds: u64,
}
