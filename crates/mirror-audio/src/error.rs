//! Error types for the audio module.

use thiserror::Error;

use crate::SourceId;

/// Errors that can occur during audio operations.
#[derive(Debug, Error)]
pub enum AudioError {
    /// The audio backend failed.
    #[error("Audio device error: {0}")]
    Device(String),

    /// Audio device not found.
    #[error("Audio device not found: {0}")]
    DeviceNotFound(String),

    /// Audio format not supported.
    #[error("Audio format not supported: {0}")]
    FormatNotSupported(String),

    /// A source was registered with an unusable format.
    #[error("Invalid source format: {sample_rate} Hz, {channels} channels")]
    InvalidFormat { sample_rate: u32, channels: u16 },

    /// No source with this id.
    #[error("Unknown audio source: {0}")]
    UnknownSource(SourceId),

    /// No output device has been configured yet.
    #[error("Audio device is not configured")]
    NotConfigured,

    /// The mixer has been shut down.
    #[error("Mixer is shut down")]
    MixerStopped,
}
