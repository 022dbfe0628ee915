//! Error types for the codec module.

use thiserror::Error;

/// Errors raised by decoders.
#[derive(Debug, Error)]
pub enum CodecError {
    /// No decoder is available for the negotiated codec.
    #[error("Unsupported codec: {0}")]
    Unsupported(String),

    /// The decoder could not be opened. Fatal for the stream.
    #[error("Decoder open failed: {0}")]
    Open(String),

    /// One unit failed to decode. The stream continues.
    #[error("Decoding error: {0}")]
    Decode(String),

    /// Out-of-band configuration was rejected.
    #[error("Invalid decoder configuration: {0}")]
    InvalidConfig(String),
}

impl CodecError {
    /// Whether the owning stream must stop.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Unsupported(_) | Self::Open(_))
    }
}
