//! Error types for the engine.

use std::io;

use thiserror::Error;

use mirror_audio::AudioError;
use mirror_codec::CodecError;
use mirror_ipc::StartupPhase;
use mirror_transport::TransportError;

/// Errors surfaced by sessions and engine services.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Configuration file could not be read or parsed.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A startup phase failed; everything started before it was rolled back.
    #[error("{phase:?} failed: {message}")]
    Startup { phase: StartupPhase, message: String },

    /// The session has no control channel.
    #[error("Control channel is disabled for this session")]
    ControlDisabled,

    /// The session was already closed.
    #[error("Session is closed")]
    SessionClosed,

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Audio(#[from] AudioError),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}
