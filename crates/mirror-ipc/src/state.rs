//! Session state machine types.

use std::fmt;

use serde::{Deserialize, Serialize};

/// The logical byte streams of a mirroring session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StreamKind {
    Video,
    Audio,
    Control,
}

impl StreamKind {
    /// Lower-case name used in log fields.
    pub fn name(self) -> &'static str {
        match self {
            Self::Video => "video",
            Self::Audio => "audio",
            Self::Control => "control",
        }
    }
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The current state of a session.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub enum SessionState {
    /// No session running.
    #[default]
    Idle,

    /// Session is starting up.
    Starting {
        /// Current startup phase.
        phase: StartupPhase,
    },

    /// At least one stream is live.
    Live,

    /// Session is being torn down.
    Stopping {
        /// Reason for stopping.
        reason: StopReason,
    },

    /// Session has ended.
    Closed {
        /// Why it ended.
        reason: StopReason,
    },
}

impl SessionState {
    /// Returns true if the session is live.
    pub fn is_live(&self) -> bool {
        matches!(self, Self::Live)
    }

    /// Returns true if the session has ended or is ending.
    pub fn is_finished(&self) -> bool {
        matches!(self, Self::Stopping { .. } | Self::Closed { .. })
    }

    /// Returns a simple string representation of the state.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Idle => "Idle",
            Self::Starting { .. } => "Starting",
            Self::Live => "Live",
            Self::Stopping { .. } => "Stopping",
            Self::Closed { .. } => "Closed",
        }
    }
}

/// Startup phases for a session, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StartupPhase {
    /// Binding the control socket writer.
    OpenControl,

    /// Spawning the video reader.
    StartVideo,

    /// Spawning the audio reader.
    StartAudio,
}

impl StartupPhase {
    /// Returns the next phase, if any.
    pub fn next(self) -> Option<Self> {
        match self {
            Self::OpenControl => Some(Self::StartVideo),
            Self::StartVideo => Some(Self::StartAudio),
            Self::StartAudio => None,
        }
    }

    /// Returns the previous phase, if any (for rollback).
    pub fn previous(self) -> Option<Self> {
        match self {
            Self::OpenControl => None,
            Self::StartVideo => Some(Self::OpenControl),
            Self::StartAudio => Some(Self::StartVideo),
        }
    }

    /// Returns the display name for this phase.
    pub fn name(self) -> &'static str {
        match self {
            Self::OpenControl => "Opening control channel",
            Self::StartVideo => "Starting video stream",
            Self::StartAudio => "Starting audio stream",
        }
    }
}

/// Reason code attached to a stream or session ending.
///
/// Carries enough information for a caller to decide whether to retry,
/// tear down or notify the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopReason {
    /// Caller asked for teardown.
    UserRequested,

    /// The peer closed the socket.
    ConnectionClosed,

    /// Framing could not be understood (bad handshake, dimensions, ordering).
    Desync { message: String },

    /// The agent announced a codec this client does not know.
    UnsupportedCodec { tag: [u8; 4] },

    /// The decoder for the negotiated codec could not be opened.
    CodecOpenFailed { message: String },

    /// Socket level failure.
    Io { message: String },
}

impl StopReason {
    /// Returns a display message for this reason.
    pub fn message(&self) -> String {
        match self {
            Self::UserRequested => "Session stopped by user".to_string(),
            Self::ConnectionClosed => "Connection closed by device".to_string(),
            Self::Desync { message } => format!("Protocol desync: {message}"),
            Self::UnsupportedCodec { tag } => format!("Unsupported codec tag: {tag:02X?}"),
            Self::CodecOpenFailed { message } => format!("Failed to open codec: {message}"),
            Self::Io { message } => format!("I/O error: {message}"),
        }
    }

    /// Whether reconnecting with the same parameters could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ConnectionClosed | Self::Io { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_startup_phase_order() {
        assert_eq!(StartupPhase::OpenControl.next(), Some(StartupPhase::StartVideo));
        assert_eq!(StartupPhase::StartAudio.next(), None);
        assert_eq!(StartupPhase::StartAudio.previous(), Some(StartupPhase::StartVideo));
        assert_eq!(StartupPhase::OpenControl.previous(), None);
    }

    #[test]
    fn test_stop_reason_retryable() {
        assert!(StopReason::ConnectionClosed.is_retryable());
        assert!(!StopReason::UnsupportedCodec { tag: *b"vp8\0" }.is_retryable());
        assert!(StopReason::UnsupportedCodec { tag: *b"vp8\0" }
            .message()
            .contains("76, 70, 38, 00"));
    }
}
