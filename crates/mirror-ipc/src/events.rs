//! Events sent from the engine to the front end.

use serde::{Deserialize, Serialize};

use crate::codec::{AudioCodec, VideoCodec};
use crate::state::{SessionState, StopReason, StreamKind};
use crate::types::{AudioOutputDevice, SessionMetrics};

/// Events that a session can emit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SessionEvent {
    /// Session state has changed.
    StateChanged {
        /// Previous state.
        previous: Box<SessionState>,

        /// Current state.
        current: Box<SessionState>,
    },

    /// The device-name header was read.
    DeviceName(String),

    /// The video stream announced its codec and initial frame size.
    VideoStarted {
        codec: VideoCodec,
        width: u32,
        height: u32,
    },

    /// The audio stream announced its codec.
    AudioStarted { codec: AudioCodec },

    /// One stream ended. Other streams keep running.
    StreamEnded {
        stream: StreamKind,
        reason: StopReason,
    },

    /// The set of playback devices changed.
    AudioDevicesChanged(Vec<AudioOutputDevice>),

    /// Updated counters.
    Metrics(SessionMetrics),

    /// Non-fatal error worth surfacing.
    Error {
        /// Whether the error is recoverable.
        recoverable: bool,

        /// Error message.
        message: String,
    },
}
