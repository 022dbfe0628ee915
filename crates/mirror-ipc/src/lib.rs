//! Shared session, codec and event types for the mirroring client.
//!
//! This crate defines the types exchanged between the engine core and
//! whatever front end drives it: negotiated codec identities, session
//! configuration, lifecycle events and stop reasons.

mod codec;
mod events;
mod state;
mod types;

pub use codec::{AudioCodec, VideoCodec};
pub use events::SessionEvent;
pub use state::{SessionState, StartupPhase, StopReason, StreamKind};
pub use types::{AudioOutputDevice, MixerSettings, SessionConfig, SessionMetrics};

use crossbeam_channel::{Receiver, Sender};

/// Channel capacity for events (Engine → front end).
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Creates a bounded event channel.
pub fn event_channel() -> (Sender<SessionEvent>, Receiver<SessionEvent>) {
    crossbeam_channel::bounded(EVENT_CHANNEL_CAPACITY)
}
