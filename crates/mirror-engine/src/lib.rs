//! Session orchestration for the mirroring client.
//!
//! A [`Session`] owns the reader threads for the video and audio sockets
//! and the control channel behind its [`InputController`]. Decoders and
//! the audio mixer are shared through [`EngineServices`], which also runs
//! the background device refresh and idle source reaper.

mod config;
mod error;
mod input;
mod metrics;
mod pipeline;
mod scheduler;
mod services;
mod session;
#[cfg(test)]
mod testing;

pub use config::AppConfig;
pub use error::EngineError;
pub use input::{InputController, PointerHandle};
pub use metrics::MetricsCollector;
pub use pipeline::SessionAudio;
pub use scheduler::PeriodicTask;
pub use services::EngineServices;
pub use session::{Session, SessionStreams};

use std::time::Duration;

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// How long closing a session waits for each reader thread.
pub const READER_JOIN_TIMEOUT: Duration = Duration::from_secs(1);
