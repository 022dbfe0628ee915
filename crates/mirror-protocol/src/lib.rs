//! Control protocol encoding and pointer virtualization.
//!
//! This crate turns structured input commands into the exact binary layout
//! the on-device agent expects, and maps transient host pointer handles to
//! the stable pointer ids carried on the wire.

pub mod binary;
mod control;
mod error;
pub mod keycode;
mod pointer;
mod touch;

pub use control::{
    Clipboard, ControlCommand, ControlMsgType, CopyKey, KeyAction, KeyEvent, MotionAction,
    Position, ScrollEvent, SimpleCommand, TouchEvent, UhidCreate, UhidInput,
};
pub use error::ProtocolError;
pub use pointer::PointerRegistry;
pub use touch::{TouchInput, ViewPoint, ViewSize};

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Largest control message the agent accepts.
pub const CONTROL_MSG_MAX_SIZE: usize = 1 << 18;

/// Text injection payload limit in bytes.
pub const INJECT_TEXT_MAX_LENGTH: usize = 300;

/// Clipboard payload limit in bytes (message limit minus the fixed header).
pub const CLIPBOARD_TEXT_MAX_LENGTH: usize = CONTROL_MSG_MAX_SIZE - 14;

/// Application name limit in bytes.
pub const START_APP_MAX_LENGTH: usize = 255;
