//! Error types for the protocol module.

use thiserror::Error;

use crate::control::ControlMsgType;

/// Contract violations when building control messages.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    /// Type byte outside the known message catalogue.
    #[error("Unknown control message type: {0}")]
    UnknownType(u8),

    /// A payload-less command was requested for a type that needs a payload.
    #[error("Control message type {0:?} carries a payload and cannot be sent as a simple command")]
    NotSimple(ControlMsgType),
}
