//! Error types for the transport module.

use std::io;

use mirror_ipc::StopReason;
use thiserror::Error;

/// Errors that can occur while reading or writing a stream.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Framing could not be understood. The stream cannot continue.
    #[error("Protocol desync: {0}")]
    Desync(String),

    /// The agent announced a codec tag this client does not know.
    #[error("Unsupported codec tag: {tag:02X?}")]
    UnsupportedCodec { tag: [u8; 4] },

    /// The peer closed the socket, or it was closed locally.
    #[error("Connection closed")]
    ConnectionClosed,

    /// IO error.
    #[error("IO error: {0}")]
    Io(io::Error),
}

impl TransportError {
    /// Whether the failure is a protocol violation rather than the socket going away.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Desync(_) | Self::UnsupportedCodec { .. })
    }

    /// Reason code reported to the session owner.
    pub fn stop_reason(&self) -> StopReason {
        match self {
            Self::Desync(message) => StopReason::Desync {
                message: message.clone(),
            },
            Self::UnsupportedCodec { tag } => StopReason::UnsupportedCodec { tag: *tag },
            Self::ConnectionClosed => StopReason::ConnectionClosed,
            Self::Io(e) => StopReason::Io {
                message: e.to_string(),
            },
        }
    }
}

impl From<io::Error> for TransportError {
    fn from(e: io::Error) -> Self {
        // Closing a socket from another thread surfaces as one of these.
        match e.kind() {
            io::ErrorKind::UnexpectedEof
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::NotConnected
            | io::ErrorKind::BrokenPipe => Self::ConnectionClosed,
            _ => Self::Io(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_eof_maps_to_connection_closed() {
        let err: TransportError = io::Error::from(io::ErrorKind::UnexpectedEof).into();
        assert!(matches!(err, TransportError::ConnectionClosed));
        assert!(!err.is_fatal());
        assert_eq!(err.stop_reason(), StopReason::ConnectionClosed);
    }

    #[test]
    fn test_other_io_kept() {
        let err: TransportError = io::Error::from(io::ErrorKind::PermissionDenied).into();
        assert!(matches!(err, TransportError::Io(_)));
        assert!(err.stop_reason().is_retryable());
    }

    #[test]
    fn test_protocol_errors_are_fatal() {
        assert!(TransportError::Desync("bad".into()).is_fatal());
        let err = TransportError::UnsupportedCodec { tag: *b"vp9\0" };
        assert!(err.is_fatal());
        assert_eq!(err.stop_reason(), StopReason::UnsupportedCodec { tag: *b"vp9\0" });
    }
}
