//! Outbound control channel.

use std::io::Write;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use bytes::BytesMut;
use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use mirror_protocol::ControlCommand;

use crate::{TransportError, TransportResult};

/// Serializes control messages onto the control socket.
///
/// Safe to share between threads; each message is written whole under a
/// lock so concurrent senders never interleave bytes.
pub struct ControlChannel<W> {
    writer: Mutex<W>,
    closed: AtomicBool,
    messages_sent: AtomicU64,
    bytes_sent: AtomicU64,
}

impl<W: Write> ControlChannel<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
            closed: AtomicBool::new(false),
            messages_sent: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
        }
    }

    /// Encode and write one command.
    pub fn send(&self, command: &ControlCommand) -> TransportResult<()> {
        trace!(msg_type = ?command.msg_type(), "Sending control message");
        self.write_message(&command.encode(), 1)
    }

    /// Encode several commands and write them in one go.
    pub fn send_all(&self, commands: &[ControlCommand]) -> TransportResult<()> {
        if commands.is_empty() {
            return Ok(());
        }
        let mut buf = BytesMut::new();
        for command in commands {
            command.encode_into(&mut buf);
        }
        self.write_message(&buf, commands.len() as u64)
    }

    /// Stop accepting messages. Later sends fail with `ConnectionClosed`.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            debug!("Control channel closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn messages_sent(&self) -> u64 {
        self.messages_sent.load(Ordering::Relaxed)
    }

    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent.load(Ordering::Relaxed)
    }

    fn write_message(&self, bytes: &[u8], count: u64) -> TransportResult<()> {
        if self.is_closed() {
            return Err(TransportError::ConnectionClosed);
        }

        let result = {
            let mut writer = self.writer.lock();
            writer.write_all(bytes).and_then(|()| writer.flush())
        };

        match result {
            Ok(()) => {
                self.messages_sent.fetch_add(count, Ordering::Relaxed);
                self.bytes_sent
                    .fetch_add(bytes.len() as u64, Ordering::Relaxed);
                Ok(())
            }
            Err(e) => {
                let err = TransportError::from(e);
                warn!(error = %err, "Control write failed");
                if matches!(err, TransportError::ConnectionClosed) {
                    self.close();
                }
                Err(err)
            }
        }
    }
}
