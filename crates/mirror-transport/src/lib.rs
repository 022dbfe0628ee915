//! Stream demuxers and control channel for the mirroring client.
//!
//! Each logical stream arrives on its own pre-connected socket. The video
//! and audio demuxers are blocking state machines over any [`std::io::Read`];
//! closing the socket from another thread unblocks them with
//! [`TransportError::ConnectionClosed`].

mod annexb;
mod audio;
mod control;
mod error;
mod frame;
mod video;

pub use annexb::AnnexBSplitter;
pub use audio::{AudioDemuxer, AudioEvent};
pub use control::ControlChannel;
pub use error::TransportError;
pub use frame::{read_device_name, FrameHeader};
pub use video::{DemuxState, VideoDemuxer, VideoEvent};

/// Result type for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;

/// Length of the NUL-padded device name header.
pub const DEVICE_NAME_FIELD_LENGTH: usize = 65;

/// Largest accepted frame dimension on either axis.
pub const MAX_FRAME_DIMENSION: u32 = 8000;

/// Receive buffer size for the continuous H.264/H.265 stream.
pub const RECEIVE_BUFFER_SIZE: usize = 64 * 1024;

/// Largest accepted AV1 frame payload.
pub const MAX_AV1_PACKET_SIZE: usize = 2 * 1024 * 1024;

/// Largest accepted audio packet payload.
pub const MAX_AUDIO_PACKET_SIZE: usize = 1024 * 1024;

/// Length of a framed packet header: 8-byte pts/flags + 4-byte size.
pub const FRAME_HEADER_LENGTH: usize = 12;

/// Header flag marking out-of-band codec configuration.
pub const PACKET_FLAG_CONFIG: u64 = 1 << 63;

/// Header flag marking a key frame.
pub const PACKET_FLAG_KEY_FRAME: u64 = 1 << 62;

/// Bits of the header that carry the timestamp.
pub const PACKET_PTS_MASK: u64 = PACKET_FLAG_KEY_FRAME - 1;
