//! Video stream demuxer.
//!
//! Handshake layout: optional 65-byte device name, 4-byte codec tag, then
//! width and height as 4-byte big-endian integers. H.264/H.265 follow as a
//! continuous Annex-B stream; AV1 follows as framed packets (12-byte header
//! + payload).

use std::collections::VecDeque;
use std::io::{ErrorKind, Read};

use bytes::Bytes;
use tracing::{debug, info, instrument, warn};

use mirror_codec::AccessUnit;
use mirror_ipc::VideoCodec;

use crate::annexb::AnnexBSplitter;
use crate::frame::{read_array, read_device_name, read_u32, FrameHeader};
use crate::{
    TransportError, TransportResult, MAX_AV1_PACKET_SIZE, MAX_FRAME_DIMENSION,
    RECEIVE_BUFFER_SIZE,
};

/// Demuxer progress through the stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DemuxState {
    AwaitingHandshake,
    AwaitingCodecId,
    AwaitingDimensions,
    Streaming,
    Closed,
}

impl DemuxState {
    pub fn name(self) -> &'static str {
        match self {
            Self::AwaitingHandshake => "AwaitingHandshake",
            Self::AwaitingCodecId => "AwaitingCodecId",
            Self::AwaitingDimensions => "AwaitingDimensions",
            Self::Streaming => "Streaming",
            Self::Closed => "Closed",
        }
    }
}

/// Something the video stream produced.
#[derive(Debug, Clone)]
pub enum VideoEvent {
    /// Device name from the handshake.
    DeviceName(String),

    /// Codec and initial frame size are known.
    Started {
        codec: VideoCodec,
        width: u32,
        height: u32,
    },

    /// Out-of-band codec configuration (framed codecs only).
    Config(Bytes),

    /// One access unit for the decoder.
    Unit(AccessUnit),
}

/// Blocking video demuxer over a byte stream.
pub struct VideoDemuxer<R> {
    reader: R,
    state: DemuxState,
    codec: Option<VideoCodec>,
    splitter: Option<AnnexBSplitter>,
    queue: VecDeque<VideoEvent>,
    deferred_error: Option<TransportError>,
    buffer: Box<[u8]>,
    bytes_received: u64,
    corrupt_frames: u64,
}

impl<R: Read> VideoDemuxer<R> {
    /// Create a demuxer. `handshake` selects whether a device name header
    /// precedes the codec tag on this stream.
    pub fn new(reader: R, handshake: bool) -> Self {
        Self {
            reader,
            state: if handshake {
                DemuxState::AwaitingHandshake
            } else {
                DemuxState::AwaitingCodecId
            },
            codec: None,
            splitter: None,
            queue: VecDeque::new(),
            deferred_error: None,
            buffer: vec![0u8; RECEIVE_BUFFER_SIZE].into_boxed_slice(),
            bytes_received: 0,
            corrupt_frames: 0,
        }
    }

    pub fn state(&self) -> DemuxState {
        self.state
    }

    pub fn codec(&self) -> Option<VideoCodec> {
        self.codec
    }

    pub fn bytes_received(&self) -> u64 {
        self.bytes_received
    }

    /// Frames dropped for an invalid size.
    pub fn corrupt_frames(&self) -> u64 {
        self.corrupt_frames
    }

    /// Block until the next event.
    ///
    /// Handshake failures are fatal: the demuxer moves to `Closed` and every
    /// later call returns `ConnectionClosed`. Invalid framed packets are
    /// skipped. At end of stream any access unit still buffered by the
    /// splitter is returned before the closing error.
    pub fn next_event(&mut self) -> TransportResult<VideoEvent> {
        loop {
            if let Some(event) = self.queue.pop_front() {
                return Ok(event);
            }
            if let Some(e) = self.deferred_error.take() {
                return Err(e);
            }
            if self.state == DemuxState::Closed {
                return Err(TransportError::ConnectionClosed);
            }

            if let Err(e) = self.step() {
                self.close(e);
            }
        }
    }

    fn close(&mut self, error: TransportError) {
        if error.is_fatal() {
            warn!(state = self.state.name(), error = %error, "Video stream desync");
        } else {
            debug!(state = self.state.name(), error = %error, "Video stream ended");
        }

        if let Some(splitter) = self.splitter.as_mut() {
            self.queue
                .extend(splitter.flush().into_iter().map(VideoEvent::Unit));
        }
        self.state = DemuxState::Closed;
        self.deferred_error = Some(error);
    }

    fn step(&mut self) -> TransportResult<()> {
        match self.state {
            DemuxState::AwaitingHandshake => {
                let name = read_device_name(&mut self.reader)?;
                self.state = DemuxState::AwaitingCodecId;
                self.queue.push_back(VideoEvent::DeviceName(name));
            }
            DemuxState::AwaitingCodecId => self.read_codec_id()?,
            DemuxState::AwaitingDimensions => self.read_dimensions()?,
            DemuxState::Streaming => match self.splitter {
                Some(_) => self.read_chunk()?,
                None => self.read_framed()?,
            },
            DemuxState::Closed => return Err(TransportError::ConnectionClosed),
        }
        Ok(())
    }

    fn read_codec_id(&mut self) -> TransportResult<()> {
        let tag: [u8; 4] = read_array(&mut self.reader)?;
        let codec = VideoCodec::from_tag(tag).ok_or(TransportError::UnsupportedCodec { tag })?;
        debug!(codec = %codec, "Video codec");
        self.codec = Some(codec);
        self.splitter = AnnexBSplitter::new(codec);
        self.state = DemuxState::AwaitingDimensions;
        Ok(())
    }

    #[instrument(name = "video_dimensions", skip(self))]
    fn read_dimensions(&mut self) -> TransportResult<()> {
        let width = read_u32(&mut self.reader)?;
        let height = read_u32(&mut self.reader)?;

        let valid = |v: u32| v > 0 && v <= MAX_FRAME_DIMENSION;
        if !valid(width) || !valid(height) {
            return Err(TransportError::Desync(format!(
                "unreasonable dimensions {width}x{height}"
            )));
        }

        let codec = self
            .codec
            .ok_or_else(|| TransportError::Desync("dimensions before codec id".into()))?;
        info!(codec = %codec, width, height, "Video stream started");
        self.state = DemuxState::Streaming;
        self.queue.push_back(VideoEvent::Started {
            codec,
            width,
            height,
        });
        Ok(())
    }

    fn read_chunk(&mut self) -> TransportResult<()> {
        let n = loop {
            match self.reader.read(&mut self.buffer) {
                Ok(0) => return Err(TransportError::ConnectionClosed),
                Ok(n) => break n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        };
        self.bytes_received += n as u64;

        if let Some(splitter) = self.splitter.as_mut() {
            let units = splitter.push(&self.buffer[..n]);
            self.queue.extend(units.into_iter().map(VideoEvent::Unit));
        }
        Ok(())
    }

    fn read_framed(&mut self) -> TransportResult<()> {
        let header = FrameHeader::read(&mut self.reader)?;
        self.bytes_received += crate::FRAME_HEADER_LENGTH as u64;

        let Some(payload) = header.read_payload(&mut self.reader, MAX_AV1_PACKET_SIZE)? else {
            self.corrupt_frames += 1;
            debug!(size = header.size, "Skipping video packet with invalid size");
            if header.size > 0 {
                self.bytes_received += header.size as u64;
            }
            return Ok(());
        };
        self.bytes_received += payload.len() as u64;

        let data = Bytes::from(payload);
        let event = if header.is_config() {
            debug!(size = data.len(), "Video config packet");
            VideoEvent::Config(data)
        } else {
            VideoEvent::Unit(AccessUnit {
                data,
                pts: header.pts(),
                key_frame: header.is_key_frame(),
            })
        };
        self.queue.push_back(event);
        Ok(())
    }
}
