//! Audio stream demuxer.
//!
//! Layout: optional 65-byte device name, 4-byte codec tag, then framed
//! packets (12-byte header + payload) for every codec, RAW included. For
//! AAC the first packet must be the configuration packet.

use std::io::Read;

use bytes::Bytes;
use tracing::{debug, info, warn};

use mirror_ipc::AudioCodec;

use crate::frame::{read_array, read_device_name, FrameHeader};
use crate::video::DemuxState;
use crate::{TransportError, TransportResult, FRAME_HEADER_LENGTH, MAX_AUDIO_PACKET_SIZE};

/// Something the audio stream produced.
#[derive(Debug, Clone, PartialEq)]
pub enum AudioEvent {
    /// Device name from the handshake.
    DeviceName(String),

    /// The codec is known.
    Started { codec: AudioCodec },

    /// Out-of-band codec configuration.
    Config(Bytes),

    /// One compressed packet, or raw PCM for [`AudioCodec::Raw`].
    Packet { data: Bytes, pts: Option<u64> },
}

/// Blocking audio demuxer over a byte stream.
pub struct AudioDemuxer<R> {
    reader: R,
    state: DemuxState,
    codec: Option<AudioCodec>,
    awaiting_config: bool,
    bytes_received: u64,
    corrupt_frames: u64,
}

impl<R: Read> AudioDemuxer<R> {
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
            awaiting_config: false,
            bytes_received: 0,
            corrupt_frames: 0,
        }
    }

    pub fn state(&self) -> DemuxState {
        self.state
    }

    pub fn codec(&self) -> Option<AudioCodec> {
        self.codec
    }

    pub fn bytes_received(&self) -> u64 {
        self.bytes_received
    }

    /// Packets dropped for a negative or oversized length.
    pub fn corrupt_frames(&self) -> u64 {
        self.corrupt_frames
    }

    /// Block until the next event.
    ///
    /// Empty packets are skipped silently. Any error closes the demuxer; a
    /// data packet arriving before the AAC configuration is a desync.
    pub fn next_event(&mut self) -> TransportResult<AudioEvent> {
        loop {
            match self.step() {
                Ok(Some(event)) => return Ok(event),
                Ok(None) => continue,
                Err(e) => {
                    if self.state != DemuxState::Closed {
                        if e.is_fatal() {
                            warn!(state = self.state.name(), error = %e, "Audio stream desync");
                        } else {
                            debug!(state = self.state.name(), error = %e, "Audio stream ended");
                        }
                        self.state = DemuxState::Closed;
                    }
                    return Err(e);
                }
            }
        }
    }

    fn step(&mut self) -> TransportResult<Option<AudioEvent>> {
        match self.state {
            DemuxState::AwaitingHandshake => {
                let name = read_device_name(&mut self.reader)?;
                self.state = DemuxState::AwaitingCodecId;
                Ok(Some(AudioEvent::DeviceName(name)))
            }
            DemuxState::AwaitingCodecId => {
                let tag: [u8; 4] = read_array(&mut self.reader)?;
                let codec =
                    AudioCodec::from_tag(tag).ok_or(TransportError::UnsupportedCodec { tag })?;
                info!(codec = %codec, "Audio stream started");
                self.codec = Some(codec);
                self.awaiting_config = codec == AudioCodec::Aac;
                self.state = DemuxState::Streaming;
                Ok(Some(AudioEvent::Started { codec }))
            }
            // No dimensions on the audio stream.
            DemuxState::AwaitingDimensions => {
                self.state = DemuxState::Streaming;
                Ok(None)
            }
            DemuxState::Streaming => self.read_packet(),
            DemuxState::Closed => Err(TransportError::ConnectionClosed),
        }
    }

    fn read_packet(&mut self) -> TransportResult<Option<AudioEvent>> {
        let header = FrameHeader::read(&mut self.reader)?;
        self.bytes_received += FRAME_HEADER_LENGTH as u64;

        if self.awaiting_config {
            if !header.is_config() {
                return Err(TransportError::Desync(
                    "expected AAC config packet, got a data packet".into(),
                ));
            }
            if header.size <= 0 {
                return Err(TransportError::Desync(format!(
                    "invalid AAC config size {}",
                    header.size
                )));
            }
        }

        let payload = match header.read_payload(&mut self.reader, MAX_AUDIO_PACKET_SIZE)? {
            Some(payload) => payload,
            None => {
                if header.size != 0 {
                    self.corrupt_frames += 1;
                    if header.size > 0 {
                        self.bytes_received += header.size as u64;
                    }
                }
                return Ok(None);
            }
        };
        self.bytes_received += payload.len() as u64;
        let data = Bytes::from(payload);

        // RAW carries reserved bytes where the flags would be.
        if self.codec == Some(AudioCodec::Raw) {
            return Ok(Some(AudioEvent::Packet { data, pts: None }));
        }

        if header.is_config() {
            self.awaiting_config = false;
            debug!(size = data.len(), "Audio config packet");
            return Ok(Some(AudioEvent::Config(data)));
        }

        Ok(Some(AudioEvent::Packet {
            data,
            pts: header.pts(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{DEVICE_NAME_FIELD_LENGTH, PACKET_FLAG_CONFIG};
    use std::io::Cursor;

    fn packet(pts_flags: u64, payload: &[u8]) -> Vec<u8> {
        let mut data = pts_flags.to_be_bytes().to_vec();
        data.extend_from_slice(&(payload.len() as i32).to_be_bytes());
        data.extend_from_slice(payload);
        data
    }

    fn stream(handshake: bool, tag: &[u8; 4], packets: &[Vec<u8>]) -> Vec<u8> {
        let mut data = Vec::new();
        if handshake {
            data.extend_from_slice(b"Tablet");
            data.resize(DEVICE_NAME_FIELD_LENGTH, 0);
        }
        data.extend_from_slice(tag);
        for p in packets {
            data.extend_from_slice(p);
        }
        data
    }

    fn drain<R: Read>(demuxer: &mut AudioDemuxer<R>) -> (Vec<AudioEvent>, TransportError) {
        let mut events = Vec::new();
        loop {
            match demuxer.next_event() {
                Ok(e) => events.push(e),
                Err(e) => return (events, e),
            }
        }
    }

    #[test]
    fn test_opus_packets() {
        let data = stream(
            true,
            b"opus",
            &[
                packet(PACKET_FLAG_CONFIG, b"OpusHead"),
                packet(100, &[1, 2, 3]),
                packet(200, &[]),
                packet(300, &[4]),
            ],
        );
        let mut demuxer = AudioDemuxer::new(Cursor::new(data), true);
        let (events, end) = drain(&mut demuxer);
        assert!(matches!(end, TransportError::ConnectionClosed));
        assert_eq!(
            events,
            vec![
                AudioEvent::DeviceName("Tablet".into()),
                AudioEvent::Started {
                    codec: AudioCodec::Opus
                },
                AudioEvent::Config(Bytes::from_static(b"OpusHead")),
                AudioEvent::Packet {
                    data: Bytes::from_static(&[1, 2, 3]),
                    pts: Some(100)
                },
                AudioEvent::Packet {
                    data: Bytes::from_static(&[4]),
                    pts: Some(300)
                },
            ]
        );
        assert_eq!(demuxer.corrupt_frames(), 0);
    }

    #[test]
    fn test_aac_config_first() {
        let data = stream(
            false,
            b"\0aac",
            &[packet(PACKET_FLAG_CONFIG, &[0x11, 0x90]), packet(0, &[7])],
        );
        let mut demuxer = AudioDemuxer::new(Cursor::new(data), false);
        let (events, _) = drain(&mut demuxer);
        assert_eq!(events[1], AudioEvent::Config(Bytes::from_static(&[0x11, 0x90])));
        assert!(matches!(events[2], AudioEvent::Packet { .. }));
    }

    #[test]
    fn test_aac_data_before_config_is_fatal() {
        let data = stream(false, b"\0aac", &[packet(0, &[7]), packet(0, &[8])]);
        let mut demuxer = AudioDemuxer::new(Cursor::new(data), false);
        assert!(matches!(demuxer.next_event(), Ok(AudioEvent::Started { .. })));
        let err = demuxer.next_event().unwrap_err();
        assert!(matches!(err, TransportError::Desync(_)));
        assert_eq!(demuxer.state(), DemuxState::Closed);
        assert!(matches!(
            demuxer.next_event(),
            Err(TransportError::ConnectionClosed)
        ));
    }

    #[test]
    fn test_raw_framing() {
        let pcm = [0x01u8, 0x00, 0xFF, 0x7F];
        let data = stream(
            false,
            b"\0raw",
            // Reserved bytes may hold anything, including the config bit.
            &[packet(u64::MAX, &pcm), packet(0, &[])],
        );
        let mut demuxer = AudioDemuxer::new(Cursor::new(data), false);
        let (events, _) = drain(&mut demuxer);
        assert_eq!(
            events,
            vec![
                AudioEvent::Started {
                    codec: AudioCodec::Raw
                },
                AudioEvent::Packet {
                    data: Bytes::copy_from_slice(&pcm),
                    pts: None
                },
            ]
        );
    }

    #[test]
    fn test_negative_size_counted_and_skipped() {
        let mut bad = 0u64.to_be_bytes().to_vec();
        bad.extend_from_slice(&(-4i32).to_be_bytes());
        let data = stream(false, b"flac", &[bad, packet(1, &[9])]);
        let mut demuxer = AudioDemuxer::new(Cursor::new(data), false);
        let (events, _) = drain(&mut demuxer);
        assert_eq!(events.len(), 2);
        assert_eq!(demuxer.corrupt_frames(), 1);
    }

    #[test]
    fn test_unknown_tag() {
        let data = stream(false, b"mp3\0", &[]);
        let mut demuxer = AudioDemuxer::new(Cursor::new(data), false);
        assert!(demuxer.next_event().unwrap_err().is_fatal());
    }
}
