//! Decoder interfaces for the mirrored video and audio streams.
//!
//! Actual bitstream decoding lives behind [`VideoDecoder`] and
//! [`AudioDecoder`]. The demuxers hand over one access unit or one audio
//! packet at a time and receive zero or more pictures or PCM frames back.
//! A [`DecoderFactory`] opens decoders once the codec has been negotiated.

mod error;
mod null;
#[cfg(feature = "opus")]
mod opus_decoder;

pub use error::CodecError;
pub use null::{BasicDecoderFactory, DiscardVideoDecoder};
#[cfg(feature = "opus")]
pub use opus_decoder::OpusDecoder;

use bytes::Bytes;
use mirror_ipc::{AudioCodec, VideoCodec};

/// Result type for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

/// Output sample rate of the device's raw audio stream.
pub const RAW_SAMPLE_RATE: u32 = 48_000;

/// Channel count of the device's raw audio stream.
pub const RAW_CHANNELS: u16 = 2;

/// One decodable compressed video frame.
#[derive(Debug, Clone)]
pub struct AccessUnit {
    /// Compressed bytes. Annex-B framed for H.264/H.265, OBUs for AV1.
    pub data: Bytes,

    /// Presentation timestamp in microseconds, when the framing carries one.
    pub pts: Option<u64>,

    /// Whether the framing marked this unit as a key frame.
    pub key_frame: bool,
}

impl AccessUnit {
    pub fn new(data: Bytes) -> Self {
        Self {
            data,
            pts: None,
            key_frame: false,
        }
    }
}

/// A decoded picture, handed to presentation as-is.
#[derive(Debug, Clone)]
pub struct DecodedPicture {
    pub width: u32,
    pub height: u32,
    pub pts: Option<u64>,

    /// Pixel data in whatever layout the decoder produces.
    pub data: Bytes,
}

/// Interleaved signed 16-bit PCM.
#[derive(Debug, Clone, PartialEq)]
pub struct PcmFrame {
    pub samples: Vec<i16>,
    pub sample_rate: u32,
    pub channels: u16,
}

impl PcmFrame {
    /// Build a frame from little-endian s16 bytes. A trailing odd byte is dropped.
    pub fn from_le_bytes(bytes: &[u8], sample_rate: u32, channels: u16) -> Self {
        let samples = bytes
            .chunks_exact(2)
            .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
            .collect();
        Self {
            samples,
            sample_rate,
            channels,
        }
    }

    /// Frames per channel.
    pub fn frames(&self) -> usize {
        if self.channels == 0 {
            0
        } else {
            self.samples.len() / self.channels as usize
        }
    }
}

/// Trait for video decoders.
pub trait VideoDecoder: Send {
    /// Decode one access unit.
    fn decode(&mut self, unit: &AccessUnit) -> CodecResult<Vec<DecodedPicture>>;

    /// Attach out-of-band configuration received mid-stream.
    fn set_config(&mut self, _config: &[u8]) -> CodecResult<()> {
        Ok(())
    }

    /// Drain any pictures still held by the decoder.
    fn flush(&mut self) -> CodecResult<Vec<DecodedPicture>> {
        Ok(Vec::new())
    }

    /// Get decoder name for diagnostics.
    fn name(&self) -> &'static str;
}

/// Trait for audio decoders.
pub trait AudioDecoder: Send {
    /// Decode one compressed packet.
    fn decode(&mut self, packet: &[u8]) -> CodecResult<Vec<PcmFrame>>;

    /// Attach out-of-band configuration received mid-stream.
    fn set_config(&mut self, _config: &[u8]) -> CodecResult<()> {
        Ok(())
    }

    /// Get decoder name for diagnostics.
    fn name(&self) -> &'static str;
}

/// Opens decoders for negotiated codecs.
pub trait DecoderFactory: Send + Sync {
    /// Open a video decoder for the initial frame size.
    fn open_video(
        &self,
        codec: VideoCodec,
        width: u32,
        height: u32,
    ) -> CodecResult<Box<dyn VideoDecoder>>;

    /// Open an audio decoder.
    ///
    /// `config` is the out-of-band configuration, required for AAC and
    /// attached before the decoder is opened.
    fn open_audio(
        &self,
        codec: AudioCodec,
        config: Option<&[u8]>,
    ) -> CodecResult<Box<dyn AudioDecoder>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pcm_from_le_bytes() {
        let frame = PcmFrame::from_le_bytes(&[0x01, 0x00, 0xFF, 0xFF, 0x7F], 48_000, 2);
        assert_eq!(frame.samples, vec![1, -1]);
        assert_eq!(frame.frames(), 1);
    }

    #[test]
    fn test_pcm_frames_zero_channels() {
        let frame = PcmFrame {
            samples: vec![1, 2, 3],
            sample_rate: 48_000,
            channels: 0,
        };
        assert_eq!(frame.frames(), 0);
    }

    #[test]
    fn test_codec_error_fatality() {
        assert!(CodecError::Open("x".into()).is_fatal());
        assert!(CodecError::Unsupported("x".into()).is_fatal());
        assert!(!CodecError::Decode("x".into()).is_fatal());
        assert!(!CodecError::InvalidConfig("x".into()).is_fatal());
    }
}
