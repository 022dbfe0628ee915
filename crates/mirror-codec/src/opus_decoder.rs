//! Opus decoding through libopus.

use opus::{Channels, Decoder};
use tracing::{debug, trace};

use crate::{AudioDecoder, CodecError, CodecResult, PcmFrame};

const SAMPLE_RATE: u32 = 48_000;
const CHANNELS: u16 = 2;

/// 120 ms at 48 kHz, the longest Opus frame.
const MAX_FRAME_SAMPLES: usize = 48_000 * 120 / 1000;

/// Stereo 48 kHz Opus decoder.
pub struct OpusDecoder {
    decoder: Decoder,
    /// Decoding buffer (reused to avoid allocations)
    decode_buffer: Vec<i16>,
    frames_decoded: u64,
}

impl OpusDecoder {
    pub fn new() -> CodecResult<Self> {
        let decoder = Decoder::new(SAMPLE_RATE, Channels::Stereo)
            .map_err(|e| CodecError::Open(e.to_string()))?;

        Ok(Self {
            decoder,
            decode_buffer: vec![0; MAX_FRAME_SAMPLES * CHANNELS as usize],
            frames_decoded: 0,
        })
    }

    pub fn frames_decoded(&self) -> u64 {
        self.frames_decoded
    }
}

impl AudioDecoder for OpusDecoder {
    fn decode(&mut self, packet: &[u8]) -> CodecResult<Vec<PcmFrame>> {
        let per_channel = self
            .decoder
            .decode(packet, &mut self.decode_buffer, false)
            .map_err(|e| CodecError::Decode(e.to_string()))?;

        let total = per_channel * CHANNELS as usize;
        self.frames_decoded += 1;
        trace!(samples = total, "Decoded Opus packet");

        Ok(vec![PcmFrame {
            samples: self.decode_buffer[..total].to_vec(),
            sample_rate: SAMPLE_RATE,
            channels: CHANNELS,
        }])
    }

    fn set_config(&mut self, config: &[u8]) -> CodecResult<()> {
        // OpusHead only restates what the decoder was opened with.
        debug!(len = config.len(), "Ignoring Opus header");
        Ok(())
    }

    fn name(&self) -> &'static str {
        "opus"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decoder_creation() {
        assert!(OpusDecoder::new().is_ok());
    }

    #[test]
    fn test_garbage_packet_is_decode_error() {
        let mut decoder = OpusDecoder::new().unwrap();
        // TOC byte for a code 3 packet with an invalid frame count.
        let err = decoder.decode(&[0xFF, 0x00]).err().unwrap();
        assert!(!err.is_fatal());
    }
}
