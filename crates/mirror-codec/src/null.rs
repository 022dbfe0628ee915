//! Built-in decoders that need no native codec library.

use tracing::{debug, info, trace};

use mirror_ipc::{AudioCodec, VideoCodec};

use crate::{
    AccessUnit, AudioDecoder, CodecError, CodecResult, DecodedPicture, DecoderFactory,
    VideoDecoder,
};

/// Accepts access units and produces no pictures.
///
/// Keeps the video stream flowing when no presentation is attached.
#[derive(Debug, Default)]
pub struct DiscardVideoDecoder {
    units: u64,
    bytes: u64,
}

impl DiscardVideoDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn units(&self) -> u64 {
        self.units
    }

    pub fn bytes(&self) -> u64 {
        self.bytes
    }
}

impl VideoDecoder for DiscardVideoDecoder {
    fn decode(&mut self, unit: &AccessUnit) -> CodecResult<Vec<DecodedPicture>> {
        self.units += 1;
        self.bytes += unit.data.len() as u64;
        trace!(
            size = unit.data.len(),
            key_frame = unit.key_frame,
            "Discarded access unit"
        );
        Ok(Vec::new())
    }

    fn name(&self) -> &'static str {
        "discard"
    }
}

/// Factory over the decoders compiled into this build.
///
/// Video always opens a [`DiscardVideoDecoder`]. Audio opens Opus when the
/// `opus` feature is enabled; other compressed audio codecs are unsupported.
#[derive(Debug, Default, Clone, Copy)]
pub struct BasicDecoderFactory;

impl DecoderFactory for BasicDecoderFactory {
    fn open_video(
        &self,
        codec: VideoCodec,
        width: u32,
        height: u32,
    ) -> CodecResult<Box<dyn VideoDecoder>> {
        info!(codec = %codec, width, height, "Opening discard video decoder");
        Ok(Box::new(DiscardVideoDecoder::new()))
    }

    fn open_audio(
        &self,
        codec: AudioCodec,
        config: Option<&[u8]>,
    ) -> CodecResult<Box<dyn AudioDecoder>> {
        debug!(
            codec = %codec,
            config_len = config.map(<[u8]>::len),
            "Opening audio decoder"
        );

        match codec {
            #[cfg(feature = "opus")]
            AudioCodec::Opus => {
                let decoder = crate::OpusDecoder::new()?;
                info!("Using Opus decoder");
                Ok(Box::new(decoder))
            }
            AudioCodec::Raw => Err(CodecError::Unsupported(
                "raw audio is not decoded".into(),
            )),
            other => Err(CodecError::Unsupported(format!(
                "no {other} decoder in this build"
            ))),
        }
    }
}
