//! Fakes shared by the engine tests.

use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;

use mirror_codec::{
    AccessUnit, AudioDecoder, CodecError, CodecResult, DecodedPicture, DecoderFactory, PcmFrame,
    VideoDecoder,
};
use mirror_ipc::{AudioCodec, VideoCodec};
use mirror_transport::DEVICE_NAME_FIELD_LENGTH;

/// Video handshake bytes: optional device name, codec tag, dimensions.
pub fn video_header(name: Option<&str>, tag: &[u8; 4], width: u32, height: u32) -> Vec<u8> {
    let mut data = Vec::new();
    if let Some(name) = name {
        data.extend_from_slice(name.as_bytes());
        data.resize(DEVICE_NAME_FIELD_LENGTH, 0);
    }
    data.extend_from_slice(tag);
    data.extend_from_slice(&width.to_be_bytes());
    data.extend_from_slice(&height.to_be_bytes());
    data
}

/// One framed packet.
pub fn framed(pts_flags: u64, payload: &[u8]) -> Vec<u8> {
    let mut data = pts_flags.to_be_bytes().to_vec();
    data.extend_from_slice(&(payload.len() as i32).to_be_bytes());
    data.extend_from_slice(payload);
    data
}

#[derive(Default)]
struct FakeState {
    fail_video_open: bool,
    fail_audio_open: bool,
    fail_video_decodes: u32,
    video_units: usize,
    audio_packets: usize,
    audio_configs: Vec<Bytes>,
    audio_open_config: Option<Option<Bytes>>,
}

/// Decoder factory whose decoders record what they were fed.
///
/// Video decoders return one picture per unit at the opened size. Audio
/// decoders return one 10 ms stereo frame per packet.
#[derive(Clone, Default)]
pub struct FakeFactory {
    state: Arc<Mutex<FakeState>>,
}

impl FakeFactory {
    pub fn fail_video_open(&self) {
        self.state.lock().fail_video_open = true;
    }

    pub fn fail_audio_open(&self) {
        self.state.lock().fail_audio_open = true;
    }

    pub fn fail_next_video_decode(&self) {
        self.state.lock().fail_video_decodes += 1;
    }

    pub fn video_units(&self) -> usize {
        self.state.lock().video_units
    }

    pub fn audio_packets(&self) -> usize {
        self.state.lock().audio_packets
    }

    pub fn audio_configs(&self) -> Vec<Bytes> {
        self.state.lock().audio_configs.clone()
    }

    /// The configuration the audio decoder was opened with, if one was opened.
    pub fn audio_open_config(&self) -> Option<Option<Bytes>> {
        self.state.lock().audio_open_config.clone()
    }
}

struct FakeVideo {
    state: Arc<Mutex<FakeState>>,
    width: u32,
    height: u32,
}

impl VideoDecoder for FakeVideo {
    fn decode(&mut self, unit: &AccessUnit) -> CodecResult<Vec<DecodedPicture>> {
        let mut state = self.state.lock();
        state.video_units += 1;
        if state.fail_video_decodes > 0 {
            state.fail_video_decodes -= 1;
            return Err(CodecError::Decode("corrupt slice".into()));
        }
        Ok(vec![DecodedPicture {
            width: self.width,
            height: self.height,
            pts: unit.pts,
            data: unit.data.clone(),
        }])
    }

    fn name(&self) -> &'static str {
        "fake-video"
    }
}

struct FakeAudio {
    state: Arc<Mutex<FakeState>>,
}

impl AudioDecoder for FakeAudio {
    fn decode(&mut self, _packet: &[u8]) -> CodecResult<Vec<PcmFrame>> {
        self.state.lock().audio_packets += 1;
        Ok(vec![PcmFrame {
            samples: vec![100; 960],
            sample_rate: 48000,
            channels: 2,
        }])
    }

    fn set_config(&mut self, config: &[u8]) -> CodecResult<()> {
        self.state
            .lock()
            .audio_configs
            .push(Bytes::copy_from_slice(config));
        Ok(())
    }

    fn name(&self) -> &'static str {
        "fake-audio"
    }
}

impl DecoderFactory for FakeFactory {
    fn open_video(
        &self,
        _codec: VideoCodec,
        width: u32,
        height: u32,
    ) -> CodecResult<Box<dyn VideoDecoder>> {
        if self.state.lock().fail_video_open {
            return Err(CodecError::Open("no hardware decoder".into()));
        }
        Ok(Box::new(FakeVideo {
            state: Arc::clone(&self.state),
            width,
            height,
        }))
    }

    fn open_audio(
        &self,
        codec: AudioCodec,
        config: Option<&[u8]>,
    ) -> CodecResult<Box<dyn AudioDecoder>> {
        let mut state = self.state.lock();
        if state.fail_audio_open {
            return Err(CodecError::Unsupported(codec.to_string()));
        }
        state.audio_open_config = Some(config.map(Bytes::copy_from_slice));
        Ok(Box::new(FakeAudio {
            state: Arc::clone(&self.state),
        }))
    }
}
