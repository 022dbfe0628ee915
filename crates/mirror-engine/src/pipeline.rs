//! Reader loops: demuxer events into decoders, pictures and the mixer.

use std::io::Read;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crossbeam_channel::{Sender, TrySendError};
use parking_lot::Mutex;
use tracing::{debug, error, info, trace, warn};

use mirror_audio::{AudioMixer, SourceId};
use mirror_codec::{
    AudioDecoder, CodecError, DecodedPicture, DecoderFactory, PcmFrame, VideoDecoder,
    RAW_CHANNELS, RAW_SAMPLE_RATE,
};
use mirror_ipc::{AudioCodec, SessionEvent, StopReason};
use mirror_transport::{AudioDemuxer, AudioEvent, TransportError, VideoDemuxer, VideoEvent};

use crate::metrics::MetricsCollector;

/// What a reader loop needs from its session.
pub(crate) struct StreamContext {
    pub events: Sender<SessionEvent>,
    pub metrics: Arc<MetricsCollector>,
    pub factory: Arc<dyn DecoderFactory>,
    pub closing: Arc<AtomicBool>,
}

impl StreamContext {
    fn send_event(&self, event: SessionEvent) {
        if let Err(e) = self.events.try_send(event) {
            warn!("Failed to send event: {}", e);
        }
    }

    /// A read error after the session started closing is the close itself.
    fn end_reason(&self, err: &TransportError) -> StopReason {
        if self.closing.load(Ordering::SeqCst) {
            StopReason::UserRequested
        } else {
            err.stop_reason()
        }
    }
}

fn open_failed(err: &CodecError) -> StopReason {
    StopReason::CodecOpenFailed {
        message: err.to_string(),
    }
}

/// Forwards the demuxers' running totals to the metrics as deltas.
#[derive(Default)]
struct CounterSync {
    bytes: u64,
    corrupt: u64,
}

impl CounterSync {
    fn update(&mut self, metrics: &MetricsCollector, bytes: u64, corrupt: u64) {
        if bytes > self.bytes {
            metrics.record_bytes_received(bytes - self.bytes);
            self.bytes = bytes;
        }
        if corrupt > self.corrupt {
            metrics.record_corrupt_frames(corrupt - self.corrupt);
            self.corrupt = corrupt;
        }
    }
}

/// Drive the video stream until it ends.
///
/// `on_frame_size` is called with the announced dimensions and again
/// whenever decoded pictures change size.
pub(crate) fn run_video<R: Read>(
    mut demuxer: VideoDemuxer<R>,
    ctx: &StreamContext,
    pictures: &Sender<DecodedPicture>,
    mut on_frame_size: impl FnMut(u32, u32),
) -> StopReason {
    let mut decoder: Option<Box<dyn VideoDecoder>> = None;
    let mut counters = CounterSync::default();
    let mut frame_size = (0, 0);

    let forward = |batch: Vec<DecodedPicture>,
                   frame_size: &mut (u32, u32),
                   on_frame_size: &mut dyn FnMut(u32, u32)| {
        for picture in batch {
            if (picture.width, picture.height) != *frame_size {
                *frame_size = (picture.width, picture.height);
                on_frame_size(picture.width, picture.height);
            }
            match pictures.try_send(picture) {
                Ok(()) => ctx.metrics.record_picture(),
                Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => {
                    trace!("Presenter behind, dropping picture");
                    ctx.metrics.record_picture_dropped();
                }
            }
        }
    };

    let reason = loop {
        let event = demuxer.next_event();
        counters.update(&ctx.metrics, demuxer.bytes_received(), demuxer.corrupt_frames());

        match event {
            Ok(VideoEvent::DeviceName(name)) => ctx.send_event(SessionEvent::DeviceName(name)),
            Ok(VideoEvent::Started {
                codec,
                width,
                height,
            }) => {
                ctx.send_event(SessionEvent::VideoStarted {
                    codec,
                    width,
                    height,
                });
                frame_size = (width, height);
                on_frame_size(width, height);

                match ctx.factory.open_video(codec, width, height) {
                    Ok(opened) => {
                        info!(decoder = opened.name(), codec = %codec, "Video decoder opened");
                        decoder = Some(opened);
                    }
                    Err(e) => {
                        error!(error = %e, "Failed to open video decoder");
                        break open_failed(&e);
                    }
                }
            }
            Ok(VideoEvent::Config(config)) => {
                if let Some(decoder) = decoder.as_mut() {
                    if let Err(e) = decoder.set_config(&config) {
                        warn!(error = %e, "Video decoder rejected configuration");
                        ctx.metrics.record_decode_error();
                    }
                }
            }
            Ok(VideoEvent::Unit(unit)) => {
                ctx.metrics.record_video_unit();
                let Some(active) = decoder.as_mut() else {
                    continue;
                };
                match active.decode(&unit) {
                    Ok(batch) => forward(batch, &mut frame_size, &mut on_frame_size),
                    Err(e) if e.is_fatal() => {
                        error!(error = %e, "Video decoder failed");
                        break open_failed(&e);
                    }
                    Err(e) => {
                        ctx.metrics.record_decode_error();
                        warn!(error = %e, size = unit.data.len(), "Failed to decode access unit, skipping");
                    }
                }
            }
            Err(e) => break ctx.end_reason(&e),
        }
    };

    if let Some(mut decoder) = decoder {
        match decoder.flush() {
            Ok(batch) => forward(batch, &mut frame_size, &mut on_frame_size),
            Err(e) => debug!(error = %e, "Video decoder flush failed"),
        }
    }
    reason
}

/// Drive the audio stream until it ends.
pub(crate) fn run_audio<R: Read>(
    mut demuxer: AudioDemuxer<R>,
    ctx: &StreamContext,
    audio: &SessionAudio,
) -> StopReason {
    let mut decoder: Option<Box<dyn AudioDecoder>> = None;
    let mut codec = None;
    let mut counters = CounterSync::default();

    let reason = loop {
        let event = demuxer.next_event();
        counters.update(&ctx.metrics, demuxer.bytes_received(), demuxer.corrupt_frames());

        match event {
            Ok(AudioEvent::DeviceName(name)) => ctx.send_event(SessionEvent::DeviceName(name)),
            Ok(AudioEvent::Started { codec: started }) => {
                ctx.send_event(SessionEvent::AudioStarted { codec: started });
                codec = Some(started);
                match started {
                    AudioCodec::Raw => {
                        audio.ensure_source(RAW_SAMPLE_RATE, RAW_CHANNELS);
                    }
                    // Opened once the configuration packet arrives.
                    AudioCodec::Aac => {}
                    _ => match ctx.factory.open_audio(started, None) {
                        Ok(opened) => {
                            info!(decoder = opened.name(), codec = %started, "Audio decoder opened");
                            decoder = Some(opened);
                        }
                        Err(e) => {
                            error!(error = %e, "Failed to open audio decoder");
                            break open_failed(&e);
                        }
                    },
                }
            }
            Ok(AudioEvent::Config(config)) => match (decoder.as_mut(), codec) {
                (Some(active), _) => {
                    if let Err(e) = active.set_config(&config) {
                        warn!(error = %e, "Audio decoder rejected configuration");
                        ctx.metrics.record_decode_error();
                    }
                }
                (None, Some(negotiated)) => match ctx.factory.open_audio(negotiated, Some(&config)) {
                    Ok(opened) => {
                        info!(decoder = opened.name(), codec = %negotiated, "Audio decoder opened");
                        decoder = Some(opened);
                    }
                    Err(e) => {
                        error!(error = %e, "Failed to open audio decoder");
                        break open_failed(&e);
                    }
                },
                (None, None) => {}
            },
            Ok(AudioEvent::Packet { data, .. }) => {
                ctx.metrics.record_audio_packet();
                if codec == Some(AudioCodec::Raw) {
                    audio.push_raw(&data);
                    continue;
                }
                let Some(active) = decoder.as_mut() else {
                    continue;
                };
                match active.decode(&data) {
                    Ok(frames) => {
                        for frame in &frames {
                            audio.push_pcm(frame);
                        }
                    }
                    Err(e) if e.is_fatal() => {
                        error!(error = %e, "Audio decoder failed");
                        break open_failed(&e);
                    }
                    Err(e) => {
                        ctx.metrics.record_decode_error();
                        warn!(error = %e, size = data.len(), "Failed to decode audio packet, skipping");
                    }
                }
            }
            Err(e) => break ctx.end_reason(&e),
        }
    };

    audio.stop();
    reason
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ActiveSource {
    id: SourceId,
    sample_rate: u32,
    channels: u16,
}

struct AudioState {
    source: Option<ActiveSource>,
    volume: f32,
    unavailable: bool,
}

/// A session's connection to the mixer.
///
/// Registers a source at the format of the first PCM it sees and
/// re-registers when the format changes or the source was reaped.
pub struct SessionAudio {
    mixer: Option<Arc<AudioMixer>>,
    state: Mutex<AudioState>,
}

impl SessionAudio {
    pub fn new(mixer: Option<Arc<AudioMixer>>, volume: f32) -> Self {
        Self {
            mixer,
            state: Mutex::new(AudioState {
                source: None,
                volume,
                unavailable: false,
            }),
        }
    }

    /// The mixer source currently fed by this session.
    pub fn source_id(&self) -> Option<SourceId> {
        self.state.lock().source.map(|s| s.id)
    }

    pub fn volume(&self) -> f32 {
        self.state.lock().volume
    }

    pub fn set_volume(&self, volume: f32) {
        let mut state = self.state.lock();
        state.volume = volume.max(0.0);
        if let (Some(mixer), Some(source)) = (&self.mixer, state.source) {
            let _ = mixer.set_source_volume(source.id, state.volume);
        }
    }

    fn ensure_source(&self, sample_rate: u32, channels: u16) -> Option<SourceId> {
        let mixer = self.mixer.as_ref()?;
        let mut state = self.state.lock();

        if let Some(active) = state.source {
            if active.sample_rate == sample_rate && active.channels == channels {
                return Some(active.id);
            }
            debug!(
                source_id = %active.id,
                sample_rate,
                channels,
                "Audio format changed, re-registering source"
            );
            mixer.stop_source(active.id);
            state.source = None;
        }

        match mixer.register_source(sample_rate, channels) {
            Ok(id) => {
                let _ = mixer.set_source_volume(id, state.volume);
                state.source = Some(ActiveSource {
                    id,
                    sample_rate,
                    channels,
                });
                state.unavailable = false;
                Some(id)
            }
            Err(e) => {
                if !state.unavailable {
                    warn!(error = %e, "Audio playback unavailable, dropping audio");
                    state.unavailable = true;
                }
                None
            }
        }
    }

    /// Forget a source the mixer no longer knows.
    fn forget(&self, id: SourceId) {
        let mut state = self.state.lock();
        if state.source.map(|s| s.id) == Some(id) {
            state.source = None;
        }
    }

    fn push_pcm(&self, frame: &PcmFrame) {
        self.push_with(frame.sample_rate, frame.channels, |mixer, id| {
            mixer.push_samples(id, &frame.samples)
        });
    }

    fn push_raw(&self, bytes: &[u8]) {
        self.push_with(RAW_SAMPLE_RATE, RAW_CHANNELS, |mixer, id| {
            mixer.push_bytes(id, bytes)
        });
    }

    fn push_with(&self, sample_rate: u32, channels: u16, push: impl Fn(&AudioMixer, SourceId) -> bool) {
        let Some(mixer) = self.mixer.as_deref() else {
            return;
        };
        // A reaped source is registered again once.
        for _ in 0..2 {
            let Some(id) = self.ensure_source(sample_rate, channels) else {
                return;
            };
            if push(mixer, id) {
                return;
            }
            self.forget(id);
        }
    }

    /// Remove this session's source from the mixer.
    pub fn stop(&self) {
        let source = self.state.lock().source.take();
        if let (Some(mixer), Some(source)) = (&self.mixer, source) {
            mixer.stop_source(source.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{framed, video_header, FakeFactory};
    use bytes::Bytes;
    use mirror_audio::MemoryBackend;
    use mirror_ipc::{MixerSettings, VideoCodec};
    use mirror_transport::PACKET_FLAG_CONFIG;
    use std::io::Cursor;
    use std::time::Duration;

    fn context(factory: FakeFactory) -> (StreamContext, crossbeam_channel::Receiver<SessionEvent>) {
        let (events, rx) = crossbeam_channel::unbounded();
        (
            StreamContext {
                events,
                metrics: Arc::new(MetricsCollector::new()),
                factory: Arc::new(factory),
                closing: Arc::new(AtomicBool::new(false)),
            },
            rx,
        )
    }

    fn mixer() -> (Arc<AudioMixer>, MemoryBackend) {
        let backend = MemoryBackend::new(&["Speakers"]);
        let mixer = AudioMixer::without_thread(Arc::new(backend.clone()), MixerSettings::default());
        mixer.configure_device(None).unwrap();
        (Arc::new(mixer), backend)
    }

    const H264_BODY: &[u8] = &[
        0, 0, 0, 1, 0x67, 0x42, 0, 0, 0, 1, 0x68, 0xCE, // SPS, PPS
        0, 0, 0, 1, 0x65, 0x88, 0x84, // IDR
        0, 0, 0, 1, 0x41, 0x9A, 0x02, // P
    ];

    fn h264_stream() -> Vec<u8> {
        let mut data = video_header(Some("Pixel"), b"h264", 1080, 2400);
        data.extend_from_slice(H264_BODY);
        data
    }

    #[test]
    fn test_video_units_reach_decoder() {
        let factory = FakeFactory::default();
        let (ctx, events) = context(factory.clone());
        let (pictures_tx, pictures_rx) = crossbeam_channel::bounded(8);
        let mut sizes = Vec::new();

        let demuxer = VideoDemuxer::new(Cursor::new(h264_stream()), true);
        let reason = run_video(demuxer, &ctx, &pictures_tx, |w, h| sizes.push((w, h)));

        assert_eq!(reason, StopReason::ConnectionClosed);
        assert_eq!(factory.video_units(), 2);
        assert_eq!(pictures_rx.len(), 2);
        assert_eq!(sizes, vec![(1080, 2400)]);

        let events: Vec<_> = events.try_iter().collect();
        assert!(matches!(&events[0], SessionEvent::DeviceName(name) if name == "Pixel"));
        assert!(matches!(
            events[1],
            SessionEvent::VideoStarted {
                codec: VideoCodec::H264,
                width: 1080,
                height: 2400
            }
        ));

        let metrics = ctx.metrics.snapshot();
        assert_eq!(metrics.video_units, 2);
        assert_eq!(metrics.pictures, 2);
        assert_eq!(metrics.bytes_received, H264_BODY.len() as u64);
    }

    #[test]
    fn test_full_picture_channel_drops() {
        let (ctx, _events) = context(FakeFactory::default());
        let (pictures_tx, _pictures_rx) = crossbeam_channel::bounded(1);
        let demuxer = VideoDemuxer::new(Cursor::new(h264_stream()), true);
        run_video(demuxer, &ctx, &pictures_tx, |_, _| {});

        let metrics = ctx.metrics.snapshot();
        assert_eq!(metrics.pictures, 1);
        assert_eq!(metrics.pictures_dropped, 1);
    }

    #[test]
    fn test_video_open_failure_ends_stream() {
        let factory = FakeFactory::default();
        factory.fail_video_open();
        let (ctx, _events) = context(factory);
        let (pictures_tx, _rx) = crossbeam_channel::bounded(1);
        let demuxer = VideoDemuxer::new(Cursor::new(h264_stream()), true);

        let reason = run_video(demuxer, &ctx, &pictures_tx, |_, _| {});
        assert!(matches!(reason, StopReason::CodecOpenFailed { .. }));
    }

    #[test]
    fn test_decode_error_is_skipped() {
        let factory = FakeFactory::default();
        factory.fail_next_video_decode();
        let (ctx, _events) = context(factory.clone());
        let (pictures_tx, pictures_rx) = crossbeam_channel::bounded(8);
        let demuxer = VideoDemuxer::new(Cursor::new(h264_stream()), true);

        assert_eq!(
            run_video(demuxer, &ctx, &pictures_tx, |_, _| {}),
            StopReason::ConnectionClosed
        );
        assert_eq!(ctx.metrics.snapshot().decode_errors, 1);
        assert_eq!(pictures_rx.len(), 1);
    }

    #[test]
    fn test_bad_dimensions_are_desync() {
        let (ctx, _events) = context(FakeFactory::default());
        let (pictures_tx, _rx) = crossbeam_channel::bounded(1);
        let data = video_header(None, b"h265", 0, 1920);
        let demuxer = VideoDemuxer::new(Cursor::new(data), false);

        let reason = run_video(demuxer, &ctx, &pictures_tx, |_, _| {});
        assert!(matches!(reason, StopReason::Desync { .. }));
    }

    #[test]
    fn test_closing_reports_user_request() {
        let (ctx, _events) = context(FakeFactory::default());
        ctx.closing.store(true, Ordering::SeqCst);
        let (pictures_tx, _rx) = crossbeam_channel::bounded(1);
        let demuxer = VideoDemuxer::new(Cursor::new(Vec::new()), true);
        assert_eq!(
            run_video(demuxer, &ctx, &pictures_tx, |_, _| {}),
            StopReason::UserRequested
        );
    }

    #[test]
    fn test_audio_source_removed_when_stream_ends() {
        let (mixer, backend) = mixer();
        let (ctx, _events) = context(FakeFactory::default());
        let audio = SessionAudio::new(Some(Arc::clone(&mixer)), 1.0);

        let mut data = b"\0raw".to_vec();
        let pcm: Vec<u8> = [1000i16, -1000, 2000, -2000]
            .iter()
            .flat_map(|s| s.to_le_bytes())
            .collect();
        data.extend(framed(0, &pcm));

        let reason = run_audio(AudioDemuxer::new(Cursor::new(data), false), &ctx, &audio);
        assert_eq!(reason, StopReason::ConnectionClosed);
        assert_eq!(mixer.source_count(), 0);
        assert_eq!(ctx.metrics.snapshot().audio_packets, 1);
        assert!(backend.written("Speakers").is_empty());
    }

    #[test]
    fn test_raw_audio_registers_stereo_48k() {
        let (mixer, backend) = mixer();
        let audio = SessionAudio::new(Some(Arc::clone(&mixer)), 1.0);
        audio.push_raw(&[0x10, 0x00, 0x20, 0x00]);

        let id = audio.source_id().unwrap();
        assert!(mixer.buffered(id).is_some_and(|d| d > Duration::ZERO));
        mixer.mix_once();
        let written = backend.written("Speakers");
        assert_eq!(written.len(), 2);
        assert!((written[0] - 16).abs() <= 1);
    }

    #[test]
    fn test_format_change_reregisters() {
        let (mixer, _backend) = mixer();
        let audio = SessionAudio::new(Some(Arc::clone(&mixer)), 0.5);

        audio.push_pcm(&PcmFrame {
            samples: vec![0; 480],
            sample_rate: 48000,
            channels: 2,
        });
        let first = audio.source_id().unwrap();
        assert_eq!(mixer.source_volume(first), Some(0.5));

        audio.push_pcm(&PcmFrame {
            samples: vec![0; 240],
            sample_rate: 24000,
            channels: 1,
        });
        let second = audio.source_id().unwrap();
        assert_ne!(first, second);
        assert_eq!(mixer.source_ids(), vec![second]);
    }

    #[test]
    fn test_reaped_source_is_registered_again() {
        let (mixer, _backend) = mixer();
        let audio = SessionAudio::new(Some(Arc::clone(&mixer)), 1.0);
        audio.push_raw(&[0, 0, 0, 0]);
        let first = audio.source_id().unwrap();

        mixer.stop_source(first);
        audio.push_raw(&[0, 0, 0, 0]);
        let second = audio.source_id().unwrap();
        assert_ne!(first, second);
        assert_eq!(mixer.source_count(), 1);
    }

    #[test]
    fn test_no_mixer_drops_quietly() {
        let audio = SessionAudio::new(None, 1.0);
        audio.push_raw(&[0, 0, 0, 0]);
        assert_eq!(audio.source_id(), None);
    }

    #[test]
    fn test_opus_packets_are_decoded() {
        let factory = FakeFactory::default();
        let (mixer, _backend) = mixer();
        let (ctx, _events) = context(factory.clone());
        let audio = SessionAudio::new(Some(Arc::clone(&mixer)), 1.0);

        let mut data = b"opus".to_vec();
        data.extend(framed(PACKET_FLAG_CONFIG, b"OpusHead"));
        data.extend(framed(10, &[1, 2, 3]));
        data.extend(framed(20, &[4, 5]));

        run_audio(AudioDemuxer::new(Cursor::new(data), false), &ctx, &audio);
        assert_eq!(factory.audio_packets(), 2);
        assert_eq!(factory.audio_configs(), vec![Bytes::from_static(b"OpusHead")]);
        assert_eq!(factory.audio_open_config(), Some(None));
    }

    #[test]
    fn test_aac_opens_with_config() {
        let factory = FakeFactory::default();
        let (ctx, _events) = context(factory.clone());
        let audio = SessionAudio::new(None, 1.0);

        let mut data = b"\0aac".to_vec();
        data.extend(framed(PACKET_FLAG_CONFIG, &[0x11, 0x90]));
        data.extend(framed(10, &[1, 2, 3]));

        let reason = run_audio(AudioDemuxer::new(Cursor::new(data), false), &ctx, &audio);
        assert_eq!(reason, StopReason::ConnectionClosed);
        assert_eq!(
            factory.audio_open_config(),
            Some(Some(Bytes::from_static(&[0x11, 0x90])))
        );
        assert_eq!(factory.audio_packets(), 1);
    }

    #[test]
    fn test_aac_without_config_is_desync() {
        let (ctx, _events) = context(FakeFactory::default());
        let audio = SessionAudio::new(None, 1.0);
        let mut data = b"\0aac".to_vec();
        data.extend(framed(10, &[1, 2, 3]));

        let reason = run_audio(AudioDemuxer::new(Cursor::new(data), false), &ctx, &audio);
        assert!(matches!(reason, StopReason::Desync { .. }));
    }

    #[test]
    fn test_audio_open_failure_ends_stream() {
        let factory = FakeFactory::default();
        factory.fail_audio_open();
        let (ctx, _events) = context(factory);
        let audio = SessionAudio::new(None, 1.0);
        let mut data = b"flac".to_vec();
        data.extend(framed(10, &[1]));

        let reason = run_audio(AudioDemuxer::new(Cursor::new(data), false), &ctx, &audio);
        assert!(matches!(reason, StopReason::CodecOpenFailed { .. }));
    }
}
