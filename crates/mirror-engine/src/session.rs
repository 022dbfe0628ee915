//! One mirroring session over already-connected sockets.

use std::io::BufReader;
use std::mem;
use std::net::{Shutdown, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Sender};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, info, instrument, warn};

use mirror_audio::AudioMixer;
use mirror_codec::DecodedPicture;
use mirror_ipc::{
    SessionConfig, SessionEvent, SessionMetrics, SessionState, StartupPhase, StopReason,
    StreamKind,
};
use mirror_protocol::ViewSize;
use mirror_transport::{AudioDemuxer, ControlChannel, VideoDemuxer, RECEIVE_BUFFER_SIZE};

use crate::input::InputController;
use crate::metrics::MetricsCollector;
use crate::pipeline::{run_audio, run_video, SessionAudio, StreamContext};
use crate::scheduler::join_with_timeout;
use crate::services::EngineServices;
use crate::{EngineError, EngineResult, READER_JOIN_TIMEOUT};

/// The sockets of one session, as accepted from the device agent.
/// `None` disables the stream.
#[derive(Debug, Default)]
pub struct SessionStreams {
    pub video: Option<TcpStream>,
    pub audio: Option<TcpStream>,
    pub control: Option<TcpStream>,
}

fn send_event(events: &Sender<SessionEvent>, event: SessionEvent) {
    if let Err(e) = events.try_send(event) {
        warn!("Failed to send event: {}", e);
    }
}

fn transition(state: &RwLock<SessionState>, events: &Sender<SessionEvent>, new: SessionState) {
    let previous = mem::replace(&mut *state.write(), new.clone());
    info!(from = previous.name(), to = new.name(), "Session state changed");
    send_event(
        events,
        SessionEvent::StateChanged {
            previous: Box::new(previous),
            current: Box::new(new),
        },
    );
}

fn startup_failed(phase: StartupPhase, err: impl std::fmt::Display) -> EngineError {
    EngineError::Startup {
        phase,
        message: err.to_string(),
    }
}

/// A running session: reader threads for video and audio plus the
/// control channel behind [`InputController`].
///
/// Closing is idempotent and safe from any thread, including the
/// session's own readers.
pub struct Session {
    config: SessionConfig,
    state: Arc<RwLock<SessionState>>,
    events: Sender<SessionEvent>,
    sockets: Mutex<Vec<(StreamKind, TcpStream)>>,
    readers: Mutex<Vec<(StreamKind, JoinHandle<()>)>>,
    input: Arc<InputController<TcpStream>>,
    audio: Arc<SessionAudio>,
    metrics: Arc<MetricsCollector>,
    mixer: Arc<AudioMixer>,
    pictures: Receiver<DecodedPicture>,
    closing: Arc<AtomicBool>,
}

impl Session {
    /// Start a session. Phases run in order; a failing phase tears down
    /// everything started before it and leaves the session `Closed`.
    #[instrument(name = "session_start", skip_all)]
    pub fn start(
        streams: SessionStreams,
        config: &SessionConfig,
        services: &EngineServices,
        events: Sender<SessionEvent>,
    ) -> EngineResult<Self> {
        let mut config = config.clone();
        config.video &= streams.video.is_some();
        config.audio &= streams.audio.is_some();
        config.control &= streams.control.is_some();
        if !config.video && !config.audio && !config.control {
            return Err(EngineError::Config("no streams enabled".into()));
        }

        let state = Arc::new(RwLock::new(SessionState::Idle));
        let mut sockets = Vec::new();

        let phase = StartupPhase::OpenControl;
        transition(&state, &events, SessionState::Starting { phase });
        let control = match streams.control.filter(|_| config.control) {
            Some(socket) => match Self::open_control(socket) {
                Ok((channel, shutdown_handle)) => {
                    sockets.push((StreamKind::Control, shutdown_handle));
                    Some(channel)
                }
                Err(e) => {
                    error!(phase = phase.name(), error = %e, "Session startup failed");
                    let reason = StopReason::Io {
                        message: e.to_string(),
                    };
                    transition(&state, &events, SessionState::Closed { reason });
                    return Err(startup_failed(phase, e));
                }
            },
            None => None,
        };

        let (pictures_tx, pictures_rx) =
            crossbeam_channel::bounded(config.picture_channel_capacity.max(1));
        let volume = config.source_volume;
        let session = Self {
            state,
            events,
            sockets: Mutex::new(sockets),
            readers: Mutex::new(Vec::new()),
            input: Arc::new(InputController::new(control, ViewSize::default())),
            audio: Arc::new(SessionAudio::new(Some(Arc::clone(services.mixer())), volume)),
            metrics: Arc::new(MetricsCollector::new()),
            mixer: Arc::clone(services.mixer()),
            pictures: pictures_rx,
            closing: Arc::new(AtomicBool::new(false)),
            config,
        };

        let handshake = session.config.handshake_stream();

        if let Some(socket) = streams.video.filter(|_| session.config.video) {
            let phase = StartupPhase::StartVideo;
            transition(&session.state, &session.events, SessionState::Starting { phase });
            let ctx = session.stream_context(services);
            let input = Arc::clone(&session.input);
            let result = session.spawn_reader(StreamKind::Video, socket, move |socket| {
                let demuxer = VideoDemuxer::new(socket, handshake == Some(StreamKind::Video));
                run_video(demuxer, &ctx, &pictures_tx, |width, height| {
                    if let Err(e) = input.set_frame_size(width, height) {
                        debug!(error = %e, "Failed to release touches on resize");
                    }
                })
            });
            if let Err(e) = result {
                return Err(session.abort(phase, e));
            }
        }

        if let Some(socket) = streams.audio.filter(|_| session.config.audio) {
            let phase = StartupPhase::StartAudio;
            transition(&session.state, &session.events, SessionState::Starting { phase });
            let ctx = session.stream_context(services);
            let audio = Arc::clone(&session.audio);
            let result = session.spawn_reader(StreamKind::Audio, socket, move |socket| {
                let reader = BufReader::with_capacity(RECEIVE_BUFFER_SIZE, socket);
                let demuxer = AudioDemuxer::new(reader, handshake == Some(StreamKind::Audio));
                run_audio(demuxer, &ctx, &audio)
            });
            if let Err(e) = result {
                return Err(session.abort(phase, e));
            }
        }

        session.metrics.start();
        transition(&session.state, &session.events, SessionState::Live);
        info!(
            video = session.config.video,
            audio = session.config.audio,
            control = session.config.control,
            "Session live"
        );
        Ok(session)
    }

    fn open_control(socket: TcpStream) -> std::io::Result<(ControlChannel<TcpStream>, TcpStream)> {
        socket.set_nodelay(true)?;
        let shutdown_handle = socket.try_clone()?;
        Ok((ControlChannel::new(socket), shutdown_handle))
    }

    fn stream_context(&self, services: &EngineServices) -> StreamContext {
        StreamContext {
            events: self.events.clone(),
            metrics: Arc::clone(&self.metrics),
            factory: Arc::clone(services.factory()),
            closing: Arc::clone(&self.closing),
        }
    }

    fn spawn_reader<F>(&self, kind: StreamKind, socket: TcpStream, body: F) -> std::io::Result<()>
    where
        F: FnOnce(TcpStream) -> StopReason + Send + 'static,
    {
        let shutdown_handle = socket.try_clone()?;
        let events = self.events.clone();
        let handle = thread::Builder::new()
            .name(format!("{kind}-reader"))
            .spawn(move || {
                let reason = body(socket);
                info!(stream = kind.name(), reason = ?reason, "Stream ended");
                send_event(&events, SessionEvent::StreamEnded { stream: kind, reason });
            })?;

        self.sockets.lock().push((kind, shutdown_handle));
        self.readers.lock().push((kind, handle));
        debug!(stream = kind.name(), "Reader started");
        Ok(())
    }

    fn abort(&self, phase: StartupPhase, err: std::io::Error) -> EngineError {
        error!(phase = phase.name(), error = %err, "Session startup failed, rolling back");
        self.close(StopReason::Io {
            message: err.to_string(),
        });
        startup_failed(phase, err)
    }

    /// Stop every stream and wait briefly for the readers to exit.
    #[instrument(name = "session_close", skip(self))]
    pub fn close(&self, reason: StopReason) {
        if self.closing.swap(true, Ordering::SeqCst) {
            return;
        }
        transition(
            &self.state,
            &self.events,
            SessionState::Stopping {
                reason: reason.clone(),
            },
        );

        if let Err(e) = self.input.release_all() {
            debug!(error = %e, "Could not release touches before closing");
        }
        self.input.close();

        for (kind, socket) in self.sockets.lock().iter() {
            if let Err(e) = socket.shutdown(Shutdown::Both) {
                debug!(stream = kind.name(), error = %e, "Socket shutdown failed");
            }
        }

        let current = thread::current().id();
        let readers = mem::take(&mut *self.readers.lock());
        for (kind, handle) in readers {
            // A reader closing its own session cannot wait for itself.
            if handle.thread().id() == current {
                continue;
            }
            join_with_timeout(handle, READER_JOIN_TIMEOUT, kind.name());
        }

        self.audio.stop();
        self.metrics.stop();
        transition(&self.state, &self.events, SessionState::Closed { reason });
    }

    pub fn state(&self) -> SessionState {
        self.state.read().clone()
    }

    pub fn is_closed(&self) -> bool {
        matches!(*self.state.read(), SessionState::Closed { .. })
    }

    /// The effective configuration, with streams that had no socket disabled.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn input(&self) -> &InputController<TcpStream> {
        &self.input
    }

    /// Decoded pictures for presentation. Pictures are dropped when the
    /// receiver falls behind.
    pub fn pictures(&self) -> Receiver<DecodedPicture> {
        self.pictures.clone()
    }

    /// Reader threads still running.
    pub fn active_streams(&self) -> usize {
        self.readers
            .lock()
            .iter()
            .filter(|(_, handle)| !handle.is_finished())
            .count()
    }

    /// Current counters. Audio discards cover the whole shared mixer.
    pub fn metrics(&self) -> SessionMetrics {
        self.metrics
            .update_audio_samples_discarded(self.mixer.stats().samples_discarded);
        self.metrics.snapshot()
    }

    /// Send the current counters as a [`SessionEvent::Metrics`].
    pub fn publish_metrics(&self) {
        send_event(&self.events, SessionEvent::Metrics(self.metrics()));
    }

    /// Volume of this session's audio source.
    pub fn set_audio_volume(&self, volume: f32) {
        self.audio.set_volume(volume);
    }

    pub fn audio_volume(&self) -> f32 {
        self.audio.volume()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.close(StopReason::UserRequested);
    }
}
