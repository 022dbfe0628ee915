//! The mixing engine.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, instrument, trace, warn};

use mirror_ipc::{AudioOutputDevice, MixerSettings};

use crate::convert::to_i16;
use crate::device::{OutputBackend, OutputDevice};
use crate::source::{AudioSource, LatencyBounds};
use crate::{samples_for_ms, AudioError, AudioResult, SourceId, MIXER_JOIN_TIMEOUT};

/// Mixer counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MixerStats {
    /// Live sources.
    pub sources: usize,

    /// Mixing passes that wrote to the device.
    pub quanta_written: u64,

    /// Interleaved samples written to the device.
    pub samples_written: u64,

    /// Samples dropped by latency trimming, removed sources included.
    pub samples_discarded: u64,

    /// Device writes that failed.
    pub write_errors: u64,

    /// Current output device.
    pub device: Option<String>,
}

/// Working buffers for one mixing pass.
struct MixScratch {
    input: Vec<i16>,
    accumulator: Vec<f32>,
    output: Vec<i16>,
}

impl MixScratch {
    fn new(quantum: usize) -> Self {
        Self {
            input: vec![0; quantum],
            accumulator: vec![0.0; quantum],
            output: vec![0; quantum],
        }
    }
}

struct MixerShared {
    backend: Arc<dyn OutputBackend>,
    settings: MixerSettings,
    bounds: LatencyBounds,
    quantum: usize,
    sources: RwLock<HashMap<SourceId, Arc<AudioSource>>>,
    device: Mutex<Option<Box<dyn OutputDevice>>>,
    global_volume: RwLock<f32>,
    next_id: AtomicU32,
    should_stop: AtomicBool,
    quanta_written: AtomicU64,
    samples_written: AtomicU64,
    retired_discarded: AtomicU64,
    write_errors: AtomicU64,
}

impl MixerShared {
    fn source(&self, id: SourceId) -> Option<Arc<AudioSource>> {
        self.sources.read().get(&id).cloned()
    }

    /// One pass: pull a quantum from every source, sum, clip, write.
    ///
    /// Returns the number of samples written. Nothing is written when no
    /// source had data.
    fn mix(&self, scratch: &mut MixScratch) -> usize {
        let sources: Vec<Arc<AudioSource>> = self.sources.read().values().cloned().collect();
        if sources.is_empty() {
            return 0;
        }

        let global = *self.global_volume.read();
        scratch.accumulator.fill(0.0);

        let mut mixed = 0;
        for source in &sources {
            let read = source.pull(&mut scratch.input, self.bounds);
            if read == 0 {
                continue;
            }
            let gain = source.volume() * global;
            for (acc, &sample) in scratch.accumulator.iter_mut().zip(&scratch.input[..read]) {
                *acc += sample as f32 / 32768.0 * gain;
            }
            mixed = mixed.max(read);
        }

        if mixed == 0 {
            return 0;
        }

        for (out, &acc) in scratch.output.iter_mut().zip(&scratch.accumulator[..mixed]) {
            *out = to_i16(acc.clamp(-1.0, 1.0) * 32768.0);
        }

        let mut device = self.device.lock();
        let Some(device) = device.as_mut() else {
            trace!(samples = mixed, "No output device, dropping mixed audio");
            return 0;
        };
        match device.write(&scratch.output[..mixed]) {
            Ok(()) => {
                self.quanta_written.fetch_add(1, Ordering::Relaxed);
                self.samples_written
                    .fetch_add(mixed as u64, Ordering::Relaxed);
                mixed
            }
            Err(e) => {
                let errors = self.write_errors.fetch_add(1, Ordering::Relaxed);
                if errors % 100 == 0 {
                    warn!(device = device.name(), error = %e, "Audio device write failed");
                }
                0
            }
        }
    }

    fn retire(&self, source: &AudioSource) {
        self.retired_discarded
            .fetch_add(source.discarded_samples(), Ordering::Relaxed);
    }
}

/// Mixes any number of PCM sources into one output device.
///
/// The mixing thread starts with the first successful
/// [`configure_device`](Self::configure_device) and runs until
/// [`shutdown`](Self::shutdown) or drop. Producers hold only a [`SourceId`].
pub struct AudioMixer {
    shared: Arc<MixerShared>,
    mix_thread: Mutex<Option<JoinHandle<()>>>,
    threaded: bool,
}

impl AudioMixer {
    /// Create a mixer that plays through `backend`.
    pub fn new(backend: Arc<dyn OutputBackend>, settings: MixerSettings) -> Self {
        Self::build(backend, settings, true)
    }

    /// Create a mixer that never spawns its thread; the owner drives it
    /// with [`mix_once`](Self::mix_once).
    pub fn without_thread(backend: Arc<dyn OutputBackend>, settings: MixerSettings) -> Self {
        Self::build(backend, settings, false)
    }

    fn build(backend: Arc<dyn OutputBackend>, settings: MixerSettings, threaded: bool) -> Self {
        let quantum = samples_for_ms(settings.quantum_ms.max(1));
        Self {
            shared: Arc::new(MixerShared {
                backend,
                bounds: LatencyBounds::from_settings(&settings),
                settings,
                quantum,
                sources: RwLock::new(HashMap::new()),
                device: Mutex::new(None),
                global_volume: RwLock::new(1.0),
                next_id: AtomicU32::new(1),
                should_stop: AtomicBool::new(false),
                quanta_written: AtomicU64::new(0),
                samples_written: AtomicU64::new(0),
                retired_discarded: AtomicU64::new(0),
                write_errors: AtomicU64::new(0),
            }),
            mix_thread: Mutex::new(None),
            threaded,
        }
    }

    pub fn settings(&self) -> &MixerSettings {
        &self.shared.settings
    }

    /// Open a playback device and make it the mixer's output.
    ///
    /// The new device is opened before the current one is released, so a
    /// failed open leaves playback untouched. An unknown name falls back to
    /// the system default. Returns the name of the device now in use.
    #[instrument(name = "mixer_configure_device", skip(self))]
    pub fn configure_device(&self, name: Option<&str>) -> AudioResult<String> {
        if self.is_shut_down() {
            return Err(AudioError::MixerStopped);
        }

        let backend = &self.shared.backend;
        let max_backlog = samples_for_ms(self.shared.settings.max_device_backlog_ms);
        let device = match name {
            Some(requested) => match backend.open(Some(requested), max_backlog) {
                Err(AudioError::DeviceNotFound(_)) => {
                    warn!(device = requested, "Audio device not found, using default");
                    backend.open(None, max_backlog)?
                }
                other => other?,
            },
            None => backend.open(None, max_backlog)?,
        };

        let device_name = device.name().to_string();
        let previous = self.shared.device.lock().replace(device);
        if let Some(previous) = previous {
            debug!(previous = previous.name(), "Closing previous audio device");
            drop(previous);
        }

        self.ensure_running()?;
        info!(device = %device_name, "Audio device configured");
        Ok(device_name)
    }

    fn ensure_running(&self) -> AudioResult<()> {
        if !self.threaded {
            return Ok(());
        }
        let mut mix_thread = self.mix_thread.lock();
        if mix_thread.is_some() {
            return Ok(());
        }

        let shared = Arc::clone(&self.shared);
        let handle = thread::Builder::new()
            .name("audio-mixer".into())
            .spawn(move || mix_loop(shared))
            .map_err(|e| AudioError::Device(format!("failed to spawn mixer thread: {e}")))?;
        *mix_thread = Some(handle);
        Ok(())
    }

    pub fn device_name(&self) -> Option<String> {
        self.shared
            .device
            .lock()
            .as_ref()
            .map(|d| d.name().to_string())
    }

    pub fn list_devices(&self) -> AudioResult<Vec<AudioOutputDevice>> {
        self.shared.backend.list_devices()
    }

    /// Register a producer of interleaved 16-bit PCM at the given format.
    pub fn register_source(&self, sample_rate: u32, channels: u16) -> AudioResult<SourceId> {
        if self.is_shut_down() {
            return Err(AudioError::MixerStopped);
        }
        if self.shared.device.lock().is_none() {
            return Err(AudioError::NotConfigured);
        }

        let id = SourceId(self.shared.next_id.fetch_add(1, Ordering::Relaxed));
        let source = Arc::new(AudioSource::new(id, sample_rate, channels)?);
        self.shared.sources.write().insert(id, source);
        debug!(source_id = %id, sample_rate, channels, "Audio source registered");
        Ok(id)
    }

    /// Queue samples on a source. Unknown ids are ignored.
    pub fn push_samples(&self, id: SourceId, samples: &[i16]) -> bool {
        match self.shared.source(id) {
            Some(source) => {
                source.push(samples);
                true
            }
            None => {
                debug!(source_id = %id, "Push to unknown audio source ignored");
                false
            }
        }
    }

    /// Queue little-endian PCM bytes on a source. Unknown ids are ignored.
    pub fn push_bytes(&self, id: SourceId, bytes: &[u8]) -> bool {
        match self.shared.source(id) {
            Some(source) => {
                source.push_bytes(bytes);
                true
            }
            None => {
                debug!(source_id = %id, "Push to unknown audio source ignored");
                false
            }
        }
    }

    pub fn set_source_volume(&self, id: SourceId, volume: f32) -> AudioResult<()> {
        let source = self
            .shared
            .source(id)
            .ok_or(AudioError::UnknownSource(id))?;
        source.set_volume(volume);
        Ok(())
    }

    pub fn source_volume(&self, id: SourceId) -> Option<f32> {
        self.shared.source(id).map(|s| s.volume())
    }

    /// Remove a source. Its unread audio is dropped.
    pub fn stop_source(&self, id: SourceId) -> bool {
        let removed = self.shared.sources.write().remove(&id);
        match removed {
            Some(source) => {
                self.shared.retire(&source);
                debug!(source_id = %id, "Audio source stopped");
                true
            }
            None => false,
        }
    }

    /// Remove every source and drop audio queued on the device.
    pub fn stop_all(&self) {
        let removed: Vec<_> = self.shared.sources.write().drain().collect();
        for (_, source) in &removed {
            self.shared.retire(source);
        }
        if let Some(device) = self.shared.device.lock().as_mut() {
            device.clear();
        }
        if !removed.is_empty() {
            debug!(count = removed.len(), "All audio sources stopped");
        }
    }

    /// Set the volume applied to the whole mix. Negative values become 0.
    pub fn set_global_volume(&self, volume: f32) {
        *self.shared.global_volume.write() = volume.max(0.0);
    }

    pub fn global_volume(&self) -> f32 {
        *self.shared.global_volume.read()
    }

    /// Playback time queued on a source.
    pub fn buffered(&self, id: SourceId) -> Option<Duration> {
        self.shared.source(id).map(|s| s.buffered())
    }

    pub fn source_count(&self) -> usize {
        self.shared.sources.read().len()
    }

    pub fn source_ids(&self) -> Vec<SourceId> {
        let mut ids: Vec<_> = self.shared.sources.read().keys().copied().collect();
        ids.sort();
        ids
    }

    /// Remove sources that neither received nor yielded audio for
    /// `timeout`. Returns the removed ids.
    pub fn reap_idle(&self, timeout: Duration) -> Vec<SourceId> {
        let idle: Vec<SourceId> = self
            .shared
            .sources
            .read()
            .values()
            .filter(|s| s.idle_for() >= timeout)
            .map(|s| s.id())
            .collect();

        for id in &idle {
            if self.stop_source(*id) {
                info!(source_id = %id, "Removed idle audio source");
            }
        }
        idle
    }

    /// Run one mixing pass on the calling thread.
    pub fn mix_once(&self) -> usize {
        let mut scratch = MixScratch::new(self.shared.quantum);
        self.shared.mix(&mut scratch)
    }

    pub fn stats(&self) -> MixerStats {
        let shared = &self.shared;
        let sources = shared.sources.read();
        let live_discarded: u64 = sources.values().map(|s| s.discarded_samples()).sum();
        MixerStats {
            sources: sources.len(),
            quanta_written: shared.quanta_written.load(Ordering::Relaxed),
            samples_written: shared.samples_written.load(Ordering::Relaxed),
            samples_discarded: shared.retired_discarded.load(Ordering::Relaxed) + live_discarded,
            write_errors: shared.write_errors.load(Ordering::Relaxed),
            device: self.device_name(),
        }
    }

    pub fn is_running(&self) -> bool {
        self.mix_thread
            .lock()
            .as_ref()
            .map_or(false, |h| !h.is_finished())
    }

    pub fn is_shut_down(&self) -> bool {
        self.shared.should_stop.load(Ordering::SeqCst)
    }

    /// Stop the mixing thread, drop all sources and close the device.
    #[instrument(name = "mixer_shutdown", skip(self))]
    pub fn shutdown(&self) {
        if self.shared.should_stop.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("Stopping audio mixer");

        if let Some(handle) = self.mix_thread.lock().take() {
            let deadline = Instant::now() + MIXER_JOIN_TIMEOUT;
            while !handle.is_finished() && Instant::now() < deadline {
                thread::sleep(Duration::from_millis(5));
            }
            if handle.is_finished() {
                let _ = handle.join();
            } else {
                warn!("Mixer thread did not exit in time, detaching");
            }
        }

        self.stop_all();
        self.shared.device.lock().take();
        info!("Audio mixer stopped");
    }
}

impl Drop for AudioMixer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn mix_loop(shared: Arc<MixerShared>) {
    debug!("Mixer thread started");

    let interval = Duration::from_millis(shared.settings.interval_ms.max(1));
    let mut scratch = MixScratch::new(shared.quantum);

    while !shared.should_stop.load(Ordering::SeqCst) {
        shared.mix(&mut scratch);
        thread::sleep(interval);
    }

    debug!("Mixer thread exiting");
}
