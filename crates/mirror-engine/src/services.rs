//! Process-wide services shared by sessions: the mixer, the decoder
//! factory and their background tasks.

use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::Sender;
use parking_lot::Mutex;
use tracing::{debug, info, instrument, warn};

use mirror_audio::{AudioMixer, OutputBackend};
use mirror_codec::DecoderFactory;
use mirror_ipc::{AudioOutputDevice, SessionConfig, SessionEvent};

use crate::scheduler::PeriodicTask;
use crate::EngineResult;

const TASK_CANCEL_TIMEOUT: Duration = Duration::from_secs(1);

/// Shortest interval of the idle source reaper.
const MIN_REAP_INTERVAL: Duration = Duration::from_millis(100);

pub struct EngineServices {
    mixer: Arc<AudioMixer>,
    factory: Arc<dyn DecoderFactory>,
    tasks: Mutex<Vec<PeriodicTask>>,
}

impl EngineServices {
    /// Build services around a playback backend. No device is opened yet.
    pub fn new(
        backend: Arc<dyn OutputBackend>,
        factory: Arc<dyn DecoderFactory>,
        config: &SessionConfig,
    ) -> Self {
        let mixer = AudioMixer::new(backend, config.mixer.clone());
        mixer.set_global_volume(config.global_volume);
        Self::with_mixer(Arc::new(mixer), factory)
    }

    pub fn with_mixer(mixer: Arc<AudioMixer>, factory: Arc<dyn DecoderFactory>) -> Self {
        Self {
            mixer,
            factory,
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn mixer(&self) -> &Arc<AudioMixer> {
        &self.mixer
    }

    pub fn factory(&self) -> &Arc<dyn DecoderFactory> {
        &self.factory
    }

    /// Open the configured playback device and start the background tasks.
    ///
    /// A device that cannot be opened is reported as a recoverable error;
    /// sessions then run without audio output.
    #[instrument(name = "services_start", skip_all)]
    pub fn start(&self, config: &SessionConfig, events: &Sender<SessionEvent>) -> EngineResult<()> {
        if config.audio {
            if let Err(e) = self.mixer.configure_device(config.audio_output_device.as_deref()) {
                warn!(error = %e, "Audio output unavailable");
                let _ = events.try_send(SessionEvent::Error {
                    recoverable: true,
                    message: format!("Audio output unavailable: {e}"),
                });
            }
        }

        if config.device_refresh_interval_ms > 0 {
            self.start_device_refresh(
                Duration::from_millis(config.device_refresh_interval_ms),
                config.audio_output_device.clone(),
                events.clone(),
            )?;
        }

        if config.idle_source_timeout_ms > 0 {
            self.start_idle_reaper(Duration::from_millis(config.idle_source_timeout_ms))?;
        }
        Ok(())
    }

    /// Poll the playback devices, report changes and fall back when the
    /// device in use disappears.
    pub fn start_device_refresh(
        &self,
        interval: Duration,
        preferred: Option<String>,
        events: Sender<SessionEvent>,
    ) -> EngineResult<()> {
        let mixer = Arc::clone(&self.mixer);
        let mut known: Option<Vec<AudioOutputDevice>> = None;

        let task = PeriodicTask::spawn("device-refresh", interval, move || {
            refresh_devices(&mixer, preferred.as_deref(), &mut known, &events);
            true
        })?;
        self.tasks.lock().push(task);
        Ok(())
    }

    /// Remove mixer sources that stayed silent for `timeout`.
    pub fn start_idle_reaper(&self, timeout: Duration) -> EngineResult<()> {
        let mixer = Arc::clone(&self.mixer);
        let interval = (timeout / 2).max(MIN_REAP_INTERVAL);

        let task = PeriodicTask::spawn("source-reaper", interval, move || {
            mixer.reap_idle(timeout);
            !mixer.is_shut_down()
        })?;
        self.tasks.lock().push(task);
        Ok(())
    }

    pub fn list_output_devices(&self) -> EngineResult<Vec<AudioOutputDevice>> {
        Ok(self.mixer.list_devices()?)
    }

    /// Switch playback to `name`, or the default device for `None`.
    pub fn switch_output_device(&self, name: Option<&str>) -> EngineResult<String> {
        Ok(self.mixer.configure_device(name)?)
    }

    /// Stop background tasks and the mixer.
    #[instrument(name = "services_shutdown", skip(self))]
    pub fn shutdown(&self) {
        let tasks: Vec<_> = self.tasks.lock().drain(..).collect();
        for mut task in tasks {
            if !task.cancel(TASK_CANCEL_TIMEOUT) {
                warn!(task = task.name(), "Task did not stop in time");
            }
        }
        self.mixer.shutdown();
    }
}

impl Drop for EngineServices {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// One refresh pass. Errors are logged; the next tick tries again.
fn refresh_devices(
    mixer: &AudioMixer,
    preferred: Option<&str>,
    known: &mut Option<Vec<AudioOutputDevice>>,
    events: &Sender<SessionEvent>,
) {
    let devices = match mixer.list_devices() {
        Ok(devices) => devices,
        Err(e) => {
            debug!(error = %e, "Failed to list audio devices");
            return;
        }
    };
    if known.as_ref() == Some(&devices) {
        return;
    }

    info!(count = devices.len(), "Audio devices changed");
    let first_pass = known.is_none();
    *known = Some(devices.clone());
    if !first_pass {
        let _ = events.try_send(SessionEvent::AudioDevicesChanged(devices.clone()));
    }

    let Some(current) = mixer.device_name() else {
        return;
    };
    let current_present = devices.iter().any(|d| d.name == current);
    let preferred_back = preferred.is_some_and(|p| p != current && devices.iter().any(|d| d.name == p));

    if !current_present || preferred_back {
        let target = preferred.filter(|p| devices.iter().any(|d| d.name == *p));
        match mixer.configure_device(target) {
            Ok(name) => info!(previous = %current, device = %name, "Audio output switched"),
            Err(e) => warn!(error = %e, "Failed to switch audio output"),
        }
    }
}
