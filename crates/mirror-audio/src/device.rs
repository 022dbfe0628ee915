//! Output device abstraction and the cpal backend.

use std::collections::VecDeque;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use crossbeam_channel::Sender;
use parking_lot::Mutex;
use tracing::{debug, info, instrument, trace, warn};

use mirror_ipc::AudioOutputDevice;

use crate::{AudioError, AudioResult, CHANNELS, DEVICE_OPEN_TIMEOUT, SAMPLE_RATE};

/// An open playback device accepting 48 kHz stereo 16-bit samples.
pub trait OutputDevice: Send {
    /// Name the device was opened under.
    fn name(&self) -> &str;

    /// Queue interleaved samples for playback.
    fn write(&mut self, samples: &[i16]) -> AudioResult<()>;

    /// Drop everything queued but not yet played.
    fn clear(&mut self);
}

/// Enumerates and opens playback devices.
pub trait OutputBackend: Send + Sync {
    fn list_devices(&self) -> AudioResult<Vec<AudioOutputDevice>>;

    /// Open `name`, or the system default for `None`. At most
    /// `max_backlog` samples are kept queued ahead of playback.
    ///
    /// A name that matches no device fails with
    /// [`AudioError::DeviceNotFound`].
    fn open(&self, name: Option<&str>, max_backlog: usize) -> AudioResult<Box<dyn OutputDevice>>;
}

/// Playback through the platform's default cpal host.
#[derive(Debug, Clone, Copy, Default)]
pub struct CpalBackend;

impl CpalBackend {
    pub fn new() -> Self {
        Self
    }
}

impl OutputBackend for CpalBackend {
    #[instrument(name = "list_output_devices", skip(self))]
    fn list_devices(&self) -> AudioResult<Vec<AudioOutputDevice>> {
        let host = cpal::default_host();
        let default_name = host.default_output_device().and_then(|d| d.name().ok());

        let devices: Vec<AudioOutputDevice> = host
            .output_devices()
            .map_err(|e| AudioError::Device(e.to_string()))?
            .filter_map(|device| device.name().ok())
            .map(|name| AudioOutputDevice {
                is_default: default_name.as_ref() == Some(&name),
                name,
            })
            .collect();

        debug!(count = devices.len(), "Enumerated output devices");
        Ok(devices)
    }

    #[instrument(name = "open_output_device", skip(self))]
    fn open(&self, name: Option<&str>, max_backlog: usize) -> AudioResult<Box<dyn OutputDevice>> {
        let queue = Arc::new(Mutex::new(VecDeque::with_capacity(max_backlog)));
        let (ready_tx, ready_rx) = crossbeam_channel::bounded(1);
        let (stop_tx, stop_rx) = crossbeam_channel::bounded::<()>(1);

        let requested = name.map(str::to_owned);
        let stream_queue = Arc::clone(&queue);

        // cpal streams are not Send on every platform, so the stream lives
        // and dies on its own thread.
        let thread = thread::Builder::new()
            .name("audio-output".into())
            .spawn(move || {
                let stream = match build_stream(requested.as_deref(), stream_queue) {
                    Ok((stream, name)) => {
                        let _ = ready_tx.send(Ok(name));
                        stream
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                let _ = stop_rx.recv();
                drop(stream);
                debug!("Output stream closed");
            })
            .map_err(|e| AudioError::Device(format!("failed to spawn output thread: {e}")))?;

        match ready_rx.recv_timeout(DEVICE_OPEN_TIMEOUT) {
            Ok(Ok(device_name)) => {
                info!(device = %device_name, "Output device opened");
                Ok(Box::new(CpalOutput {
                    name: device_name,
                    queue,
                    max_backlog,
                    stop: Some(stop_tx),
                    thread: Some(thread),
                }))
            }
            Ok(Err(e)) => {
                let _ = thread.join();
                Err(e)
            }
            Err(_) => Err(AudioError::Device(
                "timed out waiting for the output stream".into(),
            )),
        }
    }
}

struct CpalOutput {
    name: String,
    queue: Arc<Mutex<VecDeque<i16>>>,
    max_backlog: usize,
    stop: Option<Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl OutputDevice for CpalOutput {
    fn name(&self) -> &str {
        &self.name
    }

    fn write(&mut self, samples: &[i16]) -> AudioResult<()> {
        if self.thread.as_ref().map_or(true, |t| t.is_finished()) {
            return Err(AudioError::Device(format!("{} stopped", self.name)));
        }

        let mut queue = self.queue.lock();
        queue.extend(samples.iter().copied());
        if queue.len() > self.max_backlog {
            // Keep whole frames so the channels stay in step.
            let mut excess = queue.len() - self.max_backlog;
            excess += excess % CHANNELS as usize;
            queue.drain(..excess);
            trace!(dropped = excess, "Device backlog full, dropped oldest samples");
        }
        Ok(())
    }

    fn clear(&mut self) {
        self.queue.lock().clear();
    }
}

impl Drop for CpalOutput {
    fn drop(&mut self) {
        drop(self.stop.take());
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

fn build_stream(
    name: Option<&str>,
    queue: Arc<Mutex<VecDeque<i16>>>,
) -> AudioResult<(cpal::Stream, String)> {
    let host = cpal::default_host();
    let device = match name {
        Some(name) => host
            .output_devices()
            .map_err(|e| AudioError::Device(e.to_string()))?
            .find(|d| d.name().map_or(false, |n| n == name))
            .ok_or_else(|| AudioError::DeviceNotFound(name.to_string()))?,
        None => host
            .default_output_device()
            .ok_or_else(|| AudioError::DeviceNotFound("default output device".into()))?,
    };
    let device_name = device.name().unwrap_or_else(|_| "Unknown".to_string());

    let supported = device
        .supported_output_configs()
        .map_err(|e| AudioError::Device(e.to_string()))?
        .find(|range| {
            range.channels() == CHANNELS
                && range.min_sample_rate().0 <= SAMPLE_RATE
                && range.max_sample_rate().0 >= SAMPLE_RATE
                && matches!(
                    range.sample_format(),
                    cpal::SampleFormat::I16 | cpal::SampleFormat::F32
                )
        })
        .ok_or_else(|| {
            AudioError::FormatNotSupported(format!("{device_name} has no 48 kHz stereo output"))
        })?
        .with_sample_rate(cpal::SampleRate(SAMPLE_RATE));

    let config = supported.config();
    let error_callback = |e: cpal::StreamError| warn!(error = %e, "Output stream error");

    let stream = match supported.sample_format() {
        cpal::SampleFormat::I16 => device.build_output_stream(
            &config,
            move |data: &mut [i16], _: &cpal::OutputCallbackInfo| {
                fill(&queue, data, 0, |s| s);
            },
            error_callback,
            None,
        ),
        cpal::SampleFormat::F32 => device.build_output_stream(
            &config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                fill(&queue, data, 0.0, |s| s as f32 / 32768.0);
            },
            error_callback,
            None,
        ),
        sample_format => {
            return Err(AudioError::FormatNotSupported(format!(
                "sample format {sample_format:?}"
            )));
        }
    }
    .map_err(|e| AudioError::Device(format!("failed to build output stream: {e}")))?;

    stream
        .play()
        .map_err(|e| AudioError::Device(format!("failed to start output stream: {e}")))?;

    Ok((stream, device_name))
}

/// Copy queued samples into a device buffer, padding with silence.
fn fill<T: Copy>(queue: &Mutex<VecDeque<i16>>, data: &mut [T], silence: T, convert: impl Fn(i16) -> T) {
    let mut queue = queue.lock();
    for slot in data.iter_mut() {
        *slot = queue.pop_front().map_or(silence, &convert);
    }
}
