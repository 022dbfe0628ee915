//! In-memory playback backend for running the mixer without audio hardware.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use mirror_ipc::AudioOutputDevice;

use crate::device::{OutputBackend, OutputDevice};
use crate::{AudioError, AudioResult};

#[derive(Debug, Default)]
struct DeviceLog {
    samples: Vec<i16>,
    writes: usize,
    clears: usize,
}

#[derive(Debug, Default)]
struct BackendState {
    devices: Vec<String>,
    fail_open: bool,
    open_devices: usize,
    logs: HashMap<String, DeviceLog>,
}

/// Records everything written to each named device.
///
/// The first listed device is the default.
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    state: Arc<Mutex<BackendState>>,
}

impl MemoryBackend {
    pub fn new(devices: &[&str]) -> Self {
        let backend = Self::default();
        backend.set_devices(devices);
        backend
    }

    /// Replace the set of available devices.
    pub fn set_devices(&self, devices: &[&str]) {
        self.state.lock().devices = devices.iter().map(|d| d.to_string()).collect();
    }

    /// Make every following open fail with a device error.
    pub fn set_fail_open(&self, fail: bool) {
        self.state.lock().fail_open = fail;
    }

    /// All samples written to `name` so far.
    pub fn written(&self, name: &str) -> Vec<i16> {
        self.state
            .lock()
            .logs
            .get(name)
            .map(|log| log.samples.clone())
            .unwrap_or_default()
    }

    /// Number of write calls `name` received.
    pub fn write_count(&self, name: &str) -> usize {
        self.state.lock().logs.get(name).map_or(0, |log| log.writes)
    }

    /// Number of times `name` was asked to drop its backlog.
    pub fn clear_count(&self, name: &str) -> usize {
        self.state.lock().logs.get(name).map_or(0, |log| log.clears)
    }

    /// Devices currently held open.
    pub fn open_devices(&self) -> usize {
        self.state.lock().open_devices
    }
}

impl OutputBackend for MemoryBackend {
    fn list_devices(&self) -> AudioResult<Vec<AudioOutputDevice>> {
        let state = self.state.lock();
        Ok(state
            .devices
            .iter()
            .enumerate()
            .map(|(i, name)| AudioOutputDevice {
                name: name.clone(),
                is_default: i == 0,
            })
            .collect())
    }

    fn open(&self, name: Option<&str>, _max_backlog: usize) -> AudioResult<Box<dyn OutputDevice>> {
        let mut state = self.state.lock();
        if state.fail_open {
            return Err(AudioError::Device("open rejected".into()));
        }

        let name = match name {
            Some(name) if state.devices.iter().any(|d| d == name) => name.to_string(),
            Some(name) => return Err(AudioError::DeviceNotFound(name.to_string())),
            None => state
                .devices
                .first()
                .cloned()
                .ok_or_else(|| AudioError::DeviceNotFound("default output device".into()))?,
        };

        state.open_devices += 1;
        state.logs.entry(name.clone()).or_default();
        Ok(Box::new(MemoryDevice {
            name,
            state: Arc::clone(&self.state),
        }))
    }
}

struct MemoryDevice {
    name: String,
    state: Arc<Mutex<BackendState>>,
}

impl OutputDevice for MemoryDevice {
    fn name(&self) -> &str {
        &self.name
    }

    fn write(&mut self, samples: &[i16]) -> AudioResult<()> {
        let mut state = self.state.lock();
        let log = state.logs.entry(self.name.clone()).or_default();
        log.samples.extend_from_slice(samples);
        log.writes += 1;
        Ok(())
    }

    fn clear(&mut self) {
        let mut state = self.state.lock();
        state.logs.entry(self.name.clone()).or_default().clears += 1;
    }
}

impl Drop for MemoryDevice {
    fn drop(&mut self) {
        self.state.lock().open_devices -= 1;
    }
}
