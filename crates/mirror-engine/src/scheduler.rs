//! Periodic background tasks with cancellation.

use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{RecvTimeoutError, Sender};
use tracing::{debug, warn};

use crate::{EngineError, EngineResult};

/// Runs a closure on a fixed interval on its own thread.
///
/// The closure returns `false` to end the task. Cancelling wakes the
/// thread immediately instead of waiting out the interval.
pub struct PeriodicTask {
    name: String,
    cancel: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl PeriodicTask {
    pub fn spawn<F>(name: &str, interval: Duration, mut tick: F) -> EngineResult<Self>
    where
        F: FnMut() -> bool + Send + 'static,
    {
        let (cancel_tx, cancel_rx) = crossbeam_channel::bounded::<()>(1);
        let task_name = name.to_string();

        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                debug!(task = %task_name, "Periodic task started");
                loop {
                    match cancel_rx.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => {
                            if !tick() {
                                break;
                            }
                        }
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                debug!(task = %task_name, "Periodic task exiting");
            })
            .map_err(EngineError::Io)?;

        Ok(Self {
            name: name.to_string(),
            cancel: Some(cancel_tx),
            handle: Some(handle),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, |h| h.is_finished())
    }

    /// Stop the task and wait up to `timeout` for it to exit.
    ///
    /// Returns false if the thread was still busy and got detached.
    pub fn cancel(&mut self, timeout: Duration) -> bool {
        drop(self.cancel.take());
        match self.handle.take() {
            Some(handle) => join_with_timeout(handle, timeout, &self.name),
            None => true,
        }
    }
}

impl Drop for PeriodicTask {
    fn drop(&mut self) {
        self.cancel(Duration::from_secs(1));
    }
}

/// Join `handle`, giving up after `timeout`.
pub(crate) fn join_with_timeout(handle: JoinHandle<()>, timeout: Duration, name: &str) -> bool {
    let deadline = Instant::now() + timeout;
    while !handle.is_finished() && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(5));
    }
    if handle.is_finished() {
        if handle.join().is_err() {
            warn!(thread = name, "Thread panicked");
        }
        true
    } else {
        warn!(thread = name, "Thread did not exit in time, detaching");
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_ticks_until_cancelled() {
        let ticks = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&ticks);
        let mut task = PeriodicTask::spawn("ticker", Duration::from_millis(5), move || {
            counter.fetch_add(1, Ordering::SeqCst);
            true
        })
        .unwrap();

        let deadline = Instant::now() + Duration::from_secs(2);
        while ticks.load(Ordering::SeqCst) < 3 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert!(ticks.load(Ordering::SeqCst) >= 3);

        assert!(task.cancel(Duration::from_secs(1)));
        let after = ticks.load(Ordering::SeqCst);
        thread::sleep(Duration::from_millis(30));
        assert_eq!(ticks.load(Ordering::SeqCst), after);
        assert!(task.is_finished());
    }

    #[test]
    fn test_cancel_does_not_wait_for_interval() {
        let mut task = PeriodicTask::spawn("slow", Duration::from_secs(60), || true).unwrap();
        let started = Instant::now();
        assert!(task.cancel(Duration::from_secs(1)));
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_tick_can_end_task() {
        let task = PeriodicTask::spawn("once", Duration::from_millis(1), || false).unwrap();
        let deadline = Instant::now() + Duration::from_secs(2);
        while !task.is_finished() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert!(task.is_finished());
    }
}
