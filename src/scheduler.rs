//! Fixed-delay polling scheduler.
//!
//! Runs a tick callback on a dedicated thread. The delay is measured from the
//! end of one tick to the start of the next, so slow ticks never overlap or
//! queue up behind each other.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Mutex;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};

use crate::error::{MonitorError, MonitorResult};

/// Owns the polling thread. Dropping the scheduler shuts it down.
#[derive(Debug)]
pub struct PollingScheduler {
    delay: Duration,
    stop_tx: Mutex<Option<Sender<()>>>,
    join: Mutex<Option<JoinHandle<()>>>,
}

impl PollingScheduler {
    /// Starts ticking every `delay` on a thread called `name`.
    pub fn start<F>(name: &str, delay: Duration, tick: F) -> MonitorResult<Self>
    where
        F: FnMut() + Send + 'static,
    {
        if delay.is_zero() {
            return Err(MonitorError::invalid_argument(
                "delay",
                "polling delay must be greater than zero",
            ));
        }

        let (stop_tx, stop_rx) = bounded::<()>(1);
        let join = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || poll_loop(delay, &stop_rx, tick))
            .map_err(|e| MonitorError::config(format!("failed to spawn scheduler thread: {e}")))?;

        tracing::debug!(
            thread = name,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            "polling scheduler started"
        );

        Ok(Self {
            delay,
            stop_tx: Mutex::new(Some(stop_tx)),
            join: Mutex::new(Some(join)),
        })
    }

    /// Time between ticks.
    #[must_use]
    pub const fn delay(&self) -> Duration {
        self.delay
    }

    /// Returns true until `shutdown` has been requested.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.stop_tx
            .lock()
            .map(|guard| guard.is_some())
            .unwrap_or(false)
    }

    /// Stops the scheduler. Idempotent.
    ///
    /// A tick already in progress completes; no further tick starts. When
    /// called from the scheduler thread itself the thread is not joined, it
    /// exits as soon as the current tick returns.
    pub fn shutdown(&self) {
        let stop = self
            .stop_tx
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take();
        let Some(stop) = stop else {
            return;
        };
        // Dropping the sender is enough; the loop treats disconnect as stop.
        drop(stop);

        let handle = self
            .join
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if handle.thread().id() == thread::current().id() {
                // Joining ourselves would deadlock; detach instead.
                drop(handle);
            } else if handle.join().is_err() {
                tracing::warn!("polling scheduler thread terminated abnormally");
            }
        }
        tracing::debug!("polling scheduler stopped");
    }
}

impl Drop for PollingScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn poll_loop<F>(delay: Duration, stop_rx: &Receiver<()>, mut tick: F)
where
    F: FnMut(),
{
    loop {
        match stop_rx.recv_timeout(delay) {
            Err(RecvTimeoutError::Timeout) => {
                if panic::catch_unwind(AssertUnwindSafe(&mut tick)).is_err() {
                    tracing::error!("polling tick panicked; continuing with next tick");
                }
            }
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Instant;

    #[test]
    fn zero_delay_is_rejected() {
        let err = PollingScheduler::start("t", Duration::ZERO, || {}).unwrap_err();
        assert!(err.is_invalid_argument());
    }

    #[test]
    fn ticks_until_shutdown() {
        let ticks = Arc::new(AtomicUsize::new(0));
        let scheduler = {
            let ticks = Arc::clone(&ticks);
            PollingScheduler::start("taskmon-test", Duration::from_millis(10), move || {
                ticks.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap()
        };

        thread::sleep(Duration::from_millis(120));
        scheduler.shutdown();
        assert!(!scheduler.is_running());
        let seen = ticks.load(Ordering::SeqCst);
        assert!(seen >= 2, "expected several ticks, saw {seen}");

        thread::sleep(Duration::from_millis(50));
        assert_eq!(ticks.load(Ordering::SeqCst), seen);
        scheduler.shutdown();
    }

    #[test]
    fn slow_ticks_never_overlap() {
        let active = Arc::new(AtomicBool::new(false));
        let overlapped = Arc::new(AtomicBool::new(false));
        let scheduler = {
            let active = Arc::clone(&active);
            let overlapped = Arc::clone(&overlapped);
            PollingScheduler::start("taskmon-test", Duration::from_millis(5), move || {
                if active.swap(true, Ordering::SeqCst) {
                    overlapped.store(true, Ordering::SeqCst);
                }
                thread::sleep(Duration::from_millis(20));
                active.store(false, Ordering::SeqCst);
            })
            .unwrap()
        };

        thread::sleep(Duration::from_millis(150));
        drop(scheduler);
        assert!(!overlapped.load(Ordering::SeqCst));
    }

    #[test]
    fn panicking_tick_keeps_scheduler_alive() {
        let ticks = Arc::new(AtomicUsize::new(0));
        let scheduler = {
            let ticks = Arc::clone(&ticks);
            PollingScheduler::start("taskmon-test", Duration::from_millis(10), move || {
                if ticks.fetch_add(1, Ordering::SeqCst) == 0 {
                    panic!("first tick fails");
                }
            })
            .unwrap()
        };

        let deadline = Instant::now() + Duration::from_secs(2);
        while ticks.load(Ordering::SeqCst) < 3 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        scheduler.shutdown();
        assert!(ticks.load(Ordering::SeqCst) >= 3);
    }

    #[test]
    fn shutdown_from_inside_tick_does_not_deadlock() {
        let slot: Arc<Mutex<Option<Arc<PollingScheduler>>>> = Arc::new(Mutex::new(None));
        let done = Arc::new(AtomicBool::new(false));
        let scheduler = {
            let slot = Arc::clone(&slot);
            let done = Arc::clone(&done);
            Arc::new(
                PollingScheduler::start("taskmon-test", Duration::from_millis(10), move || {
                    if let Some(s) = slot.lock().unwrap().as_ref() {
                        s.shutdown();
                        done.store(true, Ordering::SeqCst);
                    }
                })
                .unwrap(),
            )
        };
        *slot.lock().unwrap() = Some(Arc::clone(&scheduler));

        let deadline = Instant::now() + Duration::from_secs(2);
        while !done.load(Ordering::SeqCst) && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert!(done.load(Ordering::SeqCst));
        assert!(!scheduler.is_running());
        slot.lock().unwrap().take();
    }
}
