//! Blocking completion handler.
//!
//! A [`BlockingHandler`] watches a fixed set of subjects and releases every
//! thread waiting on it once each of them has received a terminal event.
//! Release is signalled by dropping the sending half of a crossbeam channel:
//! every receiver then observes a disconnect, so any number of waiters wake
//! exactly once and late waiters return immediately.

use std::collections::HashSet;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};

use crate::bus::MonitorListener;
use crate::error::{MonitorError, MonitorResult};
use crate::status::{MonitorEvent, MonitorEventType};
use crate::subject::{SubjectId, Tracked};

/// Hook invoked for each recorded event, before the handler may release.
pub trait ReleaseHook<T>: Send + Sync {
    /// Called once per watched subject, on the scheduler thread.
    fn before_release(&self, event: &MonitorEvent<T>);
}

/// Hook that does nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoHook;

impl<T> ReleaseHook<T> for NoHook {
    fn before_release(&self, _event: &MonitorEvent<T>) {}
}

/// Hook that counts outcomes by kind.
#[derive(Debug, Default)]
pub struct OutcomeTally {
    completes: AtomicUsize,
    failures: AtomicUsize,
    timeouts: AtomicUsize,
}

impl OutcomeTally {
    /// Number of `Completed` events seen.
    #[must_use]
    pub fn completes(&self) -> usize {
        self.completes.load(Ordering::Acquire)
    }

    /// Number of `Failed` events seen.
    #[must_use]
    pub fn failures(&self) -> usize {
        self.failures.load(Ordering::Acquire)
    }

    /// Number of `Timeout` events seen.
    #[must_use]
    pub fn timeouts(&self) -> usize {
        self.timeouts.load(Ordering::Acquire)
    }
}

impl<T> ReleaseHook<T> for OutcomeTally {
    fn before_release(&self, event: &MonitorEvent<T>) {
        let counter = match event.kind {
            MonitorEventType::Completed => &self.completes,
            MonitorEventType::Failed => &self.failures,
            MonitorEventType::Timeout => &self.timeouts,
        };
        counter.fetch_add(1, Ordering::AcqRel);
    }
}

struct HandlerState {
    recorded: HashSet<SubjectId>,
    release_tx: Option<Sender<()>>,
}

/// Listener that blocks callers until every watched subject is terminal.
pub struct BlockingHandler<H = NoHook> {
    watched: HashSet<SubjectId>,
    state: Mutex<HandlerState>,
    release_rx: Receiver<()>,
    hook: H,
}

impl BlockingHandler<NoHook> {
    /// Watches `subjects`. Fails with `InvalidArgument` when empty.
    pub fn new<T>(subjects: &[Tracked<T>]) -> MonitorResult<Self> {
        Self::with_hook(subjects, NoHook)
    }
}

impl<H> BlockingHandler<H> {
    /// Watches `subjects`, calling `hook` for each recorded event.
    pub fn with_hook<T>(subjects: &[Tracked<T>], hook: H) -> MonitorResult<Self> {
        Self::for_ids(subjects.iter().map(Tracked::id), hook)
    }

    /// Watches subjects by identity.
    pub fn for_ids(ids: impl IntoIterator<Item = SubjectId>, hook: H) -> MonitorResult<Self> {
        let watched: HashSet<SubjectId> = ids.into_iter().collect();
        if watched.is_empty() {
            return Err(MonitorError::invalid_argument(
                "subjects",
                "a blocking handler needs at least one subject",
            ));
        }

        // Nothing is ever sent; the channel only reports disconnection.
        let (release_tx, release_rx) = bounded::<()>(0);
        Ok(Self {
            watched,
            state: Mutex::new(HandlerState {
                recorded: HashSet::new(),
                release_tx: Some(release_tx),
            }),
            release_rx,
            hook,
        })
    }

    /// The caller-supplied hook.
    #[must_use]
    pub const fn hook(&self) -> &H {
        &self.hook
    }

    /// Returns true if `id` is one of the watched subjects.
    #[must_use]
    pub fn watches(&self, id: SubjectId) -> bool {
        self.watched.contains(&id)
    }

    /// Watched subjects that have not received a terminal event yet.
    #[must_use]
    pub fn remaining(&self) -> usize {
        let state = self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        self.watched.len() - state.recorded.len()
    }

    /// Returns true once every watched subject is terminal.
    #[must_use]
    pub fn is_released(&self) -> bool {
        self.remaining() == 0
    }

    /// Blocks until released. Never times out on its own.
    pub fn wait(&self) {
        // Only a disconnect can end this recv.
        let _ = self.release_rx.recv();
    }

    /// Blocks until released or `timeout` elapses.
    pub fn wait_timeout(&self, timeout: Duration) -> MonitorResult<()> {
        match self.release_rx.recv_timeout(timeout) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => Ok(()),
            Err(RecvTimeoutError::Timeout) => Err(MonitorError::timeout(timeout)),
        }
    }

    fn record<T>(&self, event: &MonitorEvent<T>)
    where
        H: ReleaseHook<T>,
    {
        let id = event.subject_id();
        if !self.watched.contains(&id) {
            return;
        }

        let mut state = self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        if !state.recorded.insert(id) {
            return;
        }
        // A failing hook must not strand waiters on a counted subject.
        if panic::catch_unwind(AssertUnwindSafe(|| self.hook.before_release(event))).is_err() {
            tracing::error!(subject = %id, kind = %event.kind, "release hook panicked");
        }

        if state.recorded.len() == self.watched.len() {
            // Dropping the sender wakes every waiter.
            state.release_tx.take();
            tracing::debug!(subjects = self.watched.len(), "blocking handler released");
        }
    }
}

impl<T, H> MonitorListener<T> for BlockingHandler<H>
where
    H: ReleaseHook<T>,
{
    fn on_event(&self, event: &MonitorEvent<T>) {
        self.record(event);
    }
}

impl<H> std::fmt::Debug for BlockingHandler<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockingHandler")
            .field("watched", &self.watched.len())
            .field("remaining", &self.remaining())
            .finish_non_exhaustive()
    }
}
