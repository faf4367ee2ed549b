//! Monitoring service.
//!
//! The service owns the pending-entry table, the event bus and the polling
//! scheduler. Every tick it evaluates each pending predicate once, removes the
//! subjects that reached a definite outcome and publishes one terminal event
//! per removed subject.
//!
//! Locking discipline: the pending table is guarded by a single mutex. A tick
//! snapshots the table, runs predicates with the lock released, then takes the
//! lock again to remove finished entries. Entries added while predicates run
//! are not part of the snapshot and are first evaluated on the next tick.
//! Events are published after the lock is released.

use std::collections::{HashMap, HashSet};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crate::bus::{EventBus, MonitorListener};
use crate::config::MonitorConfig;
use crate::error::{MonitorError, MonitorResult};
use crate::handler::BlockingHandler;
use crate::predicate::{CompletionPredicate, SharedPredicate};
use crate::profiles::{self, DelegateMonitor, MonitorProfile};
use crate::request::MonitorRequest;
use crate::scheduler::PollingScheduler;
use crate::status::{MonitorEvent, MonitorEventType, MonitorStatus};
use crate::subject::{SubjectId, Tracked};

struct PendingEntry<T> {
    subject: Tracked<T>,
    predicate: SharedPredicate<T>,
    deadline: Option<Instant>,
    created_at: Instant,
    label: Option<String>,
}

impl<T> Clone for PendingEntry<T> {
    fn clone(&self) -> Self {
        Self {
            subject: self.subject.clone(),
            predicate: Arc::clone(&self.predicate),
            deadline: self.deadline,
            created_at: self.created_at,
            label: self.label.clone(),
        }
    }
}

struct ServiceState<T> {
    pending: Mutex<HashMap<SubjectId, PendingEntry<T>>>,
    bus: EventBus<T>,
    stopped: AtomicBool,
}

impl<T: Send + Sync + 'static> ServiceState<T> {
    fn pending(&self) -> MutexGuard<'_, HashMap<SubjectId, PendingEntry<T>>> {
        self.pending
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn tick(&self) {
        if self.stopped.load(Ordering::Acquire) {
            return;
        }

        let batch: Vec<PendingEntry<T>> = self.pending().values().cloned().collect();
        if batch.is_empty() {
            return;
        }
        tracing::trace!(pending = batch.len(), "evaluating pending subjects");

        let mut finished: Vec<(SubjectId, MonitorEventType)> = Vec::new();
        for entry in &batch {
            if let Some(kind) = evaluate(entry) {
                finished.push((entry.subject.id(), kind));
            }
        }
        if finished.is_empty() {
            return;
        }

        let events: Vec<MonitorEvent<T>> = {
            let mut pending = self.pending();
            finished
                .into_iter()
                .filter_map(|(id, kind)| {
                    pending
                        .remove(&id)
                        .map(|entry| MonitorEvent::new(kind, entry.subject, entry.label))
                })
                .collect()
        };

        for event in &events {
            tracing::debug!(
                subject = %event.subject_id(),
                kind = %event.kind,
                monitor = event.monitor.as_deref().unwrap_or("custom"),
                "subject reached terminal state"
            );
            self.bus.publish(event);
        }
    }
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

/// Runs one predicate check and decides whether the entry is finished.
fn evaluate<T>(entry: &PendingEntry<T>) -> Option<MonitorEventType> {
    let subject = &entry.subject;
    let checked = panic::catch_unwind(AssertUnwindSafe(|| entry.predicate.check(subject.value())));

    let status = match checked {
        Ok(Ok(status)) => status,
        Ok(Err(err)) => {
            tracing::warn!(subject = %subject.id(), error = %err, "completion predicate failed");
            MonitorStatus::Failed
        }
        Err(_) => {
            tracing::warn!(subject = %subject.id(), "completion predicate panicked");
            MonitorStatus::Failed
        }
    };

    if let Some(kind) = MonitorEventType::from_status(status) {
        return Some(kind);
    }

    match entry.deadline {
        Some(deadline) if Instant::now() >= deadline => {
            tracing::warn!(
                subject = %subject.id(),
                elapsed_ms = millis(entry.created_at.elapsed()),
                "subject monitoring timed out"
            );
            Some(MonitorEventType::Timeout)
        }
        _ => None,
    }
}

/// Tracks subjects until their predicates report a definite outcome.
///
/// Construct one per process (or per independent subsystem) and share it by
/// reference. Dropping the service shuts its scheduler down.
///
/// ```no_run
/// use std::time::Duration;
/// use taskmon::{MonitorConfig, MonitorStatus, MonitoringService, Tracked};
///
/// let config = MonitorConfig::with_polling_delay(Duration::from_millis(100));
/// let service = MonitoringService::new(config)?;
/// let job = Tracked::new("job-42".to_string());
/// service.await_completion(|_: &String| MonitorStatus::Done, &[job])?;
/// # Ok::<(), taskmon::MonitorError>(())
/// ```
pub struct MonitoringService<T> {
    config: MonitorConfig,
    state: Arc<ServiceState<T>>,
    scheduler: PollingScheduler,
}

impl<T: Send + Sync + 'static> MonitoringService<T> {
    /// Starts a service with the given configuration.
    pub fn new(config: MonitorConfig) -> MonitorResult<Self> {
        config.validate()?;

        let state = Arc::new(ServiceState {
            pending: Mutex::new(HashMap::new()),
            bus: EventBus::new(),
            stopped: AtomicBool::new(false),
        });

        let tick_state = Arc::clone(&state);
        let scheduler =
            PollingScheduler::start(&config.thread_name, config.polling_delay(), move || {
                tick_state.tick();
            })?;

        tracing::info!(
            polling_delay_ms = config.polling_delay_ms,
            "monitoring service started"
        );

        Ok(Self {
            config,
            state,
            scheduler,
        })
    }

    /// Starts a service with [`MonitorConfig::default`].
    pub fn with_defaults() -> MonitorResult<Self> {
        Self::new(MonitorConfig::default())
    }

    /// The configuration the service was built with.
    #[must_use]
    pub const fn config(&self) -> &MonitorConfig {
        &self.config
    }

    /// Time between ticks; also the timeout resolution.
    #[must_use]
    pub const fn polling_delay(&self) -> Duration {
        self.scheduler.delay()
    }

    /// Tracks `subjects` under `predicate` with no deadline.
    ///
    /// An empty slice is a no-op.
    pub fn monitor<P>(&self, predicate: P, subjects: &[Tracked<T>]) -> MonitorResult<()>
    where
        P: CompletionPredicate<T> + 'static,
    {
        self.submit(
            MonitorRequest::builder()
                .predicate(predicate)
                .subjects(subjects.iter().cloned())
                .build()?,
        )
    }

    /// Tracks `subjects` under `predicate`, timing each out after `timeout`.
    ///
    /// `Duration::ZERO` disables the deadline.
    pub fn monitor_with_timeout<P>(
        &self,
        timeout: Duration,
        predicate: P,
        subjects: &[Tracked<T>],
    ) -> MonitorResult<()>
    where
        P: CompletionPredicate<T> + 'static,
    {
        self.submit(
            MonitorRequest::builder()
                .predicate(predicate)
                .subjects(subjects.iter().cloned())
                .timeout(timeout)
                .build()?,
        )
    }

    /// Starts tracking every subject of `request`.
    ///
    /// The batch is all-or-nothing: if any subject is already pending, none
    /// of them is added.
    pub fn submit(&self, request: MonitorRequest<T>) -> MonitorResult<()> {
        if request.is_empty() {
            return Ok(());
        }
        if self.is_shut_down() {
            return Err(MonitorError::ShutDown);
        }

        let MonitorRequest {
            predicate,
            subjects,
            timeout,
            label,
        } = request;

        // A deadline past the end of `Instant` is no deadline at all.
        let now = Instant::now();
        let deadline = timeout.and_then(|t| now.checked_add(t));
        let timeout_ms = timeout.map(millis);

        let mut pending = self.state.pending();
        // `shutdown` may have cleared the table since the check above.
        if self.is_shut_down() {
            return Err(MonitorError::ShutDown);
        }
        if let Some(dup) = subjects.iter().find(|s| pending.contains_key(&s.id())) {
            return Err(MonitorError::AlreadyTracked { id: dup.id() });
        }

        let mut seen = HashSet::with_capacity(subjects.len());
        for subject in subjects {
            if !seen.insert(subject.id()) {
                continue;
            }
            tracing::debug!(
                subject = %subject.id(),
                timeout_ms,
                monitor = label.as_deref().unwrap_or("custom"),
                "monitoring subject"
            );
            pending.insert(
                subject.id(),
                PendingEntry {
                    subject,
                    predicate: Arc::clone(&predicate),
                    deadline,
                    created_at: now,
                    label: label.clone(),
                },
            );
        }
        Ok(())
    }

    /// Tracks `subjects` and blocks until each of them is terminal.
    ///
    /// Without a deadline this blocks forever if a predicate never reaches
    /// `Done` or `Failed`.
    pub fn await_completion<P>(&self, predicate: P, subjects: &[Tracked<T>]) -> MonitorResult<()>
    where
        P: CompletionPredicate<T> + 'static,
    {
        self.await_request(
            MonitorRequest::builder()
                .predicate(predicate)
                .subjects(subjects.iter().cloned())
                .build()?,
        )
    }

    /// Like [`await_completion`](Self::await_completion), with a per-subject deadline.
    pub fn await_completion_with_timeout<P>(
        &self,
        timeout: Duration,
        predicate: P,
        subjects: &[Tracked<T>],
    ) -> MonitorResult<()>
    where
        P: CompletionPredicate<T> + 'static,
    {
        self.await_request(
            MonitorRequest::builder()
                .predicate(predicate)
                .subjects(subjects.iter().cloned())
                .timeout(timeout)
                .build()?,
        )
    }

    /// Submits `request` and blocks the calling thread until it is fully terminal.
    pub fn await_request(&self, request: MonitorRequest<T>) -> MonitorResult<()> {
        if request.is_empty() {
            return Ok(());
        }

        let handler = Arc::new(BlockingHandler::new(request.subjects())?);
        self.register(&handler);
        if let Err(err) = self.submit(request) {
            self.unregister(&handler);
            return Err(err);
        }

        handler.wait();
        self.unregister(&handler);
        Ok(())
    }

    /// Adds an event listener. Returns false if it was already registered.
    pub fn register<L>(&self, listener: &Arc<L>) -> bool
    where
        L: MonitorListener<T> + 'static,
    {
        self.state.bus.register(listener)
    }

    /// Removes an event listener. Returns false if it was not registered.
    pub fn unregister<L>(&self, listener: &Arc<L>) -> bool
    where
        L: MonitorListener<T> + 'static,
    {
        self.state.bus.unregister(listener)
    }

    /// Number of subjects still being tracked.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.state.pending().len()
    }

    /// Returns true while `subject` has no terminal event yet.
    #[must_use]
    pub fn is_tracking(&self, subject: &Tracked<T>) -> bool {
        self.state.pending().contains_key(&subject.id())
    }

    /// Stops polling. Idempotent.
    ///
    /// Pending subjects are abandoned without any terminal event, so threads
    /// blocked in `await_completion` stay blocked.
    pub fn shutdown(&self) {
        if self.state.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        self.scheduler.shutdown();
        let abandoned = {
            let mut pending = self.state.pending();
            let n = pending.len();
            pending.clear();
            n
        };
        tracing::info!(abandoned, "monitoring service shut down");
    }

    /// Returns true once `shutdown` has been called.
    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        self.state.stopped.load(Ordering::Acquire)
    }

    /// Facade bound to a profile.
    #[must_use]
    pub fn delegate(&self, profile: MonitorProfile) -> DelegateMonitor<'_, T> {
        DelegateMonitor::new(self, profile)
    }

    /// Monitor for virtual machine deployments.
    #[must_use]
    pub fn virtual_machine_monitor(&self) -> DelegateMonitor<'_, T> {
        self.delegate(profiles::VIRTUAL_MACHINE_DEPLOY)
    }

    /// Monitor for virtual appliance deployments.
    #[must_use]
    pub fn virtual_appliance_monitor(&self) -> DelegateMonitor<'_, T> {
        self.delegate(profiles::VIRTUAL_APPLIANCE_DEPLOY)
    }

    /// Monitor for provider async tasks.
    #[must_use]
    pub fn async_task_monitor(&self) -> DelegateMonitor<'_, T> {
        self.delegate(profiles::ASYNC_TASK)
    }

    /// Monitor for disk conversions.
    #[must_use]
    pub fn conversion_monitor(&self) -> DelegateMonitor<'_, T> {
        self.delegate(profiles::CONVERSION)
    }
}

impl<T> Drop for MonitoringService<T> {
    fn drop(&mut self) {
        // The scheduler joins its thread on drop; mark stopped first so an
        // in-flight tick does not start another pass.
        self.state.stopped.store(true, Ordering::Release);
    }
}

impl<T> std::fmt::Debug for MonitoringService<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MonitoringService")
            .field("config", &self.config)
            .field("stopped", &self.state.stopped.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}
