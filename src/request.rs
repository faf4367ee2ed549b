//! Monitoring requests and their builder.

use std::sync::Arc;
use std::time::Duration;

use crate::error::{MonitorError, MonitorResult};
use crate::predicate::{CompletionPredicate, SharedPredicate};
use crate::subject::Tracked;

/// A validated request to track a batch of subjects under one predicate.
pub struct MonitorRequest<T> {
    pub(crate) predicate: SharedPredicate<T>,
    pub(crate) subjects: Vec<Tracked<T>>,
    pub(crate) timeout: Option<Duration>,
    pub(crate) label: Option<String>,
}

impl<T> MonitorRequest<T> {
    /// Starts building a request.
    #[must_use]
    pub fn builder() -> MonitorRequestBuilder<T> {
        MonitorRequestBuilder::default()
    }

    /// Subjects to track.
    #[must_use]
    pub fn subjects(&self) -> &[Tracked<T>] {
        &self.subjects
    }

    /// Deadline per subject, if any.
    #[must_use]
    pub const fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Name attached to the emitted events.
    #[must_use]
    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    /// Returns true if there is nothing to track.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.subjects.is_empty()
    }
}

impl<T> std::fmt::Debug for MonitorRequest<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MonitorRequest")
            .field("subjects", &self.subjects.len())
            .field("timeout", &self.timeout)
            .field("label", &self.label)
            .finish_non_exhaustive()
    }
}

/// Builder for [`MonitorRequest`].
///
/// ```
/// use std::time::Duration;
/// use taskmon::{MonitorRequest, MonitorStatus, Tracked};
///
/// let request = MonitorRequest::builder()
///     .predicate(|_: &u32| MonitorStatus::Done)
///     .subject(Tracked::new(1_u32))
///     .timeout(Duration::from_secs(30))
///     .build()
///     .unwrap();
/// assert_eq!(request.subjects().len(), 1);
///
/// let missing = MonitorRequest::<u32>::builder().subject(Tracked::new(1)).build();
/// assert!(missing.unwrap_err().is_invalid_argument());
/// ```
pub struct MonitorRequestBuilder<T> {
    predicate: Option<SharedPredicate<T>>,
    subjects: Vec<Tracked<T>>,
    timeout: Option<Duration>,
    label: Option<String>,
}

impl<T> Default for MonitorRequestBuilder<T> {
    fn default() -> Self {
        Self {
            predicate: None,
            subjects: Vec::new(),
            timeout: None,
            label: None,
        }
    }
}

impl<T> MonitorRequestBuilder<T> {
    /// Sets the completion predicate.
    #[must_use]
    pub fn predicate<P>(mut self, predicate: P) -> Self
    where
        P: CompletionPredicate<T> + 'static,
    {
        self.predicate = Some(Arc::new(predicate));
        self
    }

    /// Sets an already shared predicate (possibly absent).
    #[must_use]
    pub fn shared_predicate(mut self, predicate: Option<SharedPredicate<T>>) -> Self {
        self.predicate = predicate;
        self
    }

    /// Adds one subject.
    #[must_use]
    pub fn subject(mut self, subject: Tracked<T>) -> Self {
        self.subjects.push(subject);
        self
    }

    /// Adds several subjects.
    #[must_use]
    pub fn subjects(mut self, subjects: impl IntoIterator<Item = Tracked<T>>) -> Self {
        self.subjects.extend(subjects);
        self
    }

    /// Per-subject deadline. `Duration::ZERO` means no deadline.
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = (!timeout.is_zero()).then_some(timeout);
        self
    }

    /// Name attached to the emitted events.
    #[must_use]
    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Validates the request. Fails if no predicate was supplied.
    pub fn build(self) -> MonitorResult<MonitorRequest<T>> {
        let predicate = self.predicate.ok_or_else(|| {
            MonitorError::invalid_argument("predicate", "a completion predicate is required")
        })?;

        Ok(MonitorRequest {
            predicate,
            subjects: self.subjects,
            timeout: self.timeout,
            label: self.label,
        })
    }
}
