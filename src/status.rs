//! Completion status, terminal event kinds and monitor events.
//!
//! These types are serializable so callers can forward them to logs or other
//! processes; the event itself is generic over the tracked value and is not.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::subject::{SubjectId, Tracked};

/// Result of evaluating a completion predicate once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MonitorStatus {
    /// Not finished yet; poll again on the next tick.
    Continue,
    /// Finished successfully.
    Done,
    /// Finished unsuccessfully.
    Failed,
}

impl MonitorStatus {
    /// Returns true for `Done` and `Failed`.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        !matches!(self, Self::Continue)
    }
}

/// Kind of a terminal monitor event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MonitorEventType {
    /// The predicate reported `Done`.
    Completed,
    /// The predicate reported `Failed`, returned an error or panicked.
    Failed,
    /// The deadline elapsed while the predicate still reported `Continue`.
    Timeout,
}

impl MonitorEventType {
    /// Maps a terminal status to its event kind. `Continue` has none.
    #[must_use]
    pub const fn from_status(status: MonitorStatus) -> Option<Self> {
        match status {
            MonitorStatus::Continue => None,
            MonitorStatus::Done => Some(Self::Completed),
            MonitorStatus::Failed => Some(Self::Failed),
        }
    }
}

impl fmt::Display for MonitorEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Timeout => write!(f, "timeout"),
        }
    }
}

/// A terminal event for one tracked subject.
///
/// Exactly one event is emitted per tracking session; the subject is no
/// longer tracked once it has been published.
#[derive(Debug)]
pub struct MonitorEvent<T> {
    /// Unique id of this event.
    pub event_id: Uuid,
    /// What happened.
    pub kind: MonitorEventType,
    /// The subject this event is about.
    pub subject: Tracked<T>,
    /// When the outcome was decided.
    pub timestamp: DateTime<Utc>,
    /// Name of the delegate profile that tracked the subject, if any.
    pub monitor: Option<String>,
}

impl<T> MonitorEvent<T> {
    #[must_use]
    pub(crate) fn new(
        kind: MonitorEventType,
        subject: Tracked<T>,
        monitor: Option<String>,
    ) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            kind,
            subject,
            timestamp: Utc::now(),
            monitor,
        }
    }

    /// Identity of the subject.
    #[must_use]
    pub const fn subject_id(&self) -> SubjectId {
        self.subject.id()
    }
}

impl<T> Clone for MonitorEvent<T> {
    fn clone(&self) -> Self {
        Self {
            event_id: self.event_id,
            kind: self.kind,
            subject: self.subject.clone(),
            timestamp: self.timestamp,
            monitor: self.monitor.clone(),
        }
    }
}
