//! Named delegate monitors.
//!
//! A delegate is not a separate subsystem: it is a [`MonitorProfile`] (a name
//! plus a state-to-status mapping) bound to a running [`MonitoringService`].
//! Callers supply a probe that reads the provider-specific state of a subject
//! as a string; the profile decides what that state means.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{MonitorResult, PredicateError};
use crate::predicate::CompletionPredicate;
use crate::request::{MonitorRequest, MonitorRequestBuilder};
use crate::service::MonitoringService;
use crate::status::MonitorStatus;
use crate::subject::Tracked;

/// Kind of remote resource a profile applies to.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    VirtualMachine,
    VirtualAppliance,
    AsyncTask,
    Conversion,
}

impl ResourceKind {
    /// The profile used by the service's named accessor for this kind.
    #[must_use]
    pub const fn default_profile(self) -> MonitorProfile {
        match self {
            Self::VirtualMachine => VIRTUAL_MACHINE_DEPLOY,
            Self::VirtualAppliance => VIRTUAL_APPLIANCE_DEPLOY,
            Self::AsyncTask => ASYNC_TASK,
            Self::Conversion => CONVERSION,
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::VirtualMachine => write!(f, "virtual_machine"),
            Self::VirtualAppliance => write!(f, "virtual_appliance"),
            Self::AsyncTask => write!(f, "async_task"),
            Self::Conversion => write!(f, "conversion"),
        }
    }
}

/// Maps provider state names to completion statuses.
///
/// States listed in neither table mean `Continue`. Comparison ignores ASCII
/// case and surrounding whitespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusMapping {
    done: &'static [&'static str],
    failed: &'static [&'static str],
}

impl StatusMapping {
    /// Builds a mapping from the states meaning success and failure.
    #[must_use]
    pub const fn new(done: &'static [&'static str], failed: &'static [&'static str]) -> Self {
        Self { done, failed }
    }

    /// Classifies one observed state.
    #[must_use]
    pub fn classify(&self, state: &str) -> MonitorStatus {
        let state = state.trim();
        if self.done.iter().any(|s| s.eq_ignore_ascii_case(state)) {
            MonitorStatus::Done
        } else if self.failed.iter().any(|s| s.eq_ignore_ascii_case(state)) {
            MonitorStatus::Failed
        } else {
            MonitorStatus::Continue
        }
    }
}

/// A named delegate configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorProfile {
    /// Name attached to every event tracked through this profile.
    pub name: &'static str,
    /// Resource kind the profile applies to.
    pub kind: ResourceKind,
    /// How observed states are interpreted.
    pub mapping: StatusMapping,
}

impl MonitorProfile {
    /// Builds a custom profile.
    #[must_use]
    pub const fn new(name: &'static str, kind: ResourceKind, mapping: StatusMapping) -> Self {
        Self { name, kind, mapping }
    }
}

/// Virtual machine deployment: powered on means done.
pub const VIRTUAL_MACHINE_DEPLOY: MonitorProfile = MonitorProfile::new(
    "virtual-machine-deploy",
    ResourceKind::VirtualMachine,
    StatusMapping::new(&["ON"], &["NOT_ALLOCATED", "UNKNOWN"]),
);

/// Virtual machine undeployment: released means done.
pub const VIRTUAL_MACHINE_UNDEPLOY: MonitorProfile = MonitorProfile::new(
    "virtual-machine-undeploy",
    ResourceKind::VirtualMachine,
    StatusMapping::new(&["NOT_ALLOCATED"], &["UNKNOWN"]),
);

/// Virtual appliance deployment.
pub const VIRTUAL_APPLIANCE_DEPLOY: MonitorProfile = MonitorProfile::new(
    "virtual-appliance-deploy",
    ResourceKind::VirtualAppliance,
    StatusMapping::new(&["DEPLOYED"], &["NEEDS_SYNC", "UNKNOWN", "NOT_DEPLOYED"]),
);

/// Virtual appliance undeployment.
pub const VIRTUAL_APPLIANCE_UNDEPLOY: MonitorProfile = MonitorProfile::new(
    "virtual-appliance-undeploy",
    ResourceKind::VirtualAppliance,
    StatusMapping::new(&["NOT_DEPLOYED"], &["NEEDS_SYNC", "UNKNOWN"]),
);

/// Provider-side asynchronous task.
pub const ASYNC_TASK: MonitorProfile = MonitorProfile::new(
    "async-task",
    ResourceKind::AsyncTask,
    StatusMapping::new(
        &["FINISHED_SUCCESSFULLY"],
        &["FINISHED_UNSUCCESSFULLY", "ABORTED", "ACK_ERROR", "CANCELLED"],
    ),
);

/// Disk format conversion.
pub const CONVERSION: MonitorProfile = MonitorProfile::new(
    "conversion",
    ResourceKind::Conversion,
    StatusMapping::new(&["FINISHED"], &["FAILED"]),
);

/// Predicate built from a state probe and a mapping.
pub struct MappedPredicate<F> {
    probe: F,
    mapping: StatusMapping,
}

impl<F> MappedPredicate<F> {
    /// Combines `probe` with `mapping`.
    pub const fn new(probe: F, mapping: StatusMapping) -> Self {
        Self { probe, mapping }
    }
}

impl<T, F> CompletionPredicate<T> for MappedPredicate<F>
where
    F: Fn(&T) -> Result<String, PredicateError> + Send + Sync,
{
    fn check(&self, subject: &T) -> Result<MonitorStatus, PredicateError> {
        let state = (self.probe)(subject)?;
        Ok(self.mapping.classify(&state))
    }
}

/// Service facade bound to one profile.
pub struct DelegateMonitor<'a, T> {
    service: &'a MonitoringService<T>,
    profile: MonitorProfile,
}

impl<'a, T: Send + Sync + 'static> DelegateMonitor<'a, T> {
    pub(crate) const fn new(service: &'a MonitoringService<T>, profile: MonitorProfile) -> Self {
        Self { service, profile }
    }

    /// The bound profile.
    #[must_use]
    pub const fn profile(&self) -> &MonitorProfile {
        &self.profile
    }

    /// Same service, different profile (for example undeploy instead of deploy).
    #[must_use]
    pub fn with_profile(self, profile: MonitorProfile) -> Self {
        Self {
            service: self.service,
            profile,
        }
    }

    /// Request builder pre-filled with this profile's predicate and label.
    pub fn request<F>(&self, probe: F, subjects: &[Tracked<T>]) -> MonitorRequestBuilder<T>
    where
        F: Fn(&T) -> Result<String, PredicateError> + Send + Sync + 'static,
    {
        MonitorRequest::builder()
            .predicate(MappedPredicate::new(probe, self.profile.mapping))
            .subjects(subjects.iter().cloned())
            .label(self.profile.name)
    }

    /// Tracks `subjects` with no deadline.
    pub fn monitor<F>(&self, probe: F, subjects: &[Tracked<T>]) -> MonitorResult<()>
    where
        F: Fn(&T) -> Result<String, PredicateError> + Send + Sync + 'static,
    {
        self.service.submit(self.request(probe, subjects).build()?)
    }

    /// Tracks `subjects`, timing each out after `timeout`.
    pub fn monitor_with_timeout<F>(
        &self,
        timeout: Duration,
        probe: F,
        subjects: &[Tracked<T>],
    ) -> MonitorResult<()>
    where
        F: Fn(&T) -> Result<String, PredicateError> + Send + Sync + 'static,
    {
        self.service
            .submit(self.request(probe, subjects).timeout(timeout).build()?)
    }

    /// Tracks `subjects` and blocks until each is terminal.
    pub fn await_completion<F>(&self, probe: F, subjects: &[Tracked<T>]) -> MonitorResult<()>
    where
        F: Fn(&T) -> Result<String, PredicateError> + Send + Sync + 'static,
    {
        self.service.await_request(self.request(probe, subjects).build()?)
    }

    /// Blocking form with a per-subject deadline.
    pub fn await_completion_with_timeout<F>(
        &self,
        timeout: Duration,
        probe: F,
        subjects: &[Tracked<T>],
    ) -> MonitorResult<()>
    where
        F: Fn(&T) -> Result<String, PredicateError> + Send + Sync + 'static,
    {
        self.service
            .await_request(self.request(probe, subjects).timeout(timeout).build()?)
    }
}

impl<T> fmt::Debug for DelegateMonitor<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DelegateMonitor")
            .field("profile", &self.profile.name)
            .finish_non_exhaustive()
    }
}
