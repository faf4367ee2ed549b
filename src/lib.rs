//! # taskmon - Polling monitor for long-running remote tasks
//!
//! taskmon tracks opaque remote objects (virtual machines, provider tasks,
//! conversions, appliances) and re-evaluates their completion state on a fixed
//! polling delay. Each tracked subject ends with exactly one terminal event,
//! delivered to every registered listener.
//!
//! ## Core Concepts
//!
//! - **Tracked**: an identity-compared handle around a caller value
//! - **CompletionPredicate**: decides `Continue`, `Done` or `Failed` for a subject
//! - **MonitoringService**: owns the pending table, the scheduler and the event bus
//! - **BlockingHandler**: a listener that parks callers until a subject set is terminal
//! - **DelegateMonitor**: a service facade bound to a named provider profile
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use taskmon::{
//!     BlockingHandler, MonitorConfig, MonitorStatus, MonitoringService, OutcomeTally, Tracked,
//! };
//!
//! let config = MonitorConfig::with_polling_delay(Duration::from_millis(500));
//! let service = MonitoringService::new(config)?;
//! let task = Tracked::new("task-17".to_string());
//!
//! let handler = Arc::new(BlockingHandler::with_hook(&[task.clone()], OutcomeTally::default())?);
//! service.register(&handler);
//! let finished = |_: &String| MonitorStatus::Done;
//! service.monitor_with_timeout(Duration::from_secs(60), finished, &[task])?;
//! handler.wait();
//! service.unregister(&handler);
//! assert_eq!(handler.hook().completes(), 1);
//! # Ok::<(), taskmon::MonitorError>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod bus;
pub mod config;
pub mod error;
pub mod handler;
pub mod predicate;
pub mod profiles;
pub mod request;
pub mod scheduler;
pub mod service;
pub mod status;
pub mod subject;

// Re-export primary types at crate root for convenience
pub use bus::{EventBus, MonitorListener};
pub use config::MonitorConfig;
pub use error::{MonitorError, MonitorResult, PredicateError};
pub use handler::{BlockingHandler, NoHook, OutcomeTally, ReleaseHook};
pub use predicate::{CompletionPredicate, SharedPredicate};
pub use profiles::{DelegateMonitor, MonitorProfile, ResourceKind, StatusMapping};
pub use request::{MonitorRequest, MonitorRequestBuilder};
pub use scheduler::PollingScheduler;
pub use service::MonitoringService;
pub use status::{MonitorEvent, MonitorEventType, MonitorStatus};
pub use subject::{SubjectId, Tracked};
