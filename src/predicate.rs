//! Completion predicates.
//!
//! A predicate is asked, once per tick, whether a tracked subject has reached
//! a definite outcome. It may be called many times for the same subject and
//! should not rely on side effects.

use std::fmt;
use std::sync::Arc;

use crate::error::PredicateError;
use crate::status::MonitorStatus;

/// Decides whether a tracked subject is finished.
pub trait CompletionPredicate<T>: Send + Sync {
    /// Evaluates the current status of `subject`.
    ///
    /// An `Err` is treated as a `Failed` outcome for this subject only.
    fn check(&self, subject: &T) -> Result<MonitorStatus, PredicateError>;
}

impl<T, F> CompletionPredicate<T> for F
where
    F: Fn(&T) -> MonitorStatus + Send + Sync,
{
    fn check(&self, subject: &T) -> Result<MonitorStatus, PredicateError> {
        Ok(self(subject))
    }
}

/// Shared, type-erased predicate as stored by the monitor.
pub type SharedPredicate<T> = Arc<dyn CompletionPredicate<T>>;

/// Adapter for closures that can fail.
pub struct Fallible<F>(F);

impl<T, F> CompletionPredicate<T> for Fallible<F>
where
    F: Fn(&T) -> Result<MonitorStatus, PredicateError> + Send + Sync,
{
    fn check(&self, subject: &T) -> Result<MonitorStatus, PredicateError> {
        (self.0)(subject)
    }
}

impl<F> fmt::Debug for Fallible<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Fallible(..)")
    }
}

/// Wraps a closure returning `Result` so it can be used as a predicate.
///
/// ```
/// use taskmon::{predicate, CompletionPredicate, MonitorStatus, PredicateError};
///
/// let p = predicate::fallible(|n: &i32| {
///     if *n < 0 {
///         Err(PredicateError::new("negative"))
///     } else {
///         Ok(MonitorStatus::Done)
///     }
/// });
/// assert!(p.check(&-1).is_err());
/// ```
pub fn fallible<T, F>(f: F) -> Fallible<F>
where
    F: Fn(&T) -> Result<MonitorStatus, PredicateError> + Send + Sync,
{
    Fallible(f)
}

/// Predicate that reports the same status forever.
#[derive(Debug, Clone, Copy)]
pub struct Always(pub MonitorStatus);

impl<T> CompletionPredicate<T> for Always {
    fn check(&self, _subject: &T) -> Result<MonitorStatus, PredicateError> {
        Ok(self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closures_are_predicates() {
        let p = |n: &u32| {
            if *n > 2 {
                MonitorStatus::Done
            } else {
                MonitorStatus::Continue
            }
        };
        assert_eq!(p.check(&3), Ok(MonitorStatus::Done));
        assert_eq!(p.check(&1), Ok(MonitorStatus::Continue));
    }

    #[test]
    fn fallible_passes_errors_through() {
        let p = fallible(|_: &()| Err(PredicateError::new("boom")));
        assert_eq!(p.check(&()), Err(PredicateError::new("boom")));
    }

    #[test]
    fn always_is_constant() {
        let shared: SharedPredicate<String> = Arc::new(Always(MonitorStatus::Failed));
        assert_eq!(shared.check(&"x".to_string()), Ok(MonitorStatus::Failed));
    }
}
