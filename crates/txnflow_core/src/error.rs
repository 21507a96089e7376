//! Error types for the unit-of-work engine.

use crate::types::WorkId;
use crate::work::WorkState;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Result type for unit-of-work operations.
pub type UowResult<T> = Result<T, UowError>;

/// Boxed error returned by resource and hook implementations.
///
/// Adapters surface their own error types (driver errors, I/O errors)
/// through this alias; the engine never inspects them beyond display.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors that can occur while orchestrating a unit of work.
#[derive(Debug, Error)]
pub enum UowError {
    /// Operation attempted outside the allowed state transitions.
    ///
    /// Fatal for the unit of work in question; never retried.
    #[error("invalid operation `{operation}` in state {state:?}")]
    InvalidState {
        /// The operation that was attempted.
        operation: &'static str,
        /// The state the unit of work was in.
        state: WorkState,
    },

    /// A unit of work was disposed while not at the top of its scope stack.
    #[error("unit of work {id} disposed out of order: an inner unit is still active")]
    OutOfOrderDispose {
        /// The unit of work whose disposal was rejected.
        id: WorkId,
    },

    /// The operation was cancelled via its [`CancelToken`](crate::CancelToken).
    #[error("operation cancelled")]
    Cancelled,

    /// A resource call exceeded the configured timeout.
    #[error("resource call timed out after {elapsed:?}")]
    Timeout {
        /// The configured per-call timeout that elapsed.
        elapsed: Duration,
    },

    /// A lifecycle hook failed while a root unit of work was being created.
    #[error("lifecycle hook failed: {0}")]
    Hook(BoxError),

    /// One or more resources failed during a single phase.
    #[error("{0}")]
    Aggregate(AggregateFailure),
}

impl UowError {
    /// Creates an invalid-state error naming the attempted operation.
    pub fn invalid_state(operation: &'static str, state: WorkState) -> Self {
        Self::InvalidState { operation, state }
    }

    /// Creates an aggregate error for a phase.
    pub fn aggregate(phase: WorkPhase, failures: Vec<ResourceFailure>) -> Self {
        Self::Aggregate(AggregateFailure { phase, failures })
    }

    /// Returns the aggregate failure if this is an [`UowError::Aggregate`].
    #[must_use]
    pub fn as_aggregate(&self) -> Option<&AggregateFailure> {
        match self {
            Self::Aggregate(aggregate) => Some(aggregate),
            _ => None,
        }
    }
}

/// The phase of the commit/rollback protocol a failure belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkPhase {
    /// Opening transactions on registered resources.
    Begin,
    /// Committing (or saving) registered resources.
    Commit,
    /// Rolling back opened transactions.
    Rollback,
    /// Releasing resources during disposal.
    Dispose,
}

impl fmt::Display for WorkPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WorkPhase::Begin => "begin",
            WorkPhase::Commit => "commit",
            WorkPhase::Rollback => "rollback",
            WorkPhase::Dispose => "dispose",
        };
        f.write_str(name)
    }
}

/// A single resource-level failure collected during one phase.
#[derive(Debug)]
pub struct ResourceFailure {
    /// Identifier of the resource that failed.
    pub resource_id: String,
    /// The underlying error reported by the resource.
    pub error: BoxError,
}

impl ResourceFailure {
    /// Creates a new resource failure.
    pub fn new(resource_id: impl Into<String>, error: BoxError) -> Self {
        Self {
            resource_id: resource_id.into(),
            error,
        }
    }
}

impl fmt::Display for ResourceFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.resource_id, self.error)
    }
}

/// One raised error bundling every resource-level failure from a phase.
///
/// Per-phase loops collect every failure instead of stopping at the
/// first one (commit excepted, which fails fast), so callers see either
/// success or one aggregate covering the whole phase.
#[derive(Debug)]
pub struct AggregateFailure {
    /// The phase the failures were collected in.
    pub phase: WorkPhase,
    /// Every failure collected during the phase, in occurrence order.
    pub failures: Vec<ResourceFailure>,
}

impl AggregateFailure {
    /// Returns true if the aggregate contains a failure for the given resource.
    #[must_use]
    pub fn contains(&self, resource_id: &str) -> bool {
        self.failures.iter().any(|f| f.resource_id == resource_id)
    }

    /// Returns the number of collected failures.
    #[must_use]
    pub fn len(&self) -> usize {
        self.failures.len()
    }

    /// Returns true if no failures were collected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.failures.is_empty()
    }
}

impl fmt::Display for AggregateFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} failed for {} resource(s): ",
            self.phase,
            self.failures.len()
        )?;
        for (index, failure) in self.failures.iter().enumerate() {
            if index > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{failure}")?;
        }
        Ok(())
    }
}

impl std::error::Error for AggregateFailure {}

#[cfg(test)]
mod tests {
    use super::*;

    fn boxed(message: &str) -> BoxError {
        message.to_string().into()
    }

    #[test]
    fn invalid_state_display_names_operation() {
        let err = UowError::invalid_state("commit", WorkState::Committed);
        assert!(err.to_string().contains("commit"));
        assert!(err.to_string().contains("Committed"));
    }

    #[test]
    fn aggregate_display_lists_every_failure() {
        let err = UowError::aggregate(
            WorkPhase::Rollback,
            vec![
                ResourceFailure::new("db-a", boxed("lost connection")),
                ResourceFailure::new("db-b", boxed("deadlock")),
            ],
        );
        let text = err.to_string();
        assert!(text.contains("rollback failed for 2 resource(s)"));
        assert!(text.contains("db-a: lost connection"));
        assert!(text.contains("db-b: deadlock"));
    }

    #[test]
    fn aggregate_contains_by_resource_id() {
        let err = UowError::aggregate(
            WorkPhase::Commit,
            vec![ResourceFailure::new("db-b", boxed("violation"))],
        );
        let aggregate = err.as_aggregate().unwrap();
        assert!(aggregate.contains("db-b"));
        assert!(!aggregate.contains("db-a"));
        assert_eq!(aggregate.len(), 1);
    }

    #[test]
    fn phase_display_is_lowercase() {
        assert_eq!(WorkPhase::Begin.to_string(), "begin");
        assert_eq!(WorkPhase::Dispose.to_string(), "dispose");
    }
}
