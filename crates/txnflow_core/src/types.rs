//! Core type definitions for txnflow.

use std::fmt;
use uuid::Uuid;

/// Unique identifier for a unit of work.
///
/// Every handle returned by the manager carries its own id, including
/// nested handles joining an ambient unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WorkId(Uuid);

impl WorkId {
    /// Creates a new random work id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Returns the underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for WorkId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for WorkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "uow:{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_unique() {
        let a = WorkId::new();
        let b = WorkId::new();
        assert_ne!(a, b);
    }

    #[test]
    fn display_is_prefixed() {
        let id = WorkId::new();
        assert!(id.to_string().starts_with("uow:"));
    }
}
