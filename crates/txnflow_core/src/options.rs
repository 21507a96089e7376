//! Configuration for units of work.

use std::time::Duration;

/// Transaction isolation level requested from resources.
///
/// The engine passes the level through to each resource's
/// `begin_transaction`; interpreting it is the adapter's business.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsolationLevel {
    /// Dirty reads permitted.
    ReadUncommitted,
    /// Only committed data is read.
    ReadCommitted,
    /// Reads are repeatable within the transaction.
    RepeatableRead,
    /// Full serializability.
    Serializable,
    /// Snapshot isolation.
    Snapshot,
}

/// How a resource persists the unit's writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PersistenceStrategy {
    /// Each resource opens an explicit transaction; commit and rollback
    /// drive that transaction.
    #[default]
    TransactionManaged,
    /// No explicit transaction; commit performs one atomic
    /// `save_changes` call per resource.
    OptimizeForSingleWrite,
}

/// Options for a unit of work.
#[derive(Debug, Clone)]
pub struct UnitOfWorkOptions {
    /// Isolation level passed to resources when opening transactions.
    pub isolation_level: Option<IsolationLevel>,
    /// Whether transactions are opened implicitly on registration.
    pub auto_begin_transaction: bool,
    /// Per-resource-call timeout. `None` means unbounded.
    pub timeout: Option<Duration>,
    /// Read-only fast path: no transactions are opened and commit
    /// degrades to a completion marker.
    pub read_only: bool,
    /// How resources persist the unit's writes.
    pub persistence_strategy: PersistenceStrategy,
}

impl UnitOfWorkOptions {
    /// Creates options with the default settings.
    #[must_use]
    pub fn new() -> Self {
        Self {
            isolation_level: None,
            auto_begin_transaction: true,
            timeout: None,
            read_only: false,
            persistence_strategy: PersistenceStrategy::TransactionManaged,
        }
    }

    /// Creates read-only options.
    #[must_use]
    pub fn read_only() -> Self {
        Self::new().with_read_only(true)
    }

    /// Sets the isolation level.
    #[must_use]
    pub fn with_isolation_level(mut self, level: IsolationLevel) -> Self {
        self.isolation_level = Some(level);
        self
    }

    /// Sets whether transactions are opened implicitly on registration.
    #[must_use]
    pub fn with_auto_begin(mut self, auto_begin: bool) -> Self {
        self.auto_begin_transaction = auto_begin;
        self
    }

    /// Sets the per-resource-call timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Sets the read-only flag.
    #[must_use]
    pub fn with_read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    /// Sets the persistence strategy.
    #[must_use]
    pub fn with_persistence_strategy(mut self, strategy: PersistenceStrategy) -> Self {
        self.persistence_strategy = strategy;
        self
    }
}

impl Default for UnitOfWorkOptions {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let options = UnitOfWorkOptions::default();
        assert!(options.auto_begin_transaction);
        assert!(!options.read_only);
        assert!(options.isolation_level.is_none());
        assert!(options.timeout.is_none());
        assert_eq!(
            options.persistence_strategy,
            PersistenceStrategy::TransactionManaged
        );
    }

    #[test]
    fn builder_methods() {
        let options = UnitOfWorkOptions::new()
            .with_isolation_level(IsolationLevel::Serializable)
            .with_auto_begin(false)
            .with_timeout(Duration::from_secs(5))
            .with_persistence_strategy(PersistenceStrategy::OptimizeForSingleWrite);

        assert_eq!(options.isolation_level, Some(IsolationLevel::Serializable));
        assert!(!options.auto_begin_transaction);
        assert_eq!(options.timeout, Some(Duration::from_secs(5)));
        assert_eq!(
            options.persistence_strategy,
            PersistenceStrategy::OptimizeForSingleWrite
        );
    }

    #[test]
    fn read_only_shorthand() {
        assert!(UnitOfWorkOptions::read_only().read_only);
    }
}
