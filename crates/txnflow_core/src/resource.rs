//! Capability contracts consumed by the engine.
//!
//! The engine never inspects the underlying storage technology. It
//! only sequences the calls below and aggregates their outcomes, so a
//! resource can be a database connection, a message outbox, or the
//! in-memory fake shipped here.

use crate::cancel::CancelToken;
use crate::error::BoxError;
use crate::options::{IsolationLevel, UnitOfWorkOptions};
use crate::work::UnitOfWork;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use thiserror::Error;

/// One transactional participant in a unit of work.
///
/// Implementations must report a stable [`identifier`](Self::identifier)
/// per physical connection; the engine uses it to reject duplicate
/// registration within one unit of work. A resource must not be
/// registered with more than one concurrently active unit of work.
#[async_trait]
pub trait TransactionalResource: Send + Sync {
    /// Stable identity of the underlying connection.
    fn identifier(&self) -> &str;

    /// Whether the resource currently holds an open transaction.
    fn has_active_transaction(&self) -> bool;

    /// Opens a transaction, optionally at the given isolation level.
    async fn begin_transaction(
        &self,
        isolation: Option<IsolationLevel>,
        ct: &CancelToken,
    ) -> Result<(), BoxError>;

    /// Commits the open transaction.
    async fn commit_transaction(&self, ct: &CancelToken) -> Result<(), BoxError>;

    /// Rolls back the open transaction.
    ///
    /// A rollback sweep may also reach a resource whose commit already
    /// succeeded; adapters for engines that cannot roll back a
    /// committed transaction should treat that call as a no-op.
    async fn rollback_transaction(&self, ct: &CancelToken) -> Result<(), BoxError>;

    /// Performs one atomic save, returning the number of rows affected.
    ///
    /// Used instead of an explicit transaction under
    /// [`PersistenceStrategy::OptimizeForSingleWrite`](crate::PersistenceStrategy::OptimizeForSingleWrite).
    async fn save_changes(&self, ct: &CancelToken) -> Result<u64, BoxError>;

    /// Releases the resource. Called once during disposal.
    fn dispose(&self) -> Result<(), BoxError>;
}

/// Observer invoked on unit-of-work lifecycle events.
///
/// Hooks let collaborators customize initialization without
/// subclassing the engine: `on_created` runs once per newly created
/// root unit of work, before the manager returns it.
#[async_trait]
pub trait LifecycleHook: Send + Sync {
    /// Invoked once per newly created root unit of work.
    ///
    /// A failure here aborts creation; the unit is never pushed onto
    /// the scope stack.
    async fn on_created(
        &self,
        work: &UnitOfWork,
        options: &UnitOfWorkOptions,
        ct: &CancelToken,
    ) -> Result<(), BoxError>;

    /// Invoked after a successful commit, read-only commits included.
    /// The synchronous `mark_as_completed` fast path does not notify.
    ///
    /// Failures are logged and swallowed; they never downgrade a
    /// successful commit into a reported failure.
    async fn on_completed(&self, _work: &UnitOfWork) -> Result<(), BoxError> {
        Ok(())
    }
}

/// An injected failure raised by [`MemoryResource`] and test fakes.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct ResourceFault {
    message: String,
}

impl ResourceFault {
    /// Creates a new fault with the given message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// Creates a boxed fault, ready to return from a resource call.
    pub fn boxed(message: impl Into<String>) -> BoxError {
        Box::new(Self::new(message))
    }
}

/// An in-memory transactional resource.
///
/// Tracks call counts and supports per-operation failure injection,
/// useful for examples and tests without a real database.
#[derive(Debug)]
pub struct MemoryResource {
    identifier: String,
    transaction_active: AtomicBool,
    begin_calls: AtomicU32,
    commit_calls: AtomicU32,
    rollback_calls: AtomicU32,
    save_calls: AtomicU32,
    dispose_calls: AtomicU32,
    pending_rows: AtomicU64,
    fail_begin: Mutex<Option<String>>,
    fail_commit: Mutex<Option<String>>,
    fail_rollback: Mutex<Option<String>>,
    fail_save: Mutex<Option<String>>,
    fail_dispose: Mutex<Option<String>>,
}

impl MemoryResource {
    /// Creates a new in-memory resource with the given identifier.
    pub fn new(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            transaction_active: AtomicBool::new(false),
            begin_calls: AtomicU32::new(0),
            commit_calls: AtomicU32::new(0),
            rollback_calls: AtomicU32::new(0),
            save_calls: AtomicU32::new(0),
            dispose_calls: AtomicU32::new(0),
            pending_rows: AtomicU64::new(0),
            fail_begin: Mutex::new(None),
            fail_commit: Mutex::new(None),
            fail_rollback: Mutex::new(None),
            fail_save: Mutex::new(None),
            fail_dispose: Mutex::new(None),
        }
    }

    /// Makes subsequent `begin_transaction` calls fail.
    pub fn set_fail_begin(&self, message: impl Into<String>) {
        *self.fail_begin.lock() = Some(message.into());
    }

    /// Makes subsequent `commit_transaction` calls fail.
    pub fn set_fail_commit(&self, message: impl Into<String>) {
        *self.fail_commit.lock() = Some(message.into());
    }

    /// Makes subsequent `rollback_transaction` calls fail.
    pub fn set_fail_rollback(&self, message: impl Into<String>) {
        *self.fail_rollback.lock() = Some(message.into());
    }

    /// Makes subsequent `save_changes` calls fail.
    pub fn set_fail_save(&self, message: impl Into<String>) {
        *self.fail_save.lock() = Some(message.into());
    }

    /// Makes subsequent `dispose` calls fail.
    pub fn set_fail_dispose(&self, message: impl Into<String>) {
        *self.fail_dispose.lock() = Some(message.into());
    }

    /// Sets the row count reported by `save_changes`.
    pub fn set_pending_rows(&self, rows: u64) {
        self.pending_rows.store(rows, Ordering::SeqCst);
    }

    /// Number of `begin_transaction` calls so far.
    #[must_use]
    pub fn begin_calls(&self) -> u32 {
        self.begin_calls.load(Ordering::SeqCst)
    }

    /// Number of `commit_transaction` calls so far.
    #[must_use]
    pub fn commit_calls(&self) -> u32 {
        self.commit_calls.load(Ordering::SeqCst)
    }

    /// Number of `rollback_transaction` calls so far.
    #[must_use]
    pub fn rollback_calls(&self) -> u32 {
        self.rollback_calls.load(Ordering::SeqCst)
    }

    /// Number of `save_changes` calls so far.
    #[must_use]
    pub fn save_calls(&self) -> u32 {
        self.save_calls.load(Ordering::SeqCst)
    }

    /// Number of `dispose` calls so far.
    #[must_use]
    pub fn dispose_calls(&self) -> u32 {
        self.dispose_calls.load(Ordering::SeqCst)
    }

    fn injected(&self, slot: &Mutex<Option<String>>) -> Option<BoxError> {
        slot.lock().as_ref().map(ResourceFault::boxed)
    }
}

#[async_trait]
impl TransactionalResource for MemoryResource {
    fn identifier(&self) -> &str {
        &self.identifier
    }

    fn has_active_transaction(&self) -> bool {
        self.transaction_active.load(Ordering::SeqCst)
    }

    async fn begin_transaction(
        &self,
        _isolation: Option<IsolationLevel>,
        _ct: &CancelToken,
    ) -> Result<(), BoxError> {
        self.begin_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.injected(&self.fail_begin) {
            return Err(error);
        }
        if self.transaction_active.swap(true, Ordering::SeqCst) {
            return Err(ResourceFault::boxed("transaction already open"));
        }
        Ok(())
    }

    async fn commit_transaction(&self, _ct: &CancelToken) -> Result<(), BoxError> {
        self.commit_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.injected(&self.fail_commit) {
            return Err(error);
        }
        if !self.transaction_active.swap(false, Ordering::SeqCst) {
            return Err(ResourceFault::boxed("no open transaction to commit"));
        }
        Ok(())
    }

    async fn rollback_transaction(&self, _ct: &CancelToken) -> Result<(), BoxError> {
        self.rollback_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.injected(&self.fail_rollback) {
            return Err(error);
        }
        // Rollback of an already-closed transaction is a no-op.
        self.transaction_active.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn save_changes(&self, _ct: &CancelToken) -> Result<u64, BoxError> {
        self.save_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.injected(&self.fail_save) {
            return Err(error);
        }
        Ok(self.pending_rows.load(Ordering::SeqCst))
    }

    fn dispose(&self) -> Result<(), BoxError> {
        self.dispose_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.injected(&self.fail_dispose) {
            return Err(error);
        }
        self.transaction_active.store(false, Ordering::SeqCst);
        Ok(())
    }
}
