//! Scripted test resources and recording hooks.
//!
//! Provides fakes for exercising the unit-of-work protocol without a
//! real database: a [`ScriptedResource`] with per-operation failure
//! injection, a shared [`CallLog`] recording cross-resource call
//! order, and a [`RecordingHook`] counting lifecycle notifications.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use txnflow_core::{
    BoxError, CancelToken, IsolationLevel, LifecycleHook, ResourceFault, TransactionalResource,
    UnitOfWork, UnitOfWorkOptions,
};

/// The kind of a recorded resource call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallKind {
    /// `begin_transaction`.
    Begin,
    /// `commit_transaction`.
    Commit,
    /// `rollback_transaction`.
    Rollback,
    /// `save_changes`.
    Save,
    /// `dispose`.
    Dispose,
}

/// One recorded resource call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallEvent {
    /// Identifier of the resource that received the call.
    pub resource_id: String,
    /// The call that was made.
    pub kind: CallKind,
}

/// A log of resource calls shared across scripted resources.
///
/// Recording into one log from every resource in a scenario makes
/// cross-resource ordering assertions possible (commit order, the
/// errored-first rollback sweep).
#[derive(Debug, Default)]
pub struct CallLog {
    events: Mutex<Vec<CallEvent>>,
}

impl CallLog {
    /// Creates a new shared call log.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Records one call.
    pub fn record(&self, resource_id: &str, kind: CallKind) {
        self.events.lock().push(CallEvent {
            resource_id: resource_id.to_string(),
            kind,
        });
    }

    /// Returns every recorded event in order.
    #[must_use]
    pub fn events(&self) -> Vec<CallEvent> {
        self.events.lock().clone()
    }

    /// Returns the calls made to one resource, in order.
    #[must_use]
    pub fn kinds_for(&self, resource_id: &str) -> Vec<CallKind> {
        self.events
            .lock()
            .iter()
            .filter(|event| event.resource_id == resource_id)
            .map(|event| event.kind)
            .collect()
    }

    /// Number of calls of one kind made to one resource.
    #[must_use]
    pub fn count(&self, resource_id: &str, kind: CallKind) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|event| event.resource_id == resource_id && event.kind == kind)
            .count()
    }

    /// Resource ids that received calls of one kind, in call order.
    #[must_use]
    pub fn sequence(&self, kind: CallKind) -> Vec<String> {
        self.events
            .lock()
            .iter()
            .filter(|event| event.kind == kind)
            .map(|event| event.resource_id.clone())
            .collect()
    }

    /// Clears the log.
    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

/// A scripted transactional resource with failure injection.
///
/// Every call is recorded into the shared [`CallLog`]. Injected
/// failures are sticky: once set, the corresponding call keeps failing
/// until cleared. A failed commit leaves the transaction reported open
/// so a later rollback sweep reaches it.
#[derive(Debug)]
pub struct ScriptedResource {
    identifier: String,
    log: Arc<CallLog>,
    transaction_active: AtomicBool,
    pending_rows: AtomicU64,
    fail_begin: Mutex<Option<String>>,
    fail_commit: Mutex<Option<String>>,
    fail_rollback: Mutex<Option<String>>,
    fail_save: Mutex<Option<String>>,
    fail_dispose: Mutex<Option<String>>,
    delay_begin: Mutex<Option<Duration>>,
    delay_commit: Mutex<Option<Duration>>,
}

impl ScriptedResource {
    /// Creates a scripted resource recording into `log`.
    pub fn new(identifier: impl Into<String>, log: Arc<CallLog>) -> Arc<Self> {
        Arc::new(Self {
            identifier: identifier.into(),
            log,
            transaction_active: AtomicBool::new(false),
            pending_rows: AtomicU64::new(0),
            fail_begin: Mutex::new(None),
            fail_commit: Mutex::new(None),
            fail_rollback: Mutex::new(None),
            fail_save: Mutex::new(None),
            fail_dispose: Mutex::new(None),
            delay_begin: Mutex::new(None),
            delay_commit: Mutex::new(None),
        })
    }

    /// Makes `begin_transaction` fail with the given message.
    pub fn set_fail_begin(&self, message: impl Into<String>) {
        *self.fail_begin.lock() = Some(message.into());
    }

    /// Makes `commit_transaction` fail with the given message.
    pub fn set_fail_commit(&self, message: impl Into<String>) {
        *self.fail_commit.lock() = Some(message.into());
    }

    /// Makes `rollback_transaction` fail with the given message.
    pub fn set_fail_rollback(&self, message: impl Into<String>) {
        *self.fail_rollback.lock() = Some(message.into());
    }

    /// Makes `save_changes` fail with the given message.
    pub fn set_fail_save(&self, message: impl Into<String>) {
        *self.fail_save.lock() = Some(message.into());
    }

    /// Makes `dispose` fail with the given message.
    pub fn set_fail_dispose(&self, message: impl Into<String>) {
        *self.fail_dispose.lock() = Some(message.into());
    }

    /// Makes `begin_transaction` sleep before doing anything, for
    /// timeout tests.
    pub fn set_begin_delay(&self, delay: Duration) {
        *self.delay_begin.lock() = Some(delay);
    }

    /// Makes `commit_transaction` sleep before doing anything.
    pub fn set_commit_delay(&self, delay: Duration) {
        *self.delay_commit.lock() = Some(delay);
    }

    /// Sets the row count reported by `save_changes`.
    pub fn set_pending_rows(&self, rows: u64) {
        self.pending_rows.store(rows, Ordering::SeqCst);
    }

    fn injected(&self, slot: &Mutex<Option<String>>) -> Option<BoxError> {
        slot.lock().as_ref().map(ResourceFault::boxed)
    }
}

#[async_trait]
impl TransactionalResource for ScriptedResource {
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
        let delay = *self.delay_begin.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.log.record(&self.identifier, CallKind::Begin);
        if let Some(error) = self.injected(&self.fail_begin) {
            return Err(error);
        }
        self.transaction_active.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn commit_transaction(&self, _ct: &CancelToken) -> Result<(), BoxError> {
        let delay = *self.delay_commit.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.log.record(&self.identifier, CallKind::Commit);
        if let Some(error) = self.injected(&self.fail_commit) {
            return Err(error);
        }
        self.transaction_active.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn rollback_transaction(&self, _ct: &CancelToken) -> Result<(), BoxError> {
        self.log.record(&self.identifier, CallKind::Rollback);
        if let Some(error) = self.injected(&self.fail_rollback) {
            return Err(error);
        }
        self.transaction_active.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn save_changes(&self, _ct: &CancelToken) -> Result<u64, BoxError> {
        self.log.record(&self.identifier, CallKind::Save);
        if let Some(error) = self.injected(&self.fail_save) {
            return Err(error);
        }
        Ok(self.pending_rows.load(Ordering::SeqCst))
    }

    fn dispose(&self) -> Result<(), BoxError> {
        self.log.record(&self.identifier, CallKind::Dispose);
        if let Some(error) = self.injected(&self.fail_dispose) {
            return Err(error);
        }
        self.transaction_active.store(false, Ordering::SeqCst);
        Ok(())
    }
}

/// A lifecycle hook counting notifications, with failure injection.
#[derive(Debug, Default)]
pub struct RecordingHook {
    created: AtomicU32,
    completed: AtomicU32,
    fail_created: Mutex<Option<String>>,
    fail_completed: Mutex<Option<String>>,
}

impl RecordingHook {
    /// Creates a new recording hook.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Number of `on_created` notifications received.
    #[must_use]
    pub fn created_count(&self) -> u32 {
        self.created.load(Ordering::SeqCst)
    }

    /// Number of `on_completed` notifications received.
    #[must_use]
    pub fn completed_count(&self) -> u32 {
        self.completed.load(Ordering::SeqCst)
    }

    /// Makes `on_created` fail with the given message.
    pub fn set_fail_created(&self, message: impl Into<String>) {
        *self.fail_created.lock() = Some(message.into());
    }

    /// Makes `on_completed` fail with the given message.
    pub fn set_fail_completed(&self, message: impl Into<String>) {
        *self.fail_completed.lock() = Some(message.into());
    }
}

#[async_trait]
impl LifecycleHook for RecordingHook {
    async fn on_created(
        &self,
        _work: &UnitOfWork,
        _options: &UnitOfWorkOptions,
        _ct: &CancelToken,
    ) -> Result<(), BoxError> {
        self.created.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = self.fail_created.lock().clone() {
            return Err(ResourceFault::boxed(message));
        }
        Ok(())
    }

    async fn on_completed(&self, _work: &UnitOfWork) -> Result<(), BoxError> {
        self.completed.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = self.fail_completed.lock().clone() {
            return Err(ResourceFault::boxed(message));
        }
        Ok(())
    }
}
