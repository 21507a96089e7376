//! The unit-of-work state machine.

use crate::cancel::CancelToken;
use crate::error::{BoxError, ResourceFailure, UowError, UowResult, WorkPhase};
use crate::manager::ScopeStack;
use crate::options::{PersistenceStrategy, UnitOfWorkOptions};
use crate::resource::{LifecycleHook, TransactionalResource};
use crate::types::WorkId;
use parking_lot::{Mutex, RwLock};
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

/// State of a unit of work.
///
/// Transitions only move forward:
/// `NotStarted → Active → {Committed | RolledBack} → Disposed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkState {
    /// Created; no transactions opened yet.
    NotStarted,
    /// Transactions are open (or the unit is in flight).
    Active,
    /// Every attempted commit succeeded.
    Committed,
    /// The unit was rolled back.
    RolledBack,
    /// Resources have been released.
    Disposed,
}

impl WorkState {
    /// Returns true if the unit can still accept registrations.
    #[must_use]
    pub fn is_open(&self) -> bool {
        matches!(self, WorkState::NotStarted | WorkState::Active)
    }

    /// Returns true if the unit reached a terminal outcome.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        !self.is_open()
    }
}

/// Whether a handle owns the commit/rollback decision or joins an
/// ambient unit.
///
/// Nesting is a data flag on one concrete type, not a subclass: the
/// commit/rollback algorithm lives in exactly one place and nested
/// handles simply decline to run it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkRole {
    /// The outermost handle; the only one that drives resources.
    Root,
    /// A handle joining an already-active outer unit of work.
    Nested,
}

/// A resource registration inside one unit of work.
struct Registration {
    resource: Arc<dyn TransactionalResource>,
    /// Set when this resource failed during a commit attempt; a later
    /// rollback sweeps it before the others.
    failed_commit: bool,
    /// Set once this resource's commit (or save) succeeded.
    committed: bool,
}

impl Registration {
    fn new(resource: Arc<dyn TransactionalResource>) -> Self {
        Self {
            resource,
            failed_commit: false,
            committed: false,
        }
    }
}

/// Shared body of a unit of work; root and nested handles observe the
/// same body through an `Arc`.
pub(crate) struct WorkBody {
    pub(crate) options: UnitOfWorkOptions,
    hooks: Vec<Arc<dyn LifecycleHook>>,
    state: RwLock<WorkState>,
    resources: Mutex<Vec<Registration>>,
    rows_affected: AtomicU64,
}

impl WorkBody {
    pub(crate) fn new(options: UnitOfWorkOptions, hooks: Vec<Arc<dyn LifecycleHook>>) -> Self {
        Self {
            options,
            hooks,
            state: RwLock::new(WorkState::NotStarted),
            resources: Mutex::new(Vec::new()),
            rows_affected: AtomicU64::new(0),
        }
    }

    pub(crate) fn state(&self) -> WorkState {
        *self.state.read()
    }

    pub(crate) fn set_state(&self, state: WorkState) {
        *self.state.write() = state;
    }

    /// Releases every resource, continuing past individual failures.
    pub(crate) fn release_resources(&self) -> Vec<ResourceFailure> {
        let mut failures = Vec::new();
        for registration in self.resources.lock().iter() {
            if let Err(error) = registration.resource.dispose() {
                failures.push(ResourceFailure::new(
                    registration.resource.identifier(),
                    error,
                ));
            }
        }
        failures
    }
}

/// Bounds one awaited resource call by the configured timeout.
async fn bounded<T>(
    limit: Option<Duration>,
    call: impl Future<Output = Result<T, BoxError>>,
) -> Result<T, BoxError> {
    match limit {
        Some(limit) => match tokio::time::timeout(limit, call).await {
            Ok(result) => result,
            Err(_) => Err(Box::new(UowError::Timeout { elapsed: limit })),
        },
        None => call.await,
    }
}

/// A unit of work coordinating N transactional resources under one
/// logical operation.
///
/// Created by [`UnitOfWorkManager::begin`](crate::UnitOfWorkManager::begin)
/// or [`begin_new`](crate::UnitOfWorkManager::begin_new). Data-access
/// code registers resources as they are first touched; the caller ends
/// the unit with exactly one of [`commit`](Self::commit) /
/// [`rollback`](Self::rollback) followed by [`dispose`](Self::dispose).
///
/// Resource operations are strictly sequential in registration order;
/// commit order reflects write-order dependencies between resources
/// and is never parallelized.
pub struct UnitOfWork {
    id: WorkId,
    role: WorkRole,
    body: Arc<WorkBody>,
    /// Present when this handle sits on a manager's scope stack.
    scope: Option<Weak<ScopeStack>>,
    /// Nested handles record commit/rollback intent here instead of
    /// touching resources.
    intent_recorded: AtomicBool,
    handle_disposed: AtomicBool,
}

impl UnitOfWork {
    pub(crate) fn root(id: WorkId, body: Arc<WorkBody>, scope: Weak<ScopeStack>) -> Self {
        Self {
            id,
            role: WorkRole::Root,
            body,
            scope: Some(scope),
            intent_recorded: AtomicBool::new(false),
            handle_disposed: AtomicBool::new(false),
        }
    }

    pub(crate) fn nested(
        id: WorkId,
        body: Arc<WorkBody>,
        scope: Option<Weak<ScopeStack>>,
    ) -> Self {
        Self {
            id,
            role: WorkRole::Nested,
            body,
            scope,
            intent_recorded: AtomicBool::new(false),
            handle_disposed: AtomicBool::new(false),
        }
    }

    /// Unique id of this handle.
    #[must_use]
    pub fn id(&self) -> WorkId {
        self.id
    }

    /// Whether this handle owns the commit/rollback decision.
    #[must_use]
    pub fn role(&self) -> WorkRole {
        self.role
    }

    /// Current state of the shared unit of work.
    #[must_use]
    pub fn state(&self) -> WorkState {
        self.body.state()
    }

    /// The options the unit was created with.
    #[must_use]
    pub fn options(&self) -> &UnitOfWorkOptions {
        &self.body.options
    }

    /// Returns true once the unit committed.
    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.body.state() == WorkState::Committed
    }

    /// Returns true once this handle (or the whole unit) was disposed.
    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.handle_disposed.load(Ordering::SeqCst) || self.body.state() == WorkState::Disposed
    }

    /// Returns true if any registered resource holds an open transaction.
    #[must_use]
    pub fn has_active_transactions(&self) -> bool {
        self.body
            .resources
            .lock()
            .iter()
            .any(|r| r.resource.has_active_transaction())
    }

    /// Number of registered resources.
    #[must_use]
    pub fn resource_count(&self) -> usize {
        self.body.resources.lock().len()
    }

    /// Total rows affected by `save_changes` commits so far.
    #[must_use]
    pub fn total_rows_affected(&self) -> u64 {
        self.body.rows_affected.load(Ordering::SeqCst)
    }

    /// Registers a transactional resource with this unit of work.
    ///
    /// Idempotent per resource identifier: a second registration of the
    /// same identifier is a no-op, not an error. Registration order
    /// fixes commit order. A no-op under read-only options; fails with
    /// an invalid-state error once the unit reached a terminal state.
    ///
    /// When `auto_begin_transaction` is set (and the strategy is
    /// transaction-managed), the resource's transaction is opened here.
    pub async fn register_db_context(
        &self,
        resource: Arc<dyn TransactionalResource>,
        ct: &CancelToken,
    ) -> UowResult<()> {
        if self.body.options.read_only {
            return Ok(());
        }
        ct.check()?;

        let newly_added = {
            let state = self.body.state();
            if !state.is_open() {
                return Err(UowError::invalid_state("register_db_context", state));
            }
            let mut resources = self.body.resources.lock();
            if resources
                .iter()
                .any(|r| r.resource.identifier() == resource.identifier())
            {
                false
            } else {
                resources.push(Registration::new(resource.clone()));
                true
            }
        };
        if !newly_added {
            return Ok(());
        }
        tracing::debug!(id = %self.id, resource = resource.identifier(), "registered resource");

        let auto_begin = self.body.options.auto_begin_transaction
            && self.body.options.persistence_strategy == PersistenceStrategy::TransactionManaged;
        if auto_begin {
            match self.body.state() {
                WorkState::NotStarted => self.begin_transaction(ct).await?,
                WorkState::Active => {
                    if !resource.has_active_transaction() {
                        let opts = &self.body.options;
                        if let Err(error) = bounded(
                            opts.timeout,
                            resource.begin_transaction(opts.isolation_level, ct),
                        )
                        .await
                        {
                            return Err(UowError::aggregate(
                                WorkPhase::Begin,
                                vec![ResourceFailure::new(resource.identifier(), error)],
                            ));
                        }
                    }
                }
                _ => unreachable!("state checked open above"),
            }
        }
        Ok(())
    }

    /// Opens a transaction on every registered resource lacking one.
    ///
    /// Resources are opened sequentially in registration order. If
    /// resource K fails after 1..K-1 succeeded, the already-opened
    /// transactions are rolled back (best effort, all rollback errors
    /// collected) and one begin aggregate is raised — a half-open unit
    /// is never observable to the caller. Cancellation mid-begin is
    /// treated the same way.
    pub async fn begin_transaction(&self, ct: &CancelToken) -> UowResult<()> {
        let opts = &self.body.options;
        if opts.read_only {
            return Ok(());
        }
        let state = self.body.state();
        if !state.is_open() {
            return Err(UowError::invalid_state("begin_transaction", state));
        }
        if opts.persistence_strategy == PersistenceStrategy::OptimizeForSingleWrite {
            // No explicit transactions; the unit is active as soon as
            // work begins.
            self.transition_active();
            return Ok(());
        }

        let pending: Vec<Arc<dyn TransactionalResource>> = self
            .body
            .resources
            .lock()
            .iter()
            .filter(|r| !r.resource.has_active_transaction())
            .map(|r| Arc::clone(&r.resource))
            .collect();

        let mut opened: Vec<Arc<dyn TransactionalResource>> = Vec::new();
        for resource in pending {
            if ct.is_cancelled() {
                self.unwind_opened(&opened).await;
                return Err(UowError::Cancelled);
            }
            match bounded(
                opts.timeout,
                resource.begin_transaction(opts.isolation_level, ct),
            )
            .await
            {
                Ok(()) => opened.push(resource),
                Err(error) => {
                    let mut failures =
                        vec![ResourceFailure::new(resource.identifier(), error)];
                    for prev in opened.iter().rev() {
                        let unwind_ct = CancelToken::new();
                        if let Err(rollback_error) =
                            bounded(opts.timeout, prev.rollback_transaction(&unwind_ct)).await
                        {
                            failures
                                .push(ResourceFailure::new(prev.identifier(), rollback_error));
                        }
                    }
                    return Err(UowError::aggregate(WorkPhase::Begin, failures));
                }
            }
        }
        self.transition_active();
        Ok(())
    }

    /// Commits the unit of work.
    ///
    /// Rejected once committed, rolled back, or disposed. Resources are
    /// committed in registration order, **fail-fast**: the first
    /// failure halts further commit attempts and later resources are
    /// left untouched, because a later write may depend on an earlier
    /// one. Already-committed earlier resources are not undone —
    /// cross-resource atomicity is not guaranteed unless all resources
    /// share one physical transaction.
    ///
    /// On a nested handle this records intent only; physical commit
    /// happens exclusively when the outermost unit completes.
    pub async fn commit(&self, ct: &CancelToken) -> UowResult<()> {
        if self.role == WorkRole::Nested {
            return self.record_intent("commit");
        }
        let state = self.body.state();
        if !state.is_open() {
            return Err(UowError::invalid_state("commit", state));
        }
        let opts = &self.body.options;
        if opts.read_only {
            // Cheap completion marker; no resource is touched.
            self.body.set_state(WorkState::Committed);
            self.notify_completed().await;
            return Ok(());
        }

        let plan: Vec<(usize, Arc<dyn TransactionalResource>)> = self
            .body
            .resources
            .lock()
            .iter()
            .enumerate()
            .filter(|(_, r)| match opts.persistence_strategy {
                PersistenceStrategy::TransactionManaged => r.resource.has_active_transaction(),
                // A retried commit must not re-save resources whose
                // save already succeeded.
                PersistenceStrategy::OptimizeForSingleWrite => !r.committed,
            })
            .map(|(index, r)| (index, Arc::clone(&r.resource)))
            .collect();

        for (index, resource) in plan {
            ct.check()?;
            let outcome = match opts.persistence_strategy {
                PersistenceStrategy::TransactionManaged => {
                    bounded(opts.timeout, resource.commit_transaction(ct))
                        .await
                        .map(|()| 0)
                }
                PersistenceStrategy::OptimizeForSingleWrite => {
                    bounded(opts.timeout, resource.save_changes(ct)).await
                }
            };
            match outcome {
                Ok(rows) => {
                    self.body.rows_affected.fetch_add(rows, Ordering::SeqCst);
                    self.body.resources.lock()[index].committed = true;
                }
                Err(error) => {
                    self.body.resources.lock()[index].failed_commit = true;
                    return Err(UowError::aggregate(
                        WorkPhase::Commit,
                        vec![ResourceFailure::new(resource.identifier(), error)],
                    ));
                }
            }
        }

        self.body.set_state(WorkState::Committed);
        tracing::debug!(id = %self.id, "unit of work committed");
        self.notify_completed().await;
        Ok(())
    }

    /// Rolls back the unit of work.
    ///
    /// Rejected once committed, rolled back, or disposed. The sweep is
    /// **collect-all**: resources that failed during a prior commit
    /// attempt are rolled back first, then every other resource that
    /// took part in the unit's transactional work; a failing rollback
    /// never stops the sweep. The state transitions to rolled-back
    /// regardless, and one rollback aggregate is raised afterwards if
    /// any call failed.
    ///
    /// On a nested handle this records intent only.
    pub async fn rollback(&self, ct: &CancelToken) -> UowResult<()> {
        if self.role == WorkRole::Nested {
            return self.record_intent("rollback");
        }
        let state = self.body.state();
        if !state.is_open() {
            return Err(UowError::invalid_state("rollback", state));
        }
        let opts = &self.body.options;
        if opts.read_only || opts.persistence_strategy == PersistenceStrategy::OptimizeForSingleWrite
        {
            // Nothing was opened; there is nothing to roll back.
            self.body.set_state(WorkState::RolledBack);
            return Ok(());
        }

        let sweep: Vec<Arc<dyn TransactionalResource>> = {
            let resources = self.body.resources.lock();
            let errored = resources
                .iter()
                .filter(|r| r.failed_commit)
                .map(|r| Arc::clone(&r.resource));
            let remaining = resources
                .iter()
                .filter(|r| {
                    !r.failed_commit && (r.committed || r.resource.has_active_transaction())
                })
                .map(|r| Arc::clone(&r.resource));
            errored.chain(remaining).collect()
        };

        let mut failures = Vec::new();
        for resource in sweep {
            ct.check()?;
            if let Err(error) = bounded(opts.timeout, resource.rollback_transaction(ct)).await {
                failures.push(ResourceFailure::new(resource.identifier(), error));
            }
        }

        self.body.set_state(WorkState::RolledBack);
        tracing::debug!(id = %self.id, failures = failures.len(), "unit of work rolled back");
        if failures.is_empty() {
            Ok(())
        } else {
            Err(UowError::aggregate(WorkPhase::Rollback, failures))
        }
    }

    /// Fast path for read-only or no-op units of work.
    ///
    /// Transitions directly to committed without touching any resource.
    /// Completion hooks are not notified here; use [`commit`](Self::commit)
    /// when observers must run.
    pub fn mark_as_completed(&self) -> UowResult<()> {
        let state = self.body.state();
        if !state.is_open() {
            return Err(UowError::invalid_state("mark_as_completed", state));
        }
        self.body.set_state(WorkState::Committed);
        Ok(())
    }

    /// Disposes this handle.
    ///
    /// Idempotent. A root handle releases every resource even if an
    /// earlier release throws (collect-and-continue), then pops itself
    /// off the owning manager's stack; popping while an inner unit is
    /// still active is an ordering error. Dispose without a prior
    /// commit or rollback never implicitly commits.
    pub fn dispose(&self) -> UowResult<()> {
        if self.handle_disposed.load(Ordering::SeqCst) {
            return Ok(());
        }
        if let Some(stack) = self.scope.as_ref().and_then(Weak::upgrade) {
            stack.pop_expected(self.id)?;
        }
        self.handle_disposed.store(true, Ordering::SeqCst);

        if self.role == WorkRole::Root && self.body.state() != WorkState::Disposed {
            let failures = self.body.release_resources();
            self.body.set_state(WorkState::Disposed);
            tracing::debug!(id = %self.id, "unit of work disposed");
            if !failures.is_empty() {
                return Err(UowError::aggregate(WorkPhase::Dispose, failures));
            }
        }
        Ok(())
    }

    fn record_intent(&self, operation: &'static str) -> UowResult<()> {
        if self.intent_recorded.swap(true, Ordering::SeqCst) {
            return Err(UowError::invalid_state(operation, self.body.state()));
        }
        tracing::debug!(id = %self.id, operation, "nested unit recorded intent");
        Ok(())
    }

    fn transition_active(&self) {
        let mut state = self.body.state.write();
        if *state == WorkState::NotStarted {
            *state = WorkState::Active;
        }
    }

    /// Best-effort rollback of transactions opened by an aborted begin.
    async fn unwind_opened(&self, opened: &[Arc<dyn TransactionalResource>]) {
        let unwind_ct = CancelToken::new();
        for resource in opened.iter().rev() {
            if let Err(error) = bounded(
                self.body.options.timeout,
                resource.rollback_transaction(&unwind_ct),
            )
            .await
            {
                tracing::warn!(
                    id = %self.id,
                    resource = resource.identifier(),
                    %error,
                    "rollback after aborted begin failed"
                );
            }
        }
    }

    async fn notify_completed(&self) {
        for hook in &self.body.hooks {
            if let Err(error) = hook.on_completed(self).await {
                // A successful commit is never downgraded by a hook.
                tracing::warn!(id = %self.id, %error, "completed hook failed");
            }
        }
    }
}

impl Drop for UnitOfWork {
    fn drop(&mut self) {
        // Plain views from `Manager::current` carry no scope and need
        // no cleanup.
        if self.scope.is_none() || self.handle_disposed.load(Ordering::SeqCst) {
            return;
        }
        if let Err(error) = self.dispose() {
            tracing::warn!(id = %self.id, %error, "dispose on drop failed");
        }
    }
}

impl std::fmt::Debug for UnitOfWork {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnitOfWork")
            .field("id", &self.id)
            .field("role", &self.role)
            .field("state", &self.body.state())
            .field("resources", &self.resource_count())
            .finish_non_exhaustive()
    }
}
