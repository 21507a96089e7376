//! Per-scope unit-of-work manager.

use crate::cancel::CancelToken;
use crate::error::{UowError, UowResult, WorkPhase};
use crate::options::UnitOfWorkOptions;
use crate::resource::LifecycleHook;
use crate::types::WorkId;
use crate::work::{UnitOfWork, WorkBody, WorkRole, WorkState};
use parking_lot::Mutex;
use std::sync::Arc;

/// One entry on a scope's stack of units of work.
pub(crate) struct ScopeEntry {
    pub(crate) id: WorkId,
    pub(crate) role: WorkRole,
    pub(crate) body: Arc<WorkBody>,
}

/// The ordered stack of unit-of-work handles for one logical scope.
///
/// The top is `Current`. Entries are pushed on begin and popped only
/// on dispose, in strict LIFO order.
pub(crate) struct ScopeStack {
    entries: Mutex<Vec<ScopeEntry>>,
}

impl ScopeStack {
    fn new() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn push(&self, entry: ScopeEntry) {
        self.entries.lock().push(entry);
    }

    pub(crate) fn top(&self) -> Option<(WorkId, Arc<WorkBody>)> {
        self.entries
            .lock()
            .last()
            .map(|entry| (entry.id, Arc::clone(&entry.body)))
    }

    pub(crate) fn depth(&self) -> usize {
        self.entries.lock().len()
    }

    /// Pops the entry for `id`, which must be the top of the stack.
    ///
    /// An id no longer on the stack (already unwound defensively) is
    /// accepted; an id buried under a still-active inner unit is an
    /// ordering error.
    pub(crate) fn pop_expected(&self, id: WorkId) -> UowResult<()> {
        let mut entries = self.entries.lock();
        match entries.last() {
            Some(top) if top.id == id => {
                entries.pop();
                Ok(())
            }
            _ if entries.iter().any(|entry| entry.id == id) => {
                Err(UowError::OutOfOrderDispose { id })
            }
            _ => Ok(()),
        }
    }

    fn pop_innermost(&self) -> Option<ScopeEntry> {
        self.entries.lock().pop()
    }
}

/// Owns a per-scope nested stack of units of work.
///
/// One manager instance serves exactly one logical scope (one request
/// or operation); nesting within that scope is strictly LIFO. The
/// manager is not a cross-thread scheduler — safety is structural, one
/// manager per logical operation.
pub struct UnitOfWorkManager {
    scope: Arc<ScopeStack>,
    hooks: Vec<Arc<dyn LifecycleHook>>,
}

impl UnitOfWorkManager {
    /// Creates a manager with no lifecycle hooks.
    #[must_use]
    pub fn new() -> Self {
        Self {
            scope: Arc::new(ScopeStack::new()),
            hooks: Vec::new(),
        }
    }

    /// Creates a manager with the given lifecycle hooks.
    #[must_use]
    pub fn with_hooks(hooks: Vec<Arc<dyn LifecycleHook>>) -> Self {
        Self {
            scope: Arc::new(ScopeStack::new()),
            hooks,
        }
    }

    /// Registers a lifecycle hook. Hooks run sequentially in
    /// registration order when a root unit of work is created.
    pub fn register_hook(&mut self, hook: Arc<dyn LifecycleHook>) {
        self.hooks.push(hook);
    }

    /// The current (innermost, not-yet-disposed) unit of work, if any.
    ///
    /// Returns a joining view: registrations forward to the ambient
    /// unit, while commit and rollback record intent only.
    #[must_use]
    pub fn current(&self) -> Option<UnitOfWork> {
        self.scope
            .top()
            .map(|(_, body)| UnitOfWork::nested(WorkId::new(), body, None))
    }

    /// Id of the current unit of work, if any.
    #[must_use]
    pub fn current_id(&self) -> Option<WorkId> {
        self.scope.top().map(|(id, _)| id)
    }

    /// Depth of the scope's stack.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.scope.depth()
    }

    /// Begins a unit of work, joining the ambient one when it exists.
    ///
    /// With no current unit this behaves like [`begin_new`](Self::begin_new).
    /// Otherwise it returns a nested handle forwarding registrations to
    /// the current unit; the nested handle's options are the ambient
    /// unit's options, and its commit/rollback never touch resources —
    /// physical completion happens exclusively when the outermost unit
    /// completes.
    pub async fn begin(
        &self,
        options: UnitOfWorkOptions,
        ct: &CancelToken,
    ) -> UowResult<UnitOfWork> {
        ct.check()?;
        if let Some((_, body)) = self.scope.top() {
            let id = WorkId::new();
            let work = UnitOfWork::nested(id, Arc::clone(&body), Some(Arc::downgrade(&self.scope)));
            self.scope.push(ScopeEntry {
                id,
                role: WorkRole::Nested,
                body,
            });
            tracing::debug!(%id, depth = self.scope.depth(), "joined ambient unit of work");
            return Ok(work);
        }
        self.begin_new(options, ct).await
    }

    /// Begins a new root unit of work, regardless of any ambient one.
    ///
    /// Registered lifecycle hooks run sequentially, in registration
    /// order, before the unit is pushed and returned; a hook failure
    /// aborts creation.
    pub async fn begin_new(
        &self,
        options: UnitOfWorkOptions,
        ct: &CancelToken,
    ) -> UowResult<UnitOfWork> {
        ct.check()?;
        let id = WorkId::new();
        let body = Arc::new(WorkBody::new(options, self.hooks.clone()));
        let work = UnitOfWork::root(id, Arc::clone(&body), Arc::downgrade(&self.scope));

        for hook in &self.hooks {
            hook.on_created(&work, &body.options, ct)
                .await
                .map_err(UowError::Hook)?;
        }

        self.scope.push(ScopeEntry {
            id,
            role: WorkRole::Root,
            body,
        });
        tracing::debug!(%id, depth = self.scope.depth(), "created root unit of work");
        Ok(work)
    }

    /// Defensively unwinds the entire scope stack, innermost first.
    ///
    /// Intended for outer layers handling an unhandled failure after a
    /// caller skipped its own dispose. Root entries release their
    /// resources (collect-and-continue); failures are reported in one
    /// dispose aggregate.
    pub fn dispose(&self) -> UowResult<()> {
        let mut failures = Vec::new();
        while let Some(entry) = self.scope.pop_innermost() {
            if entry.role == WorkRole::Root && entry.body.state() != WorkState::Disposed {
                failures.extend(entry.body.release_resources());
                entry.body.set_state(WorkState::Disposed);
            }
        }
        if failures.is_empty() {
            Ok(())
        } else {
            Err(UowError::aggregate(WorkPhase::Dispose, failures))
        }
    }
}

impl Default for UnitOfWorkManager {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for UnitOfWorkManager {
    fn drop(&mut self) {
        if self.scope.depth() == 0 {
            return;
        }
        if let Err(error) = self.dispose() {
            tracing::warn!(%error, "scope unwind on manager drop failed");
        }
    }
}

impl std::fmt::Debug for UnitOfWorkManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnitOfWorkManager")
            .field("depth", &self.depth())
            .field("hooks", &self.hooks.len())
            .finish_non_exhaustive()
    }
}
