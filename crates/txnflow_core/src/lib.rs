//! # txnflow Core
//!
//! Unit-of-work transaction orchestration.
//!
//! This crate provides:
//! - A unit-of-work state machine
//!   (`NotStarted → Active → {Committed | RolledBack} → Disposed`)
//! - A per-scope manager with nested (ambient-join) units of work
//! - Capability contracts for transactional resources and lifecycle
//!   hooks
//! - Per-phase aggregate error reporting
//! - Cooperative cancellation and per-call timeouts
//!
//! ## Architecture
//!
//! The engine coordinates N independent transactional resources under
//! one logical operation. It never inspects the underlying storage
//! technology — adapters implement [`TransactionalResource`] and the
//! engine only sequences begin/commit/rollback/save calls and
//! aggregates their outcomes.
//!
//! ## Key invariants
//!
//! - Resource operations within one unit are strictly sequential, in
//!   registration order; commit order reflects write-order dependencies
//! - Commit is fail-fast; rollback and dispose are collect-all
//! - A resource identifier is registered at most once per unit
//! - Only the outermost unit of work drives commit/rollback; nested
//!   handles record intent only
//! - Multi-resource units are best-effort, not ACID, unless all
//!   resources share one physical transaction
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use txnflow_core::{
//!     CancelToken, MemoryResource, UnitOfWorkManager, UnitOfWorkOptions,
//! };
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), txnflow_core::UowError> {
//! let manager = UnitOfWorkManager::new();
//! let ct = CancelToken::new();
//!
//! let work = manager.begin(UnitOfWorkOptions::default(), &ct).await?;
//! work.register_db_context(Arc::new(MemoryResource::new("db-main")), &ct)
//!     .await?;
//! work.commit(&ct).await?;
//! work.dispose()?;
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod cancel;
mod error;
mod manager;
mod options;
mod resource;
mod types;
mod work;

pub use cancel::CancelToken;
pub use error::{AggregateFailure, BoxError, ResourceFailure, UowError, UowResult, WorkPhase};
pub use manager::UnitOfWorkManager;
pub use options::{IsolationLevel, PersistenceStrategy, UnitOfWorkOptions};
pub use resource::{LifecycleHook, MemoryResource, ResourceFault, TransactionalResource};
pub use types::WorkId;
pub use work::{UnitOfWork, WorkRole, WorkState};
