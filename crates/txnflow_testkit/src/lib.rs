//! # TxnFlow Testkit
//!
//! Test utilities for TxnFlow.
//!
//! This crate provides:
//! - Scripted resources and call logs for asserting protocol ordering
//! - Recording lifecycle hooks
//! - Property-based test generators using proptest
//! - Multi-resource integration scenario helpers
//!
//! ## Usage
//!
//! ```rust,ignore
//! use txnflow_testkit::prelude::*;
//!
//! #[tokio::test]
//! async fn commits_in_order() {
//!     let scenario = Scenario::new();
//!     let work = scenario
//!         .manager
//!         .begin(Default::default(), &scenario.ct)
//!         .await
//!         .unwrap();
//!     work.register_db_context(scenario.resource("db-a"), &scenario.ct)
//!         .await
//!         .unwrap();
//!     work.commit(&scenario.ct).await.unwrap();
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod integration;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::integration::*;
}

pub use fixtures::*;
pub use generators::*;
pub use integration::*;
