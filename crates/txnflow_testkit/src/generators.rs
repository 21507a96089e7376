//! Property-based test generators using proptest.
//!
//! Provides strategies for generating unit-of-work options, resource
//! identifier sets, and failure scripts that maintain required
//! invariants (unique identifiers, in-range failure indices).

use proptest::prelude::*;
use std::collections::HashSet;
use txnflow_core::{IsolationLevel, PersistenceStrategy, UnitOfWorkOptions};

/// Strategy for generating an isolation level.
pub fn isolation_level_strategy() -> impl Strategy<Value = IsolationLevel> {
    prop_oneof![
        Just(IsolationLevel::ReadUncommitted),
        Just(IsolationLevel::ReadCommitted),
        Just(IsolationLevel::RepeatableRead),
        Just(IsolationLevel::Serializable),
        Just(IsolationLevel::Snapshot),
    ]
}

/// Strategy for generating a persistence strategy.
pub fn persistence_strategy_strategy() -> impl Strategy<Value = PersistenceStrategy> {
    prop_oneof![
        Just(PersistenceStrategy::TransactionManaged),
        Just(PersistenceStrategy::OptimizeForSingleWrite),
    ]
}

/// Strategy for generating writable unit-of-work options.
///
/// Read-only and timeouts are exercised by dedicated tests; property
/// tests vary isolation, auto-begin, and the persistence strategy.
pub fn options_strategy() -> impl Strategy<Value = UnitOfWorkOptions> {
    (
        proptest::option::of(isolation_level_strategy()),
        any::<bool>(),
        persistence_strategy_strategy(),
    )
        .prop_map(|(isolation, auto_begin, strategy)| {
            let mut options = UnitOfWorkOptions::new()
                .with_auto_begin(auto_begin)
                .with_persistence_strategy(strategy);
            options.isolation_level = isolation;
            options
        })
}

/// Strategy for generating a valid resource identifier.
pub fn identifier_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z]{2,8}-db[0-9]{1,2}").expect("Invalid regex")
}

/// Strategy for generating 1..=max unique resource identifiers.
pub fn identifiers_strategy(max: usize) -> impl Strategy<Value = Vec<String>> {
    prop::collection::hash_set(identifier_strategy(), 1..=max)
        .prop_map(|set: HashSet<String>| set.into_iter().collect())
}

/// A failure script for one scenario: which resource (by registration
/// index) fails which operation.
#[derive(Debug, Clone)]
pub struct FailureScript {
    /// Index of the resource whose begin fails, if any.
    pub fail_begin_at: Option<usize>,
    /// Index of the resource whose commit fails, if any.
    pub fail_commit_at: Option<usize>,
}

/// Strategy for generating a failure script valid for `len` resources.
pub fn failure_script_strategy(len: usize) -> impl Strategy<Value = FailureScript> {
    (
        proptest::option::of(0..len),
        proptest::option::of(0..len),
    )
        .prop_map(|(fail_begin_at, fail_commit_at)| FailureScript {
            fail_begin_at,
            fail_commit_at,
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    proptest! {
        #[test]
        fn identifiers_are_unique(ids in identifiers_strategy(8)) {
            let mut seen = HashSet::new();
            for id in &ids {
                prop_assert!(seen.insert(id.clone()));
            }
        }

        #[test]
        fn failure_indices_are_in_range(script in failure_script_strategy(5)) {
            if let Some(index) = script.fail_begin_at {
                prop_assert!(index < 5);
            }
            if let Some(index) = script.fail_commit_at {
                prop_assert!(index < 5);
            }
        }

        #[test]
        fn generated_options_are_writable(options in options_strategy()) {
            prop_assert!(!options.read_only);
        }
    }
}
