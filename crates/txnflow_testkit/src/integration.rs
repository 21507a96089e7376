//! End-to-end scenarios across manager, units of work, and resources.
//!
//! Provides a small harness wiring a manager to scripted resources
//! sharing one call log, so tests can assert cross-resource call
//! ordering for the whole commit/rollback protocol.

use crate::fixtures::{CallLog, ScriptedResource};
use std::sync::Arc;
use txnflow_core::{CancelToken, LifecycleHook, UnitOfWorkManager};

/// A test harness for integration scenarios.
pub struct Scenario {
    /// The manager owning the scenario's scope.
    pub manager: UnitOfWorkManager,
    /// Call log shared by every resource created through the harness.
    pub log: Arc<CallLog>,
    /// Cancellation token passed to every call.
    pub ct: CancelToken,
}

impl Scenario {
    /// Creates a scenario with no lifecycle hooks.
    #[must_use]
    pub fn new() -> Self {
        Self {
            manager: UnitOfWorkManager::new(),
            log: CallLog::new(),
            ct: CancelToken::new(),
        }
    }

    /// Creates a scenario with the given lifecycle hooks.
    #[must_use]
    pub fn with_hooks(hooks: Vec<Arc<dyn LifecycleHook>>) -> Self {
        Self {
            manager: UnitOfWorkManager::with_hooks(hooks),
            log: CallLog::new(),
            ct: CancelToken::new(),
        }
    }

    /// Creates a scripted resource recording into the scenario's log.
    #[must_use]
    pub fn resource(&self, identifier: &str) -> Arc<ScriptedResource> {
        ScriptedResource::new(identifier, Arc::clone(&self.log))
    }
}

impl Default for Scenario {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{CallKind, RecordingHook};
    use crate::generators::{failure_script_strategy, identifiers_strategy, options_strategy};
    use async_trait::async_trait;
    use proptest::prelude::*;
    use std::future::Future;
    use std::time::Duration;
    use txnflow_core::{
        BoxError, PersistenceStrategy, TransactionalResource, UnitOfWork, UnitOfWorkOptions,
        UowError, WorkPhase, WorkState,
    };

    fn run<F: Future>(future: F) -> F::Output {
        tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .expect("failed to build runtime")
            .block_on(future)
    }

    #[tokio::test]
    async fn commits_every_resource_once_in_registration_order() {
        let scenario = Scenario::new();
        let ids = ["db-a", "db-b", "db-c"];
        let work = scenario
            .manager
            .begin(UnitOfWorkOptions::default(), &scenario.ct)
            .await
            .unwrap();

        for id in ids {
            work.register_db_context(scenario.resource(id), &scenario.ct)
                .await
                .unwrap();
        }
        work.commit(&scenario.ct).await.unwrap();
        work.dispose().unwrap();

        assert_eq!(work.state(), WorkState::Disposed);
        assert_eq!(scenario.log.sequence(CallKind::Commit), ids);
        for id in ids {
            assert_eq!(scenario.log.count(id, CallKind::Commit), 1);
            assert_eq!(scenario.log.count(id, CallKind::Dispose), 1);
        }
    }

    #[tokio::test]
    async fn commit_failure_halts_later_resources() {
        let scenario = Scenario::new();
        let work = scenario
            .manager
            .begin(UnitOfWorkOptions::default(), &scenario.ct)
            .await
            .unwrap();

        let a = scenario.resource("db-a");
        let b = scenario.resource("db-b");
        let c = scenario.resource("db-c");
        b.set_fail_commit("duplicate key");
        for resource in [a, b, c] {
            work.register_db_context(resource, &scenario.ct).await.unwrap();
        }

        let error = work.commit(&scenario.ct).await.unwrap_err();
        let aggregate = error.as_aggregate().unwrap();
        assert_eq!(aggregate.phase, WorkPhase::Commit);
        assert!(aggregate.contains("db-b"));

        assert_eq!(scenario.log.count("db-a", CallKind::Commit), 1);
        assert_eq!(scenario.log.count("db-b", CallKind::Commit), 1);
        assert_eq!(scenario.log.count("db-c", CallKind::Commit), 0);
    }

    #[tokio::test]
    async fn rollback_after_partial_commit_sweeps_errored_resource_first() {
        let scenario = Scenario::new();
        let work = scenario
            .manager
            .begin(UnitOfWorkOptions::default(), &scenario.ct)
            .await
            .unwrap();

        let a = scenario.resource("db-a");
        let b = scenario.resource("db-b");
        b.set_fail_commit("serialization failure");
        work.register_db_context(a, &scenario.ct).await.unwrap();
        work.register_db_context(b, &scenario.ct).await.unwrap();

        assert!(work.commit(&scenario.ct).await.is_err());
        work.rollback(&scenario.ct).await.unwrap();

        // The errored resource is rolled back before its sibling.
        assert_eq!(scenario.log.sequence(CallKind::Rollback), vec!["db-b", "db-a"]);
        assert_eq!(work.state(), WorkState::RolledBack);
    }

    #[tokio::test]
    async fn nested_join_defers_commit_to_outermost() {
        let scenario = Scenario::new();
        let outer = scenario
            .manager
            .begin(UnitOfWorkOptions::default(), &scenario.ct)
            .await
            .unwrap();
        let inner = scenario
            .manager
            .begin(UnitOfWorkOptions::default(), &scenario.ct)
            .await
            .unwrap();

        inner
            .register_db_context(scenario.resource("db-a"), &scenario.ct)
            .await
            .unwrap();
        inner.commit(&scenario.ct).await.unwrap();
        assert!(scenario.log.sequence(CallKind::Commit).is_empty());

        inner.dispose().unwrap();
        outer.commit(&scenario.ct).await.unwrap();
        assert_eq!(scenario.log.sequence(CallKind::Commit), vec!["db-a"]);
        outer.dispose().unwrap();
    }

    #[tokio::test]
    async fn read_only_unit_records_no_resource_calls() {
        let scenario = Scenario::new();
        let work = scenario
            .manager
            .begin(UnitOfWorkOptions::read_only(), &scenario.ct)
            .await
            .unwrap();

        work.register_db_context(scenario.resource("db-a"), &scenario.ct)
            .await
            .unwrap();
        work.mark_as_completed().unwrap();
        work.dispose().unwrap();

        assert_eq!(work.state(), WorkState::Disposed);
        assert!(scenario.log.events().is_empty());
    }

    #[tokio::test]
    async fn begin_failure_leaves_no_open_transactions() {
        let scenario = Scenario::new();
        let options = UnitOfWorkOptions::new().with_auto_begin(false);
        let work = scenario.manager.begin(options, &scenario.ct).await.unwrap();

        let a = scenario.resource("db-a");
        let b = scenario.resource("db-b");
        let c = scenario.resource("db-c");
        c.set_fail_begin("too many connections");
        for resource in [a.clone(), b.clone(), c] {
            work.register_db_context(resource, &scenario.ct).await.unwrap();
        }

        let error = work.begin_transaction(&scenario.ct).await.unwrap_err();
        assert_eq!(error.as_aggregate().unwrap().phase, WorkPhase::Begin);
        assert!(!a.has_active_transaction());
        assert!(!b.has_active_transaction());
        assert!(!work.has_active_transactions());
    }

    /// A hook that registers a resource as part of initialization.
    struct SeedingHook {
        resource: Arc<ScriptedResource>,
    }

    #[async_trait]
    impl LifecycleHook for SeedingHook {
        async fn on_created(
            &self,
            work: &UnitOfWork,
            _options: &UnitOfWorkOptions,
            ct: &CancelToken,
        ) -> Result<(), BoxError> {
            let resource: Arc<dyn TransactionalResource> = self.resource.clone();
            work.register_db_context(resource, ct)
                .await
                .map_err(|error| Box::new(error) as BoxError)
        }
    }

    #[tokio::test]
    async fn hook_can_seed_resources_during_initialization() {
        let log = CallLog::new();
        let seeded = ScriptedResource::new("db-seed", log.clone());
        let manager = UnitOfWorkManager::with_hooks(vec![Arc::new(SeedingHook {
            resource: seeded.clone(),
        })]);
        let ct = CancelToken::new();

        let work = manager
            .begin_new(UnitOfWorkOptions::default(), &ct)
            .await
            .unwrap();
        assert_eq!(work.resource_count(), 1);
        work.commit(&ct).await.unwrap();
        assert_eq!(log.count("db-seed", CallKind::Commit), 1);
        work.dispose().unwrap();
    }

    #[tokio::test]
    async fn failing_completed_hook_does_not_fail_commit() {
        let hook = RecordingHook::new();
        hook.set_fail_completed("observer offline");
        let scenario = Scenario::with_hooks(vec![hook.clone()]);

        let work = scenario
            .manager
            .begin(UnitOfWorkOptions::default(), &scenario.ct)
            .await
            .unwrap();
        work.register_db_context(scenario.resource("db-a"), &scenario.ct)
            .await
            .unwrap();

        work.commit(&scenario.ct).await.unwrap();
        assert_eq!(hook.completed_count(), 1);
        assert_eq!(work.state(), WorkState::Committed);
        work.dispose().unwrap();
    }

    #[tokio::test]
    async fn slow_commit_times_out_into_commit_aggregate() {
        let scenario = Scenario::new();
        let options = UnitOfWorkOptions::new().with_timeout(Duration::from_millis(10));
        let work = scenario.manager.begin(options, &scenario.ct).await.unwrap();

        let slow = scenario.resource("db-slow");
        slow.set_commit_delay(Duration::from_secs(60));
        work.register_db_context(slow, &scenario.ct).await.unwrap();

        let error = work.commit(&scenario.ct).await.unwrap_err();
        let aggregate = error.as_aggregate().unwrap();
        assert_eq!(aggregate.phase, WorkPhase::Commit);
        assert!(aggregate.contains("db-slow"));
        assert!(aggregate.failures[0].error.to_string().contains("timed out"));
    }

    #[tokio::test]
    async fn outer_dispose_with_active_inner_is_ordering_error() {
        let scenario = Scenario::new();
        let outer = scenario
            .manager
            .begin_new(UnitOfWorkOptions::default(), &scenario.ct)
            .await
            .unwrap();
        let inner = scenario
            .manager
            .begin_new(UnitOfWorkOptions::default(), &scenario.ct)
            .await
            .unwrap();

        assert_ne!(outer.id(), inner.id());
        assert!(matches!(
            outer.dispose(),
            Err(UowError::OutOfOrderDispose { .. })
        ));
        inner.dispose().unwrap();
        outer.dispose().unwrap();
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn every_resource_completes_exactly_once_in_order(
            ids in identifiers_strategy(6),
            options in options_strategy(),
        ) {
            run(async {
                let scenario = Scenario::new();
                let strategy = options.persistence_strategy;
                let work = scenario.manager.begin(options, &scenario.ct).await.unwrap();

                for id in &ids {
                    work.register_db_context(scenario.resource(id), &scenario.ct)
                        .await
                        .unwrap();
                }
                work.begin_transaction(&scenario.ct).await.unwrap();
                work.commit(&scenario.ct).await.unwrap();

                let kind = match strategy {
                    PersistenceStrategy::TransactionManaged => CallKind::Commit,
                    PersistenceStrategy::OptimizeForSingleWrite => CallKind::Save,
                };
                prop_assert_eq!(&scenario.log.sequence(kind), &ids);
                if strategy == PersistenceStrategy::TransactionManaged {
                    prop_assert_eq!(&scenario.log.sequence(CallKind::Begin), &ids);
                    for id in &ids {
                        prop_assert_eq!(scenario.log.count(id, CallKind::Begin), 1);
                    }
                }
                work.dispose().unwrap();
                Ok(())
            })?;
        }

        #[test]
        fn commit_failure_isolates_later_resources(
            ids in identifiers_strategy(6),
            script in failure_script_strategy(6),
        ) {
            run(async {
                let Some(fail_at) = script.fail_commit_at.filter(|index| *index < ids.len())
                else {
                    return Ok(());
                };

                let scenario = Scenario::new();
                let work = scenario
                    .manager
                    .begin(UnitOfWorkOptions::default(), &scenario.ct)
                    .await
                    .unwrap();

                for (index, id) in ids.iter().enumerate() {
                    let resource = scenario.resource(id);
                    if index == fail_at {
                        resource.set_fail_commit("injected commit failure");
                    }
                    work.register_db_context(resource, &scenario.ct).await.unwrap();
                }

                let error = work.commit(&scenario.ct).await.unwrap_err();
                prop_assert!(error.as_aggregate().unwrap().contains(&ids[fail_at]));

                for (index, id) in ids.iter().enumerate() {
                    let expected = usize::from(index <= fail_at);
                    prop_assert_eq!(scenario.log.count(id, CallKind::Commit), expected);
                }
                Ok(())
            })?;
        }
    }
}
