//! Sync handler: drives the CronJob of one PersistenceAction toward its spec

use kube::ResourceExt;
use persistence_models::PersistenceAction;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::informer::{split_namespaced_key, Store};
use crate::jobs::{template_hash, CronJobBuilder, CronJobStore};
use crate::names::{cron_job_name, TEMPLATE_HASH_ANNOTATION};

/// What a sync did to the cluster
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    Created,
    Updated,
    /// The CronJob already matched the spec
    Unchanged,
    /// `spec.applied` is set; nothing to do
    AlreadyApplied,
    /// The action is gone and its CronJob was deleted
    Deleted,
    /// The action is gone and so was its CronJob
    AlreadyGone,
}

pub struct Reconciler {
    store: Store<PersistenceAction>,
    cron_jobs: Arc<dyn CronJobStore>,
    builder: CronJobBuilder,
}

impl Reconciler {
    pub fn new(
        store: Store<PersistenceAction>,
        cron_jobs: Arc<dyn CronJobStore>,
        builder: CronJobBuilder,
    ) -> Self {
        Self {
            store,
            cron_jobs,
            builder,
        }
    }

    /// Reconcile the action behind `key` against the current cache.
    ///
    /// Only the key is trusted; the object is always re-read from the cache,
    /// so a sync after any number of missed events converges all the same.
    pub async fn sync(&self, key: &str) -> Result<SyncOutcome> {
        let action = match self.store.get_by_key(key)? {
            Some(action) => action,
            None => return self.delete(key).await,
        };

        if action.spec.applied {
            tracing::info!("PersistenceAction {} already applied, skipping", key);
            return Ok(SyncOutcome::AlreadyApplied);
        }

        self.create_or_update(key, &action).await
    }

    async fn delete(&self, key: &str) -> Result<SyncOutcome> {
        let (namespace, name) = split_namespaced_key(key)?;
        let cron_job = cron_job_name(name);

        let existed = self
            .cron_jobs
            .delete(namespace, &cron_job)
            .await
            .map_err(|e| Error::cron_job("deleting", &cron_job, e))?;

        if existed {
            tracing::info!("Deleted CronJob {}/{} of removed action {}", namespace, cron_job, key);
            Ok(SyncOutcome::Deleted)
        } else {
            tracing::debug!("CronJob {}/{} already gone", namespace, cron_job);
            Ok(SyncOutcome::AlreadyGone)
        }
    }

    async fn create_or_update(&self, key: &str, action: &PersistenceAction) -> Result<SyncOutcome> {
        let (namespace, _) = split_namespaced_key(key)?;
        let mut desired = self.builder.render(action)?;
        let name = desired.name_any();

        let existing = self
            .cron_jobs
            .get(namespace, &name)
            .await
            .map_err(|e| Error::cron_job("retrieving", &name, e))?;

        let existing = match existing {
            Some(existing) => existing,
            None => {
                self.cron_jobs
                    .create(namespace, &desired)
                    .await
                    .map_err(|e| Error::cron_job("creating", &name, e))?;
                tracing::info!("Created CronJob {}/{} for {}", namespace, name, key);
                return Ok(SyncOutcome::Created);
            }
        };

        // the live object is hashed too; a stale annotation alone proves nothing
        let desired_hash = template_hash(&desired)?;
        let recorded = existing.annotations().get(TEMPLATE_HASH_ANNOTATION);
        if recorded == Some(&desired_hash) && template_hash(&existing)? == desired_hash {
            tracing::debug!("CronJob {}/{} is up to date", namespace, name);
            return Ok(SyncOutcome::Unchanged);
        }

        desired.metadata.resource_version = existing.metadata.resource_version.clone();
        self.cron_jobs
            .replace(namespace, &desired)
            .await
            .map_err(|e| Error::cron_job("updating", &name, e))?;
        tracing::info!("Updated CronJob {}/{} for {}", namespace, name, key);
        Ok(SyncOutcome::Updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::api_error;
    use crate::jobs::testing::FakeCronJobs;
    use crate::jobs::CronJobSettings;
    use chrono::{TimeZone, Utc};
    use persistence_models::PersistenceActionSpec;
    use std::collections::BTreeMap;
    use std::sync::atomic::Ordering;

    fn action(namespace: &str, name: &str) -> PersistenceAction {
        let mut action = PersistenceAction::new(
            name,
            PersistenceActionSpec {
                application_time: Some(Utc.with_ymd_and_hms(2024, 6, 1, 2, 0, 0).unwrap()),
                actions: BTreeMap::from([("01".to_string(), "VACUUM".to_string())]),
                ..Default::default()
            },
        );
        action.metadata.namespace = Some(namespace.to_string());
        action
    }

    fn reconciler(store: &Store<PersistenceAction>, cron_jobs: &Arc<FakeCronJobs>) -> Reconciler {
        let cron_jobs: Arc<dyn CronJobStore> = cron_jobs.clone();
        Reconciler::new(
            store.clone(),
            cron_jobs,
            CronJobBuilder::new(CronJobSettings::default()).unwrap(),
        )
    }

    #[tokio::test]
    async fn test_repeated_sync_is_idempotent() {
        let store = Store::new();
        store.insert(action("db", "vacuum")).unwrap();
        let cron_jobs = Arc::new(FakeCronJobs::default());
        let reconciler = reconciler(&store, &cron_jobs);

        assert_eq!(reconciler.sync("db/vacuum").await.unwrap(), SyncOutcome::Created);
        for _ in 0..3 {
            assert_eq!(reconciler.sync("db/vacuum").await.unwrap(), SyncOutcome::Unchanged);
        }
        assert_eq!(cron_jobs.creates.load(Ordering::SeqCst), 1);
        assert_eq!(cron_jobs.replaces.load(Ordering::SeqCst), 0);
        assert!(cron_jobs.get_object("db", "persistence-vacuum").is_some());
    }

    #[tokio::test]
    async fn test_spec_change_updates_in_place() {
        let store = Store::new();
        store.insert(action("db", "vacuum")).unwrap();
        let cron_jobs = Arc::new(FakeCronJobs::default());
        let reconciler = reconciler(&store, &cron_jobs);
        reconciler.sync("db/vacuum").await.unwrap();
        let created_version = cron_jobs
            .get_object("db", "persistence-vacuum")
            .unwrap()
            .metadata
            .resource_version;

        let mut changed = action("db", "vacuum");
        changed.spec.application_time = Some(Utc.with_ymd_and_hms(2024, 6, 2, 3, 15, 0).unwrap());
        store.insert(changed).unwrap();

        assert_eq!(reconciler.sync("db/vacuum").await.unwrap(), SyncOutcome::Updated);
        let updated = cron_jobs.get_object("db", "persistence-vacuum").unwrap();
        assert_eq!(updated.spec.unwrap().schedule, "15 3 2 6 *");
        assert_ne!(updated.metadata.resource_version, created_version);
        assert_eq!(cron_jobs.creates.load(Ordering::SeqCst), 1);
        assert_eq!(reconciler.sync("db/vacuum").await.unwrap(), SyncOutcome::Unchanged);
    }

    #[tokio::test]
    async fn test_edited_cron_job_is_restored() {
        let store = Store::new();
        store.insert(action("db", "vacuum")).unwrap();
        let cron_jobs = Arc::new(FakeCronJobs::default());
        let reconciler = reconciler(&store, &cron_jobs);
        reconciler.sync("db/vacuum").await.unwrap();

        {
            let mut objects = cron_jobs.objects.lock().unwrap();
            let stored = objects
                .get_mut(&("db".to_string(), "persistence-vacuum".to_string()))
                .unwrap();
            let spec = stored.spec.as_mut().unwrap();
            spec.schedule = "* * * * *".to_string();
            spec.suspend = Some(true);
        }

        assert_eq!(reconciler.sync("db/vacuum").await.unwrap(), SyncOutcome::Updated);
        let restored = cron_jobs.get_object("db", "persistence-vacuum").unwrap();
        let spec = restored.spec.unwrap();
        assert_eq!(spec.schedule, "0 2 1 6 *");
        assert_ne!(spec.suspend, Some(true));
        assert_eq!(reconciler.sync("db/vacuum").await.unwrap(), SyncOutcome::Unchanged);
    }

    #[tokio::test]
    async fn test_deletion_removes_cron_job_exactly_once() {
        let store = Store::new();
        store.insert(action("db", "vacuum")).unwrap();
        let cron_jobs = Arc::new(FakeCronJobs::default());
        let reconciler = reconciler(&store, &cron_jobs);
        reconciler.sync("db/vacuum").await.unwrap();

        store.remove("db/vacuum");
        assert_eq!(reconciler.sync("db/vacuum").await.unwrap(), SyncOutcome::Deleted);
        assert_eq!(reconciler.sync("db/vacuum").await.unwrap(), SyncOutcome::AlreadyGone);
        assert_eq!(cron_jobs.deletes.load(Ordering::SeqCst), 1);
        assert!(cron_jobs.get_object("db", "persistence-vacuum").is_none());
    }

    #[tokio::test]
    async fn test_fresh_cache_converges_without_duplicates() {
        let cron_jobs = Arc::new(FakeCronJobs::default());
        {
            let store = Store::new();
            store.insert(action("db", "vacuum")).unwrap();
            reconciler(&store, &cron_jobs).sync("db/vacuum").await.unwrap();
        }

        // a restarted operator only knows what a fresh list tells it
        let store = Store::new();
        store.insert(action("db", "vacuum")).unwrap();
        store.insert(action("db", "analyze")).unwrap();
        let restarted = reconciler(&store, &cron_jobs);
        for key in store.keys() {
            restarted.sync(&key).await.unwrap();
        }
        assert_eq!(cron_jobs.creates.load(Ordering::SeqCst), 2);
        assert_eq!(cron_jobs.objects.lock().unwrap().len(), 2);

        // an action deleted while the operator was down
        let store = Store::new();
        store.insert(action("db", "analyze")).unwrap();
        let restarted = reconciler(&store, &cron_jobs);
        assert_eq!(restarted.sync("db/vacuum").await.unwrap(), SyncOutcome::Deleted);
        assert_eq!(restarted.sync("db/analyze").await.unwrap(), SyncOutcome::Unchanged);
    }

    #[tokio::test]
    async fn test_applied_action_is_left_alone() {
        let store = Store::new();
        let mut applied = action("db", "vacuum");
        applied.spec.applied = true;
        applied.spec.actions.clear();
        store.insert(applied).unwrap();
        let cron_jobs = Arc::new(FakeCronJobs::default());

        let outcome = reconciler(&store, &cron_jobs).sync("db/vacuum").await.unwrap();
        assert_eq!(outcome, SyncOutcome::AlreadyApplied);
        assert_eq!(cron_jobs.writes(), 0);
    }

    #[tokio::test]
    async fn test_errors_carry_context() {
        let store = Store::new();
        store.insert(action("db", "vacuum")).unwrap();
        let cron_jobs = Arc::new(FakeCronJobs::default());
        cron_jobs.fail_next(api_error(500, "InternalError"));

        let err = reconciler(&store, &cron_jobs).sync("db/vacuum").await.unwrap_err();
        assert!(matches!(err, Error::CronJob { operation: "retrieving", .. }), "{err}");

        let mut malformed = action("db", "broken");
        malformed.spec.application_time = None;
        store.insert(malformed).unwrap();
        let err = reconciler(&store, &cron_jobs).sync("db/broken").await.unwrap_err();
        assert!(matches!(err, Error::InvalidSpec { .. }), "{err}");

        let err = reconciler(&store, &cron_jobs).sync("not/a/key").await.unwrap_err();
        assert!(matches!(err, Error::InvalidKey(_)), "{err}");
        assert_eq!(cron_jobs.writes(), 0);
    }
}
