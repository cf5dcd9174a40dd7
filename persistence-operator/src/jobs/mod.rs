//! Adapter over the cluster's scheduled job subsystem
//!
//! The reconciler only writes CronJobs through [`CronJobStore`] and the
//! status evaluator only reads Job runs through [`JobRunLister`], so both can
//! be exercised without a cluster.

pub mod cronjob;

pub use cronjob::{template_hash, CronJobBuilder, CronJobSettings, DEFAULT_JOB_IMAGE};

use k8s_openapi::api::batch::v1::{CronJob, Job};
use kube::api::{Api, DeleteParams, ListParams, PostParams};
use kube::{Client, ResourceExt};

use crate::error::Result;
use crate::names::action_selector;

/// Namespaced CronJob access
#[async_trait::async_trait]
pub trait CronJobStore: Send + Sync {
    /// `None` when the CronJob does not exist
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<CronJob>>;

    async fn create(&self, namespace: &str, cron_job: &CronJob) -> Result<CronJob>;

    /// Replace in place; `cron_job` must carry the current `resourceVersion`
    async fn replace(&self, namespace: &str, cron_job: &CronJob) -> Result<CronJob>;

    /// Delete by name, returning whether it existed
    async fn delete(&self, namespace: &str, name: &str) -> Result<bool>;
}

/// Lists the Job runs spawned for an action
#[async_trait::async_trait]
pub trait JobRunLister: Send + Sync {
    async fn list_runs(&self, namespace: &str, action_name: &str) -> Result<Vec<Job>>;
}

/// [`CronJobStore`] and [`JobRunLister`] backed by the API server
#[derive(Clone)]
pub struct KubeJobs {
    client: Client,
}

impl KubeJobs {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn cron_jobs(&self, namespace: &str) -> Api<CronJob> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait::async_trait]
impl CronJobStore for KubeJobs {
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<CronJob>> {
        match self.cron_jobs(namespace).get(name).await {
            Ok(cron_job) => Ok(Some(cron_job)),
            Err(kube::Error::Api(response)) if response.code == 404 => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn create(&self, namespace: &str, cron_job: &CronJob) -> Result<CronJob> {
        Ok(self
            .cron_jobs(namespace)
            .create(&PostParams::default(), cron_job)
            .await?)
    }

    async fn replace(&self, namespace: &str, cron_job: &CronJob) -> Result<CronJob> {
        Ok(self
            .cron_jobs(namespace)
            .replace(&cron_job.name_any(), &PostParams::default(), cron_job)
            .await?)
    }

    async fn delete(&self, namespace: &str, name: &str) -> Result<bool> {
        // Background propagation also removes the Jobs and Pods it spawned
        match self
            .cron_jobs(namespace)
            .delete(name, &DeleteParams::background())
            .await
        {
            Ok(_) => Ok(true),
            Err(kube::Error::Api(response)) if response.code == 404 => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait::async_trait]
impl JobRunLister for KubeJobs {
    async fn list_runs(&self, namespace: &str, action_name: &str) -> Result<Vec<Job>> {
        let jobs: Api<Job> = Api::namespaced(self.client.clone(), namespace);
        let params = ListParams::default().labels(&action_selector(action_name));
        Ok(jobs.list(&params).await?.items)
    }
}
