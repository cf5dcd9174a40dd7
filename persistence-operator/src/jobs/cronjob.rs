//! Desired CronJob for a PersistenceAction

use chrono::{DateTime, Datelike, Timelike, Utc};
use k8s_openapi::api::batch::v1::CronJob;
use k8s_openapi::api::core::v1::{EnvVar, PodSpec};
use kube::ResourceExt;
use persistence_models::PersistenceAction;
use serde::Serialize;
use serde_json::json;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use tera::{Context as TeraContext, Tera};

use crate::error::{Error, Result};
use crate::names::{
    cron_job_name, ACTIONS_ENV, ACTION_LABEL, RUNNER_CONTAINER, SELECTOR_ENV,
    TEMPLATE_HASH_ANNOTATION,
};

const TEMPLATE_NAME: &str = "cronjob";

/// Image used for the runner container unless configured otherwise
pub const DEFAULT_JOB_IMAGE: &str = "persistence-runner:latest";

/// Cluster-wide knobs of the generated CronJobs
#[derive(Debug, Clone, PartialEq)]
pub struct CronJobSettings {
    pub image: String,
    pub successful_jobs_history_limit: i32,
    pub failed_jobs_history_limit: i32,
    /// Retries of a failed run; statements are not assumed to be idempotent
    pub backoff_limit: i32,
}

impl Default for CronJobSettings {
    fn default() -> Self {
        Self {
            image: DEFAULT_JOB_IMAGE.to_string(),
            successful_jobs_history_limit: 3,
            failed_jobs_history_limit: 1,
            backoff_limit: 0,
        }
    }
}

/// One action statement as handed to the runner container
#[derive(Debug, Serialize)]
struct ActionStep<'a> {
    name: &'a str,
    statement: &'a str,
}

/// Renders the CronJob a PersistenceAction should own
pub struct CronJobBuilder {
    tera: Tera,
    settings: CronJobSettings,
}

impl CronJobBuilder {
    pub fn new(settings: CronJobSettings) -> Result<Self> {
        let mut tera = Tera::default();
        tera.add_raw_template(
            TEMPLATE_NAME,
            include_str!("../templates/persistence-cronjob.yaml"),
        )?;
        Ok(Self { tera, settings })
    }

    pub fn settings(&self) -> &CronJobSettings {
        &self.settings
    }

    /// Build the desired CronJob for `action`
    ///
    /// Fails with [`Error::InvalidSpec`] when the action has no
    /// `applicationTime` or no statements to run.
    pub fn render(&self, action: &PersistenceAction) -> Result<CronJob> {
        let name = action.name_any();
        let namespace = action.namespace().unwrap_or_default();
        let invalid = |reason: &str| Error::InvalidSpec {
            key: format!("{}/{}", namespace, name),
            reason: reason.to_string(),
        };

        let application_time = action
            .spec
            .application_time
            .ok_or_else(|| invalid("applicationTime is not set"))?;
        if action.spec.actions.is_empty() {
            return Err(invalid("actions is empty"));
        }

        let mut context = TeraContext::new();
        context.insert("name", &cron_job_name(&name));
        context.insert("namespace", &namespace);
        context.insert("action", &name);
        context.insert("schedule", &schedule_for(&application_time));
        context.insert("image", &self.settings.image);
        context.insert(
            "successful_jobs_history_limit",
            &self.settings.successful_jobs_history_limit,
        );
        context.insert(
            "failed_jobs_history_limit",
            &self.settings.failed_jobs_history_limit,
        );
        context.insert("backoff_limit", &self.settings.backoff_limit);

        let yaml = self.tera.render(TEMPLATE_NAME, &context)?;
        let mut cron_job: CronJob = serde_yaml::from_str(&yaml)?;

        let mut labels = action.labels().clone();
        labels.insert(ACTION_LABEL.to_string(), name.clone());
        cron_job.metadata.labels = Some(labels);
        cron_job.metadata.annotations = Some(action.annotations().clone());

        let env = runner_env(action)?;
        let pod = pod_spec(&mut cron_job)?;
        pod.node_selector = action.spec.node_selector.clone();
        pod.tolerations = action.spec.tolerations.clone();
        pod.service_account_name = action.spec.service_account_name.clone();
        let runner = pod
            .containers
            .iter_mut()
            .find(|container| container.name == RUNNER_CONTAINER)
            .ok_or_else(|| tera::Error::msg("cron job template has no runner container"))?;
        runner.resources = action.spec.resources.clone();
        runner.env = Some(env);

        let hash = template_hash(&cron_job)?;
        cron_job
            .annotations_mut()
            .insert(TEMPLATE_HASH_ANNOTATION.to_string(), hash);

        Ok(cron_job)
    }
}

/// Cron expression firing at `time` (UTC), `"M H D Mon *"`.
///
/// It matches the same date every year; `spec.applied` is what retires it.
pub fn schedule_for(time: &DateTime<Utc>) -> String {
    format!(
        "{} {} {} {} *",
        time.minute(),
        time.hour(),
        time.day(),
        time.month()
    )
}

/// Hash of the fields the builder writes, recorded on the CronJob.
///
/// Fields the API server fills in on its own (defaults, status, managed
/// metadata) are left out, so the hash of a live object matches the hash of
/// the rendered one until somebody edits what the operator owns.
pub fn template_hash(cron_job: &CronJob) -> Result<String> {
    let encoded = serde_json::to_string(&owned_fields(cron_job)).map_err(|source| Error::Encode {
        what: "cron job",
        source,
    })?;
    let mut hasher = DefaultHasher::new();
    encoded.hash(&mut hasher);
    Ok(format!("{:016x}", hasher.finish()))
}

fn owned_fields(cron_job: &CronJob) -> serde_json::Value {
    let mut annotations = cron_job.metadata.annotations.clone().unwrap_or_default();
    annotations.remove(TEMPLATE_HASH_ANNOTATION);

    let spec = cron_job.spec.as_ref();
    let job_template = spec.map(|spec| &spec.job_template);
    let job = job_template.and_then(|template| template.spec.as_ref());
    let pod_template = job.map(|job| &job.template);
    let pod = pod_template.and_then(|template| template.spec.as_ref());
    let containers: Vec<serde_json::Value> = pod
        .map(|pod| {
            pod.containers
                .iter()
                .map(|container| {
                    json!({
                        "name": container.name,
                        "image": container.image,
                        "imagePullPolicy": container.image_pull_policy,
                        "resources": container.resources,
                        "env": container.env,
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    json!({
        "labels": cron_job.metadata.labels,
        "annotations": annotations,
        "schedule": spec.map(|spec| &spec.schedule),
        "timeZone": spec.and_then(|spec| spec.time_zone.as_ref()),
        "concurrencyPolicy": spec.and_then(|spec| spec.concurrency_policy.as_ref()),
        "suspend": spec.and_then(|spec| spec.suspend).unwrap_or(false),
        "successfulJobsHistoryLimit": spec.and_then(|spec| spec.successful_jobs_history_limit),
        "failedJobsHistoryLimit": spec.and_then(|spec| spec.failed_jobs_history_limit),
        "jobLabels": job_template.and_then(|template| template.metadata.as_ref()).and_then(|meta| meta.labels.as_ref()),
        "backoffLimit": job.and_then(|job| job.backoff_limit),
        "podLabels": pod_template.and_then(|template| template.metadata.as_ref()).and_then(|meta| meta.labels.as_ref()),
        "restartPolicy": pod.and_then(|pod| pod.restart_policy.as_ref()),
        "nodeSelector": pod.and_then(|pod| pod.node_selector.as_ref()),
        "tolerations": pod.and_then(|pod| pod.tolerations.as_ref()),
        "serviceAccountName": pod.and_then(|pod| pod.service_account_name.as_ref()),
        "containers": containers,
    })
}

fn runner_env(action: &PersistenceAction) -> Result<Vec<EnvVar>> {
    let steps: Vec<ActionStep<'_>> = action
        .spec
        .actions
        .iter()
        .map(|(name, statement)| ActionStep { name, statement })
        .collect();
    let mut env = vec![EnvVar {
        name: ACTIONS_ENV.to_string(),
        value: Some(serde_json::to_string(&steps).map_err(|source| Error::Encode {
            what: "actions",
            source,
        })?),
        value_from: None,
    }];

    if let Some(selector) = &action.spec.persistence_instance_selector {
        env.push(EnvVar {
            name: SELECTOR_ENV.to_string(),
            value: Some(serde_json::to_string(selector).map_err(|source| Error::Encode {
                what: "instance selector",
                source,
            })?),
            value_from: None,
        });
    }
    Ok(env)
}

fn pod_spec(cron_job: &mut CronJob) -> Result<&mut PodSpec> {
    cron_job
        .spec
        .as_mut()
        .and_then(|spec| spec.job_template.spec.as_mut())
        .and_then(|job| job.template.spec.as_mut())
        .ok_or_else(|| tera::Error::msg("cron job template has no pod spec").into())
}
