//! Status of a PersistenceAction, derived on read from its Job runs

use k8s_openapi::api::batch::v1::Job;
use kube::ResourceExt;
use persistence_models::{PersistenceAction, PersistenceActionStatus};

use crate::error::Result;
use crate::jobs::JobRunLister;

/// Evaluate the current status of `action`
///
/// An action marked `applied` in its spec is reported as applied without
/// looking at the cluster. Otherwise the Job runs labelled with the action
/// name are folded by [`fold_job_runs`].
pub async fn compute_status(
    lister: &dyn JobRunLister,
    action: &PersistenceAction,
) -> Result<PersistenceActionStatus> {
    if action.spec.applied {
        return Ok(PersistenceActionStatus::already_applied());
    }

    let namespace = action.namespace().unwrap_or_default();
    let runs = lister.list_runs(&namespace, &action.name_any()).await?;
    Ok(fold_job_runs(&runs))
}

/// Latest start and completion time across `runs`; applied once any run
/// has succeeded
pub fn fold_job_runs(runs: &[Job]) -> PersistenceActionStatus {
    let mut status = PersistenceActionStatus::default();
    for job in runs.iter().filter_map(|job| job.status.as_ref()) {
        if let Some(start) = &job.start_time {
            status.execution_time = status.execution_time.max(Some(start.0));
        }
        if let Some(completion) = &job.completion_time {
            status.completion_time = status.completion_time.max(Some(completion.0));
        }
        if job.succeeded.unwrap_or(0) > 0 {
            status.applied = true;
        }
    }
    status
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::testing::FakeJobRuns;
    use chrono::{DateTime, TimeZone, Utc};
    use k8s_openapi::api::batch::v1::JobStatus;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
    use persistence_models::PersistenceActionSpec;
    use std::sync::atomic::Ordering;

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, hour, 0, 0).unwrap()
    }

    fn job(start: Option<u32>, completion: Option<u32>, succeeded: i32) -> Job {
        Job {
            status: Some(JobStatus {
                start_time: start.map(|h| Time(at(h))),
                completion_time: completion.map(|h| Time(at(h))),
                succeeded: Some(succeeded),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn action(applied: bool) -> PersistenceAction {
        let mut action = PersistenceAction::new(
            "vacuum",
            PersistenceActionSpec {
                applied,
                ..Default::default()
            },
        );
        action.metadata.namespace = Some("db".to_string());
        action
    }

    #[test]
    fn test_fold_takes_latest_times() {
        let status = fold_job_runs(&[
            job(Some(1), Some(2), 0),
            job(Some(3), Some(4), 1),
        ]);
        assert_eq!(status.execution_time, Some(at(3)));
        assert_eq!(status.completion_time, Some(at(4)));
        assert!(status.applied);
    }

    #[test]
    fn test_fold_running_job() {
        let status = fold_job_runs(&[job(Some(5), None, 0)]);
        assert_eq!(status.execution_time, Some(at(5)));
        assert_eq!(status.completion_time, None);
        assert!(!status.applied);
    }

    #[test]
    fn test_fold_is_order_independent() {
        let runs = vec![job(Some(3), Some(4), 1), job(Some(1), Some(2), 0), job(None, None, 0)];
        let mut reversed = runs.clone();
        reversed.reverse();
        assert_eq!(fold_job_runs(&runs), fold_job_runs(&reversed));
        assert_eq!(fold_job_runs(&runs), fold_job_runs(&runs));
    }

    #[test]
    fn test_fold_no_runs() {
        assert_eq!(fold_job_runs(&[]), PersistenceActionStatus::default());
    }

    #[tokio::test]
    async fn test_applied_spec_skips_listing() {
        let lister = FakeJobRuns::default();
        let status = compute_status(&lister, &action(true)).await.unwrap();
        assert!(status.applied);
        assert_eq!(status.execution_time, None);
        assert_eq!(lister.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_lists_runs_of_the_action() {
        let lister = FakeJobRuns::with_runs("db", "vacuum", vec![job(Some(1), Some(2), 1)]);
        let status = compute_status(&lister, &action(false)).await.unwrap();
        assert!(status.applied);
        assert_eq!(status.completion_time, Some(at(2)));
        assert_eq!(lister.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_list_failure_is_reported() {
        let lister = FakeJobRuns::default();
        *lister.fail.lock().unwrap() = true;
        assert!(compute_status(&lister, &action(false)).await.is_err());
    }
}
