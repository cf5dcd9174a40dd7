//! Name constants shared by the operator
//!
//! Everything that derives a cluster object name or label from a
//! PersistenceAction lives here so the reconciler and the status evaluator
//! always agree on them.

/// Prefix of the CronJob created for each PersistenceAction
pub const CRON_JOB_PREFIX: &str = "persistence-";

/// Label stamped on the CronJob and its job template, valued with the action name
///
/// **Used by:** the status evaluator to find the Job runs of an action
pub const ACTION_LABEL: &str = "persistence";

/// Path segment of the status endpoint
pub const STATUS_RESOURCE: &str = "persistence-actions";

/// Container running the action statements
pub const RUNNER_CONTAINER: &str = "persistence-action";

/// Environment variable carrying the ordered action statements as JSON
pub const ACTIONS_ENV: &str = "PERSISTENCE_ACTIONS";

/// Environment variable carrying the instance label selector as JSON
pub const SELECTOR_ENV: &str = "PERSISTENCE_INSTANCE_SELECTOR";

/// Annotation holding a hash of the rendered CronJob, used to skip no-op updates
pub const TEMPLATE_HASH_ANNOTATION: &str = "persistence.mmerrill3.com/template-hash";

/// Name of the CronJob owned by the action `action_name`
pub fn cron_job_name(action_name: &str) -> String {
    format!("{}{}", CRON_JOB_PREFIX, action_name)
}

/// Label selector matching every Job run of the action `action_name`
pub fn action_selector(action_name: &str) -> String {
    format!("{}={}", ACTION_LABEL, action_name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derived_names() {
        assert_eq!(cron_job_name("vacuum"), "persistence-vacuum");
        assert_eq!(action_selector("vacuum"), "persistence=vacuum");
    }
}
