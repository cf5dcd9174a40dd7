//! Error type for the operator library

use std::time::Duration;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    #[error("invalid resource key {0:?}, expected <namespace>/<name>")]
    InvalidKey(String),

    #[error("invalid spec for PersistenceAction {key}: {reason}")]
    InvalidSpec { key: String, reason: String },

    #[error("failed to render cron job template: {0}")]
    Template(#[from] tera::Error),

    #[error("failed to decode rendered cron job: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("failed to encode {what}: {source}")]
    Encode {
        what: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("{operation} cron job {name} failed")]
    CronJob {
        operation: &'static str,
        name: String,
        #[source]
        source: Box<Error>,
    },

    #[error("registering resource kind {kind} failed")]
    Registration {
        kind: String,
        #[source]
        source: Box<Error>,
    },

    #[error("failed to build request: {0}")]
    Http(#[from] http::Error),

    #[error("invalid status code {code} while probing {path}")]
    ProbeStatus { path: String, code: u16 },

    #[error("resource kind {kind} not ready after {timeout:?}")]
    NotReady { kind: String, timeout: Duration },

    #[error("invalid API server address {address:?}: {reason}")]
    InvalidApiServer { address: String, reason: String },

    #[error("operation cancelled")]
    Cancelled,
}

impl Error {
    /// Whether this error is a `404 Not Found` from the API server
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::Kube(kube::Error::Api(response)) if response.code == 404)
    }

    /// Whether this error is a `409 AlreadyExists` from the API server
    pub fn is_already_exists(&self) -> bool {
        matches!(
            self,
            Error::Kube(kube::Error::Api(response))
                if response.code == 409 && response.reason == "AlreadyExists"
        )
    }

    pub(crate) fn cron_job(operation: &'static str, name: &str, source: Error) -> Self {
        Error::CronJob {
            operation,
            name: name.to_string(),
            source: Box::new(source),
        }
    }
}

#[cfg(test)]
pub(crate) fn api_error(code: u16, reason: &str) -> Error {
    Error::Kube(kube::Error::Api(kube::core::ErrorResponse {
        status: "Failure".to_string(),
        message: format!("{} ({})", reason, code),
        reason: reason.to_string(),
        code,
    }))
}
