use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::{ResourceRequirements, Toleration};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// API group shared by both custom resource kinds
pub const GROUP: &str = "persistence.mmerrill3.com";

/// API version shared by both custom resource kinds
pub const VERSION: &str = "v1alpha1";

/// The kind of database a PersistenceInstance points at
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, JsonSchema)]
pub enum PersistenceKind {
    Oracle,
    Postgres,
    #[serde(rename = "MySQL")]
    MySql,
    Mongo,
}

impl PersistenceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PersistenceKind::Oracle => "Oracle",
            PersistenceKind::Postgres => "Postgres",
            PersistenceKind::MySql => "MySQL",
            PersistenceKind::Mongo => "Mongo",
        }
    }
}

impl fmt::Display for PersistenceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// A database endpoint that PersistenceActions can target by label
#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, PartialEq, JsonSchema)]
#[kube(
    group = "persistence.mmerrill3.com",
    version = "v1alpha1",
    kind = "PersistenceInstance",
    plural = "persistenceinstances",
    shortname = "pi",
    namespaced,
    derive = "PartialEq",
    printcolumn = r#"{"name":"Type", "type":"string", "jsonPath":".spec.persistenceType"}"#,
    printcolumn = r#"{"name":"URL", "type":"string", "jsonPath":".spec.url"}"#,
    printcolumn = r#"{"name":"Port", "type":"integer", "jsonPath":".spec.port"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct PersistenceInstanceSpec {
    /// One of Oracle, Postgres, MySQL, Mongo
    pub persistence_type: PersistenceKind,
    /// Name of the secret holding the username, in the instance's namespace
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username_secret: Option<String>,
    /// Name of the secret holding the password, in the instance's namespace
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password_secret: Option<String>,
    /// Host of the database
    pub url: String,
    pub port: i32,
}

/// A scheduled administrative action against one or more PersistenceInstances
#[derive(CustomResource, Debug, Clone, Default, Serialize, Deserialize, PartialEq, JsonSchema)]
#[kube(
    group = "persistence.mmerrill3.com",
    version = "v1alpha1",
    kind = "PersistenceAction",
    plural = "persistenceactions",
    shortname = "pa",
    namespaced,
    status = "PersistenceActionStatus",
    derive = "PartialEq",
    printcolumn = r#"{"name":"Applied", "type":"boolean", "jsonPath":".spec.applied"}"#,
    printcolumn = r#"{"name":"Application Time", "type":"date", "jsonPath":".spec.applicationTime"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct PersistenceActionSpec {
    /// Selects the PersistenceInstances the actions run against
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persistence_instance_selector: Option<LabelSelector>,
    /// Marks the action as handled; reconciliation becomes a no-op
    #[serde(default)]
    pub applied: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceRequirements>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_selector: Option<BTreeMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_account_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tolerations: Option<Vec<Toleration>>,
    /// When the action is run
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub application_time: Option<DateTime<Utc>>,
    /// Statements to run, executed in ascending key order
    #[serde(default)]
    pub actions: BTreeMap<String, String>,
}

/// Observed state of a PersistenceAction.
///
/// Never written back to the cluster; it is recomputed from the action's job
/// runs every time it is read.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PersistenceActionStatus {
    /// Whether the action has been performed
    #[serde(default)]
    pub applied: bool,
    /// When execution of the action started
    #[serde(default)]
    pub execution_time: Option<DateTime<Utc>>,
    /// When the action completed
    #[serde(default)]
    pub completion_time: Option<DateTime<Utc>>,
}

impl PersistenceActionStatus {
    /// Status of an action whose spec already says it was applied
    pub fn already_applied() -> Self {
        Self {
            applied: true,
            ..Default::default()
        }
    }
}
