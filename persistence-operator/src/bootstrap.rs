//! Registration of the custom resource kinds before the operator starts

use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::api::{Api, PostParams};
use kube::{Client, CustomResourceExt, ResourceExt};
use persistence_models::{PersistenceAction, PersistenceInstance};
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};

/// A custom resource kind the operator depends on
#[derive(Debug, Clone)]
pub struct ResourceKind {
    pub group: String,
    pub version: String,
    pub plural: String,
    pub definition: CustomResourceDefinition,
}

impl ResourceKind {
    /// Kind described by the derive of `K`
    pub fn of<K: CustomResourceExt>() -> Self {
        let resource = K::api_resource();
        Self {
            group: resource.group,
            version: resource.version,
            plural: resource.plural,
            definition: K::crd(),
        }
    }

    /// `<plural>.<group>`
    pub fn name(&self) -> String {
        self.definition.name_any()
    }

    /// Collection path that answers once the kind is being served
    pub fn probe_path(&self) -> String {
        format!("/apis/{}/{}/{}", self.group, self.version, self.plural)
    }
}

/// Every kind served by this operator
pub fn persistence_kinds() -> Vec<ResourceKind> {
    vec![
        ResourceKind::of::<PersistenceInstance>(),
        ResourceKind::of::<PersistenceAction>(),
    ]
}

/// Poll schedule while waiting for registered kinds to be served
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BootstrapWait {
    pub interval: Duration,
    pub timeout: Duration,
}

impl Default for BootstrapWait {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(3),
            timeout: Duration::from_secs(30),
        }
    }
}

/// Where resource kinds get registered
#[async_trait::async_trait]
pub trait KindRegistry: Send + Sync {
    async fn exists(&self, kind: &ResourceKind) -> Result<bool>;

    async fn create(&self, kind: &ResourceKind) -> Result<()>;

    /// Raw GET of `path`, returning the HTTP status code
    async fn probe(&self, path: &str) -> Result<u16>;
}

/// [`KindRegistry`] backed by the apiextensions API
#[derive(Clone)]
pub struct KubeKindRegistry {
    client: Client,
}

impl KubeKindRegistry {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn definitions(&self) -> Api<CustomResourceDefinition> {
        Api::all(self.client.clone())
    }
}

#[async_trait::async_trait]
impl KindRegistry for KubeKindRegistry {
    async fn exists(&self, kind: &ResourceKind) -> Result<bool> {
        match self.definitions().get(&kind.name()).await {
            Ok(_) => Ok(true),
            Err(kube::Error::Api(response)) if response.code == 404 => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn create(&self, kind: &ResourceKind) -> Result<()> {
        self.definitions()
            .create(&PostParams::default(), &kind.definition)
            .await?;
        Ok(())
    }

    async fn probe(&self, path: &str) -> Result<u16> {
        let request = http::Request::get(path).body(Vec::new())?;
        match self.client.request_text(request).await {
            Ok(_) => Ok(200),
            Err(kube::Error::Api(response)) => Ok(response.code),
            Err(e) => Err(e.into()),
        }
    }
}

/// Register `kinds` if needed and wait until the API server serves them
///
/// Kinds that already exist are left untouched, and losing a creation race
/// (`409 AlreadyExists`) counts as success, so running this on every start
/// is safe. The whole call, in-flight API requests included, is bounded by
/// `wait.timeout` and returns [`Error::Cancelled`] as soon as `cancel` fires.
pub async fn ensure_resource_kinds_registered(
    registry: &dyn KindRegistry,
    kinds: &[ResourceKind],
    wait: BootstrapWait,
    cancel: &CancellationToken,
) -> Result<()> {
    let deadline = Instant::now() + wait.timeout;

    for kind in kinds {
        let registration = async {
            register(registry, kind).await.map_err(|e| Error::Registration {
                kind: kind.name(),
                source: Box::new(e),
            })
        };
        bounded(registration, kind, wait, deadline, cancel).await?;
    }

    for kind in kinds {
        wait_until_served(registry, kind, wait, deadline, cancel).await?;
        tracing::info!("Resource kind {} is ready", kind.name());
    }
    Ok(())
}

/// Run `call` until it finishes, `deadline` passes or `cancel` fires
async fn bounded<T>(
    call: impl Future<Output = Result<T>>,
    kind: &ResourceKind,
    wait: BootstrapWait,
    deadline: Instant,
    cancel: &CancellationToken,
) -> Result<T> {
    tokio::select! {
        _ = cancel.cancelled() => Err(Error::Cancelled),
        result = tokio::time::timeout_at(deadline, call) => match result {
            Ok(result) => result,
            Err(_) => Err(Error::NotReady {
                kind: kind.name(),
                timeout: wait.timeout,
            }),
        },
    }
}

async fn register(registry: &dyn KindRegistry, kind: &ResourceKind) -> Result<()> {
    if registry.exists(kind).await? {
        tracing::debug!("Resource kind {} already registered", kind.name());
        return Ok(());
    }

    match registry.create(kind).await {
        Ok(()) => {
            tracing::info!("Registered resource kind {}", kind.name());
            Ok(())
        }
        Err(e) if e.is_already_exists() => {
            tracing::debug!("Resource kind {} registered concurrently", kind.name());
            Ok(())
        }
        Err(e) => Err(e),
    }
}

async fn wait_until_served(
    registry: &dyn KindRegistry,
    kind: &ResourceKind,
    wait: BootstrapWait,
    deadline: Instant,
    cancel: &CancellationToken,
) -> Result<()> {
    let path = kind.probe_path();

    loop {
        match bounded(registry.probe(&path), kind, wait, deadline, cancel).await {
            Ok(code) if (200..300).contains(&code) => return Ok(()),
            Ok(404) => {}
            Ok(code) => return Err(Error::ProbeStatus { path, code }),
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e),
        }

        if Instant::now() + wait.interval > deadline {
            return Err(Error::NotReady {
                kind: kind.name(),
                timeout: wait.timeout,
            });
        }
        tracing::debug!("Resource kind {} not served yet, retrying", kind.name());

        tokio::select! {
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            _ = tokio::time::sleep(wait.interval) => {}
        }
    }
}
