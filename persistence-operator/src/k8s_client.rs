//! Shared Kubernetes client utilities

use futures::StreamExt;
use k8s_openapi::NamespaceResourceScope;
use kube::api::{Api, DeleteParams, ListParams, PostParams, WatchParams};
use kube::{Client, Resource, ResourceExt};
use persistence_models::{PersistenceAction, PersistenceInstance};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt::Debug;

use crate::error::{Error, Result};
use crate::informer::{ListWatch, Listing, WatchEvent, WatchStream};

/// Server-side timeout of a single watch request, in seconds
const WATCH_TIMEOUT_SECS: u32 = 290;

/// Get a Kubernetes client
///
/// With no `apiserver` the configuration is inferred (in-cluster service
/// account first, then the local kubeconfig). An explicit address is meant
/// for development; `tls_insecure` skips certificate verification for it.
pub async fn get_k8s_client(apiserver: Option<&str>, tls_insecure: bool) -> Result<Client> {
    let address = match apiserver.map(str::trim).filter(|a| !a.is_empty()) {
        Some(address) => address,
        None => return Ok(Client::try_default().await?),
    };

    let cluster_url: http::Uri = address.parse().map_err(|e: http::uri::InvalidUri| {
        Error::InvalidApiServer {
            address: address.to_string(),
            reason: e.to_string(),
        }
    })?;
    if cluster_url.scheme().is_none() || cluster_url.host().is_none() {
        return Err(Error::InvalidApiServer {
            address: address.to_string(),
            reason: "expected an absolute URL such as https://10.0.0.1:6443".to_string(),
        });
    }

    let mut config = kube::Config::new(cluster_url);
    config.accept_invalid_certs = tls_insecure;
    Ok(Client::try_from(config)?)
}

/// Check that the API server answers, returning its version string
pub async fn server_version(client: &Client) -> Result<String> {
    let info = client.apiserver_version().await?;
    Ok(info.git_version)
}

/// Typed create/get/update/delete/list/watch for one resource kind
///
/// Objects cross the wire as their typed schema; anything that does not
/// decode is surfaced as an error instead of being dropped.
pub struct ResourceClient<K> {
    api: Api<K>,
}

/// Client for PersistenceAction resources
pub type PersistenceActions = ResourceClient<PersistenceAction>;

/// Client for PersistenceInstance resources
pub type PersistenceInstances = ResourceClient<PersistenceInstance>;

impl<K: Clone> Clone for ResourceClient<K> {
    fn clone(&self) -> Self {
        Self {
            api: self.api.clone(),
        }
    }
}

impl<K> ResourceClient<K>
where
    K: Resource<DynamicType = ()> + Clone + DeserializeOwned + Serialize + Debug + Send + Sync + 'static,
{
    /// Client scoped to one namespace
    pub fn namespaced(client: Client, namespace: &str) -> Self
    where
        K: Resource<Scope = NamespaceResourceScope>,
    {
        Self {
            api: Api::namespaced(client, namespace),
        }
    }

    /// Client spanning all namespaces
    pub fn all(client: Client) -> Self {
        Self {
            api: Api::all(client),
        }
    }

    pub async fn create(&self, obj: &K) -> Result<K> {
        Ok(self.api.create(&PostParams::default(), obj).await?)
    }

    /// Get an object by name, `None` if it does not exist
    pub async fn get(&self, name: &str) -> Result<Option<K>> {
        match self.api.get(name).await {
            Ok(obj) => Ok(Some(obj)),
            Err(kube::Error::Api(response)) if response.code == 404 => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Replace an object; its `resourceVersion` guards against lost updates
    pub async fn update(&self, obj: &K) -> Result<K> {
        Ok(self
            .api
            .replace(&obj.name_any(), &PostParams::default(), obj)
            .await?)
    }

    /// Delete an object by name, returning whether it existed
    pub async fn delete(&self, name: &str) -> Result<bool> {
        match self.api.delete(name, &DeleteParams::default()).await {
            Ok(_) => Ok(true),
            Err(kube::Error::Api(response)) if response.code == 404 => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn list(&self, params: &ListParams) -> Result<Listing<K>> {
        let list = self.api.list(params).await?;
        Ok(Listing {
            resource_version: list.metadata.resource_version.unwrap_or_default(),
            items: list.items,
        })
    }

    /// Watch for changes after `resource_version`
    pub async fn watch(&self, resource_version: &str) -> Result<WatchStream<K>> {
        let params = WatchParams::default().timeout(WATCH_TIMEOUT_SECS);
        let stream = self.api.watch(&params, resource_version).await?;

        Ok(stream
            .map(|event| match event {
                Ok(kube::api::WatchEvent::Added(obj)) => Ok(WatchEvent::Added(obj)),
                Ok(kube::api::WatchEvent::Modified(obj)) => Ok(WatchEvent::Modified(obj)),
                Ok(kube::api::WatchEvent::Deleted(obj)) => Ok(WatchEvent::Deleted(obj)),
                Ok(kube::api::WatchEvent::Bookmark(bookmark)) => {
                    Ok(WatchEvent::Bookmark(bookmark.metadata.resource_version))
                }
                Ok(kube::api::WatchEvent::Error(response)) => Ok(WatchEvent::Error {
                    code: response.code,
                    message: response.message,
                }),
                Err(e) => Err(Error::from(e)),
            })
            .boxed())
    }
}

#[async_trait::async_trait]
impl<K> ListWatch<K> for ResourceClient<K>
where
    K: Resource<DynamicType = ()> + Clone + DeserializeOwned + Serialize + Debug + Send + Sync + 'static,
{
    async fn list(&self) -> Result<Listing<K>> {
        ResourceClient::list(self, &ListParams::default()).await
    }

    async fn watch(&self, resource_version: &str) -> Result<WatchStream<K>> {
        ResourceClient::watch(self, resource_version).await
    }
}
