//! Local cache of a resource kind, kept current by list + watch
//!
//! The informer lists every object once, then follows a watch from the
//! list's resource version. When the watch ends for any reason (server
//! timeout, dropped connection, `410 Gone`, an object that fails to decode)
//! it lists again from scratch, so the cache never depends on the watch
//! stream being complete. A periodic resync re-announces every cached key
//! to cover anything a watch gap may still have missed.

mod store;

pub use store::{object_key, split_key, split_namespaced_key, Store};

use futures::stream::BoxStream;
use futures::StreamExt;
use kube::Resource;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::error::Result;

/// A change reported by the watch stream
#[derive(Debug, Clone, PartialEq)]
pub enum WatchEvent<K> {
    Added(K),
    Modified(K),
    Deleted(K),
    /// Progress marker; every restart relists, so it carries no state
    Bookmark(String),
    /// The server ended the watch with a status, e.g. `410 Gone`
    Error { code: u16, message: String },
}

pub type WatchStream<K> = BoxStream<'static, Result<WatchEvent<K>>>;

/// Result of a full list
#[derive(Debug, Clone)]
pub struct Listing<K> {
    pub items: Vec<K>,
    /// Cursor the following watch starts from
    pub resource_version: String,
}

/// Source of list and watch results for one resource kind
#[async_trait::async_trait]
pub trait ListWatch<K>: Send + Sync + 'static {
    async fn list(&self) -> Result<Listing<K>>;

    async fn watch(&self, resource_version: &str) -> Result<WatchStream<K>>;
}

/// Receives the key of every object the informer sees change.
///
/// Called synchronously from the informer task, so implementations must only
/// do cheap, non-blocking work such as pushing the key onto a queue.
pub trait ResourceEventHandler: Send + Sync {
    fn on_add(&self, key: &str);

    fn on_update(&self, key: &str);

    fn on_delete(&self, key: &str);
}

#[derive(Debug, Clone)]
pub struct InformerConfig {
    /// Interval of synthetic updates for every cached key; zero disables it
    pub resync_period: Duration,
    /// Pause before listing again after the watch ended
    pub relist_pause: Duration,
}

impl Default for InformerConfig {
    fn default() -> Self {
        Self {
            resync_period: Duration::from_secs(5 * 60),
            relist_pause: Duration::from_secs(1),
        }
    }
}

pub struct Informer<K, L> {
    source: L,
    store: Store<K>,
    handler: Arc<dyn ResourceEventHandler>,
    config: InformerConfig,
}

impl<K, L> Informer<K, L>
where
    K: Resource + Send + Sync + 'static,
    L: ListWatch<K>,
{
    pub fn new(source: L, handler: Arc<dyn ResourceEventHandler>, config: InformerConfig) -> Self {
        Self {
            source,
            store: Store::new(),
            handler,
            config,
        }
    }

    /// Read handle on the cache
    pub fn store(&self) -> Store<K> {
        self.store.clone()
    }

    /// Run list + watch until `cancel` fires
    pub async fn run(self, cancel: CancellationToken) {
        tracing::info!("Starting informer");

        loop {
            match self.list_and_watch(&cancel).await {
                Ok(()) if cancel.is_cancelled() => break,
                Ok(()) => tracing::debug!("Watch closed, relisting"),
                Err(e) => tracing::warn!("List/watch failed, relisting: {}", e),
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.config.relist_pause) => {}
            }
        }

        tracing::info!("Informer stopped");
    }

    async fn list_and_watch(&self, cancel: &CancellationToken) -> Result<()> {
        let listing = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            listing = self.source.list() => listing?,
        };
        let resource_version = listing.resource_version;
        self.replace(listing.items);
        tracing::debug!(
            "Listed {} object(s) at resource version {}",
            self.store.len(),
            resource_version
        );

        let mut stream = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            stream = self.source.watch(&resource_version) => stream?,
        };

        let resync_enabled = !self.config.resync_period.is_zero();
        let period = self.config.resync_period.max(Duration::from_millis(1));
        let mut resync = tokio::time::interval_at(Instant::now() + period, period);
        resync.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                _ = resync.tick(), if resync_enabled => self.resync(),
                event = stream.next() => match event {
                    None => return Ok(()),
                    Some(Err(e)) => return Err(e),
                    Some(Ok(event)) => {
                        if !self.handle_event(event)? {
                            return Ok(());
                        }
                    }
                },
            }
        }
    }

    /// Apply one watch event; `false` means the watch must be restarted
    fn handle_event(&self, event: WatchEvent<K>) -> Result<bool> {
        match event {
            WatchEvent::Added(obj) | WatchEvent::Modified(obj) => {
                let (key, previous) = self.store.insert(obj)?;
                if previous.is_some() {
                    tracing::debug!("Updated in cache: {}", key);
                    self.handler.on_update(&key);
                } else {
                    tracing::debug!("Added to cache: {}", key);
                    self.handler.on_add(&key);
                }
            }
            WatchEvent::Deleted(obj) => {
                let key = object_key(&obj)?;
                self.store.remove(&key);
                tracing::debug!("Deleted from cache: {}", key);
                self.handler.on_delete(&key);
            }
            WatchEvent::Bookmark(version) => tracing::trace!("Watch bookmark at {}", version),
            WatchEvent::Error { code, message } => {
                tracing::warn!("Watch ended by server ({}): {}", code, message);
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Load a fresh listing and announce the difference to the handler
    fn replace(&self, items: Vec<K>) {
        let mut fresh = HashMap::with_capacity(items.len());
        for obj in items {
            match object_key(&obj) {
                Ok(key) => {
                    fresh.insert(key, Arc::new(obj));
                }
                Err(e) => tracing::warn!("Skipping listed object without a name: {}", e),
            }
        }
        let keys: HashSet<String> = fresh.keys().cloned().collect();

        let previous = self.store.replace(fresh);
        for key in &keys {
            if previous.contains_key(key) {
                self.handler.on_update(key);
            } else {
                self.handler.on_add(key);
            }
        }
        for key in previous.keys().filter(|key| !keys.contains(key.as_str())) {
            tracing::debug!("Gone after relist: {}", key);
            self.handler.on_delete(key);
        }
    }

    fn resync(&self) {
        let keys = self.store.keys();
        tracing::debug!("Resyncing {} cached object(s)", keys.len());
        for key in keys {
            self.handler.on_update(&key);
        }
    }
}
