//! In-memory mirror of the watched resources, indexed by key

use kube::{Resource, ResourceExt};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::error::{Error, Result};

/// Reconciliation key of an object: `<namespace>/<name>`, or `<name>` for
/// cluster-scoped objects
pub fn object_key<K: Resource>(obj: &K) -> Result<String> {
    let name = obj
        .meta()
        .name
        .as_deref()
        .filter(|name| !name.is_empty())
        .ok_or_else(|| Error::InvalidKey(String::new()))?;
    Ok(match obj.namespace() {
        Some(namespace) if !namespace.is_empty() => format!("{}/{}", namespace, name),
        _ => name.to_string(),
    })
}

/// Split a key into its optional namespace and name
pub fn split_key(key: &str) -> Result<(Option<&str>, &str)> {
    let invalid = || Error::InvalidKey(key.to_string());
    let mut parts = key.split('/');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(name), None, None) if !name.is_empty() => Ok((None, name)),
        (Some(namespace), Some(name), None) if !namespace.is_empty() && !name.is_empty() => {
            Ok((Some(namespace), name))
        }
        _ => Err(invalid()),
    }
}

/// Split a key that must carry a namespace
pub fn split_namespaced_key(key: &str) -> Result<(&str, &str)> {
    match split_key(key)? {
        (Some(namespace), name) => Ok((namespace, name)),
        (None, _) => Err(Error::InvalidKey(key.to_string())),
    }
}

/// Thread-safe cache shared between the informer (the only writer in the
/// operator) and its readers
pub struct Store<K> {
    inner: Arc<StoreInner<K>>,
}

struct StoreInner<K> {
    items: RwLock<HashMap<String, Arc<K>>>,
    synced: AtomicBool,
}

impl<K> Clone for Store<K> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K> Default for Store<K> {
    fn default() -> Self {
        Self {
            inner: Arc::new(StoreInner {
                items: RwLock::new(HashMap::new()),
                synced: AtomicBool::new(false),
            }),
        }
    }
}

impl<K: Resource> Store<K> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Non-blocking lookup; a malformed key is an error, a missing object is `None`
    pub fn get_by_key(&self, key: &str) -> Result<Option<Arc<K>>> {
        split_key(key)?;
        Ok(self.read().get(key).cloned())
    }

    pub fn keys(&self) -> Vec<String> {
        self.read().keys().cloned().collect()
    }

    pub fn list(&self) -> Vec<Arc<K>> {
        self.read().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Whether the initial list has been loaded
    pub fn has_synced(&self) -> bool {
        self.inner.synced.load(Ordering::Acquire)
    }

    /// Insert or overwrite an object, returning its key and the previous value
    pub fn insert(&self, obj: K) -> Result<(String, Option<Arc<K>>)> {
        let key = object_key(&obj)?;
        let previous = self.write().insert(key.clone(), Arc::new(obj));
        Ok((key, previous))
    }

    pub fn remove(&self, key: &str) -> Option<Arc<K>> {
        self.write().remove(key)
    }

    /// Swap the whole content for `items`, returning the old content
    pub(crate) fn replace(&self, items: HashMap<String, Arc<K>>) -> HashMap<String, Arc<K>> {
        let previous = std::mem::replace(&mut *self.write(), items);
        self.inner.synced.store(true, Ordering::Release);
        previous
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Arc<K>>> {
        self.inner.items.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Arc<K>>> {
        self.inner.items.write().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use persistence_models::{PersistenceAction, PersistenceActionSpec};

    fn action(namespace: &str, name: &str) -> PersistenceAction {
        let mut action = PersistenceAction::new(name, PersistenceActionSpec::default());
        action.metadata.namespace = Some(namespace.to_string());
        action
    }

    #[test]
    fn test_key_round_trip() {
        let key = object_key(&action("db", "vacuum")).unwrap();
        assert_eq!(key, "db/vacuum");
        assert_eq!(split_key(&key).unwrap(), (Some("db"), "vacuum"));
        assert_eq!(split_namespaced_key(&key).unwrap(), ("db", "vacuum"));
        assert_eq!(split_key("cluster-wide").unwrap(), (None, "cluster-wide"));
    }

    #[test]
    fn test_malformed_keys_are_rejected() {
        for key in ["", "/", "db/", "/vacuum", "a/b/c"] {
            assert!(split_key(key).is_err(), "{key:?} should be rejected");
        }
        assert!(split_namespaced_key("vacuum").is_err());

        let mut nameless = action("db", "x");
        nameless.metadata.name = None;
        assert!(object_key(&nameless).is_err());
    }

    #[test]
    fn test_store_lookup() {
        let store = Store::new();
        assert!(!store.has_synced());

        let (key, previous) = store.insert(action("db", "vacuum")).unwrap();
        assert!(previous.is_none());
        assert!(store.get_by_key(&key).unwrap().is_some());
        assert!(store.get_by_key("db/missing").unwrap().is_none());
        assert!(store.get_by_key("a/b/c").is_err());

        let (_, previous) = store.insert(action("db", "vacuum")).unwrap();
        assert!(previous.is_some());
        assert_eq!(store.len(), 1);

        assert!(store.remove("db/vacuum").is_some());
        assert!(store.is_empty());
    }

    #[test]
    fn test_replace_marks_synced() {
        let store = Store::new();
        store.insert(action("db", "old")).unwrap();

        let mut items = HashMap::new();
        items.insert("db/new".to_string(), Arc::new(action("db", "new")));
        let previous = store.replace(items);

        assert!(previous.contains_key("db/old"));
        assert_eq!(store.keys(), vec!["db/new".to_string()]);
        assert!(store.has_synced());
    }
}
