//! In-memory resource store.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::Utc;
use contentlib_api::{ObjectKey, ObjectMeta, Resource, ResourceKind, Status, Uid};
use tokio::sync::broadcast;

use crate::error::{ControlError, ControlResult};

use super::{ResourceFilter, ResourceStore};

const EVENT_CAPACITY: usize = 1024;

#[derive(Debug)]
struct Entry<K: ResourceKind> {
    metadata: ObjectMeta,
    spec: K::Spec,
    accepted: Option<K::Spec>,
    status: Arc<Status<K::Phase>>,
}

impl<K: ResourceKind> Entry<K> {
    fn resource(&self) -> Resource<K> {
        Resource {
            metadata: self.metadata.clone(),
            spec: self.spec.clone(),
            status: Status::clone(&self.status),
        }
    }
}

/// In-memory resource store.
///
/// This implementation is not suitable for production use as data is lost
/// when the process exits.
#[derive(Debug)]
pub struct MemoryStore<K: ResourceKind> {
    entries: RwLock<HashMap<ObjectKey, Entry<K>>>,
    events: broadcast::Sender<ObjectKey>,
}

impl<K: ResourceKind> MemoryStore<K> {
    /// Create a new empty in-memory store.
    #[must_use]
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            entries: RwLock::new(HashMap::new()),
            events,
        }
    }

    fn notify(&self, key: &ObjectKey) {
        // No subscribers is fine.
        let _ = self.events.send(key.clone());
    }
}

impl<K: ResourceKind> Default for MemoryStore<K> {
    fn default() -> Self {
        Self::new()
    }
}

fn check_uid(key: &ObjectKey, expected: &Uid, found: &Uid) -> ControlResult<()> {
    if expected == found {
        Ok(())
    } else {
        Err(ControlError::Conflict {
            key: key.clone(),
            expected: expected.to_string(),
            found: found.to_string(),
        })
    }
}

#[async_trait]
impl<K: ResourceKind> ResourceStore<K> for MemoryStore<K> {
    async fn insert(&self, resource: Resource<K>) -> ControlResult<()> {
        let key = resource.key();
        {
            let mut entries = self
                .entries
                .write()
                .map_err(|_| ControlError::internal("lock poisoned"))?;

            if entries.contains_key(&key) {
                return Err(ControlError::AlreadyExists(key));
            }

            entries.insert(
                key.clone(),
                Entry {
                    metadata: resource.metadata,
                    spec: resource.spec,
                    accepted: None,
                    status: Arc::new(resource.status),
                },
            );
        }
        self.notify(&key);
        Ok(())
    }

    async fn get(&self, key: &ObjectKey) -> ControlResult<Option<Resource<K>>> {
        let entries = self
            .entries
            .read()
            .map_err(|_| ControlError::internal("lock poisoned"))?;

        Ok(entries.get(key).map(Entry::resource))
    }

    async fn status(&self, key: &ObjectKey) -> ControlResult<Option<Arc<Status<K::Phase>>>> {
        let entries = self
            .entries
            .read()
            .map_err(|_| ControlError::internal("lock poisoned"))?;

        Ok(entries.get(key).map(|e| Arc::clone(&e.status)))
    }

    async fn list(&self, filter: &ResourceFilter) -> ControlResult<Vec<Resource<K>>> {
        let entries = self
            .entries
            .read()
            .map_err(|_| ControlError::internal("lock poisoned"))?;

        let mut results: Vec<_> = entries
            .values()
            .map(Entry::resource)
            .filter(|r| filter.matches(r))
            .collect();
        drop(entries);

        results.sort_by_key(Resource::key);

        if let Some(limit) = filter.limit {
            #[allow(clippy::as_conversions)]
            results.truncate(limit as usize);
        }
        Ok(results)
    }

    async fn update_spec(&self, key: &ObjectKey, spec: K::Spec) -> ControlResult<()> {
        {
            let mut entries = self
                .entries
                .write()
                .map_err(|_| ControlError::internal("lock poisoned"))?;

            let entry = entries
                .get_mut(key)
                .ok_or_else(|| ControlError::NotFound(key.clone()))?;
            entry.spec = spec;
            entry.metadata.generation += 1;
        }
        self.notify(key);
        Ok(())
    }

    async fn mark_deleted(&self, key: &ObjectKey) -> ControlResult<()> {
        {
            let mut entries = self
                .entries
                .write()
                .map_err(|_| ControlError::internal("lock poisoned"))?;

            let entry = entries
                .get_mut(key)
                .ok_or_else(|| ControlError::NotFound(key.clone()))?;
            if entry.metadata.deletion_timestamp.is_none() {
                entry.metadata.deletion_timestamp = Some(Utc::now());
            }
        }
        self.notify(key);
        Ok(())
    }

    async fn accepted_spec(&self, key: &ObjectKey) -> ControlResult<Option<K::Spec>> {
        let entries = self
            .entries
            .read()
            .map_err(|_| ControlError::internal("lock poisoned"))?;

        Ok(entries.get(key).and_then(|e| e.accepted.clone()))
    }

    async fn accept_spec(&self, key: &ObjectKey, uid: &Uid, spec: K::Spec) -> ControlResult<()> {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| ControlError::internal("lock poisoned"))?;

        let entry = entries
            .get_mut(key)
            .ok_or_else(|| ControlError::NotFound(key.clone()))?;
        check_uid(key, uid, &entry.metadata.uid)?;
        entry.accepted = Some(spec);
        Ok(())
    }

    async fn replace_status(
        &self,
        key: &ObjectKey,
        uid: &Uid,
        status: Status<K::Phase>,
    ) -> ControlResult<()> {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| ControlError::internal("lock poisoned"))?;

        let entry = entries
            .get_mut(key)
            .ok_or_else(|| ControlError::NotFound(key.clone()))?;
        check_uid(key, uid, &entry.metadata.uid)?;
        entry.status = Arc::new(status);
        Ok(())
    }

    async fn remove(&self, key: &ObjectKey) -> ControlResult<()> {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| ControlError::internal("lock poisoned"))?;

        entries
            .remove(key)
            .map(|_| ())
            .ok_or_else(|| ControlError::NotFound(key.clone()))
    }

    fn subscribe(&self) -> broadcast::Receiver<ObjectKey> {
        self.events.subscribe()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use contentlib_api::{ContentLibraryItem, ContentLibraryItemSpec, ItemPhase};

    fn item(namespace: &str, name: &str) -> Resource<ContentLibraryItem> {
        Resource::new(
            &ObjectKey::namespaced(namespace, name),
            ContentLibraryItemSpec {
                content_library_name: "images".to_owned(),
                item_name: name.to_owned(),
                item_description: String::new(),
            },
        )
        .unwrap()
    }

    #[tokio::test]
    async fn insert_and_get() {
        let store = MemoryStore::<ContentLibraryItem>::new();
        let resource = item("ns", "ubuntu");
        store.insert(resource.clone()).await.unwrap();

        assert_eq!(store.get(&resource.key()).await.unwrap(), Some(resource.clone()));
        assert!(matches!(
            store.insert(resource).await,
            Err(ControlError::AlreadyExists(_))
        ));
    }

    #[tokio::test]
    async fn status_replace_is_uid_guarded() {
        let store = MemoryStore::<ContentLibraryItem>::new();
        let resource = item("ns", "ubuntu");
        let key = resource.key();
        let uid = resource.metadata.uid.clone();
        store.insert(resource).await.unwrap();

        let mut status = Status::default();
        status.transition(ItemPhase::Creating).unwrap();
        store.replace_status(&key, &uid, status.clone()).await.unwrap();
        assert_eq!(*store.status(&key).await.unwrap().unwrap(), status);

        let err = store
            .replace_status(&key, &Uid::new("someone-else"), Status::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ControlError::Conflict { .. }));
        assert_eq!(*store.status(&key).await.unwrap().unwrap(), status);
    }

    #[tokio::test]
    async fn snapshots_outlive_replacement() {
        let store = MemoryStore::<ContentLibraryItem>::new();
        let resource = item("ns", "ubuntu");
        let key = resource.key();
        let uid = resource.metadata.uid.clone();
        store.insert(resource).await.unwrap();

        let before = store.status(&key).await.unwrap().unwrap();
        let mut next = Status::default();
        next.transition(ItemPhase::Creating).unwrap();
        store.replace_status(&key, &uid, next).await.unwrap();

        assert_eq!(before.phase, None);
        assert_eq!(store.status(&key).await.unwrap().unwrap().phase, Some(ItemPhase::Creating));
    }

    #[tokio::test]
    async fn list_filters_and_orders() {
        let store = MemoryStore::<ContentLibraryItem>::new();
        for (ns, name) in [("b", "two"), ("a", "one"), ("a", "three")] {
            store.insert(item(ns, name)).await.unwrap();
        }
        store.mark_deleted(&ObjectKey::namespaced("a", "three")).await.unwrap();

        let all = store.list(&ResourceFilter::new()).await.unwrap();
        let keys: Vec<_> = all.iter().map(|r| r.key().to_string()).collect();
        assert_eq!(keys, vec!["a/one", "a/three", "b/two"]);

        let live_in_a = store
            .list(&ResourceFilter::new().with_namespace("a").with_deleting(false))
            .await
            .unwrap();
        assert_eq!(live_in_a.len(), 1);

        let limited = store.list(&ResourceFilter::new().with_limit(2)).await.unwrap();
        assert_eq!(limited.len(), 2);
    }

    #[tokio::test]
    async fn spec_changes_are_announced() {
        let store = MemoryStore::<ContentLibraryItem>::new();
        let mut events = store.subscribe();
        let resource = item("ns", "ubuntu");
        let key = resource.key();
        store.insert(resource.clone()).await.unwrap();

        let mut spec = resource.spec;
        spec.item_description = "new".to_owned();
        store.update_spec(&key, spec).await.unwrap();

        assert_eq!(events.recv().await.unwrap(), key);
        assert_eq!(events.recv().await.unwrap(), key);
        assert_eq!(store.get(&key).await.unwrap().unwrap().metadata.generation, 2);
    }

    #[tokio::test]
    async fn mark_deleted_keeps_first_timestamp() {
        let store = MemoryStore::<ContentLibraryItem>::new();
        let resource = item("ns", "ubuntu");
        let key = resource.key();
        store.insert(resource).await.unwrap();

        store.mark_deleted(&key).await.unwrap();
        let first = store.get(&key).await.unwrap().unwrap().metadata.deletion_timestamp;
        store.mark_deleted(&key).await.unwrap();
        let second = store.get(&key).await.unwrap().unwrap().metadata.deletion_timestamp;
        assert!(first.is_some());
        assert_eq!(first, second);

        store.remove(&key).await.unwrap();
        assert!(store.get(&key).await.unwrap().is_none());
    }
}
