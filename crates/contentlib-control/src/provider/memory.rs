//! In-memory backing provider.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use contentlib_api::{BackingIdentity, LibraryType};
use tracing::debug;

use super::{
    BackingProvider, BackingSpec, ProviderError, ProviderResult, ResolveKey, UploadState, Versions,
};

#[derive(Debug, Clone)]
struct BackingObject {
    key: ResolveKey,
    spec: BackingSpec,
    library_type: Option<LibraryType>,
    metadata_version: u64,
    content_version: Option<u64>,
    item_type: Option<String>,
    cached: bool,
    upload: Option<UploadState>,
    visible: bool,
}

impl BackingObject {
    fn identity(&self, uuid: &str) -> BackingIdentity {
        BackingIdentity {
            uuid: uuid.to_owned(),
            library_type: self.library_type,
            metadata_version: self.metadata_version.to_string(),
            content_version: self.content_version.map(|v| v.to_string()),
            item_type: self.item_type.clone(),
            cached: self.cached,
        }
    }

    fn versions(&self) -> Versions {
        Versions {
            metadata: self.metadata_version.to_string(),
            content: self.content_version.map(|v| v.to_string()),
        }
    }

    fn set_description(&mut self, description: &str) {
        match &mut self.spec {
            BackingSpec::Library { description: d, .. }
            | BackingSpec::Item { description: d, .. }
            | BackingSpec::Upload { description: d, .. } => description.clone_into(d),
        }
    }

    fn description(&self) -> &str {
        match &self.spec {
            BackingSpec::Library { description, .. }
            | BackingSpec::Item { description, .. }
            | BackingSpec::Upload { description, .. } => description,
        }
    }
}

#[derive(Debug, Default)]
struct State {
    objects: HashMap<String, BackingObject>,
    preassigned: VecDeque<String>,
}

impl State {
    fn find(&self, key: &ResolveKey) -> Option<(&String, &BackingObject)> {
        self.objects.iter().find(|(_, o)| &o.key == key)
    }

    fn next_uuid(&mut self) -> String {
        self.preassigned
            .pop_front()
            .unwrap_or_else(|| ulid::Ulid::new().to_string().to_lowercase())
    }

    fn library_exists(&self, name: &str) -> bool {
        self.find(&ResolveKey::Library {
            name: name.to_owned(),
        })
        .is_some()
    }
}

/// In-memory backing provider.
///
/// Holds backing objects in process memory and supports fault injection
/// and out-of-band changes so controller behaviour can be exercised without
/// a real virtualization platform. Data is lost when the process exits.
#[derive(Debug, Default)]
pub struct MemoryProvider {
    state: Mutex<State>,
    unavailable: AtomicBool,
    fail_next: AtomicU32,
    latency_ms: AtomicU64,
    commit_latency_ms: AtomicU64,
    defer_visibility: AtomicBool,
    calls: AtomicU64,
}

impl MemoryProvider {
    /// Create an empty provider.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> ProviderResult<MutexGuard<'_, State>> {
        self.state
            .lock()
            .map_err(|_| ProviderError::Unavailable("lock poisoned".to_owned()))
    }

    /// Common prologue of every trait call: count, delay, inject faults.
    async fn enter(&self, op: &'static str) -> ProviderResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let latency = self.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }

        if self.unavailable.load(Ordering::SeqCst) {
            debug!(op, "provider marked unavailable");
            return Err(ProviderError::Unavailable(
                "provider marked unavailable".to_owned(),
            ));
        }

        let injected = self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            debug!(op, "injected provider failure");
            return Err(ProviderError::Unavailable("injected failure".to_owned()));
        }

        Ok(())
    }

    /// Common epilogue of `create` and `update`: the effect is already
    /// applied, only the answer is late.
    async fn settle(&self) {
        let latency = self.commit_latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
    }

    // Fault injection

    /// Make every call fail with [`ProviderError::Unavailable`].
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Fail the next `n` calls with [`ProviderError::Unavailable`].
    pub fn fail_next(&self, n: u32) {
        self.fail_next.store(n, Ordering::SeqCst);
    }

    /// Delay every call by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        let ms = u64::try_from(latency.as_millis()).unwrap_or(u64::MAX);
        self.latency_ms.store(ms, Ordering::SeqCst);
    }

    /// Delay the answer to `create` and `update` by `latency` after the
    /// change has been applied.
    pub fn set_commit_latency(&self, latency: Duration) {
        let ms = u64::try_from(latency.as_millis()).unwrap_or(u64::MAX);
        self.commit_latency_ms.store(ms, Ordering::SeqCst);
    }

    /// Keep newly created objects invisible to `resolve` until
    /// [`MemoryProvider::publish_pending`] is called.
    pub fn defer_visibility(&self, defer: bool) {
        self.defer_visibility.store(defer, Ordering::SeqCst);
    }

    /// Make every pending object visible.
    pub fn publish_pending(&self) -> ProviderResult<()> {
        for object in self.state()?.objects.values_mut() {
            object.visible = true;
        }
        Ok(())
    }

    /// Hand out `uuids` to the next created objects, in order.
    pub fn preassign_uuids<I, S>(&self, uuids: I) -> ProviderResult<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.state()?
            .preassigned
            .extend(uuids.into_iter().map(Into::into));
        Ok(())
    }

    /// Number of trait calls made so far, including failed ones.
    #[must_use]
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }

    // Out-of-band changes, as made by another client of the platform

    /// Create a library directly on the platform.
    pub fn seed_library(&self, name: &str, library_type: LibraryType) -> ProviderResult<String> {
        let mut state = self.state()?;
        let uuid = state.next_uuid();
        state.objects.insert(
            uuid.clone(),
            BackingObject {
                key: ResolveKey::Library {
                    name: name.to_owned(),
                },
                spec: BackingSpec::Library {
                    name: name.to_owned(),
                    description: String::new(),
                    storage: contentlib_api::StorageBacking {
                        storage_type: contentlib_api::StorageType::Other,
                        datastore_id: None,
                    },
                },
                library_type: Some(library_type),
                metadata_version: 1,
                content_version: None,
                item_type: None,
                cached: false,
                upload: None,
                visible: true,
            },
        );
        Ok(uuid)
    }

    /// Create an item directly on the platform.
    pub fn seed_item(&self, library_name: &str, item_name: &str) -> ProviderResult<String> {
        self.seed_item_spec(BackingSpec::Item {
            library_name: library_name.to_owned(),
            item_name: item_name.to_owned(),
            description: String::new(),
        })
    }

    fn seed_item_spec(&self, spec: BackingSpec) -> ProviderResult<String> {
        let mut state = self.state()?;
        let uuid = state.next_uuid();
        state.objects.insert(
            uuid.clone(),
            BackingObject {
                key: spec.resolve_key(),
                spec,
                library_type: None,
                metadata_version: 1,
                content_version: Some(1),
                item_type: Some("ovf".to_owned()),
                cached: true,
                upload: None,
                visible: true,
            },
        );
        Ok(uuid)
    }

    /// Delete an object behind the controller's back.
    pub fn remove_out_of_band(&self, uuid: &str) -> ProviderResult<()> {
        self.state()?
            .objects
            .remove(uuid)
            .map(|_| ())
            .ok_or(ProviderError::NotFound)
    }

    /// Delete an object and recreate it under the same name with a new UUID.
    pub fn recreate_out_of_band(&self, uuid: &str) -> ProviderResult<String> {
        let mut state = self.state()?;
        let mut object = state.objects.remove(uuid).ok_or(ProviderError::NotFound)?;
        object.metadata_version = 1;
        object.content_version = object.content_version.map(|_| 1);
        let new_uuid = state.next_uuid();
        state.objects.insert(new_uuid.clone(), object);
        Ok(new_uuid)
    }

    /// Advance an object's metadata version.
    pub fn bump_metadata(&self, uuid: &str) -> ProviderResult<()> {
        let mut state = self.state()?;
        let object = state.objects.get_mut(uuid).ok_or(ProviderError::NotFound)?;
        object.metadata_version += 1;
        Ok(())
    }

    /// Advance an item's content version.
    pub fn bump_content(&self, uuid: &str) -> ProviderResult<()> {
        let mut state = self.state()?;
        let object = state.objects.get_mut(uuid).ok_or(ProviderError::NotFound)?;
        object.content_version = Some(object.content_version.map_or(1, |v| v + 1));
        Ok(())
    }

    /// Finish an in-progress upload: content matches the declared source.
    pub fn complete_upload(&self, uuid: &str) -> ProviderResult<()> {
        let mut state = self.state()?;
        let object = state.objects.get_mut(uuid).ok_or(ProviderError::NotFound)?;
        object.upload = Some(UploadState::Uploaded);
        object.content_version = Some(object.content_version.map_or(1, |v| v + 1));
        object.item_type = Some("ovf".to_owned());
        object.cached = true;
        Ok(())
    }

    /// Fail an in-progress upload.
    pub fn fail_upload(&self, uuid: &str, reason: &str) -> ProviderResult<()> {
        let mut state = self.state()?;
        let object = state.objects.get_mut(uuid).ok_or(ProviderError::NotFound)?;
        object.upload = Some(UploadState::Failed(reason.to_owned()));
        Ok(())
    }

    // Inspection

    /// Whether an object with this UUID exists.
    pub fn contains(&self, uuid: &str) -> ProviderResult<bool> {
        Ok(self.state()?.objects.contains_key(uuid))
    }

    /// Number of objects held.
    pub fn object_count(&self) -> ProviderResult<usize> {
        Ok(self.state()?.objects.len())
    }

    /// Description stored on an object.
    pub fn description(&self, uuid: &str) -> ProviderResult<String> {
        self.state()?
            .objects
            .get(uuid)
            .map(|o| o.description().to_owned())
            .ok_or(ProviderError::NotFound)
    }

    fn create_object(&self, spec: &BackingSpec) -> ProviderResult<String> {
        let mut state = self.state()?;
        let key = spec.resolve_key();

        if let ResolveKey::Item { library_name, .. } = &key {
            if !state.library_exists(library_name) {
                return Err(ProviderError::Rejected(format!(
                    "library {library_name} not found"
                )));
            }
        }

        let existing = state.find(&key).map(|(uuid, _)| uuid.clone());
        if let Some(uuid) = existing {
            return match spec {
                BackingSpec::Upload {
                    overwrite: true,
                    description,
                    ..
                } => {
                    let object = state.objects.get_mut(&uuid).ok_or(ProviderError::NotFound)?;
                    object.upload = Some(UploadState::Uploading);
                    object.set_description(description);
                    Ok(uuid)
                }
                _ => Err(ProviderError::Rejected(format!("{key} already exists"))),
            };
        }

        let uuid = state.next_uuid();
        let visible = !self.defer_visibility.load(Ordering::SeqCst);
        let object = match spec {
            BackingSpec::Library { .. } => BackingObject {
                key,
                spec: spec.clone(),
                library_type: Some(LibraryType::Local),
                metadata_version: 1,
                content_version: None,
                item_type: None,
                cached: false,
                upload: None,
                visible,
            },
            BackingSpec::Item { .. } => BackingObject {
                key,
                spec: spec.clone(),
                library_type: None,
                metadata_version: 1,
                content_version: Some(1),
                item_type: None,
                cached: false,
                upload: None,
                visible,
            },
            BackingSpec::Upload { .. } => BackingObject {
                key,
                spec: spec.clone(),
                library_type: None,
                metadata_version: 1,
                content_version: Some(1),
                item_type: None,
                cached: false,
                upload: Some(UploadState::Uploading),
                visible,
            },
        };

        debug!(uuid = %uuid, "created backing object");
        state.objects.insert(uuid.clone(), object);
        Ok(uuid)
    }

    fn update_object(&self, uuid: &str, spec: &BackingSpec) -> ProviderResult<String> {
        let mut state = self.state()?;
        let object = state.objects.get_mut(uuid).ok_or(ProviderError::NotFound)?;
        if object.key != spec.resolve_key() {
            return Err(ProviderError::Rejected(format!(
                "cannot rename {} to {}",
                object.key,
                spec.resolve_key()
            )));
        }
        match spec {
            BackingSpec::Library { description, .. }
            | BackingSpec::Item { description, .. }
            | BackingSpec::Upload { description, .. } => object.set_description(description),
        }
        object.metadata_version += 1;
        Ok(uuid.to_owned())
    }
}

#[async_trait]
impl BackingProvider for MemoryProvider {
    async fn resolve(&self, key: &ResolveKey) -> ProviderResult<BackingIdentity> {
        self.enter("resolve").await?;
        let state = self.state()?;
        state
            .find(key)
            .filter(|(_, o)| o.visible)
            .map(|(uuid, o)| o.identity(uuid))
            .ok_or(ProviderError::NotFound)
    }

    async fn fetch_versions(&self, uuid: &str) -> ProviderResult<Versions> {
        self.enter("fetch_versions").await?;
        let state = self.state()?;
        state
            .objects
            .get(uuid)
            .filter(|o| o.visible)
            .map(BackingObject::versions)
            .ok_or(ProviderError::NotFound)
    }

    async fn create(&self, spec: &BackingSpec) -> ProviderResult<String> {
        self.enter("create").await?;
        let result = self.create_object(spec);
        self.settle().await;
        result
    }

    async fn update(&self, uuid: &str, spec: &BackingSpec) -> ProviderResult<String> {
        self.enter("update").await?;
        let result = self.update_object(uuid, spec);
        self.settle().await;
        result
    }

    async fn delete(&self, uuid: &str) -> ProviderResult<()> {
        self.enter("delete").await?;
        let mut state = self.state()?;
        let object = state.objects.remove(uuid).ok_or(ProviderError::NotFound)?;

        // Items do not outlive their library.
        if let ResolveKey::Library { name } = object.key {
            state.objects.retain(|_, o| {
                !matches!(&o.key, ResolveKey::Item { library_name, .. } if *library_name == name)
            });
        }
        Ok(())
    }

    async fn upload_status(&self, uuid: &str) -> ProviderResult<UploadState> {
        self.enter("upload_status").await?;
        let state = self.state()?;
        let object = state.objects.get(uuid).ok_or(ProviderError::NotFound)?;
        object
            .upload
            .clone()
            .ok_or_else(|| ProviderError::Rejected(format!("no upload into {uuid}")))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn item(library: &str, name: &str) -> BackingSpec {
        BackingSpec::Item {
            library_name: library.to_owned(),
            item_name: name.to_owned(),
            description: String::new(),
        }
    }

    #[tokio::test]
    async fn create_then_resolve() {
        let provider = MemoryProvider::new();
        provider.seed_library("images", LibraryType::Local).unwrap();
        provider.preassign_uuids(["abc-123"]).unwrap();

        let uuid = provider.create(&item("images", "ubuntu")).await.unwrap();
        assert_eq!(uuid, "abc-123");

        let identity = provider.resolve(&item("images", "ubuntu").resolve_key()).await.unwrap();
        assert_eq!(identity.uuid, "abc-123");
        assert_eq!(identity.metadata_version, "1");
        assert_eq!(identity.content_version.as_deref(), Some("1"));
    }

    #[tokio::test]
    async fn item_requires_library() {
        let provider = MemoryProvider::new();
        let err = provider.create(&item("missing", "ubuntu")).await.unwrap_err();
        assert!(matches!(err, ProviderError::Rejected(_)));
    }

    #[tokio::test]
    async fn duplicate_create_is_rejected() {
        let provider = MemoryProvider::new();
        provider.seed_library("images", LibraryType::Local).unwrap();
        provider.create(&item("images", "ubuntu")).await.unwrap();
        let err = provider.create(&item("images", "ubuntu")).await.unwrap_err();
        assert!(matches!(err, ProviderError::Rejected(_)));
    }

    #[tokio::test]
    async fn deferred_objects_are_invisible_until_published() {
        let provider = MemoryProvider::new();
        provider.seed_library("images", LibraryType::Local).unwrap();
        provider.defer_visibility(true);

        let uuid = provider.create(&item("images", "ubuntu")).await.unwrap();
        let key = item("images", "ubuntu").resolve_key();
        assert_eq!(provider.resolve(&key).await.unwrap_err(), ProviderError::NotFound);

        provider.publish_pending().unwrap();
        assert_eq!(provider.resolve(&key).await.unwrap().uuid, uuid);
    }

    #[tokio::test(start_paused = true)]
    async fn late_answer_still_commits() {
        let provider = MemoryProvider::new();
        provider.seed_library("images", LibraryType::Local).unwrap();
        provider.set_commit_latency(Duration::from_secs(5));

        let pending = tokio::time::timeout(
            Duration::from_millis(100),
            provider.create(&item("images", "ubuntu")),
        )
        .await;
        assert!(pending.is_err());

        provider.set_commit_latency(Duration::ZERO);
        let key = item("images", "ubuntu").resolve_key();
        assert!(provider.resolve(&key).await.is_ok());
        assert_eq!(provider.object_count().unwrap(), 2);
    }

    #[tokio::test]
    async fn fail_next_counts_down() {
        let provider = MemoryProvider::new();
        provider.fail_next(2);
        let key = ResolveKey::Library {
            name: "images".to_owned(),
        };

        for _ in 0..2 {
            assert!(provider.resolve(&key).await.unwrap_err().is_transient());
        }
        assert_eq!(provider.resolve(&key).await.unwrap_err(), ProviderError::NotFound);
        assert_eq!(provider.calls(), 3);
    }

    #[tokio::test]
    async fn update_bumps_metadata_version() {
        let provider = MemoryProvider::new();
        let uuid = provider.seed_library("images", LibraryType::Local).unwrap();
        let spec = BackingSpec::Library {
            name: "images".to_owned(),
            description: "golden images".to_owned(),
            storage: contentlib_api::StorageBacking::datastore("ds-1"),
        };

        provider.update(&uuid, &spec).await.unwrap();
        assert_eq!(provider.fetch_versions(&uuid).await.unwrap().metadata, "2");
        assert_eq!(provider.description(&uuid).unwrap(), "golden images");
    }

    #[tokio::test]
    async fn deleting_library_removes_items() {
        let provider = MemoryProvider::new();
        let library = provider.seed_library("images", LibraryType::Local).unwrap();
        provider.seed_item("images", "ubuntu").unwrap();

        provider.delete(&library).await.unwrap();
        assert_eq!(provider.object_count().unwrap(), 0);
        assert_eq!(provider.delete(&library).await.unwrap_err(), ProviderError::NotFound);
    }

    #[tokio::test]
    async fn upload_lifecycle() {
        let provider = MemoryProvider::new();
        provider.seed_library("images", LibraryType::Local).unwrap();
        let spec = BackingSpec::Upload {
            library_name: "images".to_owned(),
            item_name: "ubuntu".to_owned(),
            description: String::new(),
            overwrite: false,
            source_type: "PULL".to_owned(),
            source_endpoint: "https://mirror.example/ubuntu.ova".to_owned(),
        };

        let uuid = provider.create(&spec).await.unwrap();
        assert_eq!(provider.upload_status(&uuid).await.unwrap(), UploadState::Uploading);

        provider.complete_upload(&uuid).unwrap();
        assert_eq!(provider.upload_status(&uuid).await.unwrap(), UploadState::Uploaded);
        assert_eq!(
            provider.fetch_versions(&uuid).await.unwrap().content.as_deref(),
            Some("2")
        );
    }

    #[tokio::test]
    async fn recreate_assigns_new_uuid() {
        let provider = MemoryProvider::new();
        provider.seed_library("images", LibraryType::Local).unwrap();
        let old = provider.seed_item("images", "ubuntu").unwrap();
        provider.preassign_uuids(["xyz-999"]).unwrap();

        let new = provider.recreate_out_of_band(&old).unwrap();
        assert_eq!(new, "xyz-999");
        assert!(!provider.contains(&old).unwrap());

        let key = item("images", "ubuntu").resolve_key();
        assert_eq!(provider.resolve(&key).await.unwrap().uuid, "xyz-999");
    }
}
