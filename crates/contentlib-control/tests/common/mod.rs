//! Common test utilities for controller integration tests.

#![allow(dead_code, clippy::unwrap_used)]

pub mod fixtures;

use std::sync::Arc;
use std::time::Duration;

use contentlib_api::{
    ContentLibrary, ContentLibraryItem, ContentUploadRequest, ItemPhase, ObjectKey, Status,
    UploadPhase,
};
use contentlib_control::{
    Action, BackingProvider, LifecycleReconciler, MemoryProvider, MemoryStore, Reconcile,
    ResourceStore, RetryPolicy, UploadReconciler,
};
use tokio_util::sync::CancellationToken;

pub const POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Fast, deterministic retry policy.
pub fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        call_timeout: Duration::from_millis(100),
        max_retries: 1,
        initial_delay: Duration::from_millis(10),
        max_delay: Duration::from_millis(50),
        jitter: false,
    }
}

/// Provider, stores and reconcilers wired together.
pub struct TestController {
    pub provider: Arc<MemoryProvider>,
    pub libraries: Arc<MemoryStore<ContentLibrary>>,
    pub items: Arc<MemoryStore<ContentLibraryItem>>,
    pub uploads: Arc<MemoryStore<ContentUploadRequest>>,
    pub library_reconciler: LifecycleReconciler<ContentLibrary>,
    pub item_reconciler: LifecycleReconciler<ContentLibraryItem>,
    pub upload_reconciler: UploadReconciler,
    pub cancel: CancellationToken,
}

impl TestController {
    pub fn new() -> Self {
        let provider = Arc::new(MemoryProvider::new());
        let dyn_provider: Arc<dyn BackingProvider> = provider.clone();
        let libraries = Arc::new(MemoryStore::<ContentLibrary>::new());
        let items = Arc::new(MemoryStore::<ContentLibraryItem>::new());
        let uploads = Arc::new(MemoryStore::<ContentUploadRequest>::new());

        Self {
            library_reconciler: LifecycleReconciler::new(
                libraries.clone(),
                dyn_provider.clone(),
                fast_retry(),
                POLL_INTERVAL,
            ),
            item_reconciler: LifecycleReconciler::new(
                items.clone(),
                dyn_provider.clone(),
                fast_retry(),
                POLL_INTERVAL,
            ),
            upload_reconciler: UploadReconciler::new(
                uploads.clone(),
                dyn_provider,
                fast_retry(),
                POLL_INTERVAL,
            ),
            provider,
            libraries,
            items,
            uploads,
            cancel: CancellationToken::new(),
        }
    }

    /// Controller whose provider already holds the `images` library.
    pub fn with_library() -> Self {
        let controller = Self::new();
        controller
            .provider
            .seed_library(fixtures::LIBRARY, contentlib_api::LibraryType::Local)
            .unwrap();
        controller
    }

    pub async fn reconcile_item(&self, key: &ObjectKey) -> Action {
        self.item_reconciler.reconcile(key, &self.cancel).await.unwrap()
    }

    pub async fn reconcile_library(&self, key: &ObjectKey) -> Action {
        self.library_reconciler.reconcile(key, &self.cancel).await.unwrap()
    }

    pub async fn reconcile_upload(&self, key: &ObjectKey) -> Action {
        self.upload_reconciler.reconcile(key, &self.cancel).await.unwrap()
    }

    pub async fn item_status(&self, key: &ObjectKey) -> Arc<Status<ItemPhase>> {
        self.items.status(key).await.unwrap().unwrap()
    }

    pub async fn library_status(&self, key: &ObjectKey) -> Arc<Status<ItemPhase>> {
        self.libraries.status(key).await.unwrap().unwrap()
    }

    pub async fn upload_status(&self, key: &ObjectKey) -> Arc<Status<UploadPhase>> {
        self.uploads.status(key).await.unwrap().unwrap()
    }
}

impl Default for TestController {
    fn default() -> Self {
        Self::new()
    }
}
