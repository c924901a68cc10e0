//! Resource storage.
//!
//! The store stands in for the API server: requesters insert, edit and
//! delete resources, the controller reads them and replaces their status.
//! Status is replaced as a whole under the object's uid, so a reader sees
//! either the previous snapshot or the next one, never a mix.

mod memory;

pub use memory::MemoryStore;

use std::sync::Arc;

use async_trait::async_trait;
use contentlib_api::{ObjectKey, Resource, ResourceKind, Status, Uid};
use tokio::sync::broadcast;

use crate::error::ControlResult;

/// Filter criteria for listing resources.
#[derive(Debug, Clone, Default)]
pub struct ResourceFilter {
    /// Only resources in this namespace.
    pub namespace: Option<String>,
    /// Only resources whose deletion has (or has not) been requested.
    pub deleting: Option<bool>,
    /// Maximum number of results.
    pub limit: Option<u32>,
}

impl ResourceFilter {
    /// Create a new empty filter.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            namespace: None,
            deleting: None,
            limit: None,
        }
    }

    /// Filter by namespace.
    #[must_use]
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    /// Filter by pending deletion.
    #[must_use]
    pub const fn with_deleting(mut self, deleting: bool) -> Self {
        self.deleting = Some(deleting);
        self
    }

    /// Set maximum results.
    #[must_use]
    pub const fn with_limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Whether `resource` passes the filter.
    #[must_use]
    pub fn matches<K: ResourceKind>(&self, resource: &Resource<K>) -> bool {
        if let Some(ref namespace) = self.namespace {
            if resource.metadata.namespace.as_ref() != Some(namespace) {
                return false;
            }
        }
        if let Some(deleting) = self.deleting {
            if resource.is_deleting() != deleting {
                return false;
            }
        }
        true
    }
}

/// Backend for storing resources of kind `K`.
#[async_trait]
pub trait ResourceStore<K: ResourceKind>: Send + Sync {
    /// Insert a new resource.
    ///
    /// Returns an error if a resource with the same key already exists.
    async fn insert(&self, resource: Resource<K>) -> ControlResult<()>;

    /// Get a resource by key.
    ///
    /// Returns `None` if the resource does not exist.
    async fn get(&self, key: &ObjectKey) -> ControlResult<Option<Resource<K>>>;

    /// Get the current status snapshot of a resource.
    async fn status(&self, key: &ObjectKey) -> ControlResult<Option<Arc<Status<K::Phase>>>>;

    /// List resources matching the filter, ordered by key.
    async fn list(&self, filter: &ResourceFilter) -> ControlResult<Vec<Resource<K>>>;

    /// Replace the declared spec and bump the generation.
    async fn update_spec(&self, key: &ObjectKey, spec: K::Spec) -> ControlResult<()>;

    /// Request deletion by setting the deletion timestamp.
    ///
    /// The resource stays in the store until [`ResourceStore::remove`].
    async fn mark_deleted(&self, key: &ObjectKey) -> ControlResult<()>;

    /// The spec the controller accepted on first observation.
    async fn accepted_spec(&self, key: &ObjectKey) -> ControlResult<Option<K::Spec>>;

    /// Record the accepted spec.
    async fn accept_spec(&self, key: &ObjectKey, uid: &Uid, spec: K::Spec) -> ControlResult<()>;

    /// Atomically replace the status of the object with `uid`.
    ///
    /// Fails with [`crate::ControlError::Conflict`] if the key now names a
    /// different object.
    async fn replace_status(
        &self,
        key: &ObjectKey,
        uid: &Uid,
        status: Status<K::Phase>,
    ) -> ControlResult<()>;

    /// Remove a resource once its finalizer is cleared.
    async fn remove(&self, key: &ObjectKey) -> ControlResult<()>;

    /// Subscribe to keys of resources whose spec or metadata changed.
    ///
    /// Status replacements are not announced.
    fn subscribe(&self) -> broadcast::Receiver<ObjectKey>;
}
