//! Explicit kind registry.
//!
//! The registry is built once at startup and passed by reference to whatever
//! needs to decode or dispatch on kind names. There is no process-wide
//! registration.

use std::collections::BTreeMap;

use crate::condition::{ConditionedResource, Conditions};
use crate::error::{ApiError, ApiResult};
use crate::kinds::{
    ClusterContentLibrary, ClusterContentLibraryItem, ContentLibrary, ContentLibraryItem,
    ContentUploadRequest, Resource, ResourceKind, GROUP, VERSION,
};
use crate::meta::{ObjectKey, Scope};
use crate::phase::LifecyclePhase;

/// Static information about a registered kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KindInfo {
    /// Kind name.
    pub kind: &'static str,
    /// List kind name.
    pub list_kind: &'static str,
    /// API group.
    pub group: &'static str,
    /// API version.
    pub version: &'static str,
    /// Naming scope.
    pub scope: Scope,
    /// Short name.
    pub short_name: &'static str,
}

impl KindInfo {
    /// Describe kind `K`.
    #[must_use]
    pub fn of<K: ResourceKind>() -> Self {
        Self {
            kind: K::KIND,
            list_kind: K::LIST_KIND,
            group: GROUP,
            version: VERSION,
            scope: K::SCOPE,
            short_name: K::SHORT_NAME,
        }
    }

    /// `group/version` string.
    #[must_use]
    pub fn api_version(&self) -> String {
        format!("{}/{}", self.group, self.version)
    }
}

type DecodeFn = fn(serde_json::Value) -> ApiResult<AnyResource>;

#[derive(Debug, Clone)]
struct Entry {
    info: KindInfo,
    decode: DecodeFn,
}

fn decode_as<K: ResourceKind>(value: serde_json::Value) -> ApiResult<AnyResource>
where
    AnyResource: From<Resource<K>>,
{
    Ok(serde_json::from_value::<Resource<K>>(value)?.into())
}

fn entry<K: ResourceKind>() -> (&'static str, Entry)
where
    AnyResource: From<Resource<K>>,
{
    (
        K::KIND,
        Entry {
            info: KindInfo::of::<K>(),
            decode: decode_as::<K>,
        },
    )
}

/// Registry of resource kinds known to this process.
#[derive(Debug, Clone, Default)]
pub struct KindRegistry {
    entries: BTreeMap<&'static str, Entry>,
}

impl KindRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding every content library kind.
    #[must_use]
    pub fn standard() -> Self {
        Self {
            entries: BTreeMap::from([
                entry::<ContentLibrary>(),
                entry::<ClusterContentLibrary>(),
                entry::<ContentLibraryItem>(),
                entry::<ClusterContentLibraryItem>(),
                entry::<ContentUploadRequest>(),
            ]),
        }
    }

    /// Register kind `K`.
    ///
    /// Fails if a kind with the same name is already registered.
    pub fn register<K: ResourceKind>(&mut self) -> ApiResult<()>
    where
        AnyResource: From<Resource<K>>,
    {
        if self.entries.contains_key(K::KIND) {
            return Err(ApiError::DuplicateKind(K::KIND.to_owned()));
        }
        let (name, entry) = entry::<K>();
        self.entries.insert(name, entry);
        Ok(())
    }

    /// Look up a kind by name.
    #[must_use]
    pub fn get(&self, kind: &str) -> Option<&KindInfo> {
        self.entries.get(kind).map(|e| &e.info)
    }

    /// Look up a kind by short name.
    #[must_use]
    pub fn by_short_name(&self, short_name: &str) -> Option<&KindInfo> {
        self.entries
            .values()
            .map(|e| &e.info)
            .find(|info| info.short_name == short_name)
    }

    /// Iterate over registered kinds in name order.
    pub fn iter(&self) -> impl Iterator<Item = &KindInfo> {
        self.entries.values().map(|e| &e.info)
    }

    /// Number of registered kinds.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no kinds are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Decode a serialised object, dispatching on its `kind` field.
    pub fn decode(&self, value: serde_json::Value) -> ApiResult<AnyResource> {
        let kind = value
            .get("kind")
            .and_then(serde_json::Value::as_str)
            .ok_or_else(|| ApiError::Serialisation("missing kind".to_owned()))?;

        let entry = self
            .entries
            .get(kind)
            .ok_or_else(|| ApiError::UnknownKind(kind.to_owned()))?;

        (entry.decode)(value)
    }

    /// Decode a JSON document.
    pub fn decode_str(&self, json: &str) -> ApiResult<AnyResource> {
        self.decode(serde_json::from_str(json)?)
    }
}

/// A resource of any registered kind.
#[derive(Debug, Clone, PartialEq)]
pub enum AnyResource {
    /// Namespaced library.
    ContentLibrary(Resource<ContentLibrary>),
    /// Cluster-scoped library.
    ClusterContentLibrary(Resource<ClusterContentLibrary>),
    /// Namespaced item.
    ContentLibraryItem(Resource<ContentLibraryItem>),
    /// Cluster-scoped item.
    ClusterContentLibraryItem(Resource<ClusterContentLibraryItem>),
    /// Upload request.
    ContentUploadRequest(Resource<ContentUploadRequest>),
}

macro_rules! any_resource_from {
    ($($variant:ident),*) => {
        $(
            impl From<Resource<$variant>> for AnyResource {
                fn from(resource: Resource<$variant>) -> Self {
                    Self::$variant(resource)
                }
            }
        )*
    };
}

any_resource_from!(
    ContentLibrary,
    ClusterContentLibrary,
    ContentLibraryItem,
    ClusterContentLibraryItem,
    ContentUploadRequest
);

impl AnyResource {
    /// Kind name.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::ContentLibrary(_) => ContentLibrary::KIND,
            Self::ClusterContentLibrary(_) => ClusterContentLibrary::KIND,
            Self::ContentLibraryItem(_) => ContentLibraryItem::KIND,
            Self::ClusterContentLibraryItem(_) => ClusterContentLibraryItem::KIND,
            Self::ContentUploadRequest(_) => ContentUploadRequest::KIND,
        }
    }

    /// Identity key.
    #[must_use]
    pub fn key(&self) -> ObjectKey {
        match self {
            Self::ContentLibrary(r) => r.key(),
            Self::ClusterContentLibrary(r) => r.key(),
            Self::ContentLibraryItem(r) => r.key(),
            Self::ClusterContentLibraryItem(r) => r.key(),
            Self::ContentUploadRequest(r) => r.key(),
        }
    }

    /// Current phase name, if any.
    #[must_use]
    pub fn phase(&self) -> Option<&'static str> {
        match self {
            Self::ContentLibrary(r) => r.status.phase.map(|p| p.as_str()),
            Self::ClusterContentLibrary(r) => r.status.phase.map(|p| p.as_str()),
            Self::ContentLibraryItem(r) => r.status.phase.map(|p| p.as_str()),
            Self::ClusterContentLibraryItem(r) => r.status.phase.map(|p| p.as_str()),
            Self::ContentUploadRequest(r) => r.status.phase.map(|p| p.as_str()),
        }
    }

    /// Readiness.
    #[must_use]
    pub const fn is_ready(&self) -> bool {
        match self {
            Self::ContentLibrary(r) => r.status.ready,
            Self::ClusterContentLibrary(r) => r.status.ready,
            Self::ContentLibraryItem(r) => r.status.ready,
            Self::ClusterContentLibraryItem(r) => r.status.ready,
            Self::ContentUploadRequest(r) => r.status.ready,
        }
    }

    /// Conditions.
    #[must_use]
    pub fn conditions(&self) -> &Conditions {
        match self {
            Self::ContentLibrary(r) => r.conditions(),
            Self::ClusterContentLibrary(r) => r.conditions(),
            Self::ContentLibraryItem(r) => r.conditions(),
            Self::ClusterContentLibraryItem(r) => r.conditions(),
            Self::ContentUploadRequest(r) => r.conditions(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::kinds::{ContentLibrarySpec, StorageBacking};

    #[test]
    fn standard_registry_holds_every_kind() {
        let registry = KindRegistry::standard();
        assert_eq!(registry.len(), 5);

        let info = registry.get("ClusterContentLibraryItem").unwrap();
        assert_eq!(info.scope, Scope::Cluster);
        assert_eq!(info.short_name, "clusterclitem");
        assert_eq!(info.api_version(), "imageregistry.vmware.com/v1alpha1");

        assert_eq!(registry.by_short_name("uploadreq").unwrap().kind, "ContentUploadRequest");
        assert!(registry.get("UserVirtualMachineImage").is_none());
    }

    #[test]
    fn duplicate_registration_fails() {
        let mut registry = KindRegistry::new();
        registry.register::<ContentLibrary>().unwrap();
        assert_eq!(
            registry.register::<ContentLibrary>().unwrap_err(),
            ApiError::DuplicateKind("ContentLibrary".to_owned())
        );
    }

    #[test]
    fn decode_dispatches_on_kind() {
        let library = Resource::<ClusterContentLibrary>::new(
            &ObjectKey::cluster("shared"),
            ContentLibrarySpec {
                library_name: "shared".to_owned(),
                library_description: String::new(),
                storage_backing: StorageBacking::datastore("ds-1"),
            },
        )
        .unwrap();
        let json = serde_json::to_string(&library).unwrap();

        let decoded = KindRegistry::standard().decode_str(&json).unwrap();
        assert_eq!(decoded.kind(), "ClusterContentLibrary");
        assert_eq!(decoded.key(), ObjectKey::cluster("shared"));
        assert!(!decoded.is_ready());
        assert!(decoded.phase().is_none());
        assert_eq!(decoded, AnyResource::ClusterContentLibrary(library));
    }

    #[test]
    fn decode_unknown_kind_fails() {
        let registry = KindRegistry::new();
        let err = registry
            .decode(serde_json::json!({"kind": "ContentLibrary"}))
            .unwrap_err();
        assert_eq!(err, ApiError::UnknownKind("ContentLibrary".to_owned()));
    }
}
