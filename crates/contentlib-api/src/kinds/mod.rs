//! Resource kinds and the generic resource record.
//!
//! Each kind is a zero-sized marker implementing [`ResourceKind`], which ties
//! together its spec type, its phase machine and its wire status layout. The
//! record itself, [`Resource<K>`], is shared by every kind so condition,
//! phase and readiness logic is written once.

mod item;
mod library;
mod upload;

pub use item::{ClusterContentLibraryItem, ContentLibraryItem, ContentLibraryItemSpec, ContentLibraryItemStatus};
pub use library::{
    ClusterContentLibrary, ContentLibrary, ContentLibrarySpec, ContentLibraryStatus, StorageBacking,
    StorageType,
};
pub use upload::{
    ContentUploadRequest, ContentUploadRequestSpec, ContentUploadRequestStatus, LibraryItem,
    UploadSpec,
};

use std::fmt;

use serde::de::{DeserializeOwned, Error as _};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::condition::{ConditionedResource, Conditions};
use crate::error::{ApiError, ApiResult};
use crate::immutable::SpecContract;
use crate::meta::{ObjectKey, ObjectMeta, Scope};
use crate::phase::LifecyclePhase;
use crate::status::Status;

/// API group every kind is served under.
pub const GROUP: &str = "imageregistry.vmware.com";

/// API version every kind is served under.
pub const VERSION: &str = "v1alpha1";

/// Combined `group/version` string.
pub const API_VERSION: &str = "imageregistry.vmware.com/v1alpha1";

mod private {
    pub trait Sealed {}
}

/// Static description of a resource kind.
pub trait ResourceKind:
    private::Sealed + Clone + PartialEq + fmt::Debug + Send + Sync + 'static
{
    /// Declared desired state.
    type Spec: SpecContract
        + Clone
        + PartialEq
        + fmt::Debug
        + Serialize
        + DeserializeOwned
        + Send
        + Sync;

    /// Lifecycle phase machine.
    type Phase: LifecyclePhase;

    /// Serialised status layout.
    type WireStatus: Serialize
        + DeserializeOwned
        + Default
        + From<Status<Self::Phase>>
        + Into<Status<Self::Phase>>;

    /// Kind name, e.g. `ContentLibraryItem`.
    const KIND: &'static str;

    /// List kind name, e.g. `ContentLibraryItemList`.
    const LIST_KIND: &'static str;

    /// Short name used by command line tools.
    const SHORT_NAME: &'static str;

    /// Naming scope.
    const SCOPE: Scope;
}

/// A resource of kind `K`: identity, declared spec and observed status.
#[derive(Debug, Clone, PartialEq)]
pub struct Resource<K: ResourceKind> {
    /// Object metadata.
    pub metadata: ObjectMeta,
    /// Declared desired state.
    pub spec: K::Spec,
    /// Observed state, owned by the controller.
    pub status: Status<K::Phase>,
}

impl<K: ResourceKind> Resource<K> {
    /// Create a new resource with empty status.
    ///
    /// Fails if the key's namespace does not match the kind's scope or the
    /// spec is invalid.
    pub fn new(key: &ObjectKey, spec: K::Spec) -> ApiResult<Self> {
        match (K::SCOPE, &key.namespace) {
            (Scope::Namespaced, None) => {
                return Err(ApiError::invalid_spec(format!(
                    "{} is namespaced but {key} has no namespace",
                    K::KIND
                )));
            }
            (Scope::Cluster, Some(_)) => {
                return Err(ApiError::invalid_spec(format!(
                    "{} is cluster-scoped but {key} has a namespace",
                    K::KIND
                )));
            }
            _ => {}
        }
        spec.validate()?;

        Ok(Self {
            metadata: ObjectMeta::new(key),
            spec,
            status: Status::default(),
        })
    }

    /// Identity key.
    #[must_use]
    pub fn key(&self) -> ObjectKey {
        self.metadata.key()
    }

    /// Whether deletion has been requested.
    #[must_use]
    pub const fn is_deleting(&self) -> bool {
        self.metadata.is_deleting()
    }
}

impl<K: ResourceKind> ConditionedResource for Resource<K> {
    fn conditions(&self) -> &Conditions {
        &self.status.conditions
    }

    fn conditions_mut(&mut self) -> &mut Conditions {
        &mut self.status.conditions
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase", bound = "")]
struct WireRef<'a, K: ResourceKind> {
    api_version: &'static str,
    kind: &'static str,
    metadata: &'a ObjectMeta,
    spec: &'a K::Spec,
    status: K::WireStatus,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase", bound = "")]
struct WireOwned<K: ResourceKind> {
    api_version: String,
    kind: String,
    metadata: ObjectMeta,
    spec: K::Spec,
    #[serde(default)]
    status: K::WireStatus,
}

impl<K: ResourceKind> Serialize for Resource<K> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        WireRef::<K> {
            api_version: API_VERSION,
            kind: K::KIND,
            metadata: &self.metadata,
            spec: &self.spec,
            status: K::WireStatus::from(self.status.clone()),
        }
        .serialize(serializer)
    }
}

impl<'de, K: ResourceKind> Deserialize<'de> for Resource<K> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let wire = WireOwned::<K>::deserialize(deserializer)?;

        if wire.api_version != API_VERSION || wire.kind != K::KIND {
            return Err(D::Error::custom(ApiError::TypeMismatch {
                expected: format!("{API_VERSION}/{}", K::KIND),
                found: format!("{}/{}", wire.api_version, wire.kind),
            }));
        }

        Ok(Self {
            metadata: wire.metadata,
            spec: wire.spec,
            status: wire.status.into(),
        })
    }
}

/// Serialise an optional string the way the wire format expects: absent
/// when unset.
fn non_empty(value: Option<&str>) -> Option<String> {
    value.filter(|v| !v.is_empty()).map(ToOwned::to_owned)
}
