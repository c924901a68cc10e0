//! `ContentLibrary` and `ClusterContentLibrary`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::condition::Conditions;
use crate::error::{ApiError, ApiResult};
use crate::identity::{BackingBinding, LibraryType};
use crate::immutable::SpecContract;
use crate::meta::Scope;
use crate::phase::ItemPhase;
use crate::status::Status;

use super::{non_empty, private, ResourceKind};

/// Type of storage backing a library.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StorageType {
    /// Content lives on a datastore identified by `datastoreID`.
    Datastore,
    /// Any other storage.
    Other,
}

/// Default storage backing available to a library.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageBacking {
    /// Kind of storage.
    pub storage_type: StorageType,
    /// Datastore identifier; required iff `storage_type` is `Datastore`.
    #[serde(
        rename = "datastoreID",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub datastore_id: Option<String>,
}

impl StorageBacking {
    /// Datastore backing.
    #[must_use]
    pub fn datastore(id: impl Into<String>) -> Self {
        Self {
            storage_type: StorageType::Datastore,
            datastore_id: Some(id.into()),
        }
    }

    /// Check the `datastoreID` rule.
    pub fn validate(&self) -> ApiResult<()> {
        let has_id = self.datastore_id.as_deref().is_some_and(|id| !id.is_empty());
        match (self.storage_type, has_id) {
            (StorageType::Datastore, false) => Err(ApiError::invalid_spec(
                "storageBacking.datastoreID is required for storageType Datastore",
            )),
            (StorageType::Other, true) => Err(ApiError::invalid_spec(
                "storageBacking.datastoreID is only valid for storageType Datastore",
            )),
            _ => Ok(()),
        }
    }
}

/// Desired state of a content library.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentLibrarySpec {
    /// Library name on the backing provider.
    pub library_name: String,
    /// Human-readable description.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub library_description: String,
    /// Default storage backing.
    pub storage_backing: StorageBacking,
}

impl SpecContract for ContentLibrarySpec {
    fn identity_fields(&self) -> Vec<(&'static str, String)> {
        vec![("spec.libraryName", self.library_name.clone())]
    }

    fn validate(&self) -> ApiResult<()> {
        if self.library_name.is_empty() {
            return Err(ApiError::invalid_spec("spec.libraryName is required"));
        }
        self.storage_backing.validate()
    }
}

/// Serialised status of a library.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentLibraryStatus {
    /// Provider identifier of the library.
    #[serde(rename = "libraryUUID", default, skip_serializing_if = "Option::is_none")]
    pub library_uuid: Option<String>,
    /// Library type on the provider.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub library_type: Option<LibraryType>,
    /// Metadata version token.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Lifecycle phase.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<ItemPhase>,
    /// Readiness.
    #[serde(default)]
    pub ready: bool,
    /// Identity fields of the accepted spec.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub accepted_identity: BTreeMap<String, String>,
    /// Conditions.
    #[serde(default, skip_serializing_if = "Conditions::is_empty")]
    pub conditions: Conditions,
}

impl From<Status<ItemPhase>> for ContentLibraryStatus {
    fn from(status: Status<ItemPhase>) -> Self {
        Self {
            library_uuid: non_empty(status.backing.uuid()),
            library_type: status.backing.library_type,
            version: non_empty(status.backing.metadata_version()),
            phase: status.phase,
            ready: status.ready,
            accepted_identity: status.accepted_identity,
            conditions: status.conditions,
        }
    }
}

impl From<ContentLibraryStatus> for Status<ItemPhase> {
    fn from(wire: ContentLibraryStatus) -> Self {
        Self {
            backing: BackingBinding::from_parts(
                wire.library_uuid,
                wire.library_type,
                wire.version,
                None,
            ),
            item_type: None,
            cached: false,
            phase: wire.phase,
            ready: wire.ready,
            accepted_identity: wire.accepted_identity,
            conditions: wire.conditions,
        }
    }
}

/// Namespaced content library.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContentLibrary;

/// Cluster-scoped content library.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClusterContentLibrary;

impl private::Sealed for ContentLibrary {}
impl private::Sealed for ClusterContentLibrary {}

impl ResourceKind for ContentLibrary {
    type Spec = ContentLibrarySpec;
    type Phase = ItemPhase;
    type WireStatus = ContentLibraryStatus;

    const KIND: &'static str = "ContentLibrary";
    const LIST_KIND: &'static str = "ContentLibraryList";
    const SHORT_NAME: &'static str = "cl";
    const SCOPE: Scope = Scope::Namespaced;
}

impl ResourceKind for ClusterContentLibrary {
    type Spec = ContentLibrarySpec;
    type Phase = ItemPhase;
    type WireStatus = ContentLibraryStatus;

    const KIND: &'static str = "ClusterContentLibrary";
    const LIST_KIND: &'static str = "ClusterContentLibraryList";
    const SHORT_NAME: &'static str = "clustercl";
    const SCOPE: Scope = Scope::Cluster;
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(StorageType::Datastore, Some("ds-1"), true)]
    #[case(StorageType::Datastore, None, false)]
    #[case(StorageType::Datastore, Some(""), false)]
    #[case(StorageType::Other, None, true)]
    #[case(StorageType::Other, Some("ds-1"), false)]
    fn storage_backing_rule(
        #[case] storage_type: StorageType,
        #[case] id: Option<&str>,
        #[case] valid: bool,
    ) {
        let backing = StorageBacking {
            storage_type,
            datastore_id: id.map(ToOwned::to_owned),
        };
        assert_eq!(backing.validate().is_ok(), valid);
    }

    #[test]
    fn spec_wire_format() {
        let json = r#"{
            "libraryName": "images",
            "storageBacking": {"storageType": "Datastore", "datastoreID": "datastore-42"}
        }"#;
        let spec: ContentLibrarySpec = serde_json::from_str(json).unwrap();
        assert_eq!(spec.storage_backing, StorageBacking::datastore("datastore-42"));
        assert!(spec.library_description.is_empty());
        assert!(spec.validate().is_ok());
    }

    #[test]
    fn status_wire_format() {
        let mut status = Status::<ItemPhase>::default();
        status.backing.bind("lib-uuid").unwrap();
        status.backing.library_type = Some(LibraryType::Subscribed);
        status.backing.update_versions("3", None);

        let json = serde_json::to_value(ContentLibraryStatus::from(status.clone())).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "libraryUUID": "lib-uuid",
                "libraryType": "Subscribed",
                "version": "3",
                "ready": false
            })
        );

        let wire: ContentLibraryStatus = serde_json::from_value(json).unwrap();
        assert_eq!(Status::<ItemPhase>::from(wire), status);
    }
}
