//! `ContentLibraryItem` and `ClusterContentLibraryItem`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::condition::Conditions;
use crate::error::{ApiError, ApiResult};
use crate::identity::BackingBinding;
use crate::immutable::SpecContract;
use crate::meta::Scope;
use crate::phase::ItemPhase;
use crate::status::Status;

use super::{non_empty, private, ResourceKind};

/// Desired state of a library item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentLibraryItemSpec {
    /// Name of the library containing the item.
    pub content_library_name: String,
    /// Item name on the backing provider.
    pub item_name: String,
    /// Human-readable description.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub item_description: String,
}

impl SpecContract for ContentLibraryItemSpec {
    fn identity_fields(&self) -> Vec<(&'static str, String)> {
        vec![
            ("spec.contentLibraryName", self.content_library_name.clone()),
            ("spec.itemName", self.item_name.clone()),
        ]
    }

    fn validate(&self) -> ApiResult<()> {
        if self.content_library_name.is_empty() {
            return Err(ApiError::invalid_spec("spec.contentLibraryName is required"));
        }
        if self.item_name.is_empty() {
            return Err(ApiError::invalid_spec("spec.itemName is required"));
        }
        Ok(())
    }
}

/// Serialised status of a library item.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentLibraryItemStatus {
    /// Provider identifier of the item.
    #[serde(rename = "itemUUID", default, skip_serializing_if = "Option::is_none")]
    pub item_uuid: Option<String>,
    /// Metadata version token.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item_version: Option<String>,
    /// Content version token.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_version: Option<String>,
    /// Item type, e.g. `ovf`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item_type: Option<String>,
    /// Whether item files are on provider storage.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub cached: bool,
    /// Lifecycle phase.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<ItemPhase>,
    /// Readiness; always serialised.
    #[serde(default)]
    pub ready: bool,
    /// Identity fields of the accepted spec.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub accepted_identity: BTreeMap<String, String>,
    /// Conditions.
    #[serde(default, skip_serializing_if = "Conditions::is_empty")]
    pub conditions: Conditions,
}

impl From<Status<ItemPhase>> for ContentLibraryItemStatus {
    fn from(status: Status<ItemPhase>) -> Self {
        Self {
            item_uuid: non_empty(status.backing.uuid()),
            item_version: non_empty(status.backing.metadata_version()),
            content_version: non_empty(status.backing.content_version()),
            item_type: status.item_type,
            cached: status.cached,
            phase: status.phase,
            ready: status.ready,
            accepted_identity: status.accepted_identity,
            conditions: status.conditions,
        }
    }
}

impl From<ContentLibraryItemStatus> for Status<ItemPhase> {
    fn from(wire: ContentLibraryItemStatus) -> Self {
        Self {
            backing: BackingBinding::from_parts(
                wire.item_uuid,
                None,
                wire.item_version,
                wire.content_version,
            ),
            item_type: wire.item_type,
            cached: wire.cached,
            phase: wire.phase,
            ready: wire.ready,
            accepted_identity: wire.accepted_identity,
            conditions: wire.conditions,
        }
    }
}

/// Namespaced library item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContentLibraryItem;

/// Cluster-scoped library item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClusterContentLibraryItem;

impl private::Sealed for ContentLibraryItem {}
impl private::Sealed for ClusterContentLibraryItem {}

impl ResourceKind for ContentLibraryItem {
    type Spec = ContentLibraryItemSpec;
    type Phase = ItemPhase;
    type WireStatus = ContentLibraryItemStatus;

    const KIND: &'static str = "ContentLibraryItem";
    const LIST_KIND: &'static str = "ContentLibraryItemList";
    const SHORT_NAME: &'static str = "clitem";
    const SCOPE: Scope = Scope::Namespaced;
}

impl ResourceKind for ClusterContentLibraryItem {
    type Spec = ContentLibraryItemSpec;
    type Phase = ItemPhase;
    type WireStatus = ContentLibraryItemStatus;

    const KIND: &'static str = "ClusterContentLibraryItem";
    const LIST_KIND: &'static str = "ClusterContentLibraryItemList";
    const SHORT_NAME: &'static str = "clusterclitem";
    const SCOPE: Scope = Scope::Cluster;
}
