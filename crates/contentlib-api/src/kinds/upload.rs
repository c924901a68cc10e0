//! `ContentUploadRequest`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::condition::Conditions;
use crate::error::{ApiError, ApiResult};
use crate::identity::BackingBinding;
use crate::immutable::SpecContract;
use crate::meta::Scope;
use crate::phase::UploadPhase;
use crate::status::Status;

use super::{non_empty, private, ResourceKind};

/// Desired state of the item receiving the upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LibraryItem {
    /// Item name.
    pub name: String,
    /// Human-readable description.
    #[serde(default)]
    pub description: String,
    /// Replace the content of an existing item with the same name.
    #[serde(default)]
    pub overwrite: bool,
}

/// Where the uploaded content comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadSpec {
    /// How the content is retrieved, e.g. `PUSH` or `PULL`.
    pub source_type: String,
    /// Endpoint the content is retrieved from.
    pub source_endpoint: String,
}

/// Desired state of an upload request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentUploadRequestSpec {
    /// Name of the target library.
    pub library_name: String,
    /// Target item.
    pub library_item: LibraryItem,
    /// Content source.
    pub upload_spec: UploadSpec,
}

impl SpecContract for ContentUploadRequestSpec {
    fn identity_fields(&self) -> Vec<(&'static str, String)> {
        vec![
            ("spec.libraryName", self.library_name.clone()),
            ("spec.libraryItem.name", self.library_item.name.clone()),
            ("spec.uploadSpec.sourceEndpoint", self.upload_spec.source_endpoint.clone()),
        ]
    }

    fn validate(&self) -> ApiResult<()> {
        if self.library_name.is_empty() {
            return Err(ApiError::invalid_spec("spec.libraryName is required"));
        }
        if self.library_item.name.is_empty() {
            return Err(ApiError::invalid_spec("spec.libraryItem.name is required"));
        }
        if self.upload_spec.source_endpoint.is_empty() {
            return Err(ApiError::invalid_spec("spec.uploadSpec.sourceEndpoint is required"));
        }
        Ok(())
    }
}

/// Serialised status of an upload request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentUploadRequestStatus {
    /// Provider identifier of the uploaded item.
    #[serde(rename = "itemUUID", default, skip_serializing_if = "Option::is_none")]
    pub item_uuid: Option<String>,
    /// Metadata version token.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item_version: Option<String>,
    /// Content version token.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_version: Option<String>,
    /// Item type.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item_type: Option<String>,
    /// Upload phase.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<UploadPhase>,
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

impl From<Status<UploadPhase>> for ContentUploadRequestStatus {
    fn from(status: Status<UploadPhase>) -> Self {
        Self {
            item_uuid: non_empty(status.backing.uuid()),
            item_version: non_empty(status.backing.metadata_version()),
            content_version: non_empty(status.backing.content_version()),
            item_type: status.item_type,
            phase: status.phase,
            ready: status.ready,
            accepted_identity: status.accepted_identity,
            conditions: status.conditions,
        }
    }
}

impl From<ContentUploadRequestStatus> for Status<UploadPhase> {
    fn from(wire: ContentUploadRequestStatus) -> Self {
        Self {
            backing: BackingBinding::from_parts(
                wire.item_uuid,
                None,
                wire.item_version,
                wire.content_version,
            ),
            item_type: wire.item_type,
            cached: false,
            phase: wire.phase,
            ready: wire.ready,
            accepted_identity: wire.accepted_identity,
            conditions: wire.conditions,
        }
    }
}

/// Request to upload content into a library item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContentUploadRequest;

impl private::Sealed for ContentUploadRequest {}

impl ResourceKind for ContentUploadRequest {
    type Spec = ContentUploadRequestSpec;
    type Phase = UploadPhase;
    type WireStatus = ContentUploadRequestStatus;

    const KIND: &'static str = "ContentUploadRequest";
    const LIST_KIND: &'static str = "ContentUploadRequestList";
    const SHORT_NAME: &'static str = "uploadreq";
    const SCOPE: Scope = Scope::Namespaced;
}
