//! Backing identity binding and version tracking.
//!
//! A resource is bound to exactly one backing provider object, identified by
//! a UUID the provider assigns. Versions are opaque tokens compared only for
//! equality; a changed token is the signal to re-sync metadata or content.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ConsistencyError;

/// Kind of library on the backing provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LibraryType {
    /// Library content is managed locally.
    Local,
    /// Library content is synchronised from a publisher.
    Subscribed,
}

impl LibraryType {
    /// Get the type as a static string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Local => "Local",
            Self::Subscribed => "Subscribed",
        }
    }
}

impl fmt::Display for LibraryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A backing object as reported by the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackingIdentity {
    /// Provider-assigned identifier.
    pub uuid: String,
    /// Library type, for library objects.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub library_type: Option<LibraryType>,
    /// Metadata version token.
    pub metadata_version: String,
    /// Content version token, for items.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_version: Option<String>,
    /// Item type, e.g. `ovf`, for items.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item_type: Option<String>,
    /// Whether item files are present on provider storage.
    #[serde(default)]
    pub cached: bool,
}

/// Outcome of a successful [`BackingBinding::bind`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindOutcome {
    /// The resource was unbound and is now bound.
    Bound,
    /// The resource was already bound to the same UUID.
    Unchanged,
}

/// Which version tokens changed in an [`BackingBinding::update_versions`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VersionChanges {
    /// Metadata version changed.
    pub metadata: bool,
    /// Content version changed.
    pub content: bool,
}

impl VersionChanges {
    /// Whether anything changed.
    #[must_use]
    pub const fn any(&self) -> bool {
        self.metadata || self.content
    }
}

/// Binding state held in a resource's status.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BackingBinding {
    uuid: Option<String>,
    /// Library type reported by the provider.
    pub library_type: Option<LibraryType>,
    metadata_version: Option<String>,
    content_version: Option<String>,
}

impl BackingBinding {
    /// Reconstruct a binding from persisted fields.
    #[must_use]
    pub fn from_parts(
        uuid: Option<String>,
        library_type: Option<LibraryType>,
        metadata_version: Option<String>,
        content_version: Option<String>,
    ) -> Self {
        Self {
            uuid: uuid.filter(|u| !u.is_empty()),
            library_type,
            metadata_version: metadata_version.filter(|v| !v.is_empty()),
            content_version: content_version.filter(|v| !v.is_empty()),
        }
    }

    /// Bound UUID, if any.
    #[must_use]
    pub fn uuid(&self) -> Option<&str> {
        self.uuid.as_deref()
    }

    /// Whether a UUID is bound.
    #[must_use]
    pub const fn is_bound(&self) -> bool {
        self.uuid.is_some()
    }

    /// Last observed metadata version.
    #[must_use]
    pub fn metadata_version(&self) -> Option<&str> {
        self.metadata_version.as_deref()
    }

    /// Last observed content version.
    #[must_use]
    pub fn content_version(&self) -> Option<&str> {
        self.content_version.as_deref()
    }

    /// Bind a provider UUID.
    ///
    /// Binding the same UUID again is a no-op. Binding a different UUID fails:
    /// the backing object was deleted and recreated out of band and needs an
    /// operator to decide what the resource should point at.
    pub fn bind(&mut self, uuid: &str) -> Result<BindOutcome, ConsistencyError> {
        match &self.uuid {
            Some(bound) if bound == uuid => Ok(BindOutcome::Unchanged),
            Some(bound) => Err(ConsistencyError {
                bound: bound.clone(),
                observed: uuid.to_owned(),
            }),
            None => {
                self.uuid = Some(uuid.to_owned());
                Ok(BindOutcome::Bound)
            }
        }
    }

    /// Replace the binding after the controller itself recreated a missing
    /// backing object.
    ///
    /// Version tokens belong to the old object and are cleared. Returns the
    /// previous UUID.
    pub fn rebind_recreated(&mut self, uuid: &str) -> Option<String> {
        self.metadata_version = None;
        self.content_version = None;
        self.uuid.replace(uuid.to_owned())
    }

    /// Compare incoming version tokens against stored ones and store them.
    ///
    /// A first observation counts as a change. `content_version` of `None`
    /// means the object has no content version, and leaves the stored token
    /// untouched.
    pub fn update_versions(
        &mut self,
        metadata_version: &str,
        content_version: Option<&str>,
    ) -> VersionChanges {
        let metadata = self.metadata_version.as_deref() != Some(metadata_version);
        if metadata {
            self.metadata_version = Some(metadata_version.to_owned());
        }

        let content = match content_version {
            Some(v) if self.content_version.as_deref() != Some(v) => {
                self.content_version = Some(v.to_owned());
                true
            }
            _ => false,
        };

        VersionChanges { metadata, content }
    }

    /// Observe a full identity: bind its UUID, record its library type and
    /// versions.
    pub fn observe(&mut self, identity: &BackingIdentity) -> Result<VersionChanges, ConsistencyError> {
        self.bind(&identity.uuid)?;
        if identity.library_type.is_some() {
            self.library_type = identity.library_type;
        }
        Ok(self.update_versions(
            &identity.metadata_version,
            identity.content_version.as_deref(),
        ))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn identity(uuid: &str, metadata: &str, content: Option<&str>) -> BackingIdentity {
        BackingIdentity {
            uuid: uuid.to_owned(),
            library_type: None,
            metadata_version: metadata.to_owned(),
            content_version: content.map(ToOwned::to_owned),
            item_type: Some("ovf".to_owned()),
            cached: true,
        }
    }

    #[test]
    fn bind_once() {
        let mut binding = BackingBinding::default();
        assert!(!binding.is_bound());

        assert_eq!(binding.bind("abc-123").unwrap(), BindOutcome::Bound);
        assert_eq!(binding.bind("abc-123").unwrap(), BindOutcome::Unchanged);
        assert_eq!(binding.uuid(), Some("abc-123"));
    }

    #[test]
    fn rebinding_different_uuid_is_consistency_error() {
        let mut binding = BackingBinding::default();
        binding.bind("abc-123").unwrap();

        let err = binding.bind("xyz-999").unwrap_err();
        assert_eq!(err.bound, "abc-123");
        assert_eq!(err.observed, "xyz-999");
        assert_eq!(binding.uuid(), Some("abc-123"));
    }

    #[test]
    fn version_changes_are_tracked_per_field() {
        let mut binding = BackingBinding::default();

        let first = binding.update_versions("1", Some("1"));
        assert_eq!(first, VersionChanges { metadata: true, content: true });

        let same = binding.update_versions("1", Some("1"));
        assert!(!same.any());

        let content_only = binding.update_versions("1", Some("2"));
        assert_eq!(content_only, VersionChanges { metadata: false, content: true });

        let metadata_only = binding.update_versions("2", Some("2"));
        assert_eq!(metadata_only, VersionChanges { metadata: true, content: false });
        assert_eq!(binding.metadata_version(), Some("2"));
        assert_eq!(binding.content_version(), Some("2"));
    }

    #[test]
    fn missing_content_version_keeps_stored_token() {
        let mut binding = BackingBinding::default();
        binding.update_versions("1", Some("7"));
        let changes = binding.update_versions("1", None);
        assert!(!changes.any());
        assert_eq!(binding.content_version(), Some("7"));
    }

    #[test]
    fn observe_binds_and_tracks() {
        let mut binding = BackingBinding::default();
        let changes = binding.observe(&identity("abc-123", "1", Some("1"))).unwrap();
        assert!(changes.metadata && changes.content);

        let err = binding.observe(&identity("xyz-999", "1", Some("1"))).unwrap_err();
        assert_eq!(err.observed, "xyz-999");
    }

    #[test]
    fn rebind_after_recreate_resets_versions() {
        let mut binding = BackingBinding::default();
        binding.observe(&identity("abc-123", "4", Some("9"))).unwrap();

        let previous = binding.rebind_recreated("def-456");
        assert_eq!(previous.as_deref(), Some("abc-123"));
        assert_eq!(binding.uuid(), Some("def-456"));
        assert!(binding.metadata_version().is_none());
        assert!(binding.content_version().is_none());
    }

    #[test]
    fn from_parts_treats_empty_strings_as_absent() {
        let binding = BackingBinding::from_parts(Some(String::new()), None, Some(String::new()), None);
        assert!(!binding.is_bound());
        assert!(binding.metadata_version().is_none());
    }
}
