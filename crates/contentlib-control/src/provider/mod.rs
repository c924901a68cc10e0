//! Backing provider capability.
//!
//! The backing provider is the external virtualization platform that stores
//! content libraries and items. The controller only talks to it through
//! [`BackingProvider`], so the network client can be swapped without touching
//! reconciliation logic. An in-memory implementation is provided for tests
//! and local runs.

mod memory;

pub use memory::MemoryProvider;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use contentlib_api::{
    BackingIdentity, ContentLibraryItemSpec, ContentLibrarySpec, ContentUploadRequestSpec,
    SpecContract, StorageBacking,
};

use crate::config::{ProviderConfig, ProviderType};

/// Result type alias using [`ProviderError`].
pub type ProviderResult<T> = Result<T, ProviderError>;

/// Errors returned by a backing provider.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProviderError {
    /// The backing object does not exist.
    #[error("backing object not found")]
    NotFound,

    /// The provider could not be reached or refused service.
    #[error("provider unavailable: {0}")]
    Unavailable(String),

    /// The call did not complete in time.
    #[error("provider call timed out after {0:?}")]
    Timeout(Duration),

    /// The provider rejected the request as invalid.
    #[error("provider rejected request: {0}")]
    Rejected(String),
}

impl ProviderError {
    /// Whether retrying the same call may succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_) | Self::Timeout(_))
    }
}

/// Declared identity used to look a backing object up by name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ResolveKey {
    /// A library, by provider-side name.
    Library {
        /// Library name.
        name: String,
    },
    /// An item inside a library.
    Item {
        /// Containing library name.
        library_name: String,
        /// Item name.
        item_name: String,
    },
}

impl fmt::Display for ResolveKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Library { name } => write!(f, "library {name}"),
            Self::Item {
                library_name,
                item_name,
            } => write!(f, "item {library_name}/{item_name}"),
        }
    }
}

/// Desired state pushed to the provider on create or update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackingSpec {
    /// Library.
    Library {
        /// Library name.
        name: String,
        /// Description.
        description: String,
        /// Storage backing.
        storage: StorageBacking,
    },
    /// Library item without content.
    Item {
        /// Containing library name.
        library_name: String,
        /// Item name.
        item_name: String,
        /// Description.
        description: String,
    },
    /// Upload of content into a (possibly existing) item.
    Upload {
        /// Target library name.
        library_name: String,
        /// Target item name.
        item_name: String,
        /// Description.
        description: String,
        /// Replace the content of an existing item.
        overwrite: bool,
        /// How the content is retrieved.
        source_type: String,
        /// Where the content is retrieved from.
        source_endpoint: String,
    },
}

impl BackingSpec {
    /// The resolve key of the object this spec describes.
    #[must_use]
    pub fn resolve_key(&self) -> ResolveKey {
        match self {
            Self::Library { name, .. } => ResolveKey::Library { name: name.clone() },
            Self::Item {
                library_name,
                item_name,
                ..
            }
            | Self::Upload {
                library_name,
                item_name,
                ..
            } => ResolveKey::Item {
                library_name: library_name.clone(),
                item_name: item_name.clone(),
            },
        }
    }
}

/// Version tokens of a backing object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Versions {
    /// Metadata version token.
    pub metadata: String,
    /// Content version token, for items.
    pub content: Option<String>,
}

/// Progress of an upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadState {
    /// Content is still being transferred.
    Uploading,
    /// Transferred content matches the declared source.
    Uploaded,
    /// The transfer failed.
    Failed(String),
}

/// Capability interface to the backing provider.
///
/// Calls are blocking I/O from the controller's point of view; callers wrap
/// them in a timeout and retry policy (see [`crate::retry`]).
#[async_trait]
pub trait BackingProvider: Send + Sync {
    /// Look a backing object up by declared identity.
    async fn resolve(&self, key: &ResolveKey) -> ProviderResult<BackingIdentity>;

    /// Fetch the current version tokens of a bound object.
    async fn fetch_versions(&self, uuid: &str) -> ProviderResult<Versions>;

    /// Create a backing object, returning its UUID.
    async fn create(&self, spec: &BackingSpec) -> ProviderResult<String>;

    /// Push mutable fields to an existing object, returning its UUID.
    async fn update(&self, uuid: &str, spec: &BackingSpec) -> ProviderResult<String>;

    /// Delete a backing object.
    async fn delete(&self, uuid: &str) -> ProviderResult<()>;

    /// Progress of the upload into the item `uuid`.
    async fn upload_status(&self, uuid: &str) -> ProviderResult<UploadState>;
}

/// Create a provider from configuration.
#[must_use]
pub fn create_provider(config: &ProviderConfig) -> Arc<dyn BackingProvider> {
    match config.provider_type {
        ProviderType::Memory => Arc::new(MemoryProvider::new()),
    }
}

/// Maps a declared spec onto provider requests.
pub trait ProviderSpec: SpecContract {
    /// Identity to resolve the backing object by.
    fn resolve_key(&self) -> ResolveKey;

    /// Desired state to push on create or update.
    fn backing_spec(&self) -> BackingSpec;

    /// Copy fields that may change after acceptance from `observed`.
    ///
    /// Returns whether anything changed.
    fn adopt_mutable(&mut self, observed: &Self) -> bool;
}

impl ProviderSpec for ContentLibrarySpec {
    fn resolve_key(&self) -> ResolveKey {
        ResolveKey::Library {
            name: self.library_name.clone(),
        }
    }

    fn backing_spec(&self) -> BackingSpec {
        BackingSpec::Library {
            name: self.library_name.clone(),
            description: self.library_description.clone(),
            storage: self.storage_backing.clone(),
        }
    }

    fn adopt_mutable(&mut self, observed: &Self) -> bool {
        if self.library_description == observed.library_description {
            return false;
        }
        self.library_description.clone_from(&observed.library_description);
        true
    }
}

impl ProviderSpec for ContentLibraryItemSpec {
    fn resolve_key(&self) -> ResolveKey {
        ResolveKey::Item {
            library_name: self.content_library_name.clone(),
            item_name: self.item_name.clone(),
        }
    }

    fn backing_spec(&self) -> BackingSpec {
        BackingSpec::Item {
            library_name: self.content_library_name.clone(),
            item_name: self.item_name.clone(),
            description: self.item_description.clone(),
        }
    }

    fn adopt_mutable(&mut self, observed: &Self) -> bool {
        if self.item_description == observed.item_description {
            return false;
        }
        self.item_description.clone_from(&observed.item_description);
        true
    }
}

impl ProviderSpec for ContentUploadRequestSpec {
    fn resolve_key(&self) -> ResolveKey {
        ResolveKey::Item {
            library_name: self.library_name.clone(),
            item_name: self.library_item.name.clone(),
        }
    }

    fn backing_spec(&self) -> BackingSpec {
        BackingSpec::Upload {
            library_name: self.library_name.clone(),
            item_name: self.library_item.name.clone(),
            description: self.library_item.description.clone(),
            overwrite: self.library_item.overwrite,
            source_type: self.upload_spec.source_type.clone(),
            source_endpoint: self.upload_spec.source_endpoint.clone(),
        }
    }

    // An upload is a one-shot request; nothing is pushed after it starts.
    fn adopt_mutable(&mut self, _observed: &Self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contentlib_api::{LibraryItem, UploadSpec};

    #[test]
    fn transient_errors() {
        assert!(ProviderError::Unavailable("down".to_owned()).is_transient());
        assert!(ProviderError::Timeout(Duration::from_secs(1)).is_transient());
        assert!(!ProviderError::NotFound.is_transient());
        assert!(!ProviderError::Rejected("bad".to_owned()).is_transient());
    }

    #[test]
    fn item_spec_maps_to_item_key() {
        let spec = ContentLibraryItemSpec {
            content_library_name: "images".to_owned(),
            item_name: "ubuntu".to_owned(),
            item_description: String::new(),
        };
        let key = ResolveKey::Item {
            library_name: "images".to_owned(),
            item_name: "ubuntu".to_owned(),
        };
        assert_eq!(spec.resolve_key(), key);
        assert_eq!(spec.backing_spec().resolve_key(), key);
        assert_eq!(key.to_string(), "item images/ubuntu");
    }

    #[test]
    fn upload_targets_its_item() {
        let spec = ContentUploadRequestSpec {
            library_name: "images".to_owned(),
            library_item: LibraryItem {
                name: "ubuntu".to_owned(),
                description: String::new(),
                overwrite: true,
            },
            upload_spec: UploadSpec {
                source_type: "PULL".to_owned(),
                source_endpoint: "https://mirror.example/ubuntu.ova".to_owned(),
            },
        };
        assert_eq!(
            spec.resolve_key(),
            ResolveKey::Item {
                library_name: "images".to_owned(),
                item_name: "ubuntu".to_owned(),
            }
        );
        assert!(matches!(
            spec.backing_spec(),
            BackingSpec::Upload { overwrite: true, .. }
        ));
    }

    #[test]
    fn description_is_adopted_identity_is_not() {
        let mut accepted = ContentLibrarySpec {
            library_name: "images".to_owned(),
            library_description: "old".to_owned(),
            storage_backing: StorageBacking::datastore("ds-1"),
        };
        let mut observed = accepted.clone();
        observed.library_description = "new".to_owned();
        observed.library_name = "renamed".to_owned();

        assert!(accepted.adopt_mutable(&observed));
        assert_eq!(accepted.library_description, "new");
        assert_eq!(accepted.library_name, "images");
        assert!(!accepted.adopt_mutable(&observed));
    }
}
