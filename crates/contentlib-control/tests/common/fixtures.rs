//! Spec and resource builders.

use contentlib_api::{
    ContentLibrarySpec, ContentLibraryItemSpec, ContentUploadRequestSpec, LibraryItem, ObjectKey,
    Resource, ResourceKind, StorageBacking, UploadSpec,
};

pub const NAMESPACE: &str = "vmware-system-images";
pub const LIBRARY: &str = "images";

pub fn library_spec(name: &str) -> ContentLibrarySpec {
    ContentLibrarySpec {
        library_name: name.to_owned(),
        library_description: String::new(),
        storage_backing: StorageBacking::datastore("datastore-42"),
    }
}

pub fn item_spec(item_name: &str) -> ContentLibraryItemSpec {
    ContentLibraryItemSpec {
        content_library_name: LIBRARY.to_owned(),
        item_name: item_name.to_owned(),
        item_description: String::new(),
    }
}

/// Builder for upload request specs.
pub struct UploadBuilder {
    spec: ContentUploadRequestSpec,
}

impl UploadBuilder {
    pub fn new(item_name: &str) -> Self {
        Self {
            spec: ContentUploadRequestSpec {
                library_name: LIBRARY.to_owned(),
                library_item: LibraryItem {
                    name: item_name.to_owned(),
                    description: String::new(),
                    overwrite: false,
                },
                upload_spec: UploadSpec {
                    source_type: "PULL".to_owned(),
                    source_endpoint: format!("https://mirror.example/{item_name}.ova"),
                },
            },
        }
    }

    pub fn overwrite(mut self) -> Self {
        self.spec.library_item.overwrite = true;
        self
    }

    pub fn build(self) -> ContentUploadRequestSpec {
        self.spec
    }
}

pub fn key(name: &str) -> ObjectKey {
    ObjectKey::namespaced(NAMESPACE, name)
}

pub fn resource<K: ResourceKind>(name: &str, spec: K::Spec) -> Resource<K> {
    Resource::new(&key(name), spec).unwrap()
}
