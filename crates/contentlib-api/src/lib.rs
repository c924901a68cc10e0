//! Content library resource schema and reconciliation status model.
//!
//! This crate describes the desired and observed state of content library
//! resources (libraries, items and upload requests) and the status model a
//! controller uses to report convergence against a backing provider.
//!
//! # Building blocks
//!
//! - **Condition ledger** ([`condition`]): typed, timestamped health signals,
//!   unique by type, idempotent to re-apply
//! - **Identity tracking** ([`identity`]): one-shot UUID binding and opaque
//!   version tokens used as the re-sync signal
//! - **Phase machines** ([`phase`]): item and upload lifecycles with runtime
//!   edge validation
//! - **Status aggregator** ([`status`]): readiness derived purely from phase,
//!   binding and conditions
//! - **Immutable spec contract** ([`immutable`]): drift detection on
//!   identity-defining spec fields
//!
//! # Readiness
//!
//! ```text
//! ready = phase ∈ {Created, Updated, Deleted, Uploaded}
//!         ∧ backing uuid bound
//!         ∧ no blocking condition is False
//! ```

#![doc = include_str!("../README.md")]
#![forbid(unsafe_code)]

pub mod condition;
pub mod error;
pub mod identity;
pub mod immutable;
pub mod kinds;
pub mod meta;
pub mod phase;
pub mod registry;
pub mod status;

pub use condition::{Condition, ConditionStatus, ConditionedResource, Conditions};
pub use error::{ApiError, ApiResult, ConsistencyError, DriftError, FieldDrift};
pub use identity::{BackingBinding, BackingIdentity, BindOutcome, LibraryType, VersionChanges};
pub use immutable::{accepted_identity, record_drift, validate_spec_unchanged, SpecContract};
pub use kinds::{
    ClusterContentLibrary, ClusterContentLibraryItem, ContentLibrary, ContentLibraryItem,
    ContentLibraryItemSpec, ContentLibrarySpec, ContentUploadRequest, ContentUploadRequestSpec,
    LibraryItem, Resource, ResourceKind, StorageBacking, StorageType, UploadSpec,
};
pub use meta::{ObjectKey, ObjectMeta, Scope, Uid};
pub use phase::{ItemPhase, LifecyclePhase, UploadPhase};
pub use registry::{AnyResource, KindInfo, KindRegistry};
pub use status::{derive_ready, Status};
