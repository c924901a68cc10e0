//! Error types for contentlib-control.

use contentlib_api::{ApiError, ConsistencyError, ObjectKey};

use crate::provider::ProviderError;

/// Result type alias using [`ControlError`].
pub type ControlResult<T> = Result<T, ControlError>;

/// Errors that can occur in the controller.
#[derive(Debug, thiserror::Error)]
pub enum ControlError {
    /// Schema or status model error.
    #[error(transparent)]
    Api(#[from] ApiError),

    /// The provider reported a different UUID for a bound resource.
    #[error(transparent)]
    Consistency(#[from] ConsistencyError),

    /// Backing provider call failed.
    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),

    /// Resource not found in the store.
    #[error("resource not found: {0}")]
    NotFound(ObjectKey),

    /// Resource already exists in the store.
    #[error("resource already exists: {0}")]
    AlreadyExists(ObjectKey),

    /// A status write was addressed at an object that has since been
    /// replaced by a different one with the same key.
    #[error("status conflict on {key}: expected uid {expected}, found {found}")]
    Conflict {
        /// Resource key.
        key: ObjectKey,
        /// UID the writer observed.
        expected: String,
        /// UID currently stored.
        found: String,
    },

    /// The reconcile cycle was cancelled before a side effect was issued.
    #[error("reconcile of {0} cancelled")]
    Cancelled(ObjectKey),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ControlError {
    /// Create an internal error.
    #[must_use]
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Create a configuration error.
    #[must_use]
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Whether this error came from the backing provider.
    #[must_use]
    pub const fn is_provider(&self) -> bool {
        matches!(self, Self::Provider(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_errors_convert() {
        let err: ControlError = ProviderError::Unavailable("connection refused".to_owned()).into();
        assert!(err.is_provider());
        assert_eq!(
            err.to_string(),
            "provider error: provider unavailable: connection refused"
        );
    }

    #[test]
    fn consistency_error_is_transparent() {
        let err: ControlError = ConsistencyError {
            bound: "abc-123".to_owned(),
            observed: "xyz-999".to_owned(),
        }
        .into();
        assert_eq!(
            err.to_string(),
            "backing uuid conflict: bound to abc-123, provider reported xyz-999"
        );
    }

    #[test]
    fn conflict_names_both_uids() {
        let err = ControlError::Conflict {
            key: ObjectKey::namespaced("ns", "ubuntu"),
            expected: "a".to_owned(),
            found: "b".to_owned(),
        };
        assert_eq!(
            err.to_string(),
            "status conflict on ns/ubuntu: expected uid a, found b"
        );
    }
}
