//! Error types for contentlib-api.

/// Result type alias using [`ApiError`].
pub type ApiResult<T> = Result<T, ApiError>;

/// Errors raised by the schema and status model.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ApiError {
    /// Invalid phase transition attempted.
    #[error("invalid phase transition: cannot transition from {from} to {to}")]
    InvalidTransition {
        /// Current phase.
        from: &'static str,
        /// Attempted target phase.
        to: &'static str,
    },

    /// A bound backing UUID was asked to change.
    #[error(transparent)]
    Consistency(#[from] ConsistencyError),

    /// An identity-defining spec field changed after acceptance.
    #[error(transparent)]
    Drift(#[from] DriftError),

    /// The spec failed validation.
    #[error("invalid spec: {0}")]
    InvalidSpec(String),

    /// No kind with this name is registered.
    #[error("unknown kind: {0}")]
    UnknownKind(String),

    /// A kind was registered twice.
    #[error("kind already registered: {0}")]
    DuplicateKind(String),

    /// A serialised object did not match the expected kind or API version.
    #[error("type mismatch: expected {expected}, found {found}")]
    TypeMismatch {
        /// Expected `apiVersion/kind`.
        expected: String,
        /// Found `apiVersion/kind`.
        found: String,
    },

    /// Serialisation error.
    #[error("serialisation error: {0}")]
    Serialisation(String),
}

impl ApiError {
    /// Create an invalid spec error.
    #[must_use]
    pub fn invalid_spec(msg: impl Into<String>) -> Self {
        Self::InvalidSpec(msg.into())
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialisation(err.to_string())
    }
}

/// The backing provider reported a different UUID for an already bound
/// resource, meaning the backing object was deleted and recreated out of band.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("backing uuid conflict: bound to {bound}, provider reported {observed}")]
pub struct ConsistencyError {
    /// UUID currently bound in status.
    pub bound: String,
    /// UUID the caller attempted to bind.
    pub observed: String,
}

/// Identity-defining spec fields differ from the accepted spec.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("immutable spec fields changed: {}", describe(.fields))]
pub struct DriftError {
    /// Every field that drifted.
    pub fields: Vec<FieldDrift>,
}

/// A single drifted field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDrift {
    /// Wire path of the field, e.g. `spec.itemName`.
    pub field: &'static str,
    /// Value accepted on first observation.
    pub accepted: String,
    /// Value seen now.
    pub observed: String,
}

fn describe(fields: &[FieldDrift]) -> String {
    fields
        .iter()
        .map(|f| format!("{} ({:?} -> {:?})", f.field, f.accepted, f.observed))
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drift_error_lists_every_field() {
        let err = DriftError {
            fields: vec![
                FieldDrift {
                    field: "spec.itemName",
                    accepted: "ubuntu".to_owned(),
                    observed: "debian".to_owned(),
                },
                FieldDrift {
                    field: "spec.contentLibraryName",
                    accepted: "lib-a".to_owned(),
                    observed: "lib-b".to_owned(),
                },
            ],
        };

        let msg = err.to_string();
        assert!(msg.contains(r#"spec.itemName ("ubuntu" -> "debian")"#));
        assert!(msg.contains("spec.contentLibraryName"));
    }

    #[test]
    fn consistency_error_wraps_transparently() {
        let err: ApiError = ConsistencyError {
            bound: "abc-123".to_owned(),
            observed: "xyz-999".to_owned(),
        }
        .into();

        assert_eq!(
            err.to_string(),
            "backing uuid conflict: bound to abc-123, provider reported xyz-999"
        );
    }
}
