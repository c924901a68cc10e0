//! Immutable spec contract.
//!
//! Identity-defining spec fields are fixed once a spec is accepted. Changes
//! are rejected by admission policy elsewhere; this module only detects drift
//! so it can be surfaced as a `SpecImmutable=False` condition.

use std::collections::BTreeMap;

use crate::condition::{reasons, types, Conditions};
use crate::error::{ApiResult, DriftError, FieldDrift};

/// A spec with identity-defining fields.
pub trait SpecContract {
    /// Identity-defining fields as `(wire path, value)` pairs.
    fn identity_fields(&self) -> Vec<(&'static str, String)>;

    /// Structural validation of a freshly submitted spec.
    fn validate(&self) -> ApiResult<()> {
        Ok(())
    }
}

/// Check that identity-defining fields are unchanged between the accepted
/// and the observed spec.
pub fn validate_spec_unchanged<S: SpecContract>(accepted: &S, observed: &S) -> Result<(), DriftError> {
    let fields: Vec<FieldDrift> = accepted
        .identity_fields()
        .into_iter()
        .zip(observed.identity_fields())
        .filter(|((_, a), (_, o))| a != o)
        .map(|((field, accepted), (_, observed))| FieldDrift {
            field,
            accepted,
            observed,
        })
        .collect();

    if fields.is_empty() {
        Ok(())
    } else {
        Err(DriftError { fields })
    }
}

/// Identity fields of `spec` keyed by wire path, as shown in status.
pub fn accepted_identity<S: SpecContract>(spec: &S) -> BTreeMap<String, String> {
    spec.identity_fields()
        .into_iter()
        .map(|(field, value)| (field.to_owned(), value))
        .collect()
}

/// Record the outcome of a drift check on the `SpecImmutable` condition.
///
/// The message keeps the accepted values visible to readers.
pub fn record_drift(conditions: &mut Conditions, result: &Result<(), DriftError>) {
    match result {
        Ok(()) => conditions.mark_true(types::SPEC_IMMUTABLE, "", ""),
        Err(drift) => conditions.mark_false(
            types::SPEC_IMMUTABLE,
            reasons::SPEC_CHANGED,
            format!("{drift}; keeping accepted values"),
        ),
    }
}
