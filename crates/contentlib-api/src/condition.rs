//! Condition ledger.
//!
//! Every resource carries a set of typed conditions keyed by `type`. The
//! ledger keeps at most one entry per type; setting a condition replaces the
//! prior entry and only advances `lastTransitionTime` when the status value
//! actually changes, so repeating an observation is a no-op.
//!
//! The ledger is not synchronised. Callers serialise mutations for a given
//! resource and publish the result through an atomic status replace.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Well-known condition types.
pub mod types {
    /// The resource is bound to a backing provider object.
    pub const BACKING_BOUND: &str = "BackingBound";
    /// The backing provider answered the last call.
    pub const PROVIDER_AVAILABLE: &str = "ProviderAvailable";
    /// Identity-defining spec fields are unchanged since acceptance.
    pub const SPEC_IMMUTABLE: &str = "SpecImmutable";
    /// Metadata and content versions match the backing object.
    pub const CONTENT_SYNCED: &str = "ContentSynced";
    /// The upload transfer completed.
    pub const UPLOAD_COMPLETED: &str = "UploadCompleted";
    /// The accepted spec passed structural validation.
    pub const SPEC_VALID: &str = "SpecValid";

    /// Condition types whose `False` value forces `ready = false`.
    pub const BLOCKING: &[&str] = &[
        BACKING_BOUND,
        PROVIDER_AVAILABLE,
        SPEC_IMMUTABLE,
        SPEC_VALID,
    ];

    /// Whether a condition type blocks readiness when `False`.
    #[must_use]
    pub fn is_blocking(condition_type: &str) -> bool {
        BLOCKING.contains(&condition_type)
    }
}

/// Well-known condition reasons.
pub mod reasons {
    /// Backing provider call failed or timed out.
    pub const PROVIDER_UNAVAILABLE: &str = "ProviderUnavailable";
    /// Bound UUID conflicts with the one reported by the provider.
    pub const CONSISTENCY_ERROR: &str = "ConsistencyError";
    /// Identity-defining spec field changed.
    pub const SPEC_CHANGED: &str = "SpecChanged";
    /// The backing object went missing and was recreated by the controller.
    pub const RECREATED: &str = "Recreated";
    /// The upload failed on the provider side.
    pub const UPLOAD_FAILED: &str = "UploadFailed";
    /// An item with the requested name exists and overwrite is off.
    pub const ITEM_EXISTS: &str = "ItemExists";
    /// The spec failed structural validation.
    pub const INVALID_SPEC: &str = "InvalidSpec";
    /// Waiting for the provider to confirm a created object.
    pub const AWAITING_CONFIRMATION: &str = "AwaitingConfirmation";
    /// The provider refused the request.
    pub const REJECTED: &str = "Rejected";
}

/// Tri-state value of a condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConditionStatus {
    /// The condition holds.
    True,
    /// The condition does not hold.
    False,
    /// The condition cannot be determined.
    Unknown,
}

impl ConditionStatus {
    /// Get the status as a static string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::True => "True",
            Self::False => "False",
            Self::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for ConditionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A single timestamped health signal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Condition type, unique within a ledger.
    #[serde(rename = "type")]
    pub condition_type: String,
    /// Current value.
    pub status: ConditionStatus,
    /// Machine-readable reason, CamelCase by convention.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub reason: String,
    /// Human-readable message.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
    /// When `status` last changed.
    pub last_transition_time: DateTime<Utc>,
}

impl Condition {
    /// Whether the condition is `True`.
    #[must_use]
    pub fn is_true(&self) -> bool {
        self.status == ConditionStatus::True
    }

    /// Whether the condition is `False`.
    #[must_use]
    pub fn is_false(&self) -> bool {
        self.status == ConditionStatus::False
    }

    /// Whether this condition currently blocks readiness.
    #[must_use]
    pub fn is_blocking_failure(&self) -> bool {
        self.is_false() && types::is_blocking(&self.condition_type)
    }
}

/// Ordered set of conditions, unique by type.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<Condition>", into = "Vec<Condition>")]
pub struct Conditions(Vec<Condition>);

impl Conditions {
    /// Create an empty ledger.
    #[must_use]
    pub const fn new() -> Self {
        Self(Vec::new())
    }

    /// Upsert a condition, stamping transitions with the current time.
    ///
    /// Returns `true` if the status value changed.
    pub fn set(
        &mut self,
        condition_type: &str,
        status: ConditionStatus,
        reason: impl Into<String>,
        message: impl Into<String>,
    ) -> bool {
        self.set_at(condition_type, status, reason, message, Utc::now())
    }

    /// Upsert a condition using `now` as the transition time.
    ///
    /// The timestamp only moves when `status` differs from the stored value.
    /// Reason and message are always replaced.
    pub fn set_at(
        &mut self,
        condition_type: &str,
        status: ConditionStatus,
        reason: impl Into<String>,
        message: impl Into<String>,
        now: DateTime<Utc>,
    ) -> bool {
        let reason = reason.into();
        let message = message.into();

        if let Some(existing) = self
            .0
            .iter_mut()
            .find(|c| c.condition_type == condition_type)
        {
            let changed = existing.status != status;
            if changed {
                existing.status = status;
                existing.last_transition_time = now;
            }
            existing.reason = reason;
            existing.message = message;
            return changed;
        }

        self.0.push(Condition {
            condition_type: condition_type.to_owned(),
            status,
            reason,
            message,
            last_transition_time: now,
        });
        true
    }

    /// Set a condition to `True`.
    pub fn mark_true(&mut self, condition_type: &str, reason: &str, message: impl Into<String>) {
        self.set(condition_type, ConditionStatus::True, reason, message);
    }

    /// Set a condition to `False`.
    pub fn mark_false(&mut self, condition_type: &str, reason: &str, message: impl Into<String>) {
        self.set(condition_type, ConditionStatus::False, reason, message);
    }

    /// Set a condition to `Unknown`.
    pub fn mark_unknown(&mut self, condition_type: &str, reason: &str, message: impl Into<String>) {
        self.set(condition_type, ConditionStatus::Unknown, reason, message);
    }

    /// Look up a condition by type.
    #[must_use]
    pub fn get(&self, condition_type: &str) -> Option<&Condition> {
        self.0.iter().find(|c| c.condition_type == condition_type)
    }

    /// Whether the condition is present and `True`.
    #[must_use]
    pub fn is_true(&self, condition_type: &str) -> bool {
        self.get(condition_type).is_some_and(Condition::is_true)
    }

    /// Whether the condition is present and `False`.
    #[must_use]
    pub fn is_false(&self, condition_type: &str) -> bool {
        self.get(condition_type).is_some_and(Condition::is_false)
    }

    /// Remove a condition, returning it if present.
    pub fn remove(&mut self, condition_type: &str) -> Option<Condition> {
        let idx = self
            .0
            .iter()
            .position(|c| c.condition_type == condition_type)?;
        Some(self.0.remove(idx))
    }

    /// First blocking condition that is `False`, if any.
    #[must_use]
    pub fn blocking_failure(&self) -> Option<&Condition> {
        self.0.iter().find(|c| c.is_blocking_failure())
    }

    /// Iterate over all conditions.
    pub fn iter(&self) -> impl Iterator<Item = &Condition> {
        self.0.iter()
    }

    /// All conditions as a slice, for serialisation.
    #[must_use]
    pub fn as_slice(&self) -> &[Condition] {
        &self.0
    }

    /// Number of conditions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the ledger is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

// Duplicate types in persisted data collapse to the last entry.
impl From<Vec<Condition>> for Conditions {
    fn from(list: Vec<Condition>) -> Self {
        let mut out: Vec<Condition> = Vec::with_capacity(list.len());
        for condition in list {
            if let Some(existing) = out
                .iter_mut()
                .find(|c| c.condition_type == condition.condition_type)
            {
                *existing = condition;
            } else {
                out.push(condition);
            }
        }
        Self(out)
    }
}

impl From<Conditions> for Vec<Condition> {
    fn from(conditions: Conditions) -> Self {
        conditions.0
    }
}

/// Capability shared by every resource variant that reports conditions.
pub trait ConditionedResource {
    /// Current conditions.
    fn conditions(&self) -> &Conditions;

    /// Mutable access to the conditions.
    fn conditions_mut(&mut self) -> &mut Conditions;

    /// Replace the full condition set.
    fn set_conditions(&mut self, conditions: Conditions) {
        *self.conditions_mut() = conditions;
    }

    /// Upsert a single condition.
    fn set_condition(
        &mut self,
        condition_type: &str,
        status: ConditionStatus,
        reason: &str,
        message: &str,
    ) -> bool {
        self.conditions_mut()
            .set(condition_type, status, reason, message)
    }

    /// Look up a condition by type.
    fn get_condition(&self, condition_type: &str) -> Option<&Condition> {
        self.conditions().get(condition_type)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::Duration;
    use proptest::prelude::*;

    fn t0() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2024-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn set_is_idempotent_on_timestamp() {
        let mut conditions = Conditions::new();
        let first = t0();
        let later = first + Duration::seconds(30);

        assert!(conditions.set_at(types::CONTENT_SYNCED, ConditionStatus::True, "Done", "ok", first));
        assert!(!conditions.set_at(types::CONTENT_SYNCED, ConditionStatus::True, "Done", "ok", later));

        let ready = conditions.get(types::CONTENT_SYNCED).unwrap();
        assert_eq!(ready.last_transition_time, first);
        assert_eq!(conditions.len(), 1);
    }

    #[test]
    fn status_change_advances_timestamp() {
        let mut conditions = Conditions::new();
        let first = t0();
        let later = first + Duration::seconds(30);

        conditions.set_at(types::PROVIDER_AVAILABLE, ConditionStatus::True, "", "", first);
        let changed = conditions.set_at(
            types::PROVIDER_AVAILABLE,
            ConditionStatus::False,
            reasons::PROVIDER_UNAVAILABLE,
            "timed out",
            later,
        );

        assert!(changed);
        let c = conditions.get(types::PROVIDER_AVAILABLE).unwrap();
        assert_eq!(c.last_transition_time, later);
        assert_eq!(c.reason, reasons::PROVIDER_UNAVAILABLE);
    }

    #[test]
    fn reason_updates_without_transition() {
        let mut conditions = Conditions::new();
        let first = t0();

        conditions.set_at(types::UPLOAD_COMPLETED, ConditionStatus::False, "A", "a", first);
        conditions.set_at(
            types::UPLOAD_COMPLETED,
            ConditionStatus::False,
            "B",
            "b",
            first + Duration::minutes(1),
        );

        let c = conditions.get(types::UPLOAD_COMPLETED).unwrap();
        assert_eq!(c.reason, "B");
        assert_eq!(c.message, "b");
        assert_eq!(c.last_transition_time, first);
    }

    #[test]
    fn blocking_failure_ignores_non_blocking_types() {
        let mut conditions = Conditions::new();
        conditions.mark_false(types::UPLOAD_COMPLETED, reasons::UPLOAD_FAILED, "checksum");
        assert!(conditions.blocking_failure().is_none());

        conditions.mark_false(types::SPEC_IMMUTABLE, reasons::SPEC_CHANGED, "itemName");
        assert_eq!(
            conditions.blocking_failure().unwrap().condition_type,
            types::SPEC_IMMUTABLE
        );
    }

    #[test]
    fn remove_drops_entry() {
        let mut conditions = Conditions::new();
        conditions.mark_true(types::BACKING_BOUND, "", "");
        assert!(conditions.remove(types::BACKING_BOUND).is_some());
        assert!(conditions.remove(types::BACKING_BOUND).is_none());
        assert!(conditions.is_empty());
    }

    #[test]
    fn wire_format_uses_kubernetes_field_names() {
        let mut conditions = Conditions::new();
        conditions.set_at(types::CONTENT_SYNCED, ConditionStatus::True, "", "", t0());

        let json = serde_json::to_value(&conditions).unwrap();
        assert_eq!(
            json,
            serde_json::json!([{
                "type": "ContentSynced",
                "status": "True",
                "lastTransitionTime": "2024-01-01T00:00:00Z"
            }])
        );
    }

    #[test]
    fn deserialising_duplicates_keeps_last() {
        let json = r#"[
            {"type": "ContentSynced", "status": "False", "lastTransitionTime": "2024-01-01T00:00:00Z"},
            {"type": "BackingBound", "status": "True", "lastTransitionTime": "2024-01-01T00:00:00Z"},
            {"type": "ContentSynced", "status": "True", "lastTransitionTime": "2024-01-02T00:00:00Z"}
        ]"#;

        let conditions: Conditions = serde_json::from_str(json).unwrap();
        assert_eq!(conditions.len(), 2);
        assert!(conditions.is_true(types::CONTENT_SYNCED));
    }

    fn arb_type() -> impl Strategy<Value = &'static str> {
        prop::sample::select(vec![
            types::CONTENT_SYNCED,
            types::BACKING_BOUND,
            types::PROVIDER_AVAILABLE,
            types::SPEC_IMMUTABLE,
            types::UPLOAD_COMPLETED,
        ])
    }

    fn arb_status() -> impl Strategy<Value = ConditionStatus> {
        prop_oneof![
            Just(ConditionStatus::True),
            Just(ConditionStatus::False),
            Just(ConditionStatus::Unknown),
        ]
    }

    proptest! {
        /// Property: no sequence of upserts produces duplicate types.
        #[test]
        fn prop_types_stay_unique(ops in prop::collection::vec((arb_type(), arb_status()), 0..64)) {
            let mut conditions = Conditions::new();
            for (i, (ty, status)) in ops.into_iter().enumerate() {
                let now = t0() + Duration::seconds(i64::try_from(i).unwrap());
                conditions.set_at(ty, status, "R", "m", now);
            }

            let mut seen: Vec<&str> = conditions.iter().map(|c| c.condition_type.as_str()).collect();
            let total = seen.len();
            seen.sort_unstable();
            seen.dedup();
            prop_assert_eq!(seen.len(), total);
        }

        /// Property: repeating an identical upsert never moves the timestamp.
        #[test]
        fn prop_repeat_is_noop(ty in arb_type(), status in arb_status(), offset in 1i64..10_000) {
            let mut conditions = Conditions::new();
            conditions.set_at(ty, status, "R", "m", t0());
            let before = conditions.clone();

            let changed = conditions.set_at(ty, status, "R", "m", t0() + Duration::seconds(offset));
            prop_assert!(!changed);
            prop_assert_eq!(before, conditions);
        }
    }
}
