//! Observed status and the readiness aggregator.
//!
//! A [`Status`] is owned by the controller. It is recomputed as a whole and
//! published as a single snapshot, so readers never see readiness that
//! disagrees with the phase or conditions next to it.

use std::collections::BTreeMap;

use crate::condition::{ConditionedResource, Conditions};
use crate::error::ApiResult;
use crate::identity::BackingBinding;
use crate::phase::LifecyclePhase;

/// Observed state of a resource, generic over its phase machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Status<P: LifecyclePhase> {
    /// Backing object binding and version tokens.
    pub backing: BackingBinding,
    /// Item type reported by the provider.
    pub item_type: Option<String>,
    /// Whether item files are on provider storage.
    pub cached: bool,
    /// Current lifecycle phase; `None` before the first observation.
    pub phase: Option<P>,
    /// Derived readiness. Only [`Status::recompute`] sets this.
    pub ready: bool,
    /// Identity fields of the accepted spec, keyed by wire path. Edits to
    /// these fields are never applied, so this is what the backing object
    /// is reconciled against.
    pub accepted_identity: BTreeMap<String, String>,
    /// Condition ledger.
    pub conditions: Conditions,
}

impl<P: LifecyclePhase> Default for Status<P> {
    fn default() -> Self {
        Self {
            backing: BackingBinding::default(),
            item_type: None,
            cached: false,
            phase: None,
            ready: false,
            accepted_identity: BTreeMap::new(),
            conditions: Conditions::new(),
        }
    }
}

impl<P: LifecyclePhase> Status<P> {
    /// Move to `to` along a defined edge.
    ///
    /// Returns `Ok(true)` if the phase changed.
    pub fn transition(&mut self, to: P) -> ApiResult<bool> {
        P::advance(&mut self.phase, to)
    }

    /// Produce the status with readiness derived from phase, binding and
    /// conditions. Pure: the same input always yields the same output.
    #[must_use]
    pub fn recompute(&self) -> Self {
        let mut next = self.clone();
        next.ready = derive_ready(next.phase, next.backing.is_bound(), &next.conditions);
        next
    }
}

/// Readiness rule.
///
/// Ready iff the phase is stable, a backing object is bound and no blocking
/// condition is `False`. A stable phase alone is not enough: an unbound
/// resource is never ready.
#[must_use]
pub fn derive_ready<P: LifecyclePhase>(
    phase: Option<P>,
    bound: bool,
    conditions: &Conditions,
) -> bool {
    phase.is_some_and(|p| p.is_stable()) && bound && conditions.blocking_failure().is_none()
}

impl<P: LifecyclePhase> ConditionedResource for Status<P> {
    fn conditions(&self) -> &Conditions {
        &self.conditions
    }

    fn conditions_mut(&mut self) -> &mut Conditions {
        &mut self.conditions
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::condition::{reasons, types, ConditionStatus};
    use crate::phase::{ItemPhase, UploadPhase};
    use proptest::prelude::*;

    #[test]
    fn new_status_is_not_ready() {
        let status = Status::<ItemPhase>::default().recompute();
        assert!(!status.ready);
        assert!(status.conditions.is_empty());
    }

    #[test]
    fn created_and_bound_is_ready() {
        let mut status = Status::<ItemPhase>::default();
        status.transition(ItemPhase::Creating).unwrap();
        status.backing.bind("abc-123").unwrap();
        status.transition(ItemPhase::Created).unwrap();

        assert!(status.recompute().ready);
    }

    #[test]
    fn stable_but_unbound_is_not_ready() {
        let mut status = Status::<ItemPhase>::default();
        status.transition(ItemPhase::Creating).unwrap();
        status.transition(ItemPhase::Created).unwrap();

        assert!(!status.recompute().ready);
        assert!(!derive_ready(Some(UploadPhase::Uploaded), false, &Conditions::new()));
        assert!(derive_ready(Some(UploadPhase::Uploaded), true, &Conditions::new()));
    }

    #[test]
    fn blocking_condition_prevents_ready() {
        let mut status = Status::<ItemPhase>::default();
        status.transition(ItemPhase::Creating).unwrap();
        status.backing.bind("abc-123").unwrap();
        status.transition(ItemPhase::Created).unwrap();
        status.set_condition(
            types::BACKING_BOUND,
            ConditionStatus::False,
            reasons::CONSISTENCY_ERROR,
            "uuid changed",
        );

        assert!(!status.recompute().ready);
    }

    #[test]
    fn recompute_clears_stale_ready() {
        let mut status = Status::<UploadPhase>::default();
        status.ready = true;
        status.transition(UploadPhase::Uploading).unwrap();
        assert!(!status.recompute().ready);
    }

    fn arb_item_phase() -> impl Strategy<Value = Option<ItemPhase>> {
        prop::option::of(prop::sample::select(ItemPhase::ALL.to_vec()))
    }

    fn arb_conditions() -> impl Strategy<Value = Conditions> {
        let ty = prop::sample::select(vec![
            types::BACKING_BOUND,
            types::PROVIDER_AVAILABLE,
            types::SPEC_IMMUTABLE,
            types::CONTENT_SYNCED,
            types::UPLOAD_COMPLETED,
        ]);
        let status = prop_oneof![
            Just(ConditionStatus::True),
            Just(ConditionStatus::False),
            Just(ConditionStatus::Unknown),
        ];
        prop::collection::vec((ty, status), 0..8).prop_map(|entries| {
            let mut conditions = Conditions::new();
            for (ty, status) in entries {
                conditions.set(ty, status, "", "");
            }
            conditions
        })
    }

    proptest! {
        /// Property: readiness implies a stable phase and no blocking failure.
        #[test]
        fn prop_ready_implies_stable_and_unblocked(
            phase in arb_item_phase(),
            bound in any::<bool>(),
            conditions in arb_conditions(),
        ) {
            let mut status = Status::<ItemPhase>::default();
            status.phase = phase;
            if bound {
                status.backing.bind("abc-123").unwrap();
            }
            status.conditions = conditions;

            let status = status.recompute();
            if status.ready {
                prop_assert!(status.phase.is_some_and(|p| p.is_stable()));
                prop_assert!(status.conditions.blocking_failure().is_none());
            }
        }

        /// Property: recomputing twice yields identical output.
        #[test]
        fn prop_recompute_is_idempotent(
            phase in arb_item_phase(),
            conditions in arb_conditions(),
        ) {
            let mut status = Status::<ItemPhase>::default();
            status.phase = phase;
            status.backing.bind("abc-123").unwrap();
            status.conditions = conditions;

            let once = status.recompute();
            let twice = once.recompute();
            prop_assert_eq!(&once, &twice);
            prop_assert_eq!(once, status.recompute());
        }
    }
}
