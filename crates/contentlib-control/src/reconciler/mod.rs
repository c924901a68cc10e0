//! Reconcilers.
//!
//! A reconciler runs one observation cycle for one resource: it reads the
//! resource, talks to the backing provider, folds every outcome into the
//! status (phase, binding, conditions) and writes the recomputed status back
//! in a single replace. Failures for one resource never escape as panics;
//! they surface as conditions and a requeue.

mod lifecycle;
mod upload;

pub use lifecycle::LifecycleReconciler;
pub use upload::UploadReconciler;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use contentlib_api::condition::{reasons, types};
use contentlib_api::{
    ConditionStatus, Conditions, LifecyclePhase, ObjectKey, Resource, ResourceKind, Status, Uid,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{ControlError, ControlResult};
use crate::provider::{BackingProvider, BackingSpec, ProviderError, ProviderResult, ProviderSpec};
use crate::retry::RetryPolicy;
use crate::store::ResourceStore;

/// What the controller should do with a resource after a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Run another cycle after the delay.
    Requeue(Duration),
    /// Run another cycle after a delay growing with consecutive failures.
    Backoff,
    /// Nothing to do until the resource changes or a resync.
    AwaitChange,
}

/// Runs observation cycles for resources of kind `K`.
#[async_trait]
pub trait Reconcile<K: ResourceKind>: Send + Sync {
    /// Run one cycle for the resource at `key`.
    async fn reconcile(&self, key: &ObjectKey, cancel: &CancellationToken) -> ControlResult<Action>;
}

/// Per-cycle context: which object is being reconciled, whether the
/// cycle should stop before its next side effect, and whether the provider
/// has answered during it.
pub struct Context<K: ResourceKind> {
    /// Resource key.
    pub key: ObjectKey,
    /// UID of the object the cycle started on.
    pub uid: Uid,
    store: Arc<dyn ResourceStore<K>>,
    cancel: CancellationToken,
    reached: AtomicBool,
}

impl<K: ResourceKind> Context<K> {
    /// Create a context for `resource`.
    #[must_use]
    pub fn new(
        resource: &Resource<K>,
        store: Arc<dyn ResourceStore<K>>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            key: resource.key(),
            uid: resource.metadata.uid.clone(),
            store,
            cancel,
            reached: AtomicBool::new(false),
        }
    }

    /// Note the outcome of a provider call and pass it through.
    ///
    /// Any answer from the provider counts, including `NotFound` and
    /// `Rejected`; refusals and timeouts do not.
    pub fn observe<T>(&self, result: ProviderResult<T>) -> ProviderResult<T> {
        if !matches!(result, Err(ref e) if e.is_transient()) {
            self.reached.store(true, Ordering::SeqCst);
        }
        result
    }

    /// Whether the provider answered at least once during this cycle.
    #[must_use]
    pub fn provider_reached(&self) -> bool {
        self.reached.load(Ordering::SeqCst)
    }

    /// Check that a create or update may still be issued.
    ///
    /// Fails with [`ControlError::Cancelled`] if the controller is shutting
    /// down, or the object was deleted, replaced or marked for deletion since
    /// the cycle started.
    pub async fn ensure_live(&self) -> ControlResult<()> {
        if self.cancel.is_cancelled() {
            return Err(ControlError::Cancelled(self.key.clone()));
        }
        match self.store.get(&self.key).await? {
            Some(current) if current.metadata.uid == self.uid && !current.is_deleting() => Ok(()),
            _ => {
                debug!(resource = %self.key, "resource changed under reconcile");
                Err(ControlError::Cancelled(self.key.clone()))
            }
        }
    }

    /// The spec accepted on first observation, accepting `resource.spec` if
    /// none was recorded yet.
    pub async fn accepted_spec(&self, resource: &Resource<K>) -> ControlResult<K::Spec> {
        if let Some(spec) = self.store.accepted_spec(&self.key).await? {
            return Ok(spec);
        }
        self.store
            .accept_spec(&self.key, &self.uid, resource.spec.clone())
            .await?;
        debug!(resource = %self.key, "accepted spec");
        Ok(resource.spec.clone())
    }

    /// Record a new accepted spec after its mutable fields were applied.
    pub async fn accept(&self, spec: K::Spec) -> ControlResult<()> {
        self.store.accept_spec(&self.key, &self.uid, spec).await
    }

    /// Recompute `status` and replace the stored snapshot if it changed.
    pub async fn publish(
        &self,
        before: &Status<K::Phase>,
        status: &Status<K::Phase>,
    ) -> ControlResult<()> {
        let next = status.recompute();
        if &next == before {
            return Ok(());
        }
        self.store.replace_status(&self.key, &self.uid, next).await
    }

    /// Remove the resource from the store.
    pub async fn clear_finalizer(&self) -> ControlResult<()> {
        self.store.remove(&self.key).await?;
        info!(resource = %self.key, "finalizer cleared");
        Ok(())
    }
}

/// Move `status` to `to`, logging the transition.
pub(crate) fn set_phase<P: LifecyclePhase>(
    key: &ObjectKey,
    status: &mut Status<P>,
    to: P,
) -> ControlResult<()> {
    let from = status.phase;
    if status.transition(to)? {
        info!(
            resource = %key,
            from = from.map_or("none", |p| p.as_str()),
            to = to.as_str(),
            "phase transition"
        );
    }
    Ok(())
}

/// Check drift against the accepted spec and structural validity.
///
/// Returns the spec to reconcile against and whether its mutable fields
/// changed, or `None` if the accepted spec is invalid. The accepted identity
/// is copied into `status` either way.
pub(crate) fn check_spec<S, P>(accepted: &S, observed: &S, status: &mut Status<P>) -> Option<(S, bool)>
where
    S: ProviderSpec + Clone,
    P: LifecyclePhase,
{
    status.accepted_identity = contentlib_api::accepted_identity(accepted);
    let conditions = &mut status.conditions;

    let drift = contentlib_api::validate_spec_unchanged(accepted, observed);
    contentlib_api::record_drift(conditions, &drift);

    if let Err(err) = accepted.validate() {
        conditions.mark_false(types::SPEC_VALID, reasons::INVALID_SPEC, err.to_string());
        return None;
    }
    conditions.mark_true(types::SPEC_VALID, "", "");

    let mut desired = accepted.clone();
    let mutable_changed = desired.adopt_mutable(observed);
    Some((desired, mutable_changed))
}

/// Create the backing object for `spec`.
///
/// The create itself is never repeated after a timeout. Instead the object
/// is resolved by name, and adopted if the create landed after all.
pub(crate) async fn create_backing<K: ResourceKind>(
    ctx: &Context<K>,
    provider: &dyn BackingProvider,
    retry: &RetryPolicy,
    spec: &BackingSpec,
) -> ProviderResult<String> {
    match ctx.observe(retry.call_mutation("create", || provider.create(spec)).await) {
        Err(ProviderError::Timeout(after)) => {
            let key = spec.resolve_key();
            match ctx.observe(retry.call("resolve", || provider.resolve(&key)).await) {
                Ok(identity) => {
                    warn!(resource = %ctx.key, uuid = %identity.uuid, "create timed out but landed; adopting");
                    Ok(identity.uuid)
                }
                Err(ProviderError::NotFound) => Err(ProviderError::Timeout(after)),
                Err(err) => Err(err),
            }
        }
        other => other,
    }
}

/// Record a provider failure on the `ProviderAvailable` condition.
pub(crate) fn record_provider_failure(conditions: &mut Conditions, err: &ProviderError) {
    conditions.mark_false(
        types::PROVIDER_AVAILABLE,
        reasons::PROVIDER_UNAVAILABLE,
        err.to_string(),
    );
}

/// Record a provider rejection against the condition it blocks.
pub(crate) fn record_rejection(conditions: &mut Conditions, condition_type: &str, message: &str) {
    conditions.mark_false(condition_type, reasons::REJECTED, message);
}

/// Whether `BackingBound` is waiting on the provider with `reason`.
pub(crate) fn awaiting(conditions: &Conditions, reason: &str) -> bool {
    conditions
        .get(types::BACKING_BOUND)
        .is_some_and(|c| c.status == ConditionStatus::Unknown && c.reason == reason)
}
