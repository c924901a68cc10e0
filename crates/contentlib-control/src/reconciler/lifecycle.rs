//! Reconciler for libraries and items.
//!
//! Libraries and items share the item lifecycle:
//!
//! ```text
//! Creating ──▶ Created ──▶ Updating ◀──▶ Updated
//!     │           │           │            │
//!     └───────────┴─────┬─────┴────────────┘
//!                       ▼
//!                   Deleting ──▶ Deleted
//! ```
//!
//! Any non-terminal phase falls to `Unknown` when the provider cannot be
//! reached, and is re-derived from a fresh observation once it can.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use contentlib_api::condition::{reasons, types};
use contentlib_api::{
    BackingIdentity, ConditionStatus, ItemPhase, ObjectKey, Resource, ResourceKind, Status,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{ControlError, ControlResult};
use crate::provider::{
    BackingProvider, BackingSpec, ProviderError, ProviderResult, ProviderSpec, ResolveKey, Versions,
};
use crate::retry::RetryPolicy;
use crate::store::ResourceStore;

use super::{
    awaiting, check_spec, create_backing, record_provider_failure, record_rejection, set_phase,
    Action, Context, Reconcile,
};

/// Reconciles libraries and items against the backing provider.
pub struct LifecycleReconciler<K: ResourceKind> {
    store: Arc<dyn ResourceStore<K>>,
    provider: Arc<dyn BackingProvider>,
    retry: RetryPolicy,
    poll_interval: Duration,
}

impl<K> LifecycleReconciler<K>
where
    K: ResourceKind<Phase = ItemPhase>,
    K::Spec: ProviderSpec,
{
    /// Create a reconciler.
    ///
    /// `poll_interval` is how long to wait before checking again on an
    /// object the provider has not confirmed yet.
    #[must_use]
    pub fn new(
        store: Arc<dyn ResourceStore<K>>,
        provider: Arc<dyn BackingProvider>,
        retry: RetryPolicy,
        poll_interval: Duration,
    ) -> Self {
        Self {
            store,
            provider,
            retry,
            poll_interval,
        }
    }

    async fn resolve(&self, ctx: &Context<K>, key: &ResolveKey) -> ProviderResult<BackingIdentity> {
        ctx.observe(self.retry.call("resolve", || self.provider.resolve(key)).await)
    }

    async fn fetch_versions(&self, ctx: &Context<K>, uuid: &str) -> ProviderResult<Versions> {
        ctx.observe(
            self.retry
                .call("fetch_versions", || self.provider.fetch_versions(uuid))
                .await,
        )
    }

    async fn create_backing(&self, ctx: &Context<K>, spec: &BackingSpec) -> ProviderResult<String> {
        create_backing(ctx, self.provider.as_ref(), &self.retry, spec).await
    }

    async fn cycle(
        &self,
        ctx: &Context<K>,
        resource: &Resource<K>,
        status: &mut Status<ItemPhase>,
    ) -> ControlResult<Action> {
        let accepted = ctx.accepted_spec(resource).await?;

        if resource.is_deleting() || status.phase == Some(ItemPhase::Deleting) {
            return self.delete(ctx, &accepted, status).await;
        }
        if status.phase == Some(ItemPhase::Deleted) {
            return Ok(Action::AwaitChange);
        }
        if conflicted(status) {
            debug!(resource = %ctx.key, "binding conflict unresolved; waiting for operator");
            return Ok(Action::AwaitChange);
        }

        let Some((desired, mutable_changed)) =
            check_spec(&accepted, &resource.spec, status)
        else {
            return Ok(Action::AwaitChange);
        };

        match status.phase {
            Some(ItemPhase::Creating) => self.create(ctx, &desired, status).await,
            Some(ItemPhase::Unknown) | None => {
                self.rederive(ctx, &desired, mutable_changed, status).await
            }
            Some(_) => self.sync(ctx, &desired, mutable_changed, status).await,
        }
    }

    /// Bring a `Creating` resource to `Created`.
    async fn create(
        &self,
        ctx: &Context<K>,
        desired: &K::Spec,
        status: &mut Status<ItemPhase>,
    ) -> ControlResult<Action> {
        let key = desired.resolve_key();

        let confirmed = if status.backing.is_bound() {
            None
        } else {
            match self.resolve(ctx, &key).await {
                Ok(identity) => {
                    info!(resource = %ctx.key, uuid = %identity.uuid, "adopting existing backing object");
                    Some(identity)
                }
                Err(ProviderError::NotFound) => {
                    ctx.ensure_live().await?;
                    let uuid = self.create_backing(ctx, &desired.backing_spec()).await?;
                    status.backing.bind(&uuid)?;
                    info!(resource = %ctx.key, uuid = %uuid, "created backing object");
                    status.conditions.mark_unknown(
                        types::BACKING_BOUND,
                        reasons::AWAITING_CONFIRMATION,
                        format!("waiting for the provider to confirm {uuid}"),
                    );
                    None
                }
                Err(err) => return Err(err.into()),
            }
        };

        let identity = match confirmed {
            Some(identity) => identity,
            None => match self.resolve(ctx, &key).await {
                Ok(identity) => identity,
                Err(ProviderError::NotFound)
                    if awaiting(&status.conditions, reasons::AWAITING_CONFIRMATION) =>
                {
                    debug!(resource = %ctx.key, "creation not confirmed yet");
                    return Ok(Action::Requeue(self.poll_interval));
                }
                Err(ProviderError::NotFound) => {
                    // Bound without a pending create: the object is gone.
                    ctx.ensure_live().await?;
                    let uuid = self.create_backing(ctx, &desired.backing_spec()).await?;
                    let previous = status.backing.rebind_recreated(&uuid);
                    info!(resource = %ctx.key, uuid = %uuid, previous = ?previous, "created backing object");
                    status.conditions.mark_unknown(
                        types::BACKING_BOUND,
                        reasons::AWAITING_CONFIRMATION,
                        format!("waiting for the provider to confirm {uuid}"),
                    );
                    return Ok(Action::Requeue(self.poll_interval));
                }
                Err(err) => return Err(err.into()),
            },
        };

        status.backing.observe(&identity)?;
        apply_details(status, &identity);
        status.conditions.mark_true(
            types::BACKING_BOUND,
            "",
            format!("bound to {}", identity.uuid),
        );
        status.conditions.mark_true(types::CONTENT_SYNCED, "", "");
        set_phase(&ctx.key, status, ItemPhase::Created)?;
        Ok(Action::AwaitChange)
    }

    /// Keep a bound resource in sync with its backing object.
    async fn sync(
        &self,
        ctx: &Context<K>,
        desired: &K::Spec,
        mutable_changed: bool,
        status: &mut Status<ItemPhase>,
    ) -> ControlResult<Action> {
        let Some(uuid) = status.backing.uuid().map(ToOwned::to_owned) else {
            set_phase(&ctx.key, status, ItemPhase::Unknown)?;
            return Ok(Action::Requeue(Duration::ZERO));
        };

        let identity = match self.resolve(ctx, &desired.resolve_key()).await {
            Ok(identity) => identity,
            Err(ProviderError::NotFound) if awaiting(&status.conditions, reasons::RECREATED) => {
                debug!(resource = %ctx.key, "recreation not confirmed yet");
                return Ok(Action::Requeue(self.poll_interval));
            }
            Err(ProviderError::NotFound) => return self.recreate(ctx, desired, status, &uuid).await,
            Err(err) => return Err(err.into()),
        };
        status.backing.bind(&identity.uuid)?;

        let versions = self.fetch_versions(ctx, &uuid).await?;
        let changes = status
            .backing
            .update_versions(&versions.metadata, versions.content.as_deref());

        if changes.any() || mutable_changed || status.phase == Some(ItemPhase::Updating) {
            set_phase(&ctx.key, status, ItemPhase::Updating)?;

            if mutable_changed {
                ctx.ensure_live().await?;
                let spec = desired.backing_spec();
                ctx.observe(
                    self.retry
                        .call_mutation("update", || self.provider.update(&uuid, &spec))
                        .await,
                )?;
                ctx.accept(desired.clone()).await?;
                info!(resource = %ctx.key, uuid = %uuid, "pushed spec to backing object");
            }

            let versions = self.fetch_versions(ctx, &uuid).await?;
            status
                .backing
                .update_versions(&versions.metadata, versions.content.as_deref());
            set_phase(&ctx.key, status, ItemPhase::Updated)?;
        }

        apply_details(status, &identity);
        let recreated = status
            .conditions
            .get(types::BACKING_BOUND)
            .filter(|c| c.status == ConditionStatus::Unknown && c.reason == reasons::RECREATED)
            .map(|c| c.message.clone());
        match recreated {
            Some(message) => {
                status
                    .conditions
                    .mark_true(types::BACKING_BOUND, reasons::RECREATED, message);
            }
            None => {
                status
                    .conditions
                    .mark_true(types::BACKING_BOUND, "", format!("bound to {uuid}"));
            }
        }
        status.conditions.mark_true(types::CONTENT_SYNCED, "", "");
        Ok(Action::AwaitChange)
    }

    /// Recreate a backing object that disappeared while bound.
    async fn recreate(
        &self,
        ctx: &Context<K>,
        desired: &K::Spec,
        status: &mut Status<ItemPhase>,
        previous: &str,
    ) -> ControlResult<Action> {
        warn!(resource = %ctx.key, uuid = %previous, "backing object missing; recreating");
        set_phase(&ctx.key, status, ItemPhase::Updating)?;

        ctx.ensure_live().await?;
        let uuid = self.create_backing(ctx, &desired.backing_spec()).await?;
        status.backing.rebind_recreated(&uuid);
        ctx.accept(desired.clone()).await?;

        info!(resource = %ctx.key, uuid = %uuid, previous = %previous, "recreated backing object");
        status.conditions.mark_unknown(
            types::BACKING_BOUND,
            reasons::RECREATED,
            format!("backing object {previous} was missing; recreated as {uuid}"),
        );
        Ok(Action::Requeue(Duration::ZERO))
    }

    /// Re-derive the phase of an `Unknown` resource.
    async fn rederive(
        &self,
        ctx: &Context<K>,
        desired: &K::Spec,
        mutable_changed: bool,
        status: &mut Status<ItemPhase>,
    ) -> ControlResult<Action> {
        if !status.backing.is_bound() || awaiting(&status.conditions, reasons::AWAITING_CONFIRMATION) {
            set_phase(&ctx.key, status, ItemPhase::Creating)?;
            return self.create(ctx, desired, status).await;
        }

        let phase = if awaiting(&status.conditions, reasons::RECREATED) {
            ItemPhase::Updating
        } else {
            ItemPhase::Created
        };
        set_phase(&ctx.key, status, phase)?;
        self.sync(ctx, desired, mutable_changed, status).await
    }

    /// Delete the backing object and confirm it is gone.
    async fn delete(
        &self,
        ctx: &Context<K>,
        accepted: &K::Spec,
        status: &mut Status<ItemPhase>,
    ) -> ControlResult<Action> {
        if status.phase == Some(ItemPhase::Deleted) {
            return Ok(Action::AwaitChange);
        }
        set_phase(&ctx.key, status, ItemPhase::Deleting)?;

        if let Some(uuid) = status.backing.uuid().map(ToOwned::to_owned) {
            match ctx.observe(self.retry.call("delete", || self.provider.delete(&uuid)).await) {
                Ok(()) => info!(resource = %ctx.key, uuid = %uuid, "deleted backing object"),
                Err(ProviderError::NotFound) => {
                    debug!(resource = %ctx.key, uuid = %uuid, "backing object already gone");
                }
                Err(err) => return Err(err.into()),
            }

            match self.resolve(ctx, &accepted.resolve_key()).await {
                Ok(identity) if identity.uuid == uuid => {
                    debug!(resource = %ctx.key, "deletion not confirmed yet");
                    return Ok(Action::Requeue(self.poll_interval));
                }
                Ok(_) | Err(ProviderError::NotFound) => {}
                Err(err) => return Err(err.into()),
            }
        }

        set_phase(&ctx.key, status, ItemPhase::Deleted)?;
        Ok(Action::AwaitChange)
    }

    /// Fold a failed cycle into the status.
    fn fold_error(
        ctx: &Context<K>,
        status: &mut Status<ItemPhase>,
        err: ControlError,
    ) -> ControlResult<Action> {
        match err {
            ControlError::Provider(ProviderError::NotFound) => {
                debug!(resource = %ctx.key, "backing object vanished mid-cycle");
                Ok(Action::Requeue(Duration::ZERO))
            }
            ControlError::Provider(ProviderError::Rejected(msg)) => {
                warn!(resource = %ctx.key, error = %msg, "provider rejected request");
                record_rejection(&mut status.conditions, types::BACKING_BOUND, &msg);
                Ok(Action::Backoff)
            }
            ControlError::Provider(err) => {
                warn!(resource = %ctx.key, error = %err, "provider unavailable");
                record_provider_failure(&mut status.conditions, &err);
                if status.phase != Some(ItemPhase::Deleted) {
                    set_phase(&ctx.key, status, ItemPhase::Unknown)?;
                }
                Ok(Action::Backoff)
            }
            ControlError::Consistency(err) => {
                error!(
                    resource = %ctx.key,
                    bound = %err.bound,
                    observed = %err.observed,
                    "backing uuid conflict; operator intervention required"
                );
                status.conditions.mark_false(
                    types::BACKING_BOUND,
                    reasons::CONSISTENCY_ERROR,
                    err.to_string(),
                );
                Ok(Action::AwaitChange)
            }
            ControlError::Cancelled(_) => Ok(Action::Requeue(Duration::ZERO)),
            other => Err(other),
        }
    }
}

/// Whether the resource is stuck on a binding conflict.
fn conflicted(status: &Status<ItemPhase>) -> bool {
    status
        .conditions
        .get(types::BACKING_BOUND)
        .is_some_and(|c| c.is_false() && c.reason == reasons::CONSISTENCY_ERROR)
}

fn apply_details(status: &mut Status<ItemPhase>, identity: &BackingIdentity) {
    if identity.library_type.is_some() {
        status.backing.library_type = identity.library_type;
    }
    if identity.item_type.is_some() {
        status.item_type.clone_from(&identity.item_type);
    }
    status.cached = identity.cached;
}

#[async_trait]
impl<K> Reconcile<K> for LifecycleReconciler<K>
where
    K: ResourceKind<Phase = ItemPhase>,
    K::Spec: ProviderSpec,
{
    async fn reconcile(&self, key: &ObjectKey, cancel: &CancellationToken) -> ControlResult<Action> {
        let Some(resource) = self.store.get(key).await? else {
            debug!(resource = %key, "resource no longer exists");
            return Ok(Action::AwaitChange);
        };
        let ctx = Context::new(&resource, Arc::clone(&self.store), cancel.clone());
        let before = resource.status.clone();
        let mut status = resource.status.clone();

        // First observation only records where the resource starts.
        if status.phase.is_none() {
            let initial = ItemPhase::initial(status.backing.is_bound());
            set_phase(key, &mut status, initial)?;
            ctx.publish(&before, &status).await?;
            return Ok(Action::Requeue(Duration::ZERO));
        }

        let action = match self.cycle(&ctx, &resource, &mut status).await {
            Ok(action) => {
                if ctx.provider_reached() {
                    status.conditions.mark_true(types::PROVIDER_AVAILABLE, "", "");
                }
                action
            }
            Err(err) => Self::fold_error(&ctx, &mut status, err)?,
        };

        if status.phase == Some(ItemPhase::Deleted) {
            ctx.publish(&before, &status).await?;
            ctx.clear_finalizer().await?;
            return Ok(Action::AwaitChange);
        }

        match ctx.publish(&before, &status).await {
            Ok(()) => Ok(action),
            Err(ControlError::NotFound(_)) => Ok(Action::AwaitChange),
            Err(ControlError::Conflict { .. }) => Ok(Action::Requeue(Duration::ZERO)),
            Err(err) => Err(err),
        }
    }
}
