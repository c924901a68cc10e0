//! Reconciler for upload requests.
//!
//! An upload starts `Uploading` and becomes `Uploaded` only once the provider
//! reports the transferred content matches the declared source and the
//! target item resolves to the bound UUID. Failures never move the phase;
//! they are reported on `UploadCompleted` while the request keeps polling.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use contentlib_api::condition::{reasons, types};
use contentlib_api::{ContentUploadRequest, ObjectKey, Resource, Status, UploadPhase};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{ControlError, ControlResult};
use crate::provider::{BackingProvider, ProviderError, ProviderSpec, UploadState};
use crate::retry::RetryPolicy;
use crate::store::ResourceStore;

use super::{
    check_spec, create_backing, record_provider_failure, record_rejection, set_phase, Action,
    Context, Reconcile,
};

/// Reconciles [`ContentUploadRequest`]s.
pub struct UploadReconciler {
    store: Arc<dyn ResourceStore<ContentUploadRequest>>,
    provider: Arc<dyn BackingProvider>,
    retry: RetryPolicy,
    poll_interval: Duration,
}

impl UploadReconciler {
    /// Create a reconciler polling in-progress uploads every `poll_interval`.
    #[must_use]
    pub fn new(
        store: Arc<dyn ResourceStore<ContentUploadRequest>>,
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

    async fn cycle(
        &self,
        ctx: &Context<ContentUploadRequest>,
        resource: &Resource<ContentUploadRequest>,
        status: &mut Status<UploadPhase>,
    ) -> ControlResult<Action> {
        let accepted = ctx.accepted_spec(resource).await?;
        let Some((desired, _)) = check_spec(&accepted, &resource.spec, status) else {
            return Ok(Action::AwaitChange);
        };
        let key = desired.resolve_key();

        if !status.backing.is_bound() {
            match ctx.observe(self.retry.call("resolve", || self.provider.resolve(&key)).await) {
                Ok(existing) if !desired.library_item.overwrite => {
                    status.conditions.mark_false(
                        types::UPLOAD_COMPLETED,
                        reasons::ITEM_EXISTS,
                        format!(
                            "{key} already exists as {} and overwrite is not set",
                            existing.uuid
                        ),
                    );
                    return Ok(Action::AwaitChange);
                }
                Ok(_) | Err(ProviderError::NotFound) => {}
                Err(err) => return Err(err.into()),
            }

            ctx.ensure_live().await?;
            let spec = desired.backing_spec();
            let uuid = create_backing(ctx, self.provider.as_ref(), &self.retry, &spec).await?;
            status.backing.bind(&uuid)?;
            info!(resource = %ctx.key, uuid = %uuid, "started upload");
        }

        let Some(uuid) = status.backing.uuid().map(ToOwned::to_owned) else {
            return Err(ControlError::internal("upload bound without uuid"));
        };

        let state = ctx.observe(
            self.retry
                .call("upload_status", || self.provider.upload_status(&uuid))
                .await,
        )?;
        match state {
            UploadState::Uploading => {
                debug!(resource = %ctx.key, uuid = %uuid, "upload in progress");
                Ok(Action::Requeue(self.poll_interval))
            }
            UploadState::Failed(reason) => {
                warn!(resource = %ctx.key, uuid = %uuid, reason = %reason, "upload failed");
                status
                    .conditions
                    .mark_false(types::UPLOAD_COMPLETED, reasons::UPLOAD_FAILED, reason);
                Ok(Action::Backoff)
            }
            UploadState::Uploaded => {
                let identity =
                    ctx.observe(self.retry.call("resolve", || self.provider.resolve(&key)).await)?;
                status.backing.observe(&identity)?;
                if identity.item_type.is_some() {
                    status.item_type = identity.item_type;
                }
                status.conditions.mark_true(
                    types::BACKING_BOUND,
                    "",
                    format!("bound to {}", identity.uuid),
                );
                status.conditions.mark_true(types::UPLOAD_COMPLETED, "", "");
                set_phase(&ctx.key, status, UploadPhase::Uploaded)?;
                Ok(Action::AwaitChange)
            }
        }
    }

    fn fold_error(
        ctx: &Context<ContentUploadRequest>,
        status: &mut Status<UploadPhase>,
        err: ControlError,
    ) -> ControlResult<Action> {
        match err {
            ControlError::Provider(ProviderError::NotFound) => {
                warn!(resource = %ctx.key, "upload target vanished");
                status.conditions.mark_false(
                    types::UPLOAD_COMPLETED,
                    reasons::UPLOAD_FAILED,
                    "target item no longer exists",
                );
                Ok(Action::Backoff)
            }
            ControlError::Provider(ProviderError::Rejected(msg)) => {
                warn!(resource = %ctx.key, error = %msg, "provider rejected upload");
                record_rejection(&mut status.conditions, types::UPLOAD_COMPLETED, &msg);
                Ok(Action::Backoff)
            }
            ControlError::Provider(err) => {
                warn!(resource = %ctx.key, error = %err, "provider unavailable");
                record_provider_failure(&mut status.conditions, &err);
                Ok(Action::Backoff)
            }
            ControlError::Consistency(err) => {
                error!(
                    resource = %ctx.key,
                    bound = %err.bound,
                    observed = %err.observed,
                    "uploaded item uuid conflict; operator intervention required"
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

#[async_trait]
impl Reconcile<ContentUploadRequest> for UploadReconciler {
    async fn reconcile(&self, key: &ObjectKey, cancel: &CancellationToken) -> ControlResult<Action> {
        let Some(resource) = self.store.get(key).await? else {
            debug!(resource = %key, "upload request no longer exists");
            return Ok(Action::AwaitChange);
        };
        let ctx = Context::new(&resource, Arc::clone(&self.store), cancel.clone());

        // Requests are removed by an outer expiry policy; nothing on the
        // provider belongs to the request itself.
        if resource.is_deleting() {
            ctx.clear_finalizer().await?;
            return Ok(Action::AwaitChange);
        }

        let before = resource.status.clone();
        let mut status = resource.status.clone();

        if status.phase.is_none() {
            set_phase(key, &mut status, UploadPhase::Uploading)?;
            ctx.publish(&before, &status).await?;
            return Ok(Action::Requeue(Duration::ZERO));
        }
        if status.phase == Some(UploadPhase::Uploaded) {
            return Ok(Action::AwaitChange);
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

        match ctx.publish(&before, &status).await {
            Ok(()) => Ok(action),
            Err(ControlError::NotFound(_)) => Ok(Action::AwaitChange),
            Err(ControlError::Conflict { .. }) => Ok(Action::Requeue(Duration::ZERO)),
            Err(err) => Err(err),
        }
    }
}
