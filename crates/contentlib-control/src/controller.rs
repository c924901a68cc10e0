//! Controller: workers, watch and resync loops for one resource kind.

use std::sync::Arc;
use std::time::Duration;

use contentlib_api::{ObjectKey, ResourceKind};
use dashmap::DashMap;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::ControllerConfig;
use crate::error::ControlResult;
use crate::queue::WorkQueue;
use crate::reconciler::{Action, Reconcile};
use crate::retry::RetryPolicy;
use crate::store::{ResourceFilter, ResourceStore};

/// Drives reconciliation of every resource of kind `K`.
pub struct Controller<K: ResourceKind> {
    store: Arc<dyn ResourceStore<K>>,
    reconciler: Arc<dyn Reconcile<K>>,
    queue: Arc<WorkQueue>,
    failures: DashMap<ObjectKey, u32>,
    backoff: RetryPolicy,
    concurrency: usize,
    resync: Option<Duration>,
}

impl<K: ResourceKind> Controller<K> {
    /// Create a controller.
    #[must_use]
    pub fn new(
        store: Arc<dyn ResourceStore<K>>,
        reconciler: Arc<dyn Reconcile<K>>,
        config: &ControllerConfig,
    ) -> Self {
        Self {
            store,
            reconciler,
            queue: Arc::new(WorkQueue::new()),
            failures: DashMap::new(),
            backoff: RetryPolicy::new(&config.provider, &config.retry),
            concurrency: config.workers.concurrency.max(1),
            resync: config.resync.interval(),
        }
    }

    /// The controller's work queue.
    #[must_use]
    pub const fn queue(&self) -> &Arc<WorkQueue> {
        &self.queue
    }

    /// Consecutive failed cycles for `key`.
    #[must_use]
    pub fn failure_streak(&self, key: &ObjectKey) -> u32 {
        self.failures.get(key).map_or(0, |streak| *streak)
    }

    /// Queue every stored resource.
    pub async fn enqueue_all(&self) -> ControlResult<usize> {
        let resources = self.store.list(&ResourceFilter::new()).await?;
        let count = resources.len();
        for resource in resources {
            self.queue.enqueue(resource.key());
        }
        Ok(count)
    }

    /// Run until `cancel` fires, then wait for in-flight cycles to finish.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) -> ControlResult<()> {
        info!(kind = K::KIND, workers = self.concurrency, "starting controller");

        // Subscribe first so nothing inserted during the initial list is lost.
        let events = self.store.subscribe();
        let seeded = self.enqueue_all().await?;
        debug!(kind = K::KIND, resources = seeded, "seeded work queue");

        let mut tasks = JoinSet::new();
        tasks.spawn(Arc::clone(&self).watch(events, cancel.clone()));
        if let Some(interval) = self.resync {
            tasks.spawn(Arc::clone(&self).resync_loop(interval, cancel.clone()));
        }
        for worker in 0..self.concurrency {
            tasks.spawn(Arc::clone(&self).worker(worker, cancel.clone()));
        }

        cancel.cancelled().await;
        self.queue.shutdown();

        while let Some(result) = tasks.join_next().await {
            if let Err(e) = result {
                error!(kind = K::KIND, error = %e, "controller task failed");
            }
        }

        info!(kind = K::KIND, "controller stopped");
        Ok(())
    }

    async fn watch(
        self: Arc<Self>,
        mut events: tokio::sync::broadcast::Receiver<ObjectKey>,
        cancel: CancellationToken,
    ) {
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                event = events.recv() => match event {
                    Ok(key) => self.queue.enqueue(key),
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(kind = K::KIND, skipped, "watch lagged; requeueing everything");
                        if let Err(e) = self.enqueue_all().await {
                            error!(kind = K::KIND, error = %e, "failed to list resources");
                        }
                    }
                    Err(RecvError::Closed) => break,
                },
            }
        }
    }

    async fn resync_loop(self: Arc<Self>, interval: Duration, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;

        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = ticker.tick() => match self.enqueue_all().await {
                    Ok(count) => debug!(kind = K::KIND, resources = count, "resync"),
                    Err(e) => error!(kind = K::KIND, error = %e, "resync failed"),
                },
            }
        }
    }

    async fn worker(self: Arc<Self>, worker: usize, cancel: CancellationToken) {
        debug!(kind = K::KIND, worker, "worker started");
        while let Some(key) = self.queue.next().await {
            let action = self.process(&key, &cancel).await;
            self.queue.done(&key);
            self.schedule(key, action, &cancel);
        }
        debug!(kind = K::KIND, worker, "worker stopped");
    }

    /// Run one cycle in its own task so a panic stays with its resource.
    async fn process(&self, key: &ObjectKey, cancel: &CancellationToken) -> Action {
        let reconciler = Arc::clone(&self.reconciler);
        let task_key = key.clone();
        let task_cancel = cancel.clone();

        let result =
            tokio::spawn(async move { reconciler.reconcile(&task_key, &task_cancel).await }).await;

        match result {
            Ok(Ok(action)) => action,
            Ok(Err(e)) => {
                error!(kind = K::KIND, resource = %key, error = %e, "reconcile failed");
                Action::Backoff
            }
            Err(e) => {
                error!(kind = K::KIND, resource = %key, error = %e, "reconcile panicked");
                Action::Backoff
            }
        }
    }

    fn schedule(&self, key: ObjectKey, action: Action, cancel: &CancellationToken) {
        let delay = match action {
            Action::AwaitChange => {
                self.failures.remove(&key);
                return;
            }
            Action::Requeue(delay) => {
                self.failures.remove(&key);
                delay
            }
            Action::Backoff => {
                let mut streak = self.failures.entry(key.clone()).or_insert(0);
                let delay = self.backoff.delay(*streak);
                *streak = streak.saturating_add(1);
                delay
            }
        };

        if delay.is_zero() {
            self.queue.enqueue(key);
            return;
        }

        let queue = Arc::clone(&self.queue);
        let cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::select! {
                () = cancel.cancelled() => {}
                () = tokio::time::sleep(delay) => queue.enqueue(key),
            }
        });
    }
}
