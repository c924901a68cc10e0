//! Content library controller binary.
//!
//! Loads manifests named on the command line into in-memory stores and
//! reconciles them until interrupted.

use std::sync::Arc;

use contentlib_api::{
    AnyResource, ClusterContentLibrary, ClusterContentLibraryItem, ContentLibrary,
    ContentLibraryItem, ContentUploadRequest, ItemPhase, KindRegistry, ResourceKind,
};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use contentlib_control::provider::ProviderSpec;
use contentlib_control::{
    create_provider, BackingProvider, ControlResult, Controller, ControllerConfig,
    LifecycleReconciler, MemoryStore, Reconcile, ResourceStore, RetryPolicy, UploadReconciler,
};

struct Stores {
    libraries: Arc<MemoryStore<ContentLibrary>>,
    cluster_libraries: Arc<MemoryStore<ClusterContentLibrary>>,
    items: Arc<MemoryStore<ContentLibraryItem>>,
    cluster_items: Arc<MemoryStore<ClusterContentLibraryItem>>,
    uploads: Arc<MemoryStore<ContentUploadRequest>>,
}

impl Stores {
    fn new() -> Self {
        Self {
            libraries: Arc::new(MemoryStore::new()),
            cluster_libraries: Arc::new(MemoryStore::new()),
            items: Arc::new(MemoryStore::new()),
            cluster_items: Arc::new(MemoryStore::new()),
            uploads: Arc::new(MemoryStore::new()),
        }
    }

    async fn insert(&self, resource: AnyResource) -> ControlResult<()> {
        match resource {
            AnyResource::ContentLibrary(r) => self.libraries.insert(r).await,
            AnyResource::ClusterContentLibrary(r) => self.cluster_libraries.insert(r).await,
            AnyResource::ContentLibraryItem(r) => self.items.insert(r).await,
            AnyResource::ClusterContentLibraryItem(r) => self.cluster_items.insert(r).await,
            AnyResource::ContentUploadRequest(r) => self.uploads.insert(r).await,
        }
    }
}

fn lifecycle<K>(
    store: Arc<MemoryStore<K>>,
    provider: &Arc<dyn BackingProvider>,
    config: &ControllerConfig,
) -> Arc<Controller<K>>
where
    K: ResourceKind<Phase = ItemPhase>,
    K::Spec: ProviderSpec,
{
    let store: Arc<dyn ResourceStore<K>> = store;
    let reconciler: Arc<dyn Reconcile<K>> = Arc::new(LifecycleReconciler::new(
        Arc::clone(&store),
        Arc::clone(provider),
        RetryPolicy::new(&config.provider, &config.retry),
        config.workers.poll_interval(),
    ));
    Arc::new(Controller::new(store, reconciler, config))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("contentlib_control=info".parse()?),
        )
        .init();

    info!("contentlib controller starting");

    let config = ControllerConfig::load().unwrap_or_else(|e| {
        warn!(error = %e, "failed to load config, using defaults");
        ControllerConfig::default()
    });

    info!(
        provider = ?config.provider.provider_type,
        workers = config.workers.concurrency,
        max_retries = config.retry.max_retries,
        "configuration loaded"
    );

    let registry = KindRegistry::standard();
    for kind in registry.iter() {
        info!(kind = kind.kind, api_version = %kind.api_version(), scope = ?kind.scope, "serving kind");
    }

    let provider = create_provider(&config.provider);
    let stores = Stores::new();

    for path in std::env::args().skip(1) {
        let manifest = tokio::fs::read_to_string(&path).await?;
        let resource = registry.decode_str(&manifest)?;
        info!(path = %path, kind = resource.kind(), resource = %resource.key(), "loaded manifest");
        stores.insert(resource).await?;
    }

    let uploads: Arc<dyn ResourceStore<ContentUploadRequest>> = stores.uploads;
    let upload_reconciler: Arc<dyn Reconcile<ContentUploadRequest>> =
        Arc::new(UploadReconciler::new(
            Arc::clone(&uploads),
            Arc::clone(&provider),
            RetryPolicy::new(&config.provider, &config.retry),
            config.workers.poll_interval(),
        ));

    let cancel = CancellationToken::new();
    let mut controllers = JoinSet::new();
    controllers.spawn(lifecycle(stores.libraries, &provider, &config).run(cancel.clone()));
    controllers.spawn(lifecycle(stores.cluster_libraries, &provider, &config).run(cancel.clone()));
    controllers.spawn(lifecycle(stores.items, &provider, &config).run(cancel.clone()));
    controllers.spawn(lifecycle(stores.cluster_items, &provider, &config).run(cancel.clone()));
    controllers.spawn(
        Arc::new(Controller::new(uploads, upload_reconciler, &config)).run(cancel.clone()),
    );

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");
    cancel.cancel();

    while let Some(result) = controllers.join_next().await {
        match result {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(error = %e, "controller failed"),
            Err(e) => error!(error = %e, "controller task panicked"),
        }
    }

    info!("contentlib controller stopped");
    Ok(())
}
