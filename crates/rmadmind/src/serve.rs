//! Serve mode: wire every component and run until Ctrl-C.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{error, info, warn};

use rmadmin_api::{AdminComponents, AdminGateway, HaState};
use rmadmin_config::{CachedGroupMapping, FileConfigSource, GroupMappingService, RefreshCoordinator, SnapshotHandle};
use rmadmin_federation::{ApplicationStore, FederationPolicyStore, SubClusterRegistry};
use rmadmin_nodes::{
    FileNodeListSource, InMemoryNodeRegistry, LabelStore, NodeEventPump, NodeListSource, NodeLifecycleManager,
    NodeRegistry, ResourceOverrideStore,
};
use rmadmin_state::StateStore;

pub struct ServeOptions {
    pub port: u16,
    pub data_dir: PathBuf,
    pub conf_dir: PathBuf,
    pub include_file: Option<PathBuf>,
    pub exclude_file: Option<PathBuf>,
    pub decommission_timeout: u64,
    pub subcluster_timeout: u64,
    pub node_liveness_timeout: u64,
    pub sweep_interval: u64,
    pub subclusters: Vec<String>,
    pub standby: bool,
}

pub async fn run(opts: ServeOptions) -> anyhow::Result<()> {
    info!("rmadmin daemon starting");

    std::fs::create_dir_all(&opts.data_dir)?;
    let db_path = opts.data_dir.join("rmadmin.redb");

    // ── State store ────────────────────────────────────────────

    let state = StateStore::open(&db_path)?;
    info!(path = ?db_path, "state store opened");

    // ── Configuration ──────────────────────────────────────────

    let snapshot = SnapshotHandle::default();
    let groups: Arc<dyn GroupMappingService> = Arc::new(CachedGroupMapping::new(snapshot.clone()));
    let refresh = Arc::new(RefreshCoordinator::new(
        Arc::new(FileConfigSource::new(&opts.conf_dir)),
        snapshot.clone(),
        groups.clone(),
    ));
    let loaded = refresh.load_initial()?;
    info!(
        conf_dir = ?opts.conf_dir,
        domains = loaded.len(),
        version = snapshot.current().version,
        "configuration loaded"
    );

    // ── Nodes ──────────────────────────────────────────────────

    let registry = Arc::new(
        InMemoryNodeRegistry::new().with_liveness_timeout(Duration::from_secs(opts.node_liveness_timeout)),
    );
    let hosts = Arc::new(FileNodeListSource::new(opts.include_file.clone(), opts.exclude_file.clone()));
    let lifecycle = Arc::new(
        NodeLifecycleManager::new(registry.clone(), hosts.clone())
            .with_default_timeout(Duration::from_secs(opts.decommission_timeout)),
    );
    let labels = Arc::new(LabelStore::new(registry.clone()));
    let resources = Arc::new(ResourceOverrideStore::new(state.clone(), registry.clone())?);

    // Subscribe before seeding so the pump sees every registration.
    let node_events = registry.subscribe();
    if opts.include_file.is_some() {
        let lists = hosts.load()?;
        for node in lists.include.into_iter().filter(|n| n.port != 0) {
            registry.register(node);
        }
    }
    info!(nodes = registry.list_known_nodes().len(), "node registry seeded");

    // ── Federation ─────────────────────────────────────────────

    let subclusters = SubClusterRegistry::new(state.clone());
    for id in &opts.subclusters {
        subclusters.register(id)?;
    }
    let policies = FederationPolicyStore::new(state.clone());
    let applications = ApplicationStore::new(state.clone());

    // ── Gateway ────────────────────────────────────────────────

    let ha = if opts.standby { HaState::Standby } else { HaState::Active };
    let gateway = Arc::new(
        AdminGateway::new(AdminComponents {
            refresh,
            groups,
            labels: labels.clone(),
            lifecycle: lifecycle.clone(),
            resources: resources.clone(),
            policies,
            subclusters: subclusters.clone(),
            applications,
        })
        .with_ha_state(ha),
    );
    info!(?ha, "admin gateway ready");

    // ── Background tasks ───────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let pump = NodeEventPump::new(registry.clone(), lifecycle.clone(), labels, resources);
    let pump_handle = tokio::spawn(pump.run(node_events, shutdown_rx.clone()));

    let sweeper_handle = tokio::spawn(subclusters.run_lost_sweeper(
        Duration::from_secs(opts.sweep_interval),
        Duration::from_secs(opts.subcluster_timeout),
        shutdown_rx,
    ));

    // ── API server ─────────────────────────────────────────────

    let router = rmadmin_api::build_router(gateway);
    let addr = SocketAddr::from(([0, 0, 0, 0], opts.port));
    info!(%addr, "API server starting");
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "failed to listen for Ctrl-C, shutting down");
            }
            info!("shutdown signal received");
            let _ = shutdown_tx.send(true);
        })
        .await?;

    lifecycle.shutdown();
    if let Err(e) = pump_handle.await {
        warn!(error = %e, "node event pump ended abnormally");
    }
    if let Err(e) = sweeper_handle.await {
        warn!(error = %e, "subcluster sweeper ended abnormally");
    }

    info!("rmadmin daemon stopped");
    Ok(())
}
