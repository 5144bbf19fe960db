//! Application startup: storage, gateway bootstrap and the per-gateway
//! background tasks.

mod logging;
mod shutdown;

use std::sync::Arc;

use gantry_common::{GatewayInfo, Result as GantryResult, instance_id};
use gantry_core::{ControlPlane, GatewayRuntime, ReconcileLoop, SyncSettings};
use gantry_etcd::{ElectionOptions, EtcdClientOptions, EtcdLeaderElector, EtcdV3Store};
use gantry_persistence::{
    ExternalDbPersistService, GatewayPersistence, MemoryPersistService, PersistenceService,
    StorageMode,
};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::{Configuration, GatewaySeed};

pub use logging::{LogRotation, LoggingConfig, LoggingGuard, init_logging};
pub use shutdown::{ShutdownSignal, drain_tasks, listen_for_shutdown, run_with_shutdown};

/// Connects the configured storage backend.
pub async fn connect_storage(
    configuration: &Configuration,
) -> anyhow::Result<Arc<dyn PersistenceService>> {
    let persistence: Arc<dyn PersistenceService> = match configuration.storage_mode()? {
        StorageMode::ExternalDb => {
            let db = configuration.database_connection().await?;
            if configuration.db_auto_migrate() {
                gantry_persistence::sql::schema::create_tables(&db).await?;
                info!("Database tables ensured");
            }
            Arc::new(ExternalDbPersistService::new(db))
        }
        StorageMode::Memory => {
            warn!("Using in-memory storage, drafts are lost on restart");
            Arc::new(MemoryPersistService::new())
        }
    };
    persistence.health_check().await?;
    info!(mode = %configuration.storage_mode()?, "Storage ready");
    Ok(persistence)
}

/// Registers configured gateways that are not stored yet.
pub async fn bootstrap_gateways(
    plane: &ControlPlane,
    seeds: &[GatewaySeed],
) -> GantryResult<Vec<i64>> {
    let known = plane.runtime().persistence().gateway_find_all().await?;
    let mut registered = Vec::new();
    for seed in seeds {
        if known.iter().any(|gateway| gateway.name == seed.name) {
            continue;
        }
        registered.push(
            plane
                .register_gateway(&seed.to_gateway(), gantry_common::SYSTEM_OPERATOR)
                .await?,
        );
    }
    Ok(registered)
}

/// Starts the leader elector and periodic reconcile loop of one gateway.
pub async fn spawn_gateway_tasks(
    runtime: Arc<GatewayRuntime>,
    gateway: &GatewayInfo,
    etcd_options: &EtcdClientOptions,
    election: ElectionOptions,
    settings: SyncSettings,
    shutdown: &ShutdownSignal,
) -> GantryResult<JoinHandle<()>> {
    let store = EtcdV3Store::connect(&gateway.etcd, etcd_options).await?;
    let elector = EtcdLeaderElector::new(store.client(), &gateway.name, instance_id(), election);
    info!(
        gateway = %gateway.name,
        election = elector.election_name(),
        "Campaigning for reconciliation leadership"
    );
    let leadership = elector.spawn(shutdown.subscribe());
    Ok(ReconcileLoop::spawn(
        runtime,
        gateway.id,
        leadership,
        settings,
        shutdown.subscribe(),
    ))
}
