use std::sync::Arc;

use gantry_core::{ControlPlane, GatewayRuntime, ResyncWorker};
use gantry_etcd::EtcdV3Connector;
use gantry_persistence::GatewayPersistence;
use gantry_server::config::Configuration;
use gantry_server::startup::{
    ShutdownSignal, bootstrap_gateways, connect_storage, drain_tasks, init_logging,
    listen_for_shutdown, run_with_shutdown, spawn_gateway_tasks,
};
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let configuration = Configuration::new()?;
    let _logging = init_logging(&configuration.logging_config())?;
    info!(version = env!("CARGO_PKG_VERSION"), "Starting gantry");

    let shutdown = ShutdownSignal::new();
    let mut shutdown_rx = shutdown.subscribe();
    listen_for_shutdown(shutdown.clone());

    let persistence = connect_storage(&configuration).await?;
    let etcd_options = configuration.etcd_client_options();
    let settings = configuration.sync_settings();
    let runtime = Arc::new(GatewayRuntime::new(
        persistence.clone(),
        Arc::new(EtcdV3Connector::new(etcd_options.clone())),
    ));
    let resync = ResyncWorker::spawn(runtime.clone(), settings.debounce, shutdown.subscribe());
    let plane = ControlPlane::new(runtime.clone(), resync);

    let registered = bootstrap_gateways(&plane, &configuration.gateways()?).await?;
    if !registered.is_empty() {
        info!(gateways = ?registered, "Registered configured gateways");
    }

    let mut tasks = Vec::new();
    for gateway in persistence.gateway_find_all().await? {
        let spawned = run_with_shutdown(
            spawn_gateway_tasks(
                runtime.clone(),
                &gateway,
                &etcd_options,
                configuration.election_options(),
                settings.clone(),
                &shutdown,
            ),
            shutdown.subscribe(),
        )
        .await;
        match spawned {
            Some(Ok(task)) => {
                info!(gateway = %gateway.name, id = gateway.id, "Gateway tasks started");
                tasks.push(task);
            }
            Some(Err(e)) => {
                error!(gateway = %gateway.name, error = %e, "Failed to start gateway tasks");
            }
            None => break,
        }
    }

    let _ = shutdown_rx.recv().await;
    info!("Shutting down");
    drain_tasks(tasks, configuration.shutdown_grace()).await;
    Ok(())
}
