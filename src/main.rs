//! # Fleet Controller
//!
//! Discovers tenants from the `Kyma` descriptors in the KCP namespace and
//! cycles over them with the fleet looper, serving metrics and probes on the
//! side.
//!
//! ## Configuration
//!
//! See [`FleetConfig`] for the environment variables. Logging follows
//! `RUST_LOG` and defaults to `fleet_controller=info`.

use anyhow::{Context, Result};
use fleet_controller::config::FleetConfig;
use fleet_controller::looper::{FleetLooper, Installer, KubeStatusRepo, TenantDiscovery, TenantStatusSaver};
use fleet_controller::observability::metrics;
use fleet_controller::queue::TenantSet;
use fleet_controller::registry::RegistryBuilder;
use fleet_controller::runtime::{KubeClusterApi, KubeConnectionFactory};
use fleet_controller::server::{start_server, ServerState};
use kube::Client;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "fleet_controller=info".into()),
        )
        .init();

    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        warn!("rustls crypto provider was already installed");
    }

    info!(
        "Starting Fleet Controller (build {} {})",
        env!("BUILD_GIT_HASH"),
        env!("BUILD_DATETIME")
    );

    metrics::register_metrics()?;
    let config = FleetConfig::from_env();
    let shutdown = CancellationToken::new();

    let server_state = Arc::new(ServerState::default());
    let server = tokio::spawn({
        let state = server_state.clone();
        let shutdown = shutdown.clone();
        let port = config.metrics_port;
        async move {
            if let Err(e) = start_server(port, state, shutdown).await {
                error!("HTTP server error: {}", e);
            }
        }
    });

    let client = Client::try_default()
        .await
        .context("Failed to create Kubernetes client")?;

    // Reconcilers are contributed by the crates embedding this runtime
    let registry = RegistryBuilder::new().build();

    let tenants = Arc::new(TenantSet::default());
    let discovery = tokio::spawn(TenantDiscovery::new(tenants.clone()).run(
        client.clone(),
        config.kcp_namespace.clone(),
        shutdown.clone(),
    ));

    let saver = TenantStatusSaver::new(
        Arc::new(KubeStatusRepo::new(client.clone())),
        config.kcp_namespace.clone(),
    );
    let looper = Arc::new(
        FleetLooper::new(
            tenants,
            Arc::new(KubeConnectionFactory::new(client.clone(), &config)),
            registry,
            Arc::new(KubeClusterApi::new(client)),
            Arc::new(saver),
            config.clone(),
        )
        .with_installer(Arc::new(Installer::new(config.providers_dir.clone()))),
    );
    let looper_task = tokio::spawn(looper.start(shutdown.clone()));

    server_state.is_ready.store(true, Ordering::Relaxed);

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("Shutdown signal received");
    server_state.is_ready.store(false, Ordering::Relaxed);
    shutdown.cancel();

    if let Ok(Err(e)) = looper_task.await {
        error!("Fleet looper error: {}", e);
    }
    let _ = discovery.await;
    let _ = server.await;

    info!("Fleet Controller stopped");
    Ok(())
}
