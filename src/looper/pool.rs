//! # Fleet Looper
//!
//! Worker pool cycling over the [`TenantSet`].
//!
//! Each worker takes the next tenant from the fair queue, connects to it, runs
//! one [`FleetRunner`] pass and hands the tenant back with `done`. A tenant whose
//! identity record is gone is dropped from the set. A tenant that cannot be
//! reached is paused for the connection error interval and comes around again.

use super::installer::Installer;
use super::runner::{FleetRunner, RunnerOptions};
use super::status::StatusSaver;
use crate::config::FleetConfig;
use crate::observability::metrics;
use crate::queue::TenantSet;
use crate::registry::ControllerRegistry;
use crate::runtime::{ClusterApi, ConnectionError, ConnectionFactory};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

#[derive(Debug, Error)]
pub enum LooperError {
    #[error("fleet looper already started")]
    AlreadyStarted,
}

pub struct FleetLooper {
    tenants: Arc<TenantSet>,
    connections: Arc<dyn ConnectionFactory>,
    registry: Arc<ControllerRegistry>,
    central: Arc<dyn ClusterApi>,
    saver: Arc<dyn StatusSaver>,
    installer: Option<Arc<Installer>>,
    config: FleetConfig,
    started: AtomicBool,
}

impl FleetLooper {
    pub fn new(
        tenants: Arc<TenantSet>,
        connections: Arc<dyn ConnectionFactory>,
        registry: Arc<ControllerRegistry>,
        central: Arc<dyn ClusterApi>,
        saver: Arc<dyn StatusSaver>,
        config: FleetConfig,
    ) -> Self {
        Self {
            tenants,
            connections,
            registry,
            central,
            saver,
            installer: None,
            config,
            started: AtomicBool::new(false),
        }
    }

    pub fn with_installer(mut self, installer: Arc<Installer>) -> Self {
        self.installer = Some(installer);
        self
    }

    pub fn tenants(&self) -> &Arc<TenantSet> {
        &self.tenants
    }

    /// Run the workers until `token` is cancelled
    ///
    /// Cancellation shuts the tenant queue down and waits for every worker,
    /// including the pass it is running, to return.
    pub async fn start(self: Arc<Self>, token: CancellationToken) -> Result<(), LooperError> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(LooperError::AlreadyStarted);
        }

        info!("Fleet looper started with {} workers", self.config.concurrency);
        let mut workers = JoinSet::new();
        for id in 0..self.config.concurrency {
            let looper = self.clone();
            let token = token.clone();
            workers.spawn(looper.worker(id, token));
        }

        token.cancelled().await;
        self.tenants.queue().shutdown();

        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                error!("Fleet looper worker failed: {}", e);
            }
        }
        info!("Fleet looper stopped");
        Ok(())
    }

    async fn worker(self: Arc<Self>, id: usize, token: CancellationToken) {
        debug!("Fleet looper worker {} started", id);
        let queue = self.tenants.queue().clone();
        while let Some(tenant) = queue.get().await {
            if !sleep_or_cancel(self.config.pass_pause(), &token).await {
                queue.done(&tenant);
                break;
            }

            // A panicking pass must still hand the tenant back
            let pass = {
                let looper = self.clone();
                let tenant = tenant.clone();
                let token = token.clone();
                let span = info_span!("tenant.pass", tenant = %tenant);
                tokio::spawn(async move { looper.handle_tenant(&tenant, &token).await }.instrument(span))
            };
            if let Err(e) = pass.await {
                error!(tenant = %tenant, "Tenant pass aborted: {}", e);
                metrics::increment_tenant_pass_errors("runner");
            }
            queue.done(&tenant);
        }
        debug!("Fleet looper worker {} stopped", id);
    }

    async fn handle_tenant(&self, tenant: &str, token: &CancellationToken) {
        metrics::increment_tenant_passes(tenant);
        let started = Instant::now();

        let connection = match self.connections.connect(tenant).await {
            Ok(connection) => Arc::new(connection),
            Err(e @ ConnectionError::NotFound { .. }) => {
                info!("Tenant no longer exists, removing it: {}", e);
                metrics::increment_tenant_pass_errors("not_found");
                self.tenants.remove_id(tenant);
                return;
            }
            Err(e) => {
                warn!("Error connecting to tenant: {}", e);
                metrics::increment_tenant_pass_errors("connection");
                sleep_or_cancel(self.config.connection_error_pause(), token).await;
                return;
            }
        };

        let mut runner = FleetRunner::new(
            connection,
            self.registry.clone(),
            self.central.clone(),
            self.saver.clone(),
        )
        .with_options(RunnerOptions::from(&self.config));
        if let Some(installer) = &self.installer {
            runner = runner.with_installer(installer.clone());
        }

        match runner.run(token.clone()).await {
            Ok(end) => debug!("Tenant pass ended: {:?}", end),
            Err(e) => {
                error!("Tenant pass failed: {}", e);
                metrics::increment_tenant_pass_errors("runner");
            }
        }
        metrics::observe_tenant_pass_duration(started.elapsed().as_secs_f64());
    }
}

/// Sleep for `duration`; `false` if `token` was cancelled first
async fn sleep_or_cancel(duration: Duration, token: &CancellationToken) -> bool {
    tokio::select! {
        _ = token.cancelled() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}
