//! # Fleet Runner
//!
//! Runs one pass over one tenant.
//!
//! A pass installs the provider manifests, installs the registry's field
//! indexers on the tenant cache, binds every descriptor to fresh change sources
//! and runs the resulting controllers under one [`TenantRuntime`]. While they
//! run, an idle monitor samples all watch queues every interval and ends the
//! pass after [`IDLE_SAMPLES_BEFORE_SHUTDOWN`] consecutive idle samples. A hard
//! timeout bounds the whole pass regardless of activity.
//!
//! The idle samples take no cross-queue lock. Work arriving between two
//! samples can be cut short; the tenant simply comes around again on a later
//! pass.

use super::installer::{Installer, InstallerError};
use super::status::{StatusReporter, StatusSaver};
use crate::config::FleetConfig;
use crate::constants::{IDLE_SAMPLES_BEFORE_SHUTDOWN, MIN_PASS_INTERVAL_SECS};
use crate::observability::metrics;
use crate::queue::TenantLabels;
use crate::registry::{all_idle, BoundDescriptor, ControllerRegistry};
use crate::runtime::{
    ClusterApi, Controller, ReconcilerArgs, RuntimeError, TenantConnection, TenantRuntime,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("fleet runner already started")]
    AlreadyStarted,

    #[error("error installing provider manifests: {0}")]
    Install(#[from] InstallerError),

    #[error("provider manifests not installed before the pass timeout")]
    InstallTimeout,

    #[error(transparent)]
    Runtime(#[from] RuntimeError),
}

/// How a pass ended when it did not fail
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassEnd {
    /// Every queue stayed empty for consecutive samples
    Idle,
    /// The hard pass timeout elapsed
    HardTimeout,
    /// The parent token was cancelled
    Cancelled,
}

#[derive(Debug, Clone)]
pub struct RunnerOptions {
    pub pass_timeout: Duration,
    pub idle_check_interval: Duration,
    pub max_concurrent_reconciles: usize,
}

impl RunnerOptions {
    /// Raise the pass timeout and the idle interval to their lower bound
    pub fn normalized(mut self) -> Self {
        let min = Duration::from_secs(MIN_PASS_INTERVAL_SECS);
        self.pass_timeout = self.pass_timeout.max(min);
        self.idle_check_interval = self.idle_check_interval.max(min);
        self.max_concurrent_reconciles = self.max_concurrent_reconciles.max(1);
        self
    }
}

impl Default for RunnerOptions {
    fn default() -> Self {
        Self::from(&FleetConfig::default())
    }
}

impl From<&FleetConfig> for RunnerOptions {
    fn from(config: &FleetConfig) -> Self {
        Self {
            pass_timeout: config.pass_timeout(),
            idle_check_interval: config.idle_check_interval(),
            max_concurrent_reconciles: config.max_concurrent_reconciles,
        }
    }
}

pub struct FleetRunner {
    connection: Arc<TenantConnection>,
    registry: Arc<ControllerRegistry>,
    central: Arc<dyn ClusterApi>,
    saver: Arc<dyn StatusSaver>,
    installer: Option<Arc<Installer>>,
    options: RunnerOptions,
    started: AtomicBool,
}

impl FleetRunner {
    pub fn new(
        connection: Arc<TenantConnection>,
        registry: Arc<ControllerRegistry>,
        central: Arc<dyn ClusterApi>,
        saver: Arc<dyn StatusSaver>,
    ) -> Self {
        Self {
            connection,
            registry,
            central,
            saver,
            installer: None,
            options: RunnerOptions::default(),
            started: AtomicBool::new(false),
        }
    }

    pub fn with_installer(mut self, installer: Arc<Installer>) -> Self {
        self.installer = Some(installer);
        self
    }

    pub fn with_options(mut self, options: RunnerOptions) -> Self {
        self.options = options.normalized();
        self
    }

    /// Run the pass; can be called once per runner
    pub async fn run(&self, parent: CancellationToken) -> Result<PassEnd, RunnerError> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(RunnerError::AlreadyStarted);
        }

        let deadline = Instant::now() + self.options.pass_timeout;
        let provider = self.connection.provider();
        let labels = TenantLabels::from_scope(self.connection.scope());
        let mut status = StatusReporter::new(labels, Some(provider));

        let result = self.run_pass(&mut status, &parent, deadline).await;

        // Early exits have not saved yet
        self.save_status(&mut status).await;

        match &result {
            Ok(PassEnd::Idle) => metrics::increment_idle_shutdowns(),
            Ok(PassEnd::HardTimeout) => metrics::increment_hard_timeouts(),
            _ => {}
        }
        result
    }

    async fn run_pass(
        &self,
        status: &mut StatusReporter,
        parent: &CancellationToken,
        deadline: Instant,
    ) -> Result<PassEnd, RunnerError> {
        let provider = self.connection.provider();

        if let Some(installer) = &self.installer {
            tokio::select! {
                installed = installer.install(provider, self.connection.api().as_ref(), status) => {
                    installed?;
                }
                _ = tokio::time::sleep_until(deadline) => {
                    return Err(RunnerError::InstallTimeout);
                }
                _ = parent.cancelled() => return Ok(PassEnd::Cancelled),
            }
        }

        for indexer in self.registry.indexers() {
            let handle = status.handle("Indexer");
            handle.with_kind(&indexer.kind).with_feature(indexer.field.clone());
            if !indexer.supports(Some(provider)) {
                handle.not_supported_by_provider();
                continue;
            }
            indexer.install(&self.connection);
            handle.starting();
            handle.success();
        }

        let runtime = TenantRuntime::new(self.connection.clone());
        let args = ReconcilerArgs {
            tenant: self.connection.tenant().to_string(),
            connection: self.connection.clone(),
            central: self.central.clone(),
            provider: Some(provider),
        };

        let mut active: Vec<BoundDescriptor> = Vec::new();
        for bound in self.registry.bind(&self.connection) {
            let descriptor = bound.descriptor.clone();
            let handle = status.handle("Controller");
            handle
                .with_kind(&descriptor.kind)
                .with_feature(descriptor.name.clone());
            if !descriptor.supports(Some(provider)) {
                handle.not_supported_by_provider();
                continue;
            }

            let reconciler = descriptor.factory.new_reconciler(&args);
            let mut controller = Controller::new(descriptor.name.clone(), args.tenant.clone(), reconciler)
                .with_max_concurrent_reconciles(self.options.max_concurrent_reconciles);
            for watch in &bound.watches {
                controller = controller.watch(
                    watch.source.clone(),
                    watch.handler.clone(),
                    watch.predicates.clone(),
                );
            }
            if let Err(e) = runtime.add(controller) {
                handle.error(&e);
                return Err(e.into());
            }
            handle.starting();
            handle.success();
            active.push(bound);
        }

        status.connected();
        self.save_status(status).await;

        let token = parent.child_token();
        let start = async {
            let started = runtime.start(token.clone()).await;
            token.cancel();
            started
        };
        let supervise = async {
            tokio::select! {
                biased;
                _ = idle_monitor(&active, self.options.idle_check_interval, &token) => PassEnd::Idle,
                _ = tokio::time::sleep_until(deadline) => {
                    token.cancel();
                    PassEnd::HardTimeout
                }
                _ = token.cancelled() => PassEnd::Cancelled,
            }
        };
        let (started, end) = tokio::join!(start, supervise);
        started?;

        match end {
            PassEnd::Idle => info!("Tenant idle, pass ended"),
            PassEnd::HardTimeout => info!("Pass timeout reached"),
            PassEnd::Cancelled => debug!("Pass cancelled"),
        }
        Ok(end)
    }

    async fn save_status(&self, status: &mut StatusReporter) {
        if status.is_saved() {
            return;
        }
        status.mark_saved();
        if let Err(e) = self.saver.save(status).await {
            metrics::increment_status_save_errors();
            warn!("Error saving tenant status: {}", e);
        }
    }
}

/// Cancel `token` once every watch is idle on consecutive samples
async fn idle_monitor(active: &[BoundDescriptor], interval: Duration, token: &CancellationToken) {
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    let mut idle_samples = 0;
    loop {
        tokio::select! {
            _ = token.cancelled() => std::future::pending::<()>().await,
            _ = ticker.tick() => {}
        }
        if all_idle(active) {
            idle_samples += 1;
            debug!("Idle sample {} of {}", idle_samples, IDLE_SAMPLES_BEFORE_SHUTDOWN);
            if idle_samples >= IDLE_SAMPLES_BEFORE_SHUTDOWN {
                token.cancel();
                return;
            }
        } else {
            idle_samples = 0;
        }
    }
}
