//! # Tenant Runtime
//!
//! Owns one [`TenantConnection`] and the controllers running against it.
//!
//! Controllers can only be added before `start`. `start` prepares every
//! controller first, so a failing bulk read aborts the pass before any worker
//! runs. It then runs all controllers concurrently and only returns after
//! the pass token is cancelled and every controller task has finished.
//! Cancelling while sources are still loading returns at once without
//! spawning anything.

use super::api::ClusterApi;
use super::cache::ResourceCache;
use super::connection::TenantConnection;
use super::controller::Controller;
use super::source::SourceError;
use crate::crd::Scope;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("tenant runtime already started")]
    AlreadyStarted,

    #[error("controller {controller} failed to start: {source}")]
    ControllerStart {
        controller: String,
        #[source]
        source: SourceError,
    },
}

pub struct TenantRuntime {
    connection: Arc<TenantConnection>,
    controllers: Mutex<Vec<Arc<Controller>>>,
    started: AtomicBool,
}

impl TenantRuntime {
    pub fn new(connection: Arc<TenantConnection>) -> Self {
        Self {
            connection,
            controllers: Mutex::new(Vec::new()),
            started: AtomicBool::new(false),
        }
    }

    pub fn connection(&self) -> &Arc<TenantConnection> {
        &self.connection
    }

    pub fn tenant(&self) -> &str {
        self.connection.tenant()
    }

    pub fn api(&self) -> &Arc<dyn ClusterApi> {
        self.connection.api()
    }

    pub fn cache(&self) -> &Arc<ResourceCache> {
        self.connection.cache()
    }

    pub fn scope(&self) -> &Scope {
        self.connection.scope()
    }

    /// Add a controller; fails once `start` has been called
    pub fn add(&self, controller: Controller) -> Result<Arc<Controller>, RuntimeError> {
        let mut controllers = self.controllers.lock().unwrap_or_else(|e| e.into_inner());
        // Checked under the lock that `start` takes to snapshot the list
        if self.started.load(Ordering::SeqCst) {
            return Err(RuntimeError::AlreadyStarted);
        }
        let controller = Arc::new(controller);
        controllers.push(controller.clone());
        Ok(controller)
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    pub fn controllers(&self) -> Vec<Arc<Controller>> {
        self.controllers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Run every controller until `token` is cancelled, then join them
    pub async fn start(&self, token: CancellationToken) -> Result<(), RuntimeError> {
        let controllers = {
            let controllers = self.controllers.lock().unwrap_or_else(|e| e.into_inner());
            if self.started.swap(true, Ordering::SeqCst) {
                return Err(RuntimeError::AlreadyStarted);
            }
            controllers.clone()
        };

        tokio::select! {
            biased;
            _ = token.cancelled() => {
                debug!(tenant = %self.tenant(), "Tenant runtime cancelled before controllers started");
                return Ok(());
            }
            prepared = prepare_all(&controllers) => prepared?,
        }

        info!(
            tenant = %self.tenant(),
            "Starting {} controllers",
            controllers.len()
        );

        let mut tasks = JoinSet::new();
        for controller in controllers {
            let token = token.clone();
            tasks.spawn(async move { controller.run(token).await });
        }

        token.cancelled().await;
        debug!(tenant = %self.tenant(), "Tenant runtime cancelled, waiting for controllers");

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                error!(tenant = %self.tenant(), "Controller task failed: {}", e);
            }
        }
        Ok(())
    }
}

async fn prepare_all(controllers: &[Arc<Controller>]) -> Result<(), RuntimeError> {
    for controller in controllers {
        controller
            .prepare()
            .await
            .map_err(|source| RuntimeError::ControllerStart {
                controller: controller.name().to_string(),
                source,
            })?;
    }
    Ok(())
}
