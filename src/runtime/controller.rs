//! # Controller
//!
//! One reconciler wired to its change sources and a work queue.
//!
//! `prepare` starts every watched [`ChangeSource`], which fills the cache and
//! queues the backlog. `run` then drives workers until the pass is cancelled.
//! Failed reconciles are requeued with a per-key [`FibonacciBackoff`].

use super::backoff::FibonacciBackoff;
use super::connection::TenantConnection;
use super::api::ClusterApi;
use super::kind::ObjectKey;
use super::source::{ChangeSource, EventHandler, Predicate, SourceError};
use super::workqueue::WorkQueue;
use crate::crd::ProviderType;
use crate::observability::metrics;
use crate::queue::TenantId;
use async_trait::async_trait;
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

/// Result of one successful reconcile
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Done; forget the key until the next event
    Success,
    /// Reconcile the key again after the delay
    RequeueAfter(Duration),
    /// Stop processing the key without requeue
    Stop,
}

impl Action {
    fn outcome(&self) -> &'static str {
        match self {
            Action::Success => "success",
            Action::RequeueAfter(_) => "requeue",
            Action::Stop => "stop",
        }
    }
}

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("Reconciliation failed: {0}")]
    Failed(#[from] anyhow::Error),
}

#[async_trait]
pub trait Reconciler: Send + Sync {
    async fn reconcile(&self, key: &ObjectKey) -> Result<Action, ReconcileError>;
}

/// Inputs handed to a reconciler factory for one tenant pass
#[derive(Clone)]
pub struct ReconcilerArgs {
    pub tenant: TenantId,
    pub connection: Arc<TenantConnection>,
    /// Connection to the control-plane cluster
    pub central: Arc<dyn ClusterApi>,
    pub provider: Option<ProviderType>,
}

/// Builds a reconciler for one tenant pass
pub trait ReconcilerFactory: Send + Sync {
    fn new_reconciler(&self, args: &ReconcilerArgs) -> Arc<dyn Reconciler>;
}

impl<F> ReconcilerFactory for F
where
    F: Fn(&ReconcilerArgs) -> Arc<dyn Reconciler> + Send + Sync,
{
    fn new_reconciler(&self, args: &ReconcilerArgs) -> Arc<dyn Reconciler> {
        self(args)
    }
}

struct ControllerWatch {
    source: Arc<ChangeSource>,
    handler: Arc<dyn EventHandler>,
    predicates: Vec<Arc<dyn Predicate>>,
}

pub struct Controller {
    name: String,
    tenant: TenantId,
    queue: Arc<WorkQueue>,
    watches: Vec<ControllerWatch>,
    reconciler: Arc<dyn Reconciler>,
    max_concurrent_reconciles: usize,
    backoffs: Arc<Mutex<HashMap<ObjectKey, FibonacciBackoff>>>,
}

impl Controller {
    pub fn new(
        name: impl Into<String>,
        tenant: impl Into<TenantId>,
        reconciler: Arc<dyn Reconciler>,
    ) -> Self {
        let name = name.into();
        Self {
            queue: WorkQueue::new(name.clone()),
            name,
            tenant: tenant.into(),
            watches: Vec::new(),
            reconciler,
            max_concurrent_reconciles: 1,
            backoffs: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn with_max_concurrent_reconciles(mut self, workers: usize) -> Self {
        self.max_concurrent_reconciles = workers.max(1);
        self
    }

    pub fn watch(
        mut self,
        source: Arc<ChangeSource>,
        handler: Arc<dyn EventHandler>,
        predicates: Vec<Arc<dyn Predicate>>,
    ) -> Self {
        self.watches.push(ControllerWatch {
            source,
            handler,
            predicates,
        });
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn queue(&self) -> &Arc<WorkQueue> {
        &self.queue
    }

    pub fn sources(&self) -> impl Iterator<Item = &Arc<ChangeSource>> {
        self.watches.iter().map(|w| &w.source)
    }

    /// Start every watch source, in declaration order
    pub async fn prepare(&self) -> Result<(), SourceError> {
        for watch in &self.watches {
            if watch.source.is_started() {
                continue;
            }
            watch
                .source
                .start(
                    watch.handler.clone(),
                    self.queue.clone(),
                    watch.predicates.clone(),
                )
                .await?;
        }
        debug!(
            controller = %self.name,
            queued = self.queue.len(),
            "Controller sources started"
        );
        Ok(())
    }

    /// Run workers until `token` is cancelled
    pub async fn run(&self, token: CancellationToken) {
        let span = info_span!("controller", tenant = %self.tenant, controller = %self.name);
        async {
            info!("Starting workers: {}", self.max_concurrent_reconciles);
            let workers = (0..self.max_concurrent_reconciles).map(|_| self.worker(token.clone()));
            let stopper = async {
                token.cancelled().await;
                self.queue.shutdown();
            };
            tokio::join!(join_all(workers), stopper);
            info!("Workers stopped");
        }
        .instrument(span)
        .await
    }

    async fn worker(&self, token: CancellationToken) {
        while let Some(key) = self.queue.get().await {
            let result = tokio::select! {
                _ = token.cancelled() => None,
                result = self.reconciler.reconcile(&key) => Some(result),
            };
            match result {
                Some(result) => self.handle_result(&key, result),
                None => {
                    self.queue.done(&key);
                    break;
                }
            }
            self.queue.done(&key);
        }
    }

    fn handle_result(&self, key: &ObjectKey, result: Result<Action, ReconcileError>) {
        let mut backoffs = self.backoffs.lock().unwrap_or_else(|e| e.into_inner());
        match result {
            Ok(action) => {
                metrics::increment_reconciles(&self.name, action.outcome());
                backoffs.remove(key);
                if let Action::RequeueAfter(delay) = action {
                    debug!(key = %key, "Requeue after {:?}", delay);
                    self.queue.add_after(key.clone(), delay);
                }
            }
            Err(e) => {
                metrics::increment_reconciles(&self.name, "error");
                let delay = backoffs.entry(key.clone()).or_default().next_backoff();
                warn!(key = %key, "Reconcile failed, retrying in {:?}: {}", delay, e);
                self.queue.add_after(key.clone(), delay);
            }
        }
    }
}
