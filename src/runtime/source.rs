//! # Change Source
//!
//! Fills one kind's [`Indexer`] from a single bulk read of a tenant cluster and
//! turns what it read into work for a controller.
//!
//! `start` lists every object, keeps the ones accepted by all predicates, stores
//! them and hands each one to the event handler before returning. The
//! controller queue therefore already holds the full backlog of present state
//! when its workers begin. `load_all` and `load_one` refresh the indexer later
//! in the pass without delivering events again.

use super::api::{ApiError, ClusterApi};
use super::cache::Indexer;
use super::kind::{ObjectKey, ResourceKindRef};
use super::workqueue::WorkQueue;
use kube::core::DynamicObject;
use std::fmt;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("failed to list {kind}: {source}")]
    List {
        kind: ResourceKindRef,
        #[source]
        source: ApiError,
    },

    #[error("failed to reload {kind} {key}: {source}")]
    Get {
        kind: ResourceKindRef,
        key: ObjectKey,
        #[source]
        source: ApiError,
    },

    #[error("source for {0} is not started")]
    NotStarted(ResourceKindRef),

    #[error("source for {0} is already started")]
    AlreadyStarted(ResourceKindRef),
}

/// Filter deciding whether an observed object produces work
pub trait Predicate: Send + Sync {
    fn generic(&self, obj: &DynamicObject) -> bool;
}

impl<F> Predicate for F
where
    F: Fn(&DynamicObject) -> bool + Send + Sync,
{
    fn generic(&self, obj: &DynamicObject) -> bool {
        self(obj)
    }
}

/// Maps an observed object to work queue keys
pub trait EventHandler: Send + Sync {
    fn generic(&self, obj: &DynamicObject, queue: &Arc<WorkQueue>);
}

/// Enqueues the key of the observed object itself
#[derive(Debug, Clone, Copy, Default)]
pub struct EnqueueRequestForObject;

impl EventHandler for EnqueueRequestForObject {
    fn generic(&self, obj: &DynamicObject, queue: &Arc<WorkQueue>) {
        queue.add(ObjectKey::from_object(obj));
    }
}

/// Enqueues the keys computed by a mapping function, e.g. the owners of a
/// related object
pub struct EnqueueRequestsFromMapFunc<F>(pub F);

impl<F> EventHandler for EnqueueRequestsFromMapFunc<F>
where
    F: Fn(&DynamicObject) -> Vec<ObjectKey> + Send + Sync,
{
    fn generic(&self, obj: &DynamicObject, queue: &Arc<WorkQueue>) {
        for key in (self.0)(obj) {
            queue.add(key);
        }
    }
}

#[derive(Clone)]
struct Wiring {
    handler: Arc<dyn EventHandler>,
    queue: Arc<WorkQueue>,
    predicates: Vec<Arc<dyn Predicate>>,
}

impl Wiring {
    fn accepts(&self, obj: &DynamicObject) -> bool {
        self.predicates.iter().all(|p| p.generic(obj))
    }
}

pub struct ChangeSource {
    kind: ResourceKindRef,
    api: Arc<dyn ClusterApi>,
    indexer: Arc<Indexer>,
    wiring: Mutex<Option<Wiring>>,
}

impl fmt::Debug for ChangeSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChangeSource")
            .field("kind", &self.kind)
            .field("started", &self.is_started())
            .finish()
    }
}

impl ChangeSource {
    pub fn new(kind: ResourceKindRef, api: Arc<dyn ClusterApi>, indexer: Arc<Indexer>) -> Self {
        Self {
            kind,
            api,
            indexer,
            wiring: Mutex::new(None),
        }
    }

    pub fn kind(&self) -> &ResourceKindRef {
        &self.kind
    }

    pub fn indexer(&self) -> &Arc<Indexer> {
        &self.indexer
    }

    fn wiring(&self) -> Option<Wiring> {
        self.wiring
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Load present state and deliver one event per accepted object
    pub async fn start(
        &self,
        handler: Arc<dyn EventHandler>,
        queue: Arc<WorkQueue>,
        predicates: Vec<Arc<dyn Predicate>>,
    ) -> Result<(), SourceError> {
        if self.is_started() {
            return Err(SourceError::AlreadyStarted(self.kind.clone()));
        }
        info!(kind = %self.kind, "Starting change source");

        let wiring = Wiring {
            handler,
            queue,
            predicates,
        };
        let accepted = self.load_accepted(&wiring).await?;
        for obj in &accepted {
            wiring.handler.generic(obj, &wiring.queue);
        }

        *self.wiring.lock().unwrap_or_else(|e| e.into_inner()) = Some(wiring);
        Ok(())
    }

    /// Re-read every object of the kind
    ///
    /// The indexer ends up holding exactly the accepted objects: entries that
    /// disappeared or are now rejected by a predicate are evicted.
    pub async fn load_all(&self) -> Result<(), SourceError> {
        let wiring = self
            .wiring()
            .ok_or_else(|| SourceError::NotStarted(self.kind.clone()))?;
        self.load_accepted(&wiring).await?;
        Ok(())
    }

    /// Re-read one object
    ///
    /// An accepted object is stored. An object that is gone or now rejected
    /// by a predicate is evicted from the indexer, as `load_all` would do.
    pub async fn load_one(&self, key: &ObjectKey) -> Result<(), SourceError> {
        let wiring = self
            .wiring()
            .ok_or_else(|| SourceError::NotStarted(self.kind.clone()))?;
        let obj = self
            .api
            .get(&self.kind, key)
            .await
            .map_err(|source| SourceError::Get {
                kind: self.kind.clone(),
                key: key.clone(),
                source,
            })?;

        match obj {
            Some(obj) if wiring.accepts(&obj) => self.indexer.upsert(obj),
            _ => {
                self.indexer.delete(key);
            }
        }
        Ok(())
    }

    async fn load_accepted(&self, wiring: &Wiring) -> Result<Vec<DynamicObject>, SourceError> {
        let items = self
            .api
            .list(&self.kind)
            .await
            .map_err(|source| SourceError::List {
                kind: self.kind.clone(),
                source,
            })?;
        let listed = items.len();

        let accepted: Vec<DynamicObject> =
            items.into_iter().filter(|obj| wiring.accepts(obj)).collect();
        let stale = self.indexer.replace(accepted.clone());

        debug!(
            kind = %self.kind,
            listed,
            accepted = accepted.len(),
            removed = stale.len(),
            "Loaded list"
        );
        Ok(accepted)
    }

    pub fn is_started(&self) -> bool {
        self.wiring
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
    }

    /// Work queue the source delivers into, once started
    pub fn queue(&self) -> Option<Arc<WorkQueue>> {
        self.wiring().map(|w| w.queue)
    }
}
