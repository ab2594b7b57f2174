//! # Tenant Runtime Machinery
//!
//! Everything one tenant pass is built from.
//!
//! - `kind`: resource kind and object key identity
//! - `api`: cluster read/write surface and its kube implementation
//! - `cache`, `selector`: per-kind indexed snapshot store and list filtering
//! - `source`: change sources, predicates and event handlers
//! - `workqueue`, `backoff`, `controller`: reconciler work loop
//! - `connection`, `tenant_runtime`: per-tenant connection and lifetime

pub mod api;
pub mod backoff;
pub mod cache;
pub mod connection;
pub mod controller;
pub mod kind;
pub mod selector;
pub mod source;
pub mod tenant_runtime;
pub mod workqueue;

pub use api::{ApiError, ClusterApi, KubeClusterApi};
pub use backoff::FibonacciBackoff;
pub use cache::{CacheError, IndexFunc, Indexer, ListOptions, ResourceCache};
pub use connection::{ConnectionError, ConnectionFactory, KubeConnectionFactory, TenantConnection};
pub use controller::{Action, Controller, ReconcileError, Reconciler, ReconcilerArgs, ReconcilerFactory};
pub use kind::{ObjectKey, ResourceKindRef};
pub use selector::LabelSelector;
pub use source::{
    ChangeSource, EnqueueRequestForObject, EnqueueRequestsFromMapFunc, EventHandler, Predicate,
    SourceError,
};
pub use tenant_runtime::{RuntimeError, TenantRuntime};
pub use workqueue::WorkQueue;
