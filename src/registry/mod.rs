//! # Controller Registry
//!
//! Build-once catalog of what every tenant pass runs.
//!
//! A [`RegistryBuilder`] collects [`Descriptor`]s and [`FieldIndexer`]s at
//! start-up and is frozen into an immutable [`ControllerRegistry`]. For each
//! pass, [`ControllerRegistry::bind`] turns every declared watch into a
//! [`ChangeSource`] on that tenant's connection, so tenants never share
//! sources or indexers.
//!
//! ## Example
//!
//! ```rust,no_run
//! use fleet_controller::registry::RegistryBuilder;
//! use fleet_controller::runtime::{ReconcilerArgs, Reconciler, ResourceKindRef};
//! use std::sync::Arc;
//!
//! # fn factory(_: &ReconcilerArgs) -> Arc<dyn Reconciler> { unimplemented!() }
//! let mut builder = RegistryBuilder::new();
//! builder
//!     .register()
//!     .named("iprange")
//!     .for_kind(ResourceKindRef::new("cloud-resources.kyma-project.io", "v1beta1", "IpRange"), vec![])
//!     .with_reconciler(factory)
//!     .complete()
//!     .unwrap();
//! let registry = builder.build();
//! assert_eq!(registry.descriptors().len(), 1);
//! ```

mod builder;

pub use builder::{Builder, RegistryBuilder};

use crate::crd::ProviderType;
use crate::runtime::{
    ChangeSource, EventHandler, IndexFunc, Predicate, ReconcilerFactory, ResourceKindRef,
    TenantConnection,
};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("descriptor name must not be empty")]
    EmptyName,

    #[error("descriptor {0} has no reconciler factory")]
    MissingReconcilerFactory(String),

    #[error("descriptor {0} has no primary kind")]
    MissingPrimaryKind(String),

    #[error("descriptor {0} declares its primary kind more than once")]
    DuplicatePrimaryKind(String),

    #[error("descriptor {0} is already registered")]
    DuplicateDescriptor(String),
}

/// One watched kind of a descriptor
#[derive(Clone)]
pub struct WatchSpec {
    pub name: String,
    pub kind: ResourceKindRef,
    pub handler: Arc<dyn EventHandler>,
    pub predicates: Vec<Arc<dyn Predicate>>,
}

/// One reconciler with its primary kind and watches
pub struct Descriptor {
    pub name: String,
    pub kind: ResourceKindRef,
    /// Primary watch first, then additional watches in declaration order
    pub watches: Vec<WatchSpec>,
    pub factory: Arc<dyn ReconcilerFactory>,
    /// Empty means every provider
    pub providers: Vec<ProviderType>,
}

impl Descriptor {
    pub fn supports(&self, provider: Option<ProviderType>) -> bool {
        supports(&self.providers, provider)
    }
}

/// Field index installed on a tenant's cache before controllers start
#[derive(Clone)]
pub struct FieldIndexer {
    pub kind: ResourceKindRef,
    pub field: String,
    pub extract: IndexFunc,
    pub providers: Vec<ProviderType>,
}

impl FieldIndexer {
    pub fn new<F>(kind: ResourceKindRef, field: impl Into<String>, extract: F) -> Self
    where
        F: Fn(&kube::core::DynamicObject) -> Vec<String> + Send + Sync + 'static,
    {
        Self {
            kind,
            field: field.into(),
            extract: Arc::new(extract),
            providers: Vec::new(),
        }
    }

    pub fn for_providers(mut self, providers: impl IntoIterator<Item = ProviderType>) -> Self {
        self.providers = providers.into_iter().collect();
        self
    }

    pub fn supports(&self, provider: Option<ProviderType>) -> bool {
        supports(&self.providers, provider)
    }

    /// Install this index on the connection's cache
    pub fn install(&self, connection: &TenantConnection) {
        let extract = self.extract.clone();
        connection
            .cache()
            .index_field(&self.kind, &self.field, move |obj| extract(obj));
    }
}

fn supports(providers: &[ProviderType], provider: Option<ProviderType>) -> bool {
    match provider {
        Some(p) => providers.is_empty() || providers.contains(&p),
        None => true,
    }
}

/// A watch bound to one tenant's connection
pub struct BoundWatch {
    pub name: String,
    pub source: Arc<ChangeSource>,
    pub handler: Arc<dyn EventHandler>,
    pub predicates: Vec<Arc<dyn Predicate>>,
}

/// A descriptor bound to one tenant's connection
pub struct BoundDescriptor {
    pub descriptor: Arc<Descriptor>,
    pub watches: Vec<BoundWatch>,
}

impl BoundDescriptor {
    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    /// Every source started, every queue drained and nothing in flight
    pub fn is_idle(&self) -> bool {
        self.watches.iter().all(|w| {
            w.source.is_started()
                && w
                    .source
                    .queue()
                    .is_some_and(|q| q.is_empty() && q.in_flight() == 0)
        })
    }
}

/// Frozen catalog shared by every tenant pass
pub struct ControllerRegistry {
    descriptors: Vec<Arc<Descriptor>>,
    indexers: Vec<FieldIndexer>,
}

impl ControllerRegistry {
    pub fn descriptors(&self) -> &[Arc<Descriptor>] {
        &self.descriptors
    }

    pub fn indexers(&self) -> &[FieldIndexer] {
        &self.indexers
    }

    /// Bind every descriptor to fresh change sources on `connection`
    pub fn bind(&self, connection: &TenantConnection) -> Vec<BoundDescriptor> {
        self.descriptors
            .iter()
            .map(|descriptor| BoundDescriptor {
                descriptor: descriptor.clone(),
                watches: descriptor
                    .watches
                    .iter()
                    .map(|watch| BoundWatch {
                        name: watch.name.clone(),
                        source: Arc::new(ChangeSource::new(
                            watch.kind.clone(),
                            connection.api().clone(),
                            connection.cache().indexer_for(&watch.kind),
                        )),
                        handler: watch.handler.clone(),
                        predicates: watch.predicates.clone(),
                    })
                    .collect(),
            })
            .collect()
    }
}

/// `true` if every bound watch across all descriptors is idle
pub fn all_idle(bound: &[BoundDescriptor]) -> bool {
    bound.iter().all(BoundDescriptor::is_idle)
}
