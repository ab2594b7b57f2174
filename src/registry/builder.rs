//! Registry construction.

use super::{ControllerRegistry, Descriptor, FieldIndexer, RegistryError, WatchSpec};
use crate::crd::ProviderType;
use crate::runtime::{
    EnqueueRequestForObject, EventHandler, Predicate, ReconcilerFactory, ResourceKindRef,
};
use std::sync::Arc;

#[derive(Default)]
pub struct RegistryBuilder {
    descriptors: Vec<Descriptor>,
    indexers: Vec<FieldIndexer>,
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start declaring one descriptor; nothing is registered until `complete`
    pub fn register(&mut self) -> Builder<'_> {
        Builder {
            registry: self,
            name: None,
            primary: None,
            duplicate_primary: false,
            watches: Vec::new(),
            factory: None,
            providers: Vec::new(),
        }
    }

    pub fn index_field(&mut self, indexer: FieldIndexer) -> &mut Self {
        self.indexers.push(indexer);
        self
    }

    /// Freeze the registry
    pub fn build(self) -> Arc<ControllerRegistry> {
        Arc::new(ControllerRegistry {
            descriptors: self.descriptors.into_iter().map(Arc::new).collect(),
            indexers: self.indexers,
        })
    }
}

/// Accumulates one [`Descriptor`]
pub struct Builder<'a> {
    registry: &'a mut RegistryBuilder,
    name: Option<String>,
    primary: Option<WatchSpec>,
    duplicate_primary: bool,
    watches: Vec<WatchSpec>,
    factory: Option<Arc<dyn ReconcilerFactory>>,
    providers: Vec<ProviderType>,
}

impl Builder<'_> {
    /// Name of the descriptor; defaults to the lowercase primary kind
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Declare the primary kind; its objects enqueue their own key
    pub fn for_kind(mut self, kind: ResourceKindRef, predicates: Vec<Arc<dyn Predicate>>) -> Self {
        if self.primary.is_some() {
            self.duplicate_primary = true;
            return self;
        }
        self.primary = Some(WatchSpec {
            name: kind.to_string(),
            kind,
            handler: Arc::new(EnqueueRequestForObject),
            predicates,
        });
        self
    }

    /// Declare an additional watched kind
    pub fn watches(
        mut self,
        kind: ResourceKindRef,
        handler: Arc<dyn EventHandler>,
        predicates: Vec<Arc<dyn Predicate>>,
    ) -> Self {
        self.watches.push(WatchSpec {
            name: kind.to_string(),
            kind,
            handler,
            predicates,
        });
        self
    }

    pub fn with_reconciler<F>(mut self, factory: F) -> Self
    where
        F: ReconcilerFactory + 'static,
    {
        self.factory = Some(Arc::new(factory));
        self
    }

    pub fn supported_providers(mut self, providers: impl IntoIterator<Item = ProviderType>) -> Self {
        self.providers = providers.into_iter().collect();
        self
    }

    /// Validate and commit the descriptor into the registry
    pub fn complete(self) -> Result<(), RegistryError> {
        let name = match (&self.name, &self.primary) {
            (Some(name), _) => name.trim().to_string(),
            (None, Some(primary)) => primary.kind.kind.to_lowercase(),
            (None, None) => String::new(),
        };
        if name.is_empty() {
            return match self.primary {
                None if self.name.is_none() => Err(RegistryError::MissingPrimaryKind(name)),
                _ => Err(RegistryError::EmptyName),
            };
        }
        if self.duplicate_primary {
            return Err(RegistryError::DuplicatePrimaryKind(name));
        }
        let Some(primary) = self.primary else {
            return Err(RegistryError::MissingPrimaryKind(name));
        };
        let Some(factory) = self.factory else {
            return Err(RegistryError::MissingReconcilerFactory(name));
        };
        if self.registry.descriptors.iter().any(|d| d.name == name) {
            return Err(RegistryError::DuplicateDescriptor(name));
        }

        let mut watches = Vec::with_capacity(self.watches.len() + 1);
        watches.push(primary.clone());
        watches.extend(self.watches);

        self.registry.descriptors.push(Descriptor {
            name,
            kind: primary.kind,
            watches,
            factory,
            providers: self.providers,
        });
        Ok(())
    }
}
