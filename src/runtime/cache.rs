//! # Resource Cache
//!
//! A read-only, per-kind indexed store of object snapshots.
//!
//! Each kind has one [`Indexer`] holding the last-seen object per
//! [`ObjectKey`], a namespace index and any number of named field indexes.
//! The cache never watches anything itself: a [`ChangeSource`] fills the
//! indexer, and the kind becomes readable only after that first load.
//!
//! Field index values are stored twice, once under the object's namespace and
//! once under [`ALL_NAMESPACES`], so an equality field selector can be answered
//! with or without a namespace filter.
//!
//! [`ChangeSource`]: super::source::ChangeSource

use super::kind::{ObjectKey, ResourceKindRef};
use super::selector::{exact_field_match, LabelSelector};
use kube::core::DynamicObject;
use kube::ResourceExt;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use thiserror::Error;

/// Index key prefix for objects of every namespace
pub const ALL_NAMESPACES: &str = "__all_namespaces";

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("kind {kind} is not cached")]
    KindNotCached { kind: ResourceKindRef },

    #[error("{kind} {key} not found")]
    NotFound { kind: ResourceKindRef, key: ObjectKey },

    #[error("unsupported selector: {0}")]
    UnsupportedSelector(String),

    #[error("invalid selector: {0}")]
    InvalidSelector(String),

    #[error("failed to decode cached object: {0}")]
    Decode(#[from] serde_json::Error),
}

impl CacheError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, CacheError::NotFound { .. })
    }
}

/// Extracts the values an object is indexed under for one field
pub type IndexFunc = Arc<dyn Fn(&DynamicObject) -> Vec<String> + Send + Sync>;

/// Name of the index serving field selectors on `field`
pub fn field_index_name(field: &str) -> String {
    format!("field:{field}")
}

fn namespaced_index_key(namespace: Option<&str>, value: &str) -> String {
    match namespace {
        Some(ns) if !ns.is_empty() => format!("{ns}/{value}"),
        _ => format!("{ALL_NAMESPACES}/{value}"),
    }
}

#[derive(Default)]
struct IndexerState {
    items: BTreeMap<ObjectKey, Arc<DynamicObject>>,
    by_namespace: HashMap<String, BTreeSet<ObjectKey>>,
    index_funcs: HashMap<String, IndexFunc>,
    indices: HashMap<String, HashMap<String, BTreeSet<ObjectKey>>>,
    synced: bool,
}

impl IndexerState {
    fn index_keys(func: &IndexFunc, obj: &DynamicObject) -> Vec<String> {
        let namespace = obj.namespace();
        func(obj)
            .into_iter()
            .flat_map(|value| {
                let mut keys = vec![namespaced_index_key(None, &value)];
                if namespace.as_deref().is_some_and(|ns| !ns.is_empty()) {
                    keys.push(namespaced_index_key(namespace.as_deref(), &value));
                }
                keys
            })
            .collect()
    }

    fn unindex(&mut self, key: &ObjectKey, obj: &DynamicObject) {
        if let Some(ns) = &key.namespace {
            if let Some(keys) = self.by_namespace.get_mut(ns) {
                keys.remove(key);
                if keys.is_empty() {
                    self.by_namespace.remove(ns);
                }
            }
        }
        for (name, func) in &self.index_funcs {
            let Some(index) = self.indices.get_mut(name) else {
                continue;
            };
            for index_key in Self::index_keys(func, obj) {
                if let Some(keys) = index.get_mut(&index_key) {
                    keys.remove(key);
                    if keys.is_empty() {
                        index.remove(&index_key);
                    }
                }
            }
        }
    }

    fn index(&mut self, key: &ObjectKey, obj: &DynamicObject) {
        if let Some(ns) = &key.namespace {
            self.by_namespace
                .entry(ns.clone())
                .or_default()
                .insert(key.clone());
        }
        for (name, func) in &self.index_funcs {
            let index = self.indices.entry(name.clone()).or_default();
            for index_key in Self::index_keys(func, obj) {
                index.entry(index_key).or_default().insert(key.clone());
            }
        }
    }

    fn upsert(&mut self, obj: DynamicObject) {
        let key = ObjectKey::from_object(&obj);
        if let Some(old) = self.items.remove(&key) {
            self.unindex(&key, &old);
        }
        self.index(&key, &obj);
        self.items.insert(key, Arc::new(obj));
    }

    fn delete(&mut self, key: &ObjectKey) -> bool {
        match self.items.remove(key) {
            Some(old) => {
                self.unindex(key, &old);
                true
            }
            None => false,
        }
    }

    fn collect(&self, keys: Option<&BTreeSet<ObjectKey>>) -> Vec<Arc<DynamicObject>> {
        keys.into_iter()
            .flatten()
            .filter_map(|k| self.items.get(k).cloned())
            .collect()
    }
}

/// Key to snapshot store of one resource kind
pub struct Indexer {
    kind: ResourceKindRef,
    state: RwLock<IndexerState>,
}

impl Indexer {
    pub fn new(kind: ResourceKindRef) -> Self {
        Self {
            kind,
            state: RwLock::new(IndexerState::default()),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, IndexerState> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, IndexerState> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }

    pub fn kind(&self) -> &ResourceKindRef {
        &self.kind
    }

    /// Insert or replace the snapshot of one object
    pub fn upsert(&self, obj: DynamicObject) {
        self.write().upsert(obj);
    }

    pub fn delete(&self, key: &ObjectKey) -> bool {
        self.write().delete(key)
    }

    /// Make `objects` the complete content and mark the indexer synced
    ///
    /// Returns the keys that were dropped because they were not in `objects`.
    pub fn replace(&self, objects: Vec<DynamicObject>) -> Vec<ObjectKey> {
        let mut state = self.write();
        let loaded: BTreeSet<ObjectKey> = objects.iter().map(ObjectKey::from_object).collect();
        let stale: Vec<ObjectKey> = state
            .items
            .keys()
            .filter(|k| !loaded.contains(*k))
            .cloned()
            .collect();
        for key in &stale {
            state.delete(key);
        }
        for obj in objects {
            state.upsert(obj);
        }
        state.synced = true;
        stale
    }

    pub fn has_synced(&self) -> bool {
        self.read().synced
    }

    pub fn get(&self, key: &ObjectKey) -> Option<Arc<DynamicObject>> {
        self.read().items.get(key).cloned()
    }

    pub fn list(&self) -> Vec<Arc<DynamicObject>> {
        self.read().items.values().cloned().collect()
    }

    pub fn keys(&self) -> Vec<ObjectKey> {
        self.read().items.keys().cloned().collect()
    }

    pub fn by_namespace(&self, namespace: &str) -> Vec<Arc<DynamicObject>> {
        let state = self.read();
        state.collect(state.by_namespace.get(namespace))
    }

    /// Objects indexed under `value` by the named index
    ///
    /// Returns `None` if no index with that name exists.
    pub fn by_index(&self, name: &str, value: &str) -> Option<Vec<Arc<DynamicObject>>> {
        let state = self.read();
        if !state.index_funcs.contains_key(name) {
            return None;
        }
        let keys = state.indices.get(name).and_then(|index| index.get(value));
        Some(state.collect(keys))
    }

    pub fn has_index(&self, name: &str) -> bool {
        self.read().index_funcs.contains_key(name)
    }

    /// Register a named index and build it over the current content
    pub fn add_index(&self, name: impl Into<String>, func: IndexFunc) {
        let name = name.into();
        let mut state = self.write();
        let mut index: HashMap<String, BTreeSet<ObjectKey>> = HashMap::new();
        for (key, obj) in &state.items {
            for index_key in IndexerState::index_keys(&func, obj) {
                index.entry(index_key).or_default().insert(key.clone());
            }
        }
        state.indices.insert(name.clone(), index);
        state.index_funcs.insert(name, func);
    }

    pub fn len(&self) -> usize {
        self.read().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Options of [`ResourceCache::list`]
#[derive(Debug, Clone, Default)]
pub struct ListOptions {
    pub namespace: Option<String>,
    pub label_selector: Option<String>,
    pub field_selector: Option<String>,
    /// Maximum number of returned objects; 0 means unlimited
    pub limit: usize,
    pub continue_token: Option<String>,
}

impl ListOptions {
    pub fn in_namespace(namespace: impl Into<String>) -> Self {
        Self {
            namespace: Some(namespace.into()),
            ..Default::default()
        }
    }

    pub fn labels(mut self, selector: impl Into<String>) -> Self {
        self.label_selector = Some(selector.into());
        self
    }

    pub fn fields(mut self, selector: impl Into<String>) -> Self {
        self.field_selector = Some(selector.into());
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }
}

/// Read index over every cached kind of one tenant
#[derive(Default)]
pub struct ResourceCache {
    indexers: RwLock<HashMap<ResourceKindRef, Arc<Indexer>>>,
}

impl ResourceCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Indexer of `kind`, created empty and unsynced on first use
    pub fn indexer_for(&self, kind: &ResourceKindRef) -> Arc<Indexer> {
        if let Some(indexer) = self
            .indexers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(kind)
        {
            return indexer.clone();
        }
        self.indexers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .entry(kind.clone())
            .or_insert_with(|| Arc::new(Indexer::new(kind.clone())))
            .clone()
    }

    fn synced_indexer(&self, kind: &ResourceKindRef) -> Result<Arc<Indexer>, CacheError> {
        let indexers = self.indexers.read().unwrap_or_else(|e| e.into_inner());
        match indexers.get(kind) {
            Some(indexer) if indexer.has_synced() => Ok(indexer.clone()),
            _ => Err(CacheError::KindNotCached { kind: kind.clone() }),
        }
    }

    /// Register a field index on `kind`, usable as `field=value` selector
    pub fn index_field<F>(&self, kind: &ResourceKindRef, field: &str, extract: F)
    where
        F: Fn(&DynamicObject) -> Vec<String> + Send + Sync + 'static,
    {
        self.indexer_for(kind)
            .add_index(field_index_name(field), Arc::new(extract));
    }

    pub fn is_cached(&self, kind: &ResourceKindRef) -> bool {
        self.synced_indexer(kind).is_ok()
    }

    /// Deep copy of one cached object, tagged with its kind
    pub fn get(&self, kind: &ResourceKindRef, key: &ObjectKey) -> Result<DynamicObject, CacheError> {
        let indexer = self.synced_indexer(kind)?;
        let obj = indexer.get(key).ok_or_else(|| CacheError::NotFound {
            kind: kind.clone(),
            key: key.clone(),
        })?;
        let mut copy = (*obj).clone();
        copy.types = Some(kind.type_meta());
        Ok(copy)
    }

    /// Typed deep copy of one cached object
    pub fn get_as<K>(&self, kind: &ResourceKindRef, key: &ObjectKey) -> Result<K, CacheError>
    where
        K: serde::de::DeserializeOwned,
    {
        let obj = self.get(kind, key)?;
        Ok(serde_json::from_value(serde_json::to_value(obj)?)?)
    }

    /// Deep copies of the objects matching `opts`
    pub fn list(
        &self,
        kind: &ResourceKindRef,
        opts: &ListOptions,
    ) -> Result<Vec<DynamicObject>, CacheError> {
        Ok(self
            .list_shared(kind, opts)?
            .into_iter()
            .map(|obj| {
                let mut copy = (*obj).clone();
                copy.types = Some(kind.type_meta());
                copy
            })
            .collect())
    }

    /// Shared snapshots of the objects matching `opts`, without copying
    pub fn list_shared(
        &self,
        kind: &ResourceKindRef,
        opts: &ListOptions,
    ) -> Result<Vec<Arc<DynamicObject>>, CacheError> {
        let indexer = self.synced_indexer(kind)?;

        if opts.continue_token.as_deref().is_some_and(|t| !t.is_empty()) {
            return Err(CacheError::UnsupportedSelector(
                "continue list option is not supported by the cache".to_string(),
            ));
        }

        let candidates = match (&opts.field_selector, &opts.namespace) {
            (Some(selector), namespace) if !selector.trim().is_empty() => {
                let (field, value) = exact_field_match(selector)?;
                let index_key = namespaced_index_key(namespace.as_deref(), &value);
                indexer
                    .by_index(&field_index_name(&field), &index_key)
                    .ok_or_else(|| {
                        CacheError::UnsupportedSelector(format!("no index for field {field}"))
                    })?
            }
            (_, Some(namespace)) if !namespace.is_empty() => indexer.by_namespace(namespace),
            _ => indexer.list(),
        };

        let label_selector = match &opts.label_selector {
            Some(s) => s.parse::<LabelSelector>()?,
            None => LabelSelector::default(),
        };

        let mut result = Vec::new();
        for obj in candidates {
            if opts.limit > 0 && result.len() >= opts.limit {
                break;
            }
            if !label_selector.matches(obj.labels()) {
                continue;
            }
            result.push(obj);
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kind() -> ResourceKindRef {
        ResourceKindRef::new("cloud-resources.kyma-project.io", "v1beta1", "IpRange")
    }

    fn obj(ns: &str, name: &str, network: &str, tier: &str) -> DynamicObject {
        let mut obj = DynamicObject::new(name, &kind().api_resource()).within(ns);
        obj.metadata.labels = Some([("tier".to_string(), tier.to_string())].into());
        obj.data = serde_json::json!({ "spec": { "network": network } });
        obj
    }

    fn network_of(obj: &DynamicObject) -> Vec<String> {
        obj.data
            .pointer("/spec/network")
            .and_then(|v| v.as_str())
            .map(|s| vec![s.to_string()])
            .unwrap_or_default()
    }

    fn loaded_cache() -> ResourceCache {
        let cache = ResourceCache::new();
        cache.index_field(&kind(), "spec.network", network_of);
        cache.indexer_for(&kind()).replace(vec![
            obj("a", "one", "net-1", "front"),
            obj("a", "two", "net-2", "back"),
            obj("b", "three", "net-1", "front"),
        ]);
        cache
    }

    #[test]
    fn test_unsynced_kind_is_not_cached() {
        let cache = ResourceCache::new();
        cache.indexer_for(&kind());
        assert!(matches!(
            cache.get(&kind(), &ObjectKey::namespaced("a", "one")),
            Err(CacheError::KindNotCached { .. })
        ));
        assert!(matches!(
            cache.list(&kind(), &ListOptions::default()),
            Err(CacheError::KindNotCached { .. })
        ));
    }

    #[test]
    fn test_get_returns_tagged_copy_or_not_found() {
        let cache = loaded_cache();
        let got = cache.get(&kind(), &ObjectKey::namespaced("a", "one")).unwrap();
        assert_eq!(got.name_any(), "one");
        assert_eq!(got.types.unwrap().kind, "IpRange");

        let err = cache
            .get(&kind(), &ObjectKey::namespaced("a", "missing"))
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_list_by_namespace_labels_and_limit() {
        let cache = loaded_cache();
        assert_eq!(cache.list(&kind(), &ListOptions::default()).unwrap().len(), 3);
        assert_eq!(
            cache.list(&kind(), &ListOptions::in_namespace("a")).unwrap().len(),
            2
        );
        let front = cache
            .list(&kind(), &ListOptions::default().labels("tier=front"))
            .unwrap();
        assert_eq!(front.len(), 2);
        let limited = cache
            .list(&kind(), &ListOptions::default().labels("tier=front").limit(1))
            .unwrap();
        assert_eq!(limited.len(), 1);
    }

    #[test]
    fn test_list_by_field_index_with_and_without_namespace() {
        let cache = loaded_cache();
        let all = cache
            .list(&kind(), &ListOptions::default().fields("spec.network=net-1"))
            .unwrap();
        assert_eq!(all.len(), 2);

        let in_b = cache
            .list(&kind(), &ListOptions::in_namespace("b").fields("spec.network==net-1"))
            .unwrap();
        assert_eq!(in_b.len(), 1);
        assert_eq!(in_b[0].name_any(), "three");
    }

    #[test]
    fn test_list_rejects_unsupported_selectors() {
        let cache = loaded_cache();
        for opts in [
            ListOptions::default().fields("spec.network!=net-1"),
            ListOptions::default().fields("spec.network=net-1,metadata.name=one"),
            ListOptions::default().fields("spec.zone=z1"),
            ListOptions {
                continue_token: Some("abc".into()),
                ..Default::default()
            },
        ] {
            assert!(matches!(
                cache.list(&kind(), &opts),
                Err(CacheError::UnsupportedSelector(_))
            ));
        }
    }

    #[test]
    fn test_replace_drops_stale_and_reindexes() {
        let cache = loaded_cache();
        let indexer = cache.indexer_for(&kind());
        let stale = indexer.replace(vec![obj("a", "one", "net-2", "front")]);
        assert_eq!(stale.len(), 2);
        assert_eq!(indexer.len(), 1);

        let net1 = cache
            .list(&kind(), &ListOptions::default().fields("spec.network=net-1"))
            .unwrap();
        assert!(net1.is_empty());
        assert!(cache.list(&kind(), &ListOptions::in_namespace("b")).unwrap().is_empty());
    }

    #[test]
    fn test_index_added_after_load_is_built() {
        let cache = ResourceCache::new();
        cache
            .indexer_for(&kind())
            .replace(vec![obj("a", "one", "net-1", "front")]);
        cache.index_field(&kind(), "spec.network", network_of);
        let hits = cache
            .list(&kind(), &ListOptions::default().fields("spec.network=net-1"))
            .unwrap();
        assert_eq!(hits.len(), 1);
    }
}
