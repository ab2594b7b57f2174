//! Shared fixtures for the integration tests
//!
//! An in-memory [`ClusterApi`] standing in for a tenant cluster and an
//! in-memory [`StatusRepo`] standing in for the control plane.

#![allow(dead_code)]

use async_trait::async_trait;
use fleet_controller::crd::{ProviderType, Scope, ScopeSpec, TenantStatus};
use fleet_controller::looper::status::empty_status;
use fleet_controller::looper::{StatusError, StatusRepo};
use fleet_controller::runtime::{ApiError, ClusterApi, ObjectKey, ResourceKindRef};
use kube::core::DynamicObject;
use kube::ResourceExt;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

pub fn configmap_kind() -> ResourceKindRef {
    ResourceKindRef::new("", "v1", "ConfigMap")
}

pub fn iprange_kind() -> ResourceKindRef {
    ResourceKindRef::new("cloud-resources.kyma-project.io", "v1beta1", "IpRange")
}

pub fn object(kind: &ResourceKindRef, namespace: &str, name: &str) -> DynamicObject {
    let mut obj = DynamicObject::new(name, &kind.api_resource()).within(namespace);
    obj.types = Some(kind.type_meta());
    obj
}

pub fn labeled(mut obj: DynamicObject, key: &str, value: &str) -> DynamicObject {
    obj.labels_mut().insert(key.to_string(), value.to_string());
    obj
}

pub fn scope(tenant: &str, provider: ProviderType) -> Scope {
    let mut scope = Scope::new(
        tenant,
        ScopeSpec {
            kyma_name: tenant.to_string(),
            shoot_name: format!("shoot-{}", tenant),
            region: "eu-west-1".to_string(),
            provider,
        },
    );
    scope.metadata.namespace = Some("kcp-system".to_string());
    scope
}

/// In-memory cluster keyed by kind and object key
#[derive(Default)]
pub struct FakeClusterApi {
    objects: Mutex<HashMap<ResourceKindRef, BTreeMap<ObjectKey, DynamicObject>>>,
    failing_lists: Mutex<Vec<ResourceKindRef>>,
    hanging_lists: Mutex<Vec<ResourceKindRef>>,
    versions: AtomicUsize,
    pub lists: AtomicUsize,
    pub creates: AtomicUsize,
    pub updates: AtomicUsize,
}

impl FakeClusterApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, obj: DynamicObject) {
        let kind = ResourceKindRef::from_object(&obj).expect("object without kind");
        self.objects
            .lock()
            .unwrap()
            .entry(kind)
            .or_default()
            .insert(ObjectKey::from_object(&obj), obj);
    }

    pub fn remove(&self, kind: &ResourceKindRef, key: &ObjectKey) {
        if let Some(objects) = self.objects.lock().unwrap().get_mut(kind) {
            objects.remove(key);
        }
    }

    pub fn stored(&self, kind: &ResourceKindRef, key: &ObjectKey) -> Option<DynamicObject> {
        self.objects
            .lock()
            .unwrap()
            .get(kind)
            .and_then(|objects| objects.get(key))
            .cloned()
    }

    /// Make every list of `kind` fail
    pub fn fail_list(&self, kind: ResourceKindRef) {
        self.failing_lists.lock().unwrap().push(kind);
    }

    /// Make every list of `kind` wait forever
    pub fn hang_list(&self, kind: ResourceKindRef) {
        self.hanging_lists.lock().unwrap().push(kind);
    }

    fn next_version(&self) -> String {
        (self.versions.fetch_add(1, Ordering::SeqCst) + 1).to_string()
    }
}

#[async_trait]
impl ClusterApi for FakeClusterApi {
    async fn list(&self, kind: &ResourceKindRef) -> Result<Vec<DynamicObject>, ApiError> {
        self.lists.fetch_add(1, Ordering::SeqCst);
        let hangs = self.hanging_lists.lock().unwrap().contains(kind);
        if hangs {
            std::future::pending::<()>().await;
        }
        if self.failing_lists.lock().unwrap().contains(kind) {
            return Err(ApiError::Other(format!("list {} refused", kind)));
        }
        Ok(self
            .objects
            .lock()
            .unwrap()
            .get(kind)
            .map(|objects| objects.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn get(
        &self,
        kind: &ResourceKindRef,
        key: &ObjectKey,
    ) -> Result<Option<DynamicObject>, ApiError> {
        Ok(self.stored(kind, key))
    }

    async fn create(
        &self,
        kind: &ResourceKindRef,
        obj: &DynamicObject,
    ) -> Result<DynamicObject, ApiError> {
        let key = ObjectKey::from_object(obj);
        let mut objects = self.objects.lock().unwrap();
        let objects = objects.entry(kind.clone()).or_default();
        if objects.contains_key(&key) {
            return Err(ApiError::Other(format!("{} {} already exists", kind, key)));
        }
        let mut created = obj.clone();
        created.types = Some(kind.type_meta());
        created.metadata.resource_version = Some(self.next_version());
        objects.insert(key, created.clone());
        self.creates.fetch_add(1, Ordering::SeqCst);
        Ok(created)
    }

    async fn update(
        &self,
        kind: &ResourceKindRef,
        obj: &DynamicObject,
    ) -> Result<DynamicObject, ApiError> {
        let key = ObjectKey::from_object(obj);
        let mut objects = self.objects.lock().unwrap();
        let objects = objects.entry(kind.clone()).or_default();
        let Some(current) = objects.get(&key) else {
            return Err(ApiError::Other(format!("{} {} not found", kind, key)));
        };
        if current.metadata.resource_version != obj.metadata.resource_version {
            return Err(ApiError::Other(format!("{} {} conflict", kind, key)));
        }
        let mut updated = obj.clone();
        updated.metadata.resource_version = Some(self.next_version());
        objects.insert(key, updated.clone());
        self.updates.fetch_add(1, Ordering::SeqCst);
        Ok(updated)
    }
}

/// In-memory store of persisted tenant status records
#[derive(Default)]
pub struct MemoryStatusRepo {
    records: Mutex<BTreeMap<(String, String), TenantStatus>>,
    pub saves: AtomicUsize,
    fail_saves: Mutex<bool>,
}

impl MemoryStatusRepo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, name: &str, namespace: &str) -> Option<TenantStatus> {
        self.records
            .lock()
            .unwrap()
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    pub fn fail_saves(&self) {
        *self.fail_saves.lock().unwrap() = true;
    }
}

#[async_trait]
impl StatusRepo for MemoryStatusRepo {
    async fn load(&self, name: &str, namespace: &str) -> Result<TenantStatus, StatusError> {
        Ok(self
            .record(name, namespace)
            .unwrap_or_else(|| empty_status(name, namespace)))
    }

    async fn save(&self, status: &TenantStatus) -> Result<(), StatusError> {
        self.saves.fetch_add(1, Ordering::SeqCst);
        if *self.fail_saves.lock().unwrap() {
            return Err(StatusError::Other("status store unavailable".to_string()));
        }
        let key = (
            status.namespace().unwrap_or_default(),
            status.name_any(),
        );
        self.records.lock().unwrap().insert(key, status.clone());
        Ok(())
    }
}
