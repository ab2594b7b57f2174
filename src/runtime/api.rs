//! # Cluster API
//!
//! The read and write surface of one cluster, addressed by [`ResourceKindRef`].
//!
//! Change sources bulk-read through it, the installer writes through it and
//! reconcilers receive it with their tenant connection. [`KubeClusterApi`] is
//! the live implementation backed by a `kube::Client`.

use super::kind::{ObjectKey, ResourceKindRef};
use async_trait::async_trait;
use kube::api::{ListParams, PostParams};
use kube::core::DynamicObject;
use kube::{Api, Client, ResourceExt};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    #[error("Failed to decode object: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

#[async_trait]
pub trait ClusterApi: Send + Sync {
    /// List every object of `kind` across all namespaces
    async fn list(&self, kind: &ResourceKindRef) -> Result<Vec<DynamicObject>, ApiError>;

    async fn get(
        &self,
        kind: &ResourceKindRef,
        key: &ObjectKey,
    ) -> Result<Option<DynamicObject>, ApiError>;

    async fn create(
        &self,
        kind: &ResourceKindRef,
        obj: &DynamicObject,
    ) -> Result<DynamicObject, ApiError>;

    /// Replace an existing object; `obj` must carry the current resource version
    async fn update(
        &self,
        kind: &ResourceKindRef,
        obj: &DynamicObject,
    ) -> Result<DynamicObject, ApiError>;
}

#[derive(Clone)]
pub struct KubeClusterApi {
    client: Client,
}

impl KubeClusterApi {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    fn api(&self, kind: &ResourceKindRef, namespace: Option<&str>) -> Api<DynamicObject> {
        let ar = kind.api_resource();
        match namespace {
            Some(ns) => Api::namespaced_with(self.client.clone(), ns, &ar),
            None => Api::all_with(self.client.clone(), &ar),
        }
    }
}

#[async_trait]
impl ClusterApi for KubeClusterApi {
    async fn list(&self, kind: &ResourceKindRef) -> Result<Vec<DynamicObject>, ApiError> {
        let list = self.api(kind, None).list(&ListParams::default()).await?;
        Ok(list
            .items
            .into_iter()
            .map(|mut obj| {
                // List items come back without apiVersion/kind
                obj.types = Some(kind.type_meta());
                obj
            })
            .collect())
    }

    async fn get(
        &self,
        kind: &ResourceKindRef,
        key: &ObjectKey,
    ) -> Result<Option<DynamicObject>, ApiError> {
        let obj = self
            .api(kind, key.namespace.as_deref())
            .get_opt(&key.name)
            .await?;
        Ok(obj.map(|mut obj| {
            obj.types = Some(kind.type_meta());
            obj
        }))
    }

    async fn create(
        &self,
        kind: &ResourceKindRef,
        obj: &DynamicObject,
    ) -> Result<DynamicObject, ApiError> {
        let mut obj = obj.clone();
        obj.types = Some(kind.type_meta());
        let namespace = obj.namespace();
        let created = self
            .api(kind, namespace.as_deref())
            .create(&PostParams::default(), &obj)
            .await?;
        Ok(created)
    }

    async fn update(
        &self,
        kind: &ResourceKindRef,
        obj: &DynamicObject,
    ) -> Result<DynamicObject, ApiError> {
        let mut obj = obj.clone();
        obj.types = Some(kind.type_meta());
        let namespace = obj.namespace();
        let name = obj.name_any();
        let updated = self
            .api(kind, namespace.as_deref())
            .replace(&name, &PostParams::default(), &obj)
            .await?;
        Ok(updated)
    }
}
