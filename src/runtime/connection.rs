//! # Tenant Connection
//!
//! A live connection to one tenant cluster plus the tenant's identity record.
//!
//! [`KubeConnectionFactory`] resolves connections from the control plane: it
//! loads the tenant's [`Scope`], then reads the kubeconfig secret and builds a
//! client from it. A missing `Scope` means the tenant is gone and is reported as
//! [`ConnectionError::NotFound`]; everything else is a
//! [`ConnectionError::Failed`] worth retrying on a later pass.

use super::api::{ClusterApi, KubeClusterApi};
use super::cache::ResourceCache;
use crate::config::FleetConfig;
use crate::crd::{ProviderType, Scope};
use crate::queue::TenantId;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Api, Client, Config};
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("{what} for tenant {tenant} not found")]
    NotFound { tenant: TenantId, what: String },

    #[error("failed to connect to tenant {tenant}: {source}")]
    Failed {
        tenant: TenantId,
        #[source]
        source: anyhow::Error,
    },
}

impl ConnectionError {
    pub fn failed(tenant: &str, source: impl Into<anyhow::Error>) -> Self {
        ConnectionError::Failed {
            tenant: tenant.to_string(),
            source: source.into(),
        }
    }

    /// `true` if the tenant no longer exists
    pub fn is_not_found(&self) -> bool {
        matches!(self, ConnectionError::NotFound { .. })
    }
}

/// Everything one tenant pass needs to talk to its tenant
pub struct TenantConnection {
    tenant: TenantId,
    api: Arc<dyn ClusterApi>,
    cache: Arc<ResourceCache>,
    scope: Scope,
}

impl TenantConnection {
    pub fn new(tenant: impl Into<TenantId>, api: Arc<dyn ClusterApi>, scope: Scope) -> Self {
        Self {
            tenant: tenant.into(),
            api,
            cache: Arc::new(ResourceCache::new()),
            scope,
        }
    }

    pub fn tenant(&self) -> &str {
        &self.tenant
    }

    /// Live read/write access to the tenant cluster
    pub fn api(&self) -> &Arc<dyn ClusterApi> {
        &self.api
    }

    /// Read index filled by this pass's change sources
    pub fn cache(&self) -> &Arc<ResourceCache> {
        &self.cache
    }

    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    pub fn provider(&self) -> ProviderType {
        self.scope.spec.provider
    }
}

#[async_trait]
pub trait ConnectionFactory: Send + Sync {
    async fn connect(&self, tenant: &str) -> Result<TenantConnection, ConnectionError>;
}

pub struct KubeConnectionFactory {
    kcp: Client,
    namespace: String,
    secret_prefix: String,
    secret_key: String,
}

impl KubeConnectionFactory {
    pub fn new(kcp: Client, config: &FleetConfig) -> Self {
        Self {
            kcp,
            namespace: config.kcp_namespace.clone(),
            secret_prefix: config.kubeconfig_secret_prefix.clone(),
            secret_key: config.kubeconfig_secret_key.clone(),
        }
    }

    async fn load_scope(&self, tenant: &str) -> Result<Scope, ConnectionError> {
        let scopes: Api<Scope> = Api::namespaced(self.kcp.clone(), &self.namespace);
        scopes
            .get_opt(tenant)
            .await
            .map_err(|e| ConnectionError::failed(tenant, e))?
            .ok_or_else(|| ConnectionError::NotFound {
                tenant: tenant.to_string(),
                what: "Scope".to_string(),
            })
    }

    async fn tenant_client(&self, tenant: &str) -> Result<Client, ConnectionError> {
        let secret_name = format!("{}{}", self.secret_prefix, tenant);
        let secrets: Api<Secret> = Api::namespaced(self.kcp.clone(), &self.namespace);
        let secret = secrets
            .get_opt(&secret_name)
            .await
            .map_err(|e| ConnectionError::failed(tenant, e))?
            .ok_or_else(|| {
                ConnectionError::failed(
                    tenant,
                    anyhow::anyhow!("kubeconfig secret {} not found", secret_name),
                )
            })?;

        let bytes = secret
            .data
            .as_ref()
            .and_then(|data| data.get(&self.secret_key))
            .ok_or_else(|| {
                ConnectionError::failed(
                    tenant,
                    anyhow::anyhow!(
                        "kubeconfig secret {} has no key {}",
                        secret_name,
                        self.secret_key
                    ),
                )
            })?;
        let raw = std::str::from_utf8(&bytes.0).map_err(|e| ConnectionError::failed(tenant, e))?;
        let kubeconfig =
            Kubeconfig::from_yaml(raw).map_err(|e| ConnectionError::failed(tenant, e))?;
        let config = Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
            .await
            .map_err(|e| ConnectionError::failed(tenant, e))?;
        Client::try_from(config).map_err(|e| ConnectionError::failed(tenant, e))
    }
}

#[async_trait]
impl ConnectionFactory for KubeConnectionFactory {
    async fn connect(&self, tenant: &str) -> Result<TenantConnection, ConnectionError> {
        let scope = self.load_scope(tenant).await?;
        let client = self.tenant_client(tenant).await?;
        debug!(tenant = %tenant, provider = %scope.spec.provider, "Tenant connection established");
        Ok(TenantConnection::new(
            tenant,
            Arc::new(KubeClusterApi::new(client)),
            scope,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_is_distinct_from_failure() {
        let gone = ConnectionError::NotFound {
            tenant: "t1".into(),
            what: "Scope".into(),
        };
        let broken = ConnectionError::failed("t1", anyhow::anyhow!("no route to host"));
        assert!(gone.is_not_found());
        assert!(!broken.is_not_found());
        assert!(broken.to_string().contains("no route to host"));
    }
}
