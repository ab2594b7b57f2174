//! Tenant identity record.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Cloud provider hosting a tenant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum ProviderType {
    Aws,
    Azure,
    Gcp,
    Openstack,
}

impl ProviderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderType::Aws => "aws",
            ProviderType::Azure => "azure",
            ProviderType::Gcp => "gcp",
            ProviderType::Openstack => "openstack",
        }
    }
}

impl fmt::Display for ProviderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ProviderType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "aws" => Ok(ProviderType::Aws),
            "azure" => Ok(ProviderType::Azure),
            "gcp" => Ok(ProviderType::Gcp),
            "openstack" => Ok(ProviderType::Openstack),
            other => Err(format!("unknown provider: {other}")),
        }
    }
}

/// Scope of one tenant
///
/// Named after the tenant. Account identity lives in the labels
/// (`kyma-project.io/global-account-id` and friends), placement in the spec.
#[derive(CustomResource, Debug, Clone, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "fleet.cloud-control.io",
    version = "v1beta1",
    kind = "Scope",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct ScopeSpec {
    pub kyma_name: String,
    pub shoot_name: String,
    pub region: String,
    pub provider: ProviderType,
}
