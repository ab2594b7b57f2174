//! Persisted status record of a tenant.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// What the runtime decided for one tenant on its latest pass
///
/// Written with server-side apply once per pass. `pastConnections` holds the
/// RFC 3339 timestamps of the most recent passes.
#[derive(CustomResource, Debug, Clone, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "fleet.cloud-control.io",
    version = "v1beta1",
    kind = "TenantStatus",
    namespaced,
    printcolumn = r#"{"name":"Provider", "type":"string", "jsonPath":".spec.provider"}"#,
    printcolumn = r#"{"name":"Outcome", "type":"string", "jsonPath":".spec.outcome"}"#,
    printcolumn = r#"{"name":"Interval", "type":"integer", "jsonPath":".spec.averageIntervalSeconds"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct TenantStatusSpec {
    #[serde(default)]
    pub tenant: String,
    #[serde(default)]
    pub provider: String,
    #[serde(default)]
    pub broker_plan: String,
    #[serde(default)]
    pub global_account: String,
    #[serde(default)]
    pub sub_account: String,
    #[serde(default)]
    pub region: String,
    #[serde(default)]
    pub shoot: String,
    #[serde(default)]
    pub past_connections: Vec<String>,
    #[serde(default)]
    pub average_interval_seconds: i64,
    #[serde(default)]
    pub outcome: String,
    #[serde(default)]
    pub ok: bool,
    #[serde(default)]
    pub conditions: Vec<TenantStatusCondition>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TenantStatusCondition {
    pub title: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub obj_kind_group: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub crd_kind_group: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub feature: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub obj_name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub obj_namespace: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub filename: String,
    pub ok: bool,
    #[serde(default)]
    pub outcomes: Vec<String>,
}
