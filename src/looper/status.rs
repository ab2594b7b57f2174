//! # Tenant Status
//!
//! Audit trail of what one tenant pass decided, persisted to the control plane.
//!
//! During a pass the runner opens a [`KindHandle`] per decision point (one per
//! installed manifest, field indexer and controller) and appends outcomes to
//! it. At the end a [`StatusSaver`] merges the record into the tenant's
//! [`TenantStatus`]: identity labels and spec fields are overwritten, the
//! connection time is appended to a rolling window of the last
//! [`STATUS_CONNECTION_HISTORY`] passes, the mean interval between them is
//! recomputed and the condition list is replaced.

use crate::constants::{
    FIELD_OWNER, LABEL_BROKER_PLAN_NAME, LABEL_GLOBAL_ACCOUNT_ID, LABEL_REGION, LABEL_SHOOT_NAME,
    LABEL_SUBACCOUNT_ID, STATUS_CONNECTION_HISTORY,
};
use crate::crd::{ProviderType, TenantStatus, TenantStatusCondition, TenantStatusSpec};
use crate::queue::TenantLabels;
use crate::runtime::ResourceKindRef;
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use kube::api::{Patch, PatchParams};
use kube::core::{DynamicObject, ObjectMeta};
use kube::{Api, Client, ResourceExt};
use std::collections::BTreeMap;
use std::fmt::Display;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StatusError {
    #[error("error loading TenantStatus {namespace}/{name}: {source}")]
    Load {
        namespace: String,
        name: String,
        #[source]
        source: kube::Error,
    },

    #[error("error saving TenantStatus {namespace}/{name}: {source}")]
    Save {
        namespace: String,
        name: String,
        #[source]
        source: kube::Error,
    },

    #[error("{0}")]
    Other(String),
}

/// Outcome log of one decision point within a pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KindHandle {
    title: String,
    obj_kind_group: String,
    crd_kind_group: String,
    feature: String,
    obj_name: String,
    obj_namespace: String,
    filename: String,
    ok: bool,
    outcomes: Vec<String>,
}

impl KindHandle {
    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn ok(&self) -> bool {
        self.ok
    }

    pub fn outcomes(&self) -> &[String] {
        &self.outcomes
    }

    pub fn obj_kind_group(&self) -> &str {
        &self.obj_kind_group
    }

    pub fn crd_kind_group(&self) -> &str {
        &self.crd_kind_group
    }

    pub fn with_kind(&mut self, kind: &ResourceKindRef) -> &mut Self {
        self.obj_kind_group = if kind.group.is_empty() {
            kind.kind.clone()
        } else {
            format!("{}.{}", kind.kind, kind.group)
        };
        self
    }

    /// Kind of the CRD defining the object, when the object itself is a CRD
    pub fn with_crd_kind(&mut self, kind_group: impl Into<String>) -> &mut Self {
        self.crd_kind_group = kind_group.into();
        self
    }

    pub fn with_feature(&mut self, feature: impl Into<String>) -> &mut Self {
        self.feature = feature.into();
        self
    }

    pub fn with_obj(&mut self, obj: &DynamicObject) -> &mut Self {
        self.obj_name = obj.name_any();
        self.obj_namespace = obj.namespace().unwrap_or_default();
        self
    }

    pub fn with_filename(&mut self, filename: impl Into<String>) -> &mut Self {
        self.filename = filename.into();
        self
    }

    pub fn not_supported_by_provider(&mut self) {
        self.outcomes.push("NotSupportedByProvider".to_string());
    }

    pub fn already_exists_with_same_version(&mut self, version: &str) {
        self.outcomes.push("AlreadyExistsWithSameVersion".to_string());
        self.outcomes.push(format!("Version: {version}"));
        self.ok = true;
    }

    pub fn updating(&mut self, existing_version: &str, desired_version: &str) {
        self.outcomes.push("Updating".to_string());
        self.outcomes
            .push(format!("ExistingVersion: {existing_version}"));
        self.outcomes.push(format!("DesiredVersion: {desired_version}"));
    }

    pub fn creating(&mut self) {
        self.outcomes.push("Creating".to_string());
    }

    pub fn starting(&mut self) {
        self.outcomes.push("Starting".to_string());
    }

    pub fn error(&mut self, err: &dyn Display) {
        self.outcomes.push(format!("Error: {err}"));
    }

    pub fn success(&mut self) {
        self.ok = true;
    }

    fn to_condition(&self) -> TenantStatusCondition {
        TenantStatusCondition {
            title: self.title.clone(),
            obj_kind_group: self.obj_kind_group.clone(),
            crd_kind_group: self.crd_kind_group.clone(),
            feature: self.feature.clone(),
            obj_name: self.obj_name.clone(),
            obj_namespace: self.obj_namespace.clone(),
            filename: self.filename.clone(),
            ok: self.ok,
            outcomes: self.outcomes.clone(),
        }
    }
}

/// Status of one tenant pass, mutated only by the runner of that pass
#[derive(Debug, Clone)]
pub struct StatusReporter {
    labels: TenantLabels,
    provider: Option<ProviderType>,
    handles: Vec<KindHandle>,
    ok: bool,
    outcome: String,
    saved: bool,
}

impl StatusReporter {
    pub fn new(labels: TenantLabels, provider: Option<ProviderType>) -> Self {
        Self {
            labels,
            provider,
            handles: Vec::new(),
            ok: false,
            outcome: String::new(),
            saved: false,
        }
    }

    pub fn tenant(&self) -> &str {
        &self.labels.tenant
    }

    pub fn labels(&self) -> &TenantLabels {
        &self.labels
    }

    pub fn provider(&self) -> Option<ProviderType> {
        self.provider
    }

    /// Open a new handle; handles are persisted in opening order
    pub fn handle(&mut self, title: impl Into<String>) -> &mut KindHandle {
        self.handles.push(KindHandle {
            title: title.into(),
            ..Default::default()
        });
        let last = self.handles.len() - 1;
        &mut self.handles[last]
    }

    pub fn handles(&self) -> &[KindHandle] {
        &self.handles
    }

    pub fn connected(&mut self) {
        self.outcome = "Connected".to_string();
        self.ok = true;
    }

    pub fn outcome(&self) -> &str {
        &self.outcome
    }

    pub fn is_ok(&self) -> bool {
        self.ok
    }

    pub fn is_saved(&self) -> bool {
        self.saved
    }

    pub fn mark_saved(&mut self) {
        self.saved = true;
    }
}

/// Storage of persisted tenant status records
#[async_trait]
pub trait StatusRepo: Send + Sync {
    /// Load the record, or an empty one named `name` if it does not exist
    async fn load(&self, name: &str, namespace: &str) -> Result<TenantStatus, StatusError>;

    async fn save(&self, status: &TenantStatus) -> Result<(), StatusError>;
}

pub struct KubeStatusRepo {
    client: Client,
}

impl KubeStatusRepo {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl StatusRepo for KubeStatusRepo {
    async fn load(&self, name: &str, namespace: &str) -> Result<TenantStatus, StatusError> {
        let api: Api<TenantStatus> = Api::namespaced(self.client.clone(), namespace);
        let existing = api.get_opt(name).await.map_err(|source| StatusError::Load {
            namespace: namespace.to_string(),
            name: name.to_string(),
            source,
        })?;
        Ok(existing.unwrap_or_else(|| empty_status(name, namespace)))
    }

    async fn save(&self, status: &TenantStatus) -> Result<(), StatusError> {
        let name = status.name_any();
        let namespace = status.namespace().unwrap_or_default();
        let api: Api<TenantStatus> = Api::namespaced(self.client.clone(), &namespace);

        // Server-side apply rejects managedFields and stale versions
        let mut patch = status.clone();
        patch.metadata.managed_fields = None;
        patch.metadata.resource_version = None;
        patch.metadata.uid = None;
        patch.metadata.creation_timestamp = None;
        patch.metadata.generation = None;

        api.patch(
            &name,
            &PatchParams::apply(FIELD_OWNER).force(),
            &Patch::Apply(&patch),
        )
        .await
        .map_err(|source| StatusError::Save {
            namespace,
            name,
            source,
        })?;
        Ok(())
    }
}

/// Empty record for a tenant seen for the first time
pub fn empty_status(name: &str, namespace: &str) -> TenantStatus {
    let mut status = TenantStatus::new(name, TenantStatusSpec::default());
    status.metadata = ObjectMeta {
        name: Some(name.to_string()),
        namespace: Some(namespace.to_string()),
        ..Default::default()
    };
    status
}

#[async_trait]
pub trait StatusSaver: Send + Sync {
    async fn save(&self, status: &StatusReporter) -> Result<(), StatusError>;
}

/// Saver that discards every record
pub struct NoopStatusSaver;

#[async_trait]
impl StatusSaver for NoopStatusSaver {
    async fn save(&self, _status: &StatusReporter) -> Result<(), StatusError> {
        Ok(())
    }
}

pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Saver merging the pass into the persisted [`TenantStatus`]
pub struct TenantStatusSaver {
    repo: Arc<dyn StatusRepo>,
    namespace: String,
    clock: Clock,
}

impl TenantStatusSaver {
    pub fn new(repo: Arc<dyn StatusRepo>, namespace: impl Into<String>) -> Self {
        Self {
            repo,
            namespace: namespace.into(),
            clock: Arc::new(Utc::now),
        }
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }
}

#[async_trait]
impl StatusSaver for TenantStatusSaver {
    async fn save(&self, status: &StatusReporter) -> Result<(), StatusError> {
        let mut record = self.repo.load(status.tenant(), &self.namespace).await?;
        merge_into(&mut record, status, (self.clock)());
        self.repo.save(&record).await
    }
}

/// Merge one pass into a persisted record, connected at `now`
pub fn merge_into(record: &mut TenantStatus, status: &StatusReporter, now: DateTime<Utc>) {
    let labels = status.labels();

    let record_labels = record.metadata.labels.get_or_insert_with(BTreeMap::new);
    for (key, value) in [
        (LABEL_GLOBAL_ACCOUNT_ID, &labels.global_account),
        (LABEL_SUBACCOUNT_ID, &labels.subaccount),
        (LABEL_SHOOT_NAME, &labels.shoot),
        (LABEL_REGION, &labels.region),
        (LABEL_BROKER_PLAN_NAME, &labels.plan),
    ] {
        if !value.is_empty() {
            record_labels.insert(key.to_string(), value.clone());
        }
    }

    let spec = &mut record.spec;
    spec.tenant = labels.tenant.clone();
    spec.provider = status
        .provider()
        .map(|p| p.to_string())
        .unwrap_or_default();
    spec.broker_plan = labels.plan.clone();
    spec.global_account = labels.global_account.clone();
    spec.sub_account = labels.subaccount.clone();
    spec.region = labels.region.clone();
    spec.shoot = labels.shoot.clone();

    spec.past_connections
        .push(now.to_rfc3339_opts(SecondsFormat::Secs, true));
    if spec.past_connections.len() > STATUS_CONNECTION_HISTORY {
        let excess = spec.past_connections.len() - STATUS_CONNECTION_HISTORY;
        spec.past_connections.drain(..excess);
    }
    spec.average_interval_seconds = average_interval_seconds(&spec.past_connections);

    spec.outcome = status.outcome().to_string();
    spec.ok = status.is_ok();
    spec.conditions = status.handles().iter().map(KindHandle::to_condition).collect();
}

/// Rounded mean of the seconds between consecutive timestamps, 0 if fewer than two
pub fn average_interval_seconds(connections: &[String]) -> i64 {
    let times: Vec<DateTime<Utc>> = connections
        .iter()
        .filter_map(|t| DateTime::parse_from_rfc3339(t).ok())
        .map(|t| t.with_timezone(&Utc))
        .collect();
    if times.len() < 2 {
        return 0;
    }
    let sum: f64 = times
        .windows(2)
        .map(|pair| (pair[1] - pair[0]).num_milliseconds() as f64 / 1000.0)
        .sum();
    (sum / (times.len() - 1) as f64).round() as i64
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn reporter() -> StatusReporter {
        let mut labels = TenantLabels::new("tenant-a");
        labels.global_account = "ga".into();
        labels.region = "eu-west-1".into();
        StatusReporter::new(labels, Some(ProviderType::Aws))
    }

    #[test]
    fn test_handle_outcomes() {
        let mut status = reporter();
        status.handle("Installer").already_exists_with_same_version("1.2");
        let h = status.handle("Controller");
        h.with_kind(&ResourceKindRef::new("cloud-resources.kyma-project.io", "v1beta1", "IpRange"));
        h.starting();
        status
            .handle("Installer")
            .error(&anyhow::anyhow!("boom"));

        let handles = status.handles();
        assert_eq!(handles.len(), 3);
        assert!(handles[0].ok());
        assert_eq!(
            handles[0].outcomes(),
            ["AlreadyExistsWithSameVersion", "Version: 1.2"]
        );
        assert_eq!(handles[1].obj_kind_group(), "IpRange.cloud-resources.kyma-project.io");
        assert_eq!(handles[1].outcomes(), ["Starting"]);
        assert!(!handles[2].ok());
        assert_eq!(handles[2].outcomes(), ["Error: boom"]);
    }

    #[test]
    fn test_merge_overwrites_identity_and_conditions() {
        let mut record = empty_status("tenant-a", "kcp-system");
        let mut status = reporter();
        status.handle("Controller").starting();
        status.connected();

        let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        merge_into(&mut record, &status, now);

        assert_eq!(record.spec.tenant, "tenant-a");
        assert_eq!(record.spec.provider, "aws");
        assert_eq!(record.spec.outcome, "Connected");
        assert!(record.spec.ok);
        assert_eq!(record.spec.past_connections, ["2024-05-01T12:00:00Z"]);
        assert_eq!(record.spec.average_interval_seconds, 0);
        assert_eq!(record.spec.conditions.len(), 1);
        let labels = record.metadata.labels.unwrap();
        assert_eq!(labels.get(LABEL_REGION).map(String::as_str), Some("eu-west-1"));
        assert!(!labels.contains_key(LABEL_SHOOT_NAME));
    }

    #[test]
    fn test_average_interval_is_rounded_mean() {
        let times = [
            "2024-05-01T12:00:00Z",
            "2024-05-01T12:00:10Z",
            "2024-05-01T12:00:31Z",
        ]
        .map(String::from);
        // (10 + 21) / 2 = 15.5
        assert_eq!(average_interval_seconds(&times), 16);
        assert_eq!(average_interval_seconds(&times[..1]), 0);
    }
}
