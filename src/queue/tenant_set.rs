//! # Tenant Set
//!
//! Membership of the fleet, fed by tenant discovery.
//!
//! Membership lives in the [`TenantQueue`]; the active tenant gauge is moved
//! under the same lock as the queue mutation so the observed tenant count never
//! drifts from what the scheduler sees.

use super::{TenantId, TenantQueue};
use crate::constants::{
    LABEL_BROKER_PLAN_NAME, LABEL_GLOBAL_ACCOUNT_ID, LABEL_REGION, LABEL_SHOOT_NAME,
    LABEL_SUBACCOUNT_ID,
};
use crate::crd::Scope;
use crate::observability::metrics;
use kube::core::DynamicObject;
use kube::ResourceExt;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::info;

/// Identity and observability labels of one tenant descriptor
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TenantLabels {
    pub tenant: TenantId,
    pub global_account: String,
    pub subaccount: String,
    pub shoot: String,
    pub region: String,
    pub plan: String,
}

impl TenantLabels {
    pub fn new(tenant: impl Into<TenantId>) -> Self {
        Self {
            tenant: tenant.into(),
            ..Default::default()
        }
    }

    /// Read the tenant id from the object name and the rest from its labels
    pub fn from_object(obj: &DynamicObject) -> Self {
        let labels = obj.labels();
        let label = |key: &str| labels.get(key).cloned().unwrap_or_default();
        Self {
            tenant: obj.name_any(),
            global_account: label(LABEL_GLOBAL_ACCOUNT_ID),
            subaccount: label(LABEL_SUBACCOUNT_ID),
            shoot: label(LABEL_SHOOT_NAME),
            region: label(LABEL_REGION),
            plan: label(LABEL_BROKER_PLAN_NAME),
        }
    }

    /// Labels of a connected tenant; placement comes from the scope spec
    /// when the scope carries no labels for it
    pub fn from_scope(scope: &Scope) -> Self {
        let labels = scope.labels();
        let label = |key: &str| labels.get(key).cloned().unwrap_or_default();
        let or_spec = |value: String, spec: &str| {
            if value.is_empty() {
                spec.to_string()
            } else {
                value
            }
        };
        let tenant = if scope.spec.kyma_name.is_empty() {
            scope.name_any()
        } else {
            scope.spec.kyma_name.clone()
        };
        Self {
            tenant,
            global_account: label(LABEL_GLOBAL_ACCOUNT_ID),
            subaccount: label(LABEL_SUBACCOUNT_ID),
            shoot: or_spec(label(LABEL_SHOOT_NAME), &scope.spec.shoot_name),
            region: or_spec(label(LABEL_REGION), &scope.spec.region),
            plan: label(LABEL_BROKER_PLAN_NAME),
        }
    }

    fn metric_values(&self) -> [&str; 6] {
        [
            self.tenant.as_str(),
            self.global_account.as_str(),
            self.subaccount.as_str(),
            self.shoot.as_str(),
            self.region.as_str(),
            self.plan.as_str(),
        ]
    }
}

pub struct TenantSet {
    queue: Arc<TenantQueue>,
    // Labels recorded at add time, so removal decrements the same series
    members: Mutex<HashMap<TenantId, TenantLabels>>,
}

impl Default for TenantSet {
    fn default() -> Self {
        Self::new(Arc::new(TenantQueue::new()))
    }
}

impl TenantSet {
    pub fn new(queue: Arc<TenantQueue>) -> Self {
        Self {
            queue,
            members: Mutex::new(HashMap::new()),
        }
    }

    pub fn queue(&self) -> &Arc<TenantQueue> {
        &self.queue
    }

    pub fn add_object(&self, obj: &DynamicObject) -> bool {
        self.add(TenantLabels::from_object(obj))
    }

    pub fn remove_object(&self, obj: &DynamicObject) -> bool {
        self.remove_id(&obj.name_any())
    }

    /// Add a tenant; returns `true` if it was not a member yet
    pub fn add(&self, labels: TenantLabels) -> bool {
        let mut members = self.members.lock().unwrap_or_else(|e| e.into_inner());
        if !self.queue.add(labels.tenant.clone()) {
            return false;
        }
        info!(
            tenant = %labels.tenant,
            global_account = %labels.global_account,
            subaccount = %labels.subaccount,
            shoot = %labels.shoot,
            region = %labels.region,
            plan = %labels.plan,
            "Adding tenant to fleet"
        );
        metrics::add_active_tenant(&labels.metric_values(), 1);
        members.insert(labels.tenant.clone(), labels);
        true
    }

    /// Remove a tenant; returns `true` if it was a member
    pub fn remove_id(&self, tenant: &str) -> bool {
        let mut members = self.members.lock().unwrap_or_else(|e| e.into_inner());
        let tenant = tenant.to_string();
        if !self.queue.remove(&tenant) {
            return false;
        }
        info!(tenant = %tenant, "Removing tenant from fleet");
        if let Some(labels) = members.remove(&tenant) {
            metrics::add_active_tenant(&labels.metric_values(), -1);
        }
        true
    }

    pub fn contains(&self, tenant: &str) -> bool {
        self.queue.contains(&tenant.to_string())
    }

    /// Names of all member tenants, sorted
    pub fn tenant_names(&self) -> Vec<TenantId> {
        let mut names = self.queue.known();
        names.sort();
        names
    }

    /// Replace membership with `listed`, as after a full re-list
    pub fn retain_only(&self, listed: &[TenantLabels]) {
        for name in self.tenant_names() {
            if !listed.iter().any(|l| l.tenant == name) {
                self.remove_id(&name);
            }
        }
        for labels in listed {
            self.add(labels.clone());
        }
    }
}
