//! # Tenant Discovery
//!
//! Watches the `Kyma` tenant descriptors in the KCP namespace and keeps the
//! [`TenantSet`] in line with them.
//!
//! Applied descriptors are added and deleted ones removed. Every (re-)list is
//! buffered from `Init` to `InitDone` and then replaces membership, so tenants
//! deleted while the watch was down are dropped too.

use crate::queue::{TenantLabels, TenantSet};
use crate::runtime::ResourceKindRef;
use futures::StreamExt;
use kube::core::DynamicObject;
use kube::{Api, Client};
use kube_runtime::watcher;
use kube_runtime::watcher::Event;
use kube_runtime::WatchStreamExt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Kind of the tenant descriptors
pub fn kyma_kind() -> ResourceKindRef {
    ResourceKindRef::new("operator.kyma-project.io", "v1beta2", "Kyma")
}

pub struct TenantDiscovery {
    tenants: Arc<TenantSet>,
    // Descriptors seen since the last Init
    relist: Option<Vec<TenantLabels>>,
}

impl TenantDiscovery {
    pub fn new(tenants: Arc<TenantSet>) -> Self {
        Self {
            tenants,
            relist: None,
        }
    }

    /// Apply one watch event to the tenant set
    pub fn apply(&mut self, event: Event<DynamicObject>) {
        match event {
            Event::Apply(obj) => {
                if self.tenants.add_object(&obj) {
                    info!("Tenant {} discovered", TenantLabels::from_object(&obj).tenant);
                }
            }
            Event::Delete(obj) => {
                if self.tenants.remove_object(&obj) {
                    info!("Tenant {} deleted", TenantLabels::from_object(&obj).tenant);
                }
            }
            Event::Init => {
                self.relist = Some(Vec::new());
            }
            Event::InitApply(obj) => {
                self.relist
                    .get_or_insert_with(Vec::new)
                    .push(TenantLabels::from_object(&obj));
            }
            Event::InitDone => {
                let listed = self.relist.take().unwrap_or_default();
                debug!("Tenant list done with {} tenants", listed.len());
                self.tenants.retain_only(&listed);
            }
        }
    }

    /// Watch `namespace` until `token` is cancelled
    pub async fn run(mut self, client: Client, namespace: String, token: CancellationToken) {
        let kind = kyma_kind();
        let api: Api<DynamicObject> =
            Api::namespaced_with(client, &namespace, &kind.api_resource());
        let stream = watcher(api, watcher::Config::default()).default_backoff();
        futures::pin_mut!(stream);

        info!("Watching {} in namespace {}", kind, namespace);
        loop {
            let next = tokio::select! {
                _ = token.cancelled() => break,
                next = stream.next() => next,
            };
            match next {
                Some(Ok(event)) => self.apply(event),
                Some(Err(e)) => warn!("Error watching tenant descriptors: {}", e),
                None => {
                    warn!("Tenant descriptor watch stream ended");
                    break;
                }
            }
        }
    }
}
