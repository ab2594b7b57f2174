//! # Tenant Scheduling Queue
//!
//! - `fair`: deduplicating round-robin queue with blocking `get`
//! - `tenant_set`: tenant membership on top of the queue, mirrored into metrics

mod fair;
mod tenant_set;

pub use fair::FairQueue;
pub use tenant_set::{TenantLabels, TenantSet};

/// Opaque identity of one tenant, unique within the process
pub type TenantId = String;

/// Queue of tenant identities driving the fleet workers
pub type TenantQueue = FairQueue<TenantId>;
