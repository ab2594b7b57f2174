//! # Custom Resource Definitions
//!
//! CRD types stored in the control-plane cluster.
//!
//! ## Module Structure
//!
//! - `scope.rs` - Per-tenant identity record loaded when connecting to a tenant
//! - `tenant_status.rs` - Persisted outcome of tenant passes

mod scope;
mod tenant_status;

/// API group of every fleet CRD
pub const GROUP: &str = "fleet.cloud-control.io";

pub use scope::{ProviderType, Scope, ScopeSpec};
pub use tenant_status::{TenantStatus, TenantStatusCondition, TenantStatusSpec};
