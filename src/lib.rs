//! # Fleet Controller
//!
//! Multi-tenant reconciliation runtime. One process cycles fairly over a
//! fleet of tenant clusters and, for each tenant in turn, runs a fresh set of
//! controllers against it until they go idle.
//!
//! - [`queue`]: fair tenant queue and tenant membership
//! - [`runtime`]: per-tenant caches, change sources, controllers and runtime
//! - [`registry`]: build-once catalog of the controllers every pass runs
//! - [`looper`]: tenant discovery, worker pool and the per-tenant pass
//! - [`crd`]: the `Scope` identity record and the persisted `TenantStatus`

pub mod config;
pub mod constants;
pub mod crd;
pub mod looper;
pub mod observability;
pub mod queue;
pub mod registry;
pub mod runtime;
pub mod server;
