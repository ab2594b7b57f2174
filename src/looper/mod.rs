//! # Fleet Looper
//!
//! Everything that drives tenant passes:
//!
//! - `discovery`: keeps the [`TenantSet`](crate::queue::TenantSet) in line with
//!   the tenant descriptors
//! - `pool`: worker pool pulling tenants from the fair queue
//! - `runner`: one pass over one tenant
//! - `installer`: per-provider manifests applied before controllers start
//! - `status`: per-pass status and its persisted record

pub mod discovery;
pub mod installer;
pub mod pool;
pub mod runner;
pub mod status;

pub use discovery::TenantDiscovery;
pub use installer::{Installer, InstallerError};
pub use pool::{FleetLooper, LooperError};
pub use runner::{FleetRunner, PassEnd, RunnerError, RunnerOptions};
pub use status::{
    KindHandle, KubeStatusRepo, NoopStatusSaver, StatusError, StatusReporter, StatusRepo,
    StatusSaver, TenantStatusSaver,
};
