//! # Configuration
//!
//! Runtime settings loaded from environment variables.
//!
//! - `fleet`: worker pool, tenant pass and connection settings

mod fleet;

pub use fleet::FleetConfig;
