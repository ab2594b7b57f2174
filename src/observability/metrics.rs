//! # Metrics
//!
//! Prometheus metrics for monitoring the fleet runtime.
//!
//! ## Metrics Exposed
//!
//! - `fleet_active_tenants` - Tenants currently known to the tenant set, by tenant labels
//! - `fleet_tenant_passes_total` - Total number of tenant passes, by tenant
//! - `fleet_tenant_pass_duration_seconds` - Duration of tenant passes
//! - `fleet_tenant_pass_errors_total` - Tenant passes that ended in an error, by reason
//! - `fleet_idle_shutdowns_total` - Tenant passes ended by idle detection
//! - `fleet_hard_timeouts_total` - Tenant passes ended by the hard timeout
//! - `fleet_reconciles_total` - Reconcile invocations, by controller and outcome
//! - `fleet_status_save_errors_total` - Failed status record writes

use anyhow::Result;
use prometheus::{Histogram, IntCounter, IntCounterVec, IntGaugeVec, Opts, Registry};
use std::sync::LazyLock;

pub(crate) static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

/// Label names of the active tenant gauge, in `with_label_values` order
pub const ACTIVE_TENANT_LABELS: [&str; 6] = [
    "tenant",
    "global_account",
    "subaccount",
    "shoot",
    "region",
    "plan",
];

static ACTIVE_TENANTS: LazyLock<IntGaugeVec> = LazyLock::new(|| {
    IntGaugeVec::new(
        Opts::new(
            "fleet_active_tenants",
            "Tenants currently known to the tenant set",
        ),
        &ACTIVE_TENANT_LABELS,
    )
    .expect("Failed to create ACTIVE_TENANTS metric - this should never happen")
});

static TENANT_PASSES_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new("fleet_tenant_passes_total", "Total number of tenant passes"),
        &["tenant"],
    )
    .expect("Failed to create TENANT_PASSES_TOTAL metric - this should never happen")
});

static TENANT_PASS_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        prometheus::HistogramOpts::new(
            "fleet_tenant_pass_duration_seconds",
            "Duration of one tenant pass in seconds",
        )
        .buckets(vec![0.5, 1.0, 5.0, 10.0, 20.0, 30.0, 60.0, 120.0]),
    )
    .expect("Failed to create TENANT_PASS_DURATION metric - this should never happen")
});

static TENANT_PASS_ERRORS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "fleet_tenant_pass_errors_total",
            "Tenant passes that ended in an error",
        ),
        &["reason"],
    )
    .expect("Failed to create TENANT_PASS_ERRORS_TOTAL metric - this should never happen")
});

static IDLE_SHUTDOWNS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "fleet_idle_shutdowns_total",
        "Tenant passes ended because every controller queue stayed empty",
    )
    .expect("Failed to create IDLE_SHUTDOWNS_TOTAL metric - this should never happen")
});

static HARD_TIMEOUTS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "fleet_hard_timeouts_total",
        "Tenant passes ended by the hard pass timeout",
    )
    .expect("Failed to create HARD_TIMEOUTS_TOTAL metric - this should never happen")
});

static RECONCILES_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new("fleet_reconciles_total", "Reconcile invocations"),
        &["controller", "outcome"],
    )
    .expect("Failed to create RECONCILES_TOTAL metric - this should never happen")
});

static STATUS_SAVE_ERRORS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "fleet_status_save_errors_total",
        "Failed writes of tenant status records",
    )
    .expect("Failed to create STATUS_SAVE_ERRORS_TOTAL metric - this should never happen")
});

pub fn register_metrics() -> Result<()> {
    REGISTRY.register(Box::new(ACTIVE_TENANTS.clone()))?;
    REGISTRY.register(Box::new(TENANT_PASSES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(TENANT_PASS_DURATION.clone()))?;
    REGISTRY.register(Box::new(TENANT_PASS_ERRORS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(IDLE_SHUTDOWNS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(HARD_TIMEOUTS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(RECONCILES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(STATUS_SAVE_ERRORS_TOTAL.clone()))?;
    Ok(())
}

/// Adjust the active tenant gauge for one label set
///
/// `labels` must be ordered like [`ACTIVE_TENANT_LABELS`].
pub fn add_active_tenant(labels: &[&str; 6], delta: i64) {
    ACTIVE_TENANTS.with_label_values(labels).add(delta);
}

pub fn active_tenant_value(labels: &[&str; 6]) -> i64 {
    ACTIVE_TENANTS.with_label_values(labels).get()
}

pub fn increment_tenant_passes(tenant: &str) {
    TENANT_PASSES_TOTAL.with_label_values(&[tenant]).inc();
}

pub fn observe_tenant_pass_duration(duration: f64) {
    TENANT_PASS_DURATION.observe(duration);
}

pub fn increment_tenant_pass_errors(reason: &str) {
    TENANT_PASS_ERRORS_TOTAL.with_label_values(&[reason]).inc();
}

pub fn increment_idle_shutdowns() {
    IDLE_SHUTDOWNS_TOTAL.inc();
}

pub fn increment_hard_timeouts() {
    HARD_TIMEOUTS_TOTAL.inc();
}

pub fn increment_reconciles(controller: &str, outcome: &str) {
    RECONCILES_TOTAL
        .with_label_values(&[controller, outcome])
        .inc();
}

pub fn increment_status_save_errors() {
    STATUS_SAVE_ERRORS_TOTAL.inc();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_metrics() {
        // May already be registered by another test in this binary
        let _ = register_metrics();
        assert!(!REGISTRY.gather().is_empty());
    }

    #[test]
    fn test_active_tenant_gauge_moves_both_ways() {
        let labels = ["metrics-test-tenant", "ga", "sa", "shoot", "eu", "aws"];
        let before = active_tenant_value(&labels);
        add_active_tenant(&labels, 1);
        assert_eq!(active_tenant_value(&labels), before + 1);
        add_active_tenant(&labels, -1);
        assert_eq!(active_tenant_value(&labels), before);
    }

    #[test]
    fn test_increment_idle_shutdowns() {
        let before = IDLE_SHUTDOWNS_TOTAL.get();
        increment_idle_shutdowns();
        assert_eq!(IDLE_SHUTDOWNS_TOTAL.get(), before + 1u64);
    }

    #[test]
    fn test_increment_reconciles() {
        let before = RECONCILES_TOTAL
            .with_label_values(&["metrics-test", "success"])
            .get();
        increment_reconciles("metrics-test", "success");
        let after = RECONCILES_TOTAL
            .with_label_values(&["metrics-test", "success"])
            .get();
        assert_eq!(after, before + 1u64);
    }

    #[test]
    fn test_increment_tenant_pass_errors() {
        let before = TENANT_PASS_ERRORS_TOTAL
            .with_label_values(&["metrics-test"])
            .get();
        increment_tenant_pass_errors("metrics-test");
        let after = TENANT_PASS_ERRORS_TOTAL
            .with_label_values(&["metrics-test"])
            .get();
        assert_eq!(after, before + 1u64);
    }
}
