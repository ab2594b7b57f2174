//! # Fleet Configuration
//!
//! Fleet-level settings loaded from environment variables.

use crate::constants::MIN_PASS_INTERVAL_SECS;
use std::path::PathBuf;
use std::time::Duration;
use tracing::warn;

/// Fleet-level configuration
///
/// All settings have sensible defaults and can be overridden via environment variables.
/// Environment variables are populated from a ConfigMap using `envFrom` in the deployment.
#[derive(Debug, Clone)]
pub struct FleetConfig {
    /// Namespace in the control-plane cluster holding tenant records,
    /// kubeconfig secrets and status records
    pub kcp_namespace: String,
    /// Number of tenant workers pulling from the tenant queue
    pub concurrency: usize,
    /// Hard timeout of one tenant pass (seconds)
    pub pass_timeout_secs: u64,
    /// Interval between idle samples of the controller queues (seconds)
    pub idle_check_interval_secs: u64,
    /// Pause after each tenant pass (milliseconds)
    pub pass_pause_ms: u64,
    /// Pause after a failed tenant connection (seconds)
    pub connection_error_pause_secs: u64,
    /// Root of the per-provider manifest directories
    pub providers_dir: PathBuf,
    /// Workers per controller inside a tenant pass
    pub max_concurrent_reconciles: usize,
    /// HTTP port for metrics and probes
    pub metrics_port: u16,
    /// Prefix of the tenant kubeconfig secret name
    pub kubeconfig_secret_prefix: String,
    /// Key of the kubeconfig inside the secret
    pub kubeconfig_secret_key: String,
}

impl Default for FleetConfig {
    fn default() -> Self {
        use crate::constants::*;
        Self {
            kcp_namespace: DEFAULT_KCP_NAMESPACE.to_string(),
            concurrency: DEFAULT_CONCURRENCY,
            pass_timeout_secs: DEFAULT_PASS_TIMEOUT_SECS,
            idle_check_interval_secs: DEFAULT_IDLE_CHECK_INTERVAL_SECS,
            pass_pause_ms: DEFAULT_PASS_PAUSE_MS,
            connection_error_pause_secs: DEFAULT_CONNECTION_ERROR_PAUSE_SECS,
            providers_dir: PathBuf::from(DEFAULT_PROVIDERS_DIR),
            max_concurrent_reconciles: DEFAULT_MAX_CONCURRENT_RECONCILES,
            metrics_port: DEFAULT_METRICS_PORT,
            kubeconfig_secret_prefix: DEFAULT_KUBECONFIG_SECRET_PREFIX.to_string(),
            kubeconfig_secret_key: DEFAULT_KUBECONFIG_SECRET_KEY.to_string(),
        }
    }
}

impl FleetConfig {
    /// Load configuration from environment variables with defaults
    pub fn from_env() -> Self {
        use crate::constants::*;
        Self {
            kcp_namespace: env_var_or_default_str("KCP_NAMESPACE", DEFAULT_KCP_NAMESPACE),
            concurrency: env_var_or_default("FLEET_CONCURRENCY", DEFAULT_CONCURRENCY).max(1),
            pass_timeout_secs: env_var_or_default(
                "TENANT_PASS_TIMEOUT_SECS",
                DEFAULT_PASS_TIMEOUT_SECS,
            )
            .max(MIN_PASS_INTERVAL_SECS),
            idle_check_interval_secs: env_var_or_default(
                "IDLE_CHECK_INTERVAL_SECS",
                DEFAULT_IDLE_CHECK_INTERVAL_SECS,
            )
            .max(MIN_PASS_INTERVAL_SECS),
            pass_pause_ms: env_var_or_default("TENANT_PASS_PAUSE_MS", DEFAULT_PASS_PAUSE_MS),
            connection_error_pause_secs: env_var_or_default(
                "CONNECTION_ERROR_PAUSE_SECS",
                DEFAULT_CONNECTION_ERROR_PAUSE_SECS,
            ),
            providers_dir: PathBuf::from(env_var_or_default_str(
                "PROVIDERS_DIR",
                DEFAULT_PROVIDERS_DIR,
            )),
            max_concurrent_reconciles: env_var_or_default(
                "MAX_CONCURRENT_RECONCILES",
                DEFAULT_MAX_CONCURRENT_RECONCILES,
            )
            .max(1),
            metrics_port: env_var_or_default("METRICS_PORT", DEFAULT_METRICS_PORT),
            kubeconfig_secret_prefix: env_var_or_default_str(
                "KUBECONFIG_SECRET_PREFIX",
                DEFAULT_KUBECONFIG_SECRET_PREFIX,
            ),
            kubeconfig_secret_key: env_var_or_default_str(
                "KUBECONFIG_SECRET_KEY",
                DEFAULT_KUBECONFIG_SECRET_KEY,
            ),
        }
    }

    /// Get the hard timeout of one tenant pass, at least one second
    pub fn pass_timeout(&self) -> Duration {
        Duration::from_secs(self.pass_timeout_secs.max(MIN_PASS_INTERVAL_SECS))
    }

    /// Interval between idle samples, at least one second
    pub fn idle_check_interval(&self) -> Duration {
        Duration::from_secs(self.idle_check_interval_secs.max(MIN_PASS_INTERVAL_SECS))
    }

    pub fn pass_pause(&self) -> Duration {
        Duration::from_millis(self.pass_pause_ms)
    }

    pub fn connection_error_pause(&self) -> Duration {
        Duration::from_secs(self.connection_error_pause_secs)
    }
}

/// Read environment variable or return default value
fn env_var_or_default<T: std::str::FromStr>(key: &str, default: T) -> T
where
    <T as std::str::FromStr>::Err: std::fmt::Debug,
{
    match std::env::var(key) {
        Ok(raw) => match raw.parse() {
            Ok(value) => value,
            Err(e) => {
                warn!("Invalid value {:?} for {}, using default: {:?}", raw, key, e);
                default
            }
        },
        Err(_) => default,
    }
}

/// Read environment variable as string or return default
fn env_var_or_default_str(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = FleetConfig::default();
        assert_eq!(config.kcp_namespace, "kcp-system");
        assert_eq!(config.pass_timeout(), Duration::from_secs(60));
        assert_eq!(config.idle_check_interval(), Duration::from_secs(10));
        assert_eq!(config.concurrency, 1);
    }

    #[test]
    fn test_zero_intervals_are_raised_to_one_second() {
        let config = FleetConfig {
            pass_timeout_secs: 0,
            idle_check_interval_secs: 0,
            ..FleetConfig::default()
        };
        assert_eq!(config.pass_timeout(), Duration::from_secs(1));
        assert_eq!(config.idle_check_interval(), Duration::from_secs(1));
    }

    #[test]
    fn test_env_var_or_default_falls_back_on_garbage() {
        std::env::set_var("FLEET_CONFIG_TEST_GARBAGE", "not-a-number");
        assert_eq!(env_var_or_default("FLEET_CONFIG_TEST_GARBAGE", 7u64), 7);
        std::env::set_var("FLEET_CONFIG_TEST_GARBAGE", "42");
        assert_eq!(env_var_or_default("FLEET_CONFIG_TEST_GARBAGE", 7u64), 42);
        std::env::remove_var("FLEET_CONFIG_TEST_GARBAGE");
    }
}
