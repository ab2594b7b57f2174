//! # Constants
//!
//! Shared constants used throughout the runtime.
//!
//! These values represent reasonable defaults and can be overridden via
//! environment variables where applicable (see [`crate::config::FleetConfig`]).

/// Default HTTP server port for metrics and health probes
pub const DEFAULT_METRICS_PORT: u16 = 8080;

/// Namespace in the control-plane cluster holding tenant records and credentials
pub const DEFAULT_KCP_NAMESPACE: &str = "kcp-system";

/// Number of concurrent tenant workers
pub const DEFAULT_CONCURRENCY: usize = 1;

/// Hard upper bound for one tenant pass (seconds)
pub const DEFAULT_PASS_TIMEOUT_SECS: u64 = 60;

/// Interval between two idle samples of the controller queues (seconds)
pub const DEFAULT_IDLE_CHECK_INTERVAL_SECS: u64 = 10;

/// Lower bound for the pass timeout and the idle sample interval (seconds)
pub const MIN_PASS_INTERVAL_SECS: u64 = 1;

/// Number of consecutive idle samples that end a tenant pass
pub const IDLE_SAMPLES_BEFORE_SHUTDOWN: u32 = 2;

/// Pause a worker takes after each tenant pass (milliseconds)
pub const DEFAULT_PASS_PAUSE_MS: u64 = 1000;

/// Pause a worker takes after a tenant connection failed (seconds)
pub const DEFAULT_CONNECTION_ERROR_PAUSE_SECS: u64 = 5;

/// Directory holding one sub-directory of manifests per provider
pub const DEFAULT_PROVIDERS_DIR: &str = "/opt/fleet-controller/providers";

/// Workers per controller inside one tenant pass
pub const DEFAULT_MAX_CONCURRENT_RECONCILES: usize = 1;

/// Prefix of the secret holding a tenant kubeconfig
pub const DEFAULT_KUBECONFIG_SECRET_PREFIX: &str = "kubeconfig-";

/// Key inside the kubeconfig secret
pub const DEFAULT_KUBECONFIG_SECRET_KEY: &str = "config";

/// Number of past connection timestamps kept in a tenant status record
pub const STATUS_CONNECTION_HISTORY: usize = 10;

/// Field manager used for server-side apply of status records
pub const FIELD_OWNER: &str = "fleet-controller";

/// Per-key reconcile error backoff bounds (seconds)
pub const RECONCILE_BACKOFF_MIN_SECS: u64 = 1;
pub const RECONCILE_BACKOFF_MAX_SECS: u64 = 300;

/// Annotation listing the providers a manifest applies to (comma separated)
pub const ANNOTATION_PROVIDERS: &str = "fleet.cloud-control.io/providers";

/// Annotation carrying the manifest version compared by the installer
pub const ANNOTATION_VERSION: &str = "fleet.cloud-control.io/version";

/// Tenant descriptor labels copied into metrics and status records
pub const LABEL_GLOBAL_ACCOUNT_ID: &str = "kyma-project.io/global-account-id";
pub const LABEL_SUBACCOUNT_ID: &str = "kyma-project.io/subaccount-id";
pub const LABEL_SHOOT_NAME: &str = "kyma-project.io/shoot-name";
pub const LABEL_REGION: &str = "kyma-project.io/region";
pub const LABEL_BROKER_PLAN_NAME: &str = "kyma-project.io/broker-plan-name";
