//! # Constants
//!
//! Shared constants used throughout the controller.
//!
//! These values represent reasonable defaults and can be overridden via
//! configuration or environment variables where applicable.

/// API group of all custom resources served by this controller
pub const API_GROUP: &str = "delivery.ocm.software";

/// Field manager used for status patches and server-side apply
pub const FIELD_MANAGER: &str = "ocm-controller";

/// Finalizer guarding cleanup of produced artifacts and applied objects
pub const FINALIZER: &str = "delivery.ocm.software/finalizer";

/// Default HTTP server port for metrics and health probes
pub const DEFAULT_METRICS_PORT: u16 = 8080;

/// Default address of the artifact registry deployed next to the controller
pub const DEFAULT_REGISTRY_ADDR: &str =
    "ocm-k8s-toolkit-zot-registry.ocm-k8s-toolkit-system.svc.cluster.local:5000";

/// Default repository inside the artifact registry that holds produced artifacts
pub const DEFAULT_ARTIFACT_REPOSITORY: &str = "ocm-controller/artifacts";

/// Default time to wait for the artifact registry at startup (seconds)
pub const DEFAULT_REGISTRY_PING_TIMEOUT_SECS: u64 = 120;

/// Default interval between registry availability checks at startup (seconds)
pub const DEFAULT_REGISTRY_PING_INTERVAL_SECS: u64 = 5;

/// Default timeout applied to every network fetch (seconds)
pub const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 60;

/// Default requeue while an upstream object is not ready yet (seconds)
pub const DEFAULT_DEPENDENCY_REQUEUE_SECS: u64 = 10;

/// Fibonacci backoff floor for retryable errors (seconds)
pub const DEFAULT_BACKOFF_MIN_SECS: u64 = 5;

/// Fibonacci backoff ceiling for retryable errors (seconds)
pub const DEFAULT_BACKOFF_MAX_SECS: u64 = 300;

/// Default delay before restarting a controller stream that ended (seconds)
pub const DEFAULT_WATCH_RESTART_DELAY_SECS: u64 = 5;

/// Default maximum number of concurrent reconciliations per kind
pub const DEFAULT_MAX_CONCURRENT_RECONCILIATIONS: u16 = 10;

/// Interval used when an object's interval cannot be parsed (seconds)
pub const FALLBACK_INTERVAL_SECS: u64 = 600;

/// Media type of a stored descriptor set
pub const DESCRIPTOR_SET_MEDIA_TYPE: &str = "application/vnd.ocm.software.component-descriptors.v2+yaml";

/// Media type of an archive produced by localization or configuration
pub const TAR_GZIP_MEDIA_TYPE: &str = "application/x-tar+gzip";

/// Media type of an uncompressed tar archive
pub const TAR_MEDIA_TYPE: &str = "application/x-tar";

/// Media type of a raw single-file blob
pub const OCTET_STREAM_MEDIA_TYPE: &str = "application/octet-stream";

/// File name of the descriptor inside a descriptor layer archive
pub const COMPONENT_DESCRIPTOR_FILE: &str = "component-descriptor.yaml";

/// Secret or ConfigMap key holding an OCM configuration document
pub const OCM_CONFIG_KEY: &str = ".ocmconfig";

/// Secret key holding docker registry credentials
pub const DOCKER_CONFIG_KEY: &str = ".dockerconfigjson";
