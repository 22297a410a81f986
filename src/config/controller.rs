//! # Controller Configuration
//!
//! Controller-level settings loaded from environment variables.

use std::sync::Arc;
use std::time::Duration;

/// Shared, read-only controller configuration
pub type SharedControllerConfig = Arc<ControllerConfig>;

/// Output format of the log subscriber
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Text,
}

impl LogFormat {
    fn parse(value: &str) -> Self {
        if value.eq_ignore_ascii_case("text") {
            LogFormat::Text
        } else {
            LogFormat::Json
        }
    }
}

/// Controller-level configuration
///
/// All settings have sensible defaults and can be overridden via environment variables.
/// Environment variables are populated from a ConfigMap using `envFrom` in the deployment.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Address (`host[:port]`) of the registry that stores produced artifacts
    pub registry_addr: String,
    /// Use plain http and skip certificate verification for the artifact registry
    pub registry_insecure_skip_verify: bool,
    /// Path to a PEM root CA used to reach the artifact registry
    pub registry_root_ca: Option<String>,
    /// How long startup waits for the artifact registry to answer (seconds)
    pub registry_ping_timeout_secs: u64,
    /// Interval between registry availability checks at startup (seconds)
    pub registry_ping_interval_secs: u64,
    /// Repository inside the registry holding produced artifacts
    pub artifact_repository: String,
    /// Timeout applied to each network fetch (seconds)
    pub fetch_timeout_secs: u64,
    /// Requeue delay while an upstream object is not ready (seconds)
    pub dependency_requeue_secs: u64,
    /// Fibonacci backoff floor for retryable errors (seconds)
    pub backoff_min_secs: u64,
    /// Fibonacci backoff ceiling for retryable errors (seconds)
    pub backoff_max_secs: u64,
    /// Delay before restarting a controller stream that ended (seconds)
    pub watch_restart_delay_secs: u64,
    /// Maximum concurrent reconciliations per kind
    pub max_concurrent_reconciliations: u16,
    /// Port of the metrics and probe server
    pub metrics_port: u16,
    /// Default log filter when `RUST_LOG` is unset
    pub log_level: String,
    /// Log output format
    pub log_format: LogFormat,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        use crate::constants::*;
        Self {
            registry_addr: DEFAULT_REGISTRY_ADDR.to_string(),
            registry_insecure_skip_verify: false,
            registry_root_ca: None,
            registry_ping_timeout_secs: DEFAULT_REGISTRY_PING_TIMEOUT_SECS,
            registry_ping_interval_secs: DEFAULT_REGISTRY_PING_INTERVAL_SECS,
            artifact_repository: DEFAULT_ARTIFACT_REPOSITORY.to_string(),
            fetch_timeout_secs: DEFAULT_FETCH_TIMEOUT_SECS,
            dependency_requeue_secs: DEFAULT_DEPENDENCY_REQUEUE_SECS,
            backoff_min_secs: DEFAULT_BACKOFF_MIN_SECS,
            backoff_max_secs: DEFAULT_BACKOFF_MAX_SECS,
            watch_restart_delay_secs: DEFAULT_WATCH_RESTART_DELAY_SECS,
            max_concurrent_reconciliations: DEFAULT_MAX_CONCURRENT_RECONCILIATIONS,
            metrics_port: DEFAULT_METRICS_PORT,
            log_level: "info".to_string(),
            log_format: LogFormat::Json,
        }
    }
}

impl ControllerConfig {
    /// Load configuration from environment variables with defaults
    pub fn from_env() -> Self {
        use crate::constants::*;
        Self {
            registry_addr: env_var_or_default_str("REGISTRY_ADDR", DEFAULT_REGISTRY_ADDR),
            registry_insecure_skip_verify: env_var_or_default_bool(
                "REGISTRY_INSECURE_SKIP_VERIFY",
                false,
            ),
            registry_root_ca: std::env::var("REGISTRY_ROOT_CA")
                .ok()
                .filter(|v| !v.trim().is_empty()),
            registry_ping_timeout_secs: env_var_or_default(
                "REGISTRY_PING_TIMEOUT_SECS",
                DEFAULT_REGISTRY_PING_TIMEOUT_SECS,
            ),
            registry_ping_interval_secs: env_var_or_default(
                "REGISTRY_PING_INTERVAL_SECS",
                DEFAULT_REGISTRY_PING_INTERVAL_SECS,
            ),
            artifact_repository: env_var_or_default_str(
                "ARTIFACT_REPOSITORY",
                DEFAULT_ARTIFACT_REPOSITORY,
            ),
            fetch_timeout_secs: env_var_or_default("FETCH_TIMEOUT_SECS", DEFAULT_FETCH_TIMEOUT_SECS),
            dependency_requeue_secs: env_var_or_default(
                "DEPENDENCY_REQUEUE_SECS",
                DEFAULT_DEPENDENCY_REQUEUE_SECS,
            ),
            backoff_min_secs: env_var_or_default("BACKOFF_MIN_SECS", DEFAULT_BACKOFF_MIN_SECS),
            backoff_max_secs: env_var_or_default("BACKOFF_MAX_SECS", DEFAULT_BACKOFF_MAX_SECS),
            watch_restart_delay_secs: env_var_or_default(
                "WATCH_RESTART_DELAY_SECS",
                DEFAULT_WATCH_RESTART_DELAY_SECS,
            ),
            max_concurrent_reconciliations: env_var_or_default(
                "MAX_CONCURRENT_RECONCILIATIONS",
                DEFAULT_MAX_CONCURRENT_RECONCILIATIONS,
            ),
            metrics_port: env_var_or_default("METRICS_PORT", DEFAULT_METRICS_PORT),
            log_level: env_var_or_default_str("LOG_LEVEL", "info"),
            log_format: LogFormat::parse(&env_var_or_default_str("LOG_FORMAT", "json")),
        }
    }

    /// Get registry ping timeout duration
    pub fn registry_ping_timeout(&self) -> Duration {
        Duration::from_secs(self.registry_ping_timeout_secs)
    }

    /// Get registry ping interval duration
    pub fn registry_ping_interval(&self) -> Duration {
        Duration::from_secs(self.registry_ping_interval_secs)
    }

    /// Get network fetch timeout duration
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    /// Get dependency requeue duration
    pub fn dependency_requeue(&self) -> Duration {
        Duration::from_secs(self.dependency_requeue_secs)
    }

    /// Get watch restart delay duration
    pub fn watch_restart_delay(&self) -> Duration {
        Duration::from_secs(self.watch_restart_delay_secs)
    }
}

/// Read environment variable or return default value
fn env_var_or_default<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

/// Read environment variable as boolean or return default
fn env_var_or_default_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .ok()
        .map(|v| {
            let v_lower = v.to_lowercase();
            v_lower == "true" || v_lower == "1" || v_lower == "yes" || v_lower == "on"
        })
        .unwrap_or(default)
}

/// Read environment variable as string or return default
fn env_var_or_default_str(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_constants() {
        let config = ControllerConfig::default();
        assert_eq!(config.registry_ping_timeout(), Duration::from_secs(120));
        assert_eq!(config.registry_ping_interval(), Duration::from_secs(5));
        assert_eq!(config.dependency_requeue(), Duration::from_secs(10));
        assert_eq!(config.log_format, LogFormat::Json);
        assert!(!config.registry_insecure_skip_verify);
    }

    #[test]
    fn test_log_format_parse() {
        assert_eq!(LogFormat::parse("TEXT"), LogFormat::Text);
        assert_eq!(LogFormat::parse("json"), LogFormat::Json);
        assert_eq!(LogFormat::parse("anything"), LogFormat::Json);
    }
}
