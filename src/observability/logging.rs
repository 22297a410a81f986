//! # Logging
//!
//! Installs the global tracing subscriber. `RUST_LOG` wins over the
//! configured level.

use crate::config::{ControllerConfig, LogFormat};
use anyhow::{anyhow, Result};
use tracing_subscriber::EnvFilter;

/// Filter used when `RUST_LOG` is unset
pub fn default_filter(level: &str) -> String {
    format!("ocm_controller={level},kube_runtime=warn")
}

pub fn init_logging(config: &ControllerConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter(&config.log_level)));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match config.log_format {
        LogFormat::Json => builder
            .json()
            .with_current_span(true)
            .try_init()
            .map_err(|e| anyhow!("failed to install log subscriber: {e}")),
        LogFormat::Text => builder
            .try_init()
            .map_err(|e| anyhow!("failed to install log subscriber: {e}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_filter_parses() {
        let filter = default_filter("debug");
        assert_eq!(filter, "ocm_controller=debug,kube_runtime=warn");
        assert!(EnvFilter::try_new(filter).is_ok());
    }
}
