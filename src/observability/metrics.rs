//! # Metrics
//!
//! Prometheus metrics for monitoring the controller.
//!
//! ## Metrics Exposed
//!
//! - `ocm_controller_reconciliations_total` - Reconciliations by kind
//! - `ocm_controller_reconciliation_errors_total` - Failed reconciliations by kind and reason
//! - `ocm_controller_reconciliation_duration_seconds` - Duration of reconciliations by kind
//! - `ocm_controller_requeues_total` - Requeues by trigger source
//! - `ocm_controller_artifacts_stored_total` - Artifacts written to the artifact store by kind
//! - `ocm_controller_component_versions_resolved_total` - Component versions selected
//! - `ocm_controller_objects_applied_total` - Objects applied by deployers

use anyhow::Result;
use prometheus::{HistogramVec, IntCounter, IntCounterVec, Registry};
use std::sync::LazyLock;

pub(crate) static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

static RECONCILIATIONS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "ocm_controller_reconciliations_total",
            "Total number of reconciliations by kind",
        ),
        &["kind"],
    )
    .expect("Failed to create RECONCILIATIONS_TOTAL metric - this should never happen")
});

static RECONCILIATION_ERRORS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "ocm_controller_reconciliation_errors_total",
            "Total number of failed reconciliations by kind and reason",
        ),
        &["kind", "reason"],
    )
    .expect("Failed to create RECONCILIATION_ERRORS_TOTAL metric - this should never happen")
});

static RECONCILIATION_DURATION: LazyLock<HistogramVec> = LazyLock::new(|| {
    HistogramVec::new(
        prometheus::HistogramOpts::new(
            "ocm_controller_reconciliation_duration_seconds",
            "Duration of reconciliation in seconds",
        )
        .buckets(vec![0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0, 60.0]),
        &["kind"],
    )
    .expect("Failed to create RECONCILIATION_DURATION metric - this should never happen")
});

static REQUEUES_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "ocm_controller_requeues_total",
            "Total number of requeues by trigger source",
        ),
        &["trigger_source"],
    )
    .expect("Failed to create REQUEUES_TOTAL metric - this should never happen")
});

static ARTIFACTS_STORED_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "ocm_controller_artifacts_stored_total",
            "Total number of artifacts written to the artifact store by kind",
        ),
        &["kind"],
    )
    .expect("Failed to create ARTIFACTS_STORED_TOTAL metric - this should never happen")
});

static COMPONENT_VERSIONS_RESOLVED_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "ocm_controller_component_versions_resolved_total",
        "Total number of component versions resolved",
    )
    .expect("Failed to create COMPONENT_VERSIONS_RESOLVED_TOTAL metric - this should never happen")
});

static OBJECTS_APPLIED_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "ocm_controller_objects_applied_total",
        "Total number of objects applied by deployers",
    )
    .expect("Failed to create OBJECTS_APPLIED_TOTAL metric - this should never happen")
});

pub fn register_metrics() -> Result<()> {
    REGISTRY.register(Box::new(RECONCILIATIONS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(RECONCILIATION_ERRORS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(RECONCILIATION_DURATION.clone()))?;
    REGISTRY.register(Box::new(REQUEUES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(ARTIFACTS_STORED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(COMPONENT_VERSIONS_RESOLVED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(OBJECTS_APPLIED_TOTAL.clone()))?;

    Ok(())
}

pub fn increment_reconciliations(kind: &str) {
    RECONCILIATIONS_TOTAL.with_label_values(&[kind]).inc();
}

pub fn increment_reconciliation_errors(kind: &str, reason: &str) {
    RECONCILIATION_ERRORS_TOTAL
        .with_label_values(&[kind, reason])
        .inc();
}

pub fn observe_reconciliation_duration(kind: &str, duration: f64) {
    RECONCILIATION_DURATION
        .with_label_values(&[kind])
        .observe(duration);
}

pub fn increment_requeues_total(trigger_source: &str) {
    REQUEUES_TOTAL.with_label_values(&[trigger_source]).inc();
}

pub fn increment_artifacts_stored(kind: &str) {
    ARTIFACTS_STORED_TOTAL.with_label_values(&[kind]).inc();
}

pub fn increment_component_versions_resolved() {
    COMPONENT_VERSIONS_RESOLVED_TOTAL.inc();
}

pub fn increment_objects_applied(count: u64) {
    OBJECTS_APPLIED_TOTAL.inc_by(count);
}

/// Render all registered metrics in the Prometheus text format
pub fn gather_text() -> Result<String> {
    use prometheus::Encoder;
    let encoder = prometheus::TextEncoder::new();
    let mut buffer = Vec::new();
    encoder.encode(&REGISTRY.gather(), &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}
