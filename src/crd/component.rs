//! # Component
//!
//! A component version selected from an OCMRepository by semver constraint.

use crate::crd::{
    default_interval, ArtifactRef, Condition, LocalObjectReference, RepositorySpec, Verification,
};
use serde::{Deserialize, Serialize};

/// Component Custom Resource Definition
///
/// # Example
///
/// ```yaml
/// apiVersion: delivery.ocm.software/v1alpha1
/// kind: Component
/// metadata:
///   name: podinfo
/// spec:
///   repositoryRef:
///     name: ghcr
///   component: ocm.software/podinfo
///   semver: ">=6.0.0 <7.0.0"
///   verify:
///     - signature: acme
///       secretRef: acme-keys
/// ```
#[derive(kube::CustomResource, Debug, Clone, Deserialize, Serialize, schemars::JsonSchema)]
#[kube(
    kind = "Component",
    group = "delivery.ocm.software",
    version = "v1alpha1",
    namespaced,
    status = "crate::crd::ComponentStatus",
    shortname = "comp",
    printcolumn = r#"{"name":"Version", "type":"string", "jsonPath":".status.component.version"}, {"name":"Ready", "type":"string", "jsonPath":".status.conditions[?(@.type==\"Ready\")].status"}, {"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ComponentSpec {
    /// OCMRepository holding the component
    pub repository_ref: LocalObjectReference,
    /// Component name, e.g. `ocm.software/podinfo`
    pub component: String,
    /// Allow the selected version to be lower than the one previously observed
    #[serde(default)]
    pub enforce_downgradability: bool,
    /// Semver constraint, e.g. `>=1.0.0 <2.0.0`
    pub semver: String,
    /// Regular expression applied to raw version strings before matching
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub semver_filter: Option<String>,
    /// Signatures that must verify on the selected version
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub verify: Vec<Verification>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_ref: Option<LocalObjectReference>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub secret_refs: Vec<LocalObjectReference>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_ref: Option<LocalObjectReference>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub config_refs: Vec<LocalObjectReference>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_set: Option<String>,
    #[serde(default = "default_interval")]
    pub interval: String,
    #[serde(default)]
    pub suspend: bool,
}

/// The component version a Component resolved to
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ComponentInfo {
    pub repository_spec: RepositorySpec,
    pub component: String,
    pub version: String,
}

/// Status of a Component
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ComponentStatus {
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
    /// Stored transitive descriptor set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact: Option<ArtifactRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub component: Option<ComponentInfo>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub secret_refs: Vec<LocalObjectReference>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub config_refs: Vec<LocalObjectReference>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_set: Option<String>,
}
