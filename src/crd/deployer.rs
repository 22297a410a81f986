//! # OCMDeployer
//!
//! Applies the manifests found in an artifact to the cluster.

use crate::crd::{default_interval, ArtifactSourceRef, Condition};
use serde::{Deserialize, Serialize};

/// OCMDeployer Custom Resource Definition
///
/// # Example
///
/// ```yaml
/// apiVersion: delivery.ocm.software/v1alpha1
/// kind: OCMDeployer
/// metadata:
///   name: podinfo
/// spec:
///   resourceRef:
///     kind: LocalizedResource
///     name: podinfo-localized
/// ```
#[derive(kube::CustomResource, Debug, Clone, Deserialize, Serialize, schemars::JsonSchema)]
#[kube(
    kind = "OCMDeployer",
    group = "delivery.ocm.software",
    version = "v1alpha1",
    namespaced,
    status = "crate::crd::OCMDeployerStatus",
    shortname = "ocmdeploy",
    printcolumn = r#"{"name":"Ready", "type":"string", "jsonPath":".status.conditions[?(@.type==\"Ready\")].status"}, {"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct OCMDeployerSpec {
    /// Object whose artifact holds the manifests
    pub resource_ref: ArtifactSourceRef,
    #[serde(default = "default_interval")]
    pub interval: String,
    #[serde(default)]
    pub suspend: bool,
}

/// An object applied by a deployer
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DeployedObjectReference {
    pub api_version: String,
    pub kind: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

/// Status of an OCMDeployer
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct OCMDeployerStatus {
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
    /// Digest of the artifact last applied
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub applied_digest: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub deployed: Vec<DeployedObjectReference>,
}
