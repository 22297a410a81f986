//! # Resource
//!
//! A single resource of a resolved component graph, fetched and stored as an
//! artifact.

use crate::crd::{
    default_interval, ArtifactRef, ComponentInfo, Condition, LocalObjectReference,
    ResourceReference,
};
use serde::{Deserialize, Serialize};

/// Resource Custom Resource Definition
///
/// # Example
///
/// ```yaml
/// apiVersion: delivery.ocm.software/v1alpha1
/// kind: Resource
/// metadata:
///   name: podinfo-manifests
/// spec:
///   componentRef:
///     name: podinfo
///   resource:
///     byReference:
///       resource:
///         name: manifests
///       referencePath:
///         - name: backend
/// ```
#[derive(kube::CustomResource, Debug, Clone, Deserialize, Serialize, schemars::JsonSchema)]
#[kube(
    kind = "Resource",
    group = "delivery.ocm.software",
    version = "v1alpha1",
    namespaced,
    status = "crate::crd::ResourceStatus",
    shortname = "res",
    printcolumn = r#"{"name":"Ready", "type":"string", "jsonPath":".status.conditions[?(@.type==\"Ready\")].status"}, {"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ResourceSpec {
    /// Component whose descriptor set contains the resource
    pub component_ref: LocalObjectReference,
    pub resource: ResourceSelector,
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

/// How the resource is located in the component graph
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ResourceSelector {
    pub by_reference: ResourceReference,
}

/// Descriptor data of the resolved resource
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ResourceInfo {
    pub name: String,
    pub r#type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Access specification as found in the descriptor
    #[schemars(schema_with = "crate::crd::common::preserve_unknown_object_schema")]
    pub access: serde_json::Value,
    /// Content digest of the fetched blob
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,
}

/// Status of a Resource
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ResourceStatus {
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact: Option<ArtifactRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource: Option<ResourceInfo>,
    /// Component the resource was resolved against
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub component: Option<ComponentInfo>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub secret_refs: Vec<LocalObjectReference>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub config_refs: Vec<LocalObjectReference>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_set: Option<String>,
}
