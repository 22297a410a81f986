//! # OCMRepository
//!
//! Repository holding component versions, plus the credentials and
//! configuration inherited by every component that uses it.

use crate::crd::{default_interval, Condition, LocalObjectReference};
use serde::{Deserialize, Serialize};

/// OCMRepository Custom Resource Definition
///
/// # Example
///
/// ```yaml
/// apiVersion: delivery.ocm.software/v1alpha1
/// kind: OCMRepository
/// metadata:
///   name: ghcr
///   namespace: default
/// spec:
///   repositorySpec:
///     type: OCIRegistry
///     baseUrl: ghcr.io/open-component-model
///   secretRef:
///     name: ghcr-pull-secret
///   interval: 10m
/// ```
#[derive(kube::CustomResource, Debug, Clone, Deserialize, Serialize, schemars::JsonSchema)]
#[kube(
    kind = "OCMRepository",
    group = "delivery.ocm.software",
    version = "v1alpha1",
    namespaced,
    status = "crate::crd::OCMRepositoryStatus",
    shortname = "ocmrepo",
    printcolumn = r#"{"name":"Ready", "type":"string", "jsonPath":".status.conditions[?(@.type==\"Ready\")].status"}, {"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct OCMRepositorySpec {
    /// Location and type of the repository
    pub repository_spec: RepositorySpec,
    /// Secret holding credentials or an `.ocmconfig` document
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_ref: Option<LocalObjectReference>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub secret_refs: Vec<LocalObjectReference>,
    /// ConfigMap holding an `.ocmconfig` document
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_ref: Option<LocalObjectReference>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub config_refs: Vec<LocalObjectReference>,
    /// Name of a configuration set to activate from the referenced configs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_set: Option<String>,
    /// Reconcile interval
    /// Format: duration string (e.g., "30s", "10m", "1h30m")
    #[serde(default = "default_interval")]
    pub interval: String,
    #[serde(default)]
    pub suspend: bool,
}

/// Repository access description
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RepositorySpec {
    /// Repository type, currently `OCIRegistry`
    #[serde(default = "default_repository_type")]
    pub r#type: String,
    /// Registry host and optional path prefix, e.g. `ghcr.io/acme`
    pub base_url: String,
    /// Additional path below `baseUrl`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_path: Option<String>,
    /// Use plain http
    #[serde(default)]
    pub insecure: bool,
}

impl RepositorySpec {
    pub fn oci(base_url: impl Into<String>) -> Self {
        Self {
            r#type: default_repository_type(),
            base_url: base_url.into(),
            sub_path: None,
            insecure: false,
        }
    }
}

fn default_repository_type() -> String {
    "OCIRegistry".to_string()
}

/// Status of an OCMRepository
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct OCMRepositoryStatus {
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
    /// Effective secret references
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub secret_refs: Vec<LocalObjectReference>,
    /// Effective config references
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub config_refs: Vec<LocalObjectReference>,
    /// Effective config set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_set: Option<String>,
}
