//! # Shared API Types
//!
//! Reference, condition and artifact types shared by all kinds.

use schemars::{JsonSchema, Schema, SchemaGenerator};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Identity of a resource or component reference inside a descriptor.
///
/// Always carries `name`; any further attribute (`version` or extra identity
/// keys) narrows the match.
pub type Identity = BTreeMap<String, String>;

/// Reference to an object in the same namespace
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize, Serialize, JsonSchema)]
pub struct LocalObjectReference {
    pub name: String,
}

impl LocalObjectReference {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

/// Reference to an object, defaulting to the referrer's namespace
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ObjectKey {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

impl ObjectKey {
    /// Namespace of the referenced object, falling back to `default_namespace`
    pub fn namespace_or<'a>(&'a self, default_namespace: &'a str) -> &'a str {
        self.namespace.as_deref().unwrap_or(default_namespace)
    }
}

/// A signature that must be present and valid on a component version.
///
/// The public key is either given inline (`value`, base64) or read from the
/// secret `secretRef` under the key named like the signature.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Verification {
    pub signature: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

/// Pointer to a content-addressed artifact in the artifact store
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactRef {
    pub digest: String,
    pub media_type: String,
    #[serde(default)]
    pub size: u64,
}

/// Reference to a resource inside a component graph.
///
/// `referencePath` is walked through nested component references starting at
/// the root component before `resource` is looked up.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ResourceReference {
    pub resource: Identity,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub reference_path: Vec<Identity>,
}

impl ResourceReference {
    /// Reference to a resource of the root component by name
    pub fn by_name(name: impl Into<String>) -> Self {
        Self {
            resource: Identity::from([("name".to_string(), name.into())]),
            reference_path: Vec::new(),
        }
    }

    /// Append a component reference hop by name
    #[must_use]
    pub fn through(mut self, reference: impl Into<String>) -> Self {
        self.reference_path
            .push(Identity::from([("name".to_string(), reference.into())]));
        self
    }

    pub fn resource_name(&self) -> Option<&str> {
        self.resource.get("name").map(String::as_str)
    }
}

impl fmt::Display for ResourceReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for hop in &self.reference_path {
            write!(f, "{}/", hop.get("name").map_or("?", String::as_str))?;
        }
        write!(f, "{}", self.resource_name().unwrap_or("?"))
    }
}

/// Condition represents a condition of a resource
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Type of condition
    pub r#type: String,
    /// Status of the condition (True, False, Unknown)
    pub status: String,
    #[serde(default)]
    pub last_transition_time: Option<String>,
    /// Machine-readable reason for the condition
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub observed_generation: Option<i64>,
}

/// Check whether a condition list reports `Ready=True`
pub fn is_ready(conditions: &[Condition]) -> bool {
    conditions
        .iter()
        .any(|c| c.r#type == "Ready" && c.status == "True")
}

/// Kinds whose status points at a stored artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize, JsonSchema)]
pub enum ArtifactSourceKind {
    #[default]
    Resource,
    LocalizedResource,
    ConfiguredResource,
}

impl ArtifactSourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArtifactSourceKind::Resource => "Resource",
            ArtifactSourceKind::LocalizedResource => "LocalizedResource",
            ArtifactSourceKind::ConfiguredResource => "ConfiguredResource",
        }
    }
}

/// Reference to an object that produces an artifact
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactSourceRef {
    #[serde(default)]
    pub kind: ArtifactSourceKind,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

/// Default reconcile interval
pub fn default_interval() -> String {
    "10m".to_string()
}

/// Schema for free-form structured data
///
/// Rendered as an object preserving unknown fields so the API server keeps
/// arbitrary nested content.
pub(crate) fn preserve_unknown_object_schema(_gen: &mut SchemaGenerator) -> Schema {
    let schema_value = serde_json::json!({
        "type": "object",
        "x-kubernetes-preserve-unknown-fields": true,
    });
    Schema::try_from(schema_value).unwrap_or_default()
}

/// Schema for a non-empty list of rule variants
///
/// Each item is exactly one of the variant keys; the exclusivity is enforced
/// when the rule list is deserialized.
pub(crate) fn rule_list_schema(_gen: &mut SchemaGenerator) -> Schema {
    let schema_value = serde_json::json!({
        "type": "array",
        "minItems": 1,
        "items": {
            "type": "object",
            "minProperties": 1,
            "maxProperties": 1,
            "x-kubernetes-preserve-unknown-fields": true,
        },
    });
    Schema::try_from(schema_value).unwrap_or_default()
}
