//! # Localization
//!
//! `LocalizationConfig` holds an ordered rule list; `LocalizedResource` applies
//! one to the artifact of a `Resource`.
//!
//! A rule is exactly one of `yamlsubst` or `goTemplate`. The variants are an
//! externally tagged enum, so a rule carrying both keys (or neither) fails to
//! deserialize.

use crate::crd::{
    default_interval, ArtifactRef, Condition, Identity, LocalObjectReference, ResourceReference,
};
use serde::{Deserialize, Serialize};

/// LocalizationConfig Custom Resource Definition
///
/// # Example
///
/// ```yaml
/// apiVersion: delivery.ocm.software/v1alpha1
/// kind: LocalizationConfig
/// metadata:
///   name: podinfo-localization
/// spec:
///   rules:
///     - yamlsubst:
///         source:
///           resource:
///             name: image
///         target:
///           file:
///             path: values.yaml
///             value: image.registry
///         transformation:
///           type: Registry
///     - yamlsubst:
///         source:
///           resource: image
///           transformation: Tag
///         target:
///           file:
///             path: values.yaml
///             value: image.tag
///     - goTemplate:
///         file:
///           path: deploy.yaml
///         data:
///           replicas: 3
/// ```
#[derive(kube::CustomResource, Debug, Clone, Deserialize, Serialize, schemars::JsonSchema)]
#[kube(
    kind = "LocalizationConfig",
    group = "delivery.ocm.software",
    version = "v1alpha1",
    namespaced,
    shortname = "lcfg"
)]
#[serde(rename_all = "camelCase")]
pub struct LocalizationConfigSpec {
    /// Rules applied in declaration order
    #[schemars(schema_with = "crate::crd::common::rule_list_schema")]
    pub rules: Vec<LocalizationRule>,
}

/// One localization rule
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub enum LocalizationRule {
    #[serde(rename = "yamlsubst")]
    YamlSubstitution(YamlSubstitutionRule),
    #[serde(rename = "goTemplate")]
    GoTemplate(GoTemplateRule),
}

/// Substitute a value derived from a component resource into a YAML file
///
/// The transformation may sit on the rule or on its source. The rule-level
/// one wins when both are set.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct YamlSubstitutionRule {
    pub source: LocalizationSource,
    pub target: ValueTarget,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transformation: Option<TransformationSpec>,
}

impl YamlSubstitutionRule {
    /// Transformation name, `Image` when unset
    pub fn transformation_type(&self) -> &str {
        self.transformation
            .as_ref()
            .or(self.source.transformation.as_ref())
            .map_or("Image", |t| t.r#type.as_str())
    }
}

/// Resource whose access value feeds a substitution
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct LocalizationSource {
    /// Resource identity, or just its name
    #[serde(deserialize_with = "identity_from_name_or_map")]
    pub resource: Identity,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub reference_path: Vec<Identity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transformation: Option<TransformationSpec>,
}

impl LocalizationSource {
    pub fn reference(&self) -> ResourceReference {
        ResourceReference {
            resource: self.resource.clone(),
            reference_path: self.reference_path.clone(),
        }
    }
}

fn identity_from_name_or_map<'de, D>(deserializer: D) -> Result<Identity, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum NameOrIdentity {
        Name(String),
        Identity(Identity),
    }

    Ok(match NameOrIdentity::deserialize(deserializer)? {
        NameOrIdentity::Name(name) => Identity::from([("name".to_string(), name)]),
        NameOrIdentity::Identity(identity) => identity,
    })
}

/// Named transformation applied to a resource access value
///
/// Written either as `{type: Registry}` or as the bare name `Registry`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(from = "NameOrType")]
pub struct TransformationSpec {
    /// One of `Image`, `ImageNoTag`, `Registry`, `Repository`, `Tag`
    pub r#type: String,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum NameOrType {
    Name(String),
    Type { r#type: String },
}

impl From<NameOrType> for TransformationSpec {
    fn from(value: NameOrType) -> Self {
        match value {
            NameOrType::Name(r#type) | NameOrType::Type { r#type } => Self { r#type },
        }
    }
}

/// File and dotted value path a substitution writes to
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ValueTarget {
    pub file: FileValueTarget,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct FileValueTarget {
    pub path: String,
    /// Dotted path such as `deploy.image` or `containers.0.image`
    pub value: String,
}

/// Render a file as a template over structured data
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct GoTemplateRule {
    pub file: FileTarget,
    /// Template context; `null` when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delimiters: Option<GoTemplateDelimiters>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct FileTarget {
    pub path: String,
}

/// Custom action delimiters, `{{` and `}}` when unset
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct GoTemplateDelimiters {
    pub left: String,
    pub right: String,
}

impl Default for GoTemplateDelimiters {
    fn default() -> Self {
        Self {
            left: "{{".to_string(),
            right: "}}".to_string(),
        }
    }
}

/// LocalizedResource Custom Resource Definition
///
/// # Example
///
/// ```yaml
/// apiVersion: delivery.ocm.software/v1alpha1
/// kind: LocalizedResource
/// metadata:
///   name: podinfo-localized
/// spec:
///   target:
///     name: podinfo-manifests
///   config:
///     name: podinfo-localization
/// ```
#[derive(kube::CustomResource, Debug, Clone, Deserialize, Serialize, schemars::JsonSchema)]
#[kube(
    kind = "LocalizedResource",
    group = "delivery.ocm.software",
    version = "v1alpha1",
    namespaced,
    status = "crate::crd::LocalizedResourceStatus",
    shortname = "lres",
    printcolumn = r#"{"name":"Ready", "type":"string", "jsonPath":".status.conditions[?(@.type==\"Ready\")].status"}, {"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct LocalizedResourceSpec {
    /// Resource whose artifact is localized
    pub target: LocalObjectReference,
    /// LocalizationConfig holding the rules
    pub config: LocalObjectReference,
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

/// Status of a LocalizedResource
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct LocalizedResourceStatus {
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact: Option<ArtifactRef>,
    /// Digest of the applied rule list
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub secret_refs: Vec<LocalObjectReference>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub config_refs: Vec<LocalObjectReference>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_set: Option<String>,
}
