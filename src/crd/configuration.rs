//! # Configuration
//!
//! `ResourceConfig` holds literal-valued rules; `ConfiguredResource` applies
//! them to the artifact of a `Resource` or `LocalizedResource`.

use crate::crd::{
    default_interval, ArtifactRef, ArtifactSourceRef, Condition, GoTemplateRule,
    LocalObjectReference, ValueTarget,
};
use serde::{Deserialize, Serialize};

/// ResourceConfig Custom Resource Definition
///
/// # Example
///
/// ```yaml
/// apiVersion: delivery.ocm.software/v1alpha1
/// kind: ResourceConfig
/// metadata:
///   name: podinfo-config
/// spec:
///   rules:
///     - yamlsubst:
///         source:
///           value: 3
///         target:
///           file:
///             path: values.yaml
///             value: replicaCount
/// ```
#[derive(kube::CustomResource, Debug, Clone, Deserialize, Serialize, schemars::JsonSchema)]
#[kube(
    kind = "ResourceConfig",
    group = "delivery.ocm.software",
    version = "v1alpha1",
    namespaced,
    shortname = "rcfg"
)]
#[serde(rename_all = "camelCase")]
pub struct ResourceConfigSpec {
    #[schemars(schema_with = "crate::crd::common::rule_list_schema")]
    pub rules: Vec<ConfigurationRule>,
}

/// One configuration rule
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub enum ConfigurationRule {
    #[serde(rename = "yamlsubst")]
    YamlSubstitution(ConfigSubstitutionRule),
    #[serde(rename = "goTemplate")]
    GoTemplate(GoTemplateRule),
}

/// Substitute a literal value into a YAML file
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigSubstitutionRule {
    pub source: LiteralSource,
    pub target: ValueTarget,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct LiteralSource {
    /// Read as a YAML scalar when substituted: `3` lands as an integer,
    /// `'3'` as a string
    #[serde(deserialize_with = "scalar_text")]
    pub value: String,
}

fn scalar_text<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Scalar {
        Text(String),
        Number(serde_json::Number),
        Bool(bool),
    }

    Ok(match Scalar::deserialize(deserializer)? {
        Scalar::Text(text) => text,
        Scalar::Number(number) => number.to_string(),
        Scalar::Bool(flag) => flag.to_string(),
    })
}

/// ConfiguredResource Custom Resource Definition
#[derive(kube::CustomResource, Debug, Clone, Deserialize, Serialize, schemars::JsonSchema)]
#[kube(
    kind = "ConfiguredResource",
    group = "delivery.ocm.software",
    version = "v1alpha1",
    namespaced,
    status = "crate::crd::ConfiguredResourceStatus",
    shortname = "cres",
    printcolumn = r#"{"name":"Ready", "type":"string", "jsonPath":".status.conditions[?(@.type==\"Ready\")].status"}, {"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ConfiguredResourceSpec {
    /// Resource or LocalizedResource whose artifact is configured
    pub target: ArtifactSourceRef,
    /// ResourceConfig holding the rules
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

/// Status of a ConfiguredResource
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ConfiguredResourceStatus {
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact: Option<ArtifactRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub secret_refs: Vec<LocalObjectReference>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub config_refs: Vec<LocalObjectReference>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_set: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_literal_accepts_scalars() {
        let rule = |value: serde_json::Value| {
            serde_json::from_value::<ConfigurationRule>(serde_json::json!({
                "yamlsubst": {
                    "source": {"value": value},
                    "target": {"file": {"path": "values.yaml", "value": "replicas"}}
                }
            }))
        };
        for (value, text) in [
            (serde_json::json!(3), "3"),
            (serde_json::json!("3"), "3"),
            (serde_json::json!(true), "true"),
        ] {
            match rule(value).unwrap() {
                ConfigurationRule::YamlSubstitution(rule) => assert_eq!(rule.source.value, text),
                other => panic!("expected yamlsubst, got {other:?}"),
            }
        }
        assert!(rule(serde_json::json!({"nested": 1})).is_err());
    }

    #[test]
    fn test_unknown_rule_fields_are_rejected() {
        let result = serde_json::from_value::<ConfigurationRule>(serde_json::json!({
            "yamlsubst": {
                "source": {"value": "3"},
                "target": {"file": {"path": "values.yaml", "value": "replicas"}},
                "transformation": {"type": "Tag"}
            }
        }));
        assert!(result.is_err());
    }
}
