//! # Component Descriptors
//!
//! Schema `v2` component descriptors and the descriptor set index built from
//! them.

use crate::crd::Identity;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use thiserror::Error;

/// Errors raised while reading descriptors or walking a descriptor graph
#[derive(Debug, Error)]
pub enum DescriptorError {
    #[error("failed to parse component descriptor: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("component descriptor {name}:{version} is not part of the descriptor set")]
    ComponentNotFound { name: String, version: String },
    #[error("component reference {reference} not found in {component}")]
    ReferenceNotFound { component: String, reference: String },
    #[error("component reference {reference} is ambiguous in {component}")]
    AmbiguousReference { component: String, reference: String },
    #[error("resource {resource} not found in {component}")]
    ResourceNotFound { component: String, resource: String },
    #[error("resource {resource} matches {count} resources in {component}")]
    AmbiguousResource {
        component: String,
        resource: String,
        count: usize,
    },
    #[error("access type {0} does not carry an image reference")]
    NoImageReference(String),
}

/// A component descriptor
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ComponentDescriptor {
    pub meta: Meta,
    pub component: DescriptorComponent,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub signatures: Vec<Signature>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Meta {
    pub schema_version: String,
}

impl Default for Meta {
    fn default() -> Self {
        Self {
            schema_version: "v2".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DescriptorComponent {
    pub name: String,
    pub version: String,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub provider: serde_json::Value,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub repository_contexts: Vec<serde_json::Value>,
    #[serde(default)]
    pub resources: Vec<DescriptorResource>,
    #[serde(default)]
    pub sources: Vec<serde_json::Value>,
    #[serde(default)]
    pub component_references: Vec<ComponentReference>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub labels: Vec<Label>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Relation {
    #[default]
    Local,
    External,
}

/// A resource entry of a component descriptor
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DescriptorResource {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    pub r#type: String,
    #[serde(default)]
    pub relation: Relation,
    pub access: AccessSpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub digest: Option<DigestSpec>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra_identity: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub labels: Vec<Label>,
}

impl DescriptorResource {
    /// Identity attributes: `name`, `version` when set, and the extra identity
    pub fn identity(&self) -> Identity {
        let mut identity = self.extra_identity.clone();
        identity.insert("name".to_string(), self.name.clone());
        if let Some(version) = &self.version {
            identity.insert("version".to_string(), version.clone());
        }
        identity
    }
}

/// A reference from one component version to another
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentReference {
    pub name: String,
    pub component_name: String,
    pub version: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra_identity: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub digest: Option<DigestSpec>,
}

impl ComponentReference {
    pub fn identity(&self) -> Identity {
        let mut identity = self.extra_identity.clone();
        identity.insert("name".to_string(), self.name.clone());
        identity.insert("version".to_string(), self.version.clone());
        identity
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Label {
    pub name: String,
    pub value: serde_json::Value,
}

/// Typed access specification; type-specific attributes are kept verbatim
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct AccessSpec {
    pub r#type: String,
    #[serde(flatten)]
    pub attributes: serde_json::Map<String, serde_json::Value>,
}

impl AccessSpec {
    fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).and_then(serde_json::Value::as_str)
    }

    /// Type without the `/v1` style version suffix
    pub fn base_type(&self) -> &str {
        self.r#type.split('/').next().unwrap_or(&self.r#type)
    }

    /// Image reference the access points at.
    ///
    /// OCI artifacts carry it directly; local blobs carry it when they were
    /// also published globally or under a reference name.
    pub fn image_reference(&self) -> Result<String, DescriptorError> {
        let reference = match self.base_type() {
            "ociArtifact" | "ociRegistry" | "ociImage" => self.attribute("imageReference"),
            "localBlob" => self
                .attributes
                .get("globalAccess")
                .and_then(|g| g.get("imageReference"))
                .and_then(serde_json::Value::as_str)
                .or_else(|| self.attribute("referenceName")),
            _ => None,
        };
        reference
            .map(str::to_string)
            .ok_or_else(|| DescriptorError::NoImageReference(self.r#type.clone()))
    }

    /// Blob digest of a local blob access
    pub fn local_reference(&self) -> Option<&str> {
        self.attribute("localReference")
    }

    pub fn media_type(&self) -> Option<&str> {
        self.attribute("mediaType")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DigestSpec {
    pub hash_algorithm: String,
    pub normalisation_algorithm: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Signature {
    pub name: String,
    pub digest: DigestSpec,
    pub signature: SignatureSpec,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SignatureSpec {
    pub algorithm: String,
    pub value: String,
    #[serde(default)]
    pub media_type: String,
}

impl ComponentDescriptor {
    pub fn name(&self) -> &str {
        &self.component.name
    }

    pub fn version(&self) -> &str {
        &self.component.version
    }

    /// Parse a descriptor from YAML (or JSON) bytes
    pub fn from_slice(data: &[u8]) -> Result<Self, DescriptorError> {
        Ok(serde_yaml::from_slice(data)?)
    }
}

/// Index over a collection of component descriptors, unique by (name, version)
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct DescriptorSet {
    pub components: Vec<ComponentDescriptor>,
}

impl DescriptorSet {
    /// Build a set, keeping the first descriptor of every (name, version)
    pub fn new(descriptors: impl IntoIterator<Item = ComponentDescriptor>) -> Self {
        let mut seen = HashSet::new();
        let components = descriptors
            .into_iter()
            .filter(|d| seen.insert((d.name().to_string(), d.version().to_string())))
            .collect();
        Self { components }
    }

    pub fn lookup(&self, name: &str, version: &str) -> Result<&ComponentDescriptor, DescriptorError> {
        self.components
            .iter()
            .find(|d| d.name() == name && d.version() == version)
            .ok_or_else(|| DescriptorError::ComponentNotFound {
                name: name.to_string(),
                version: version.to_string(),
            })
    }

    pub fn len(&self) -> usize {
        self.components.len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    pub fn to_yaml(&self) -> Result<Vec<u8>, DescriptorError> {
        Ok(serde_yaml::to_string(self)?.into_bytes())
    }

    pub fn from_yaml(data: &[u8]) -> Result<Self, DescriptorError> {
        Ok(serde_yaml::from_slice(data)?)
    }
}
