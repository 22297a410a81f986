//! # Localization
//!
//! Applies ordered rule lists to the files of an artifact and re-packages
//! the result.
//!
//! ## Rules
//!
//! - `yamlsubst` - Sets a value at a dotted path of a YAML file. For
//!   localization the value is derived from a component resource's access
//!   through a transformation; for configuration it is a literal.
//! - `goTemplate` - Renders the file as a template over the rule's data.
//!
//! Rules run in declaration order and each one observes the output of the
//! previous rules.

pub mod template;
pub mod yaml;

use crate::artifact::{ArchiveError, FileSet};
use crate::crd::{
    ConfigurationRule, FileValueTarget, GoTemplateRule, LocalizationRule, YamlSubstitutionRule,
};
use crate::oci::sha256_digest;
use crate::ocm::descriptor::{DescriptorError, DescriptorSet};
use crate::ocm::reference::resolve_resource;
use crate::ocm::transformation::{apply_named, TransformError};
use serde::Serialize;
use serde_yaml::Value;
use thiserror::Error;
use tracing::debug;

pub use template::TemplateError;
pub use yaml::YamlPathError;

/// Localization and configuration failures; none of them heal by retrying
#[derive(Debug, Error)]
pub enum LocalizationError {
    #[error(transparent)]
    Archive(#[from] ArchiveError),
    #[error(transparent)]
    Descriptor(#[from] DescriptorError),
    #[error(transparent)]
    Transform(#[from] TransformError),
    #[error("failed to substitute {value_path:?} in {file}: {source}")]
    Substitution {
        file: String,
        value_path: String,
        #[source]
        source: YamlPathError,
    },
    #[error("failed to render template {file}: {source}")]
    Template {
        file: String,
        #[source]
        source: TemplateError,
    },
    #[error("file {0} is not valid UTF-8")]
    NotUtf8(String),
    #[error("resource {resource} resolved to an empty value with transformation {transformation}")]
    EmptyValue {
        resource: String,
        transformation: String,
    },
    #[error("failed to hash rules: {0}")]
    Hash(#[from] serde_json::Error),
}

/// The component version rules resolve their sources against
#[derive(Debug, Clone, Copy)]
pub struct SourceScope<'a> {
    pub descriptors: &'a DescriptorSet,
    pub component: &'a str,
    pub version: &'a str,
}

/// Resolve the source of a substitution rule to the value it contributes
pub fn resolve_source_value(
    scope: &SourceScope<'_>,
    rule: &YamlSubstitutionRule,
) -> Result<String, LocalizationError> {
    let reference = rule.source.reference();
    let (resource, _) = resolve_resource(scope.descriptors, scope.component, scope.version, &reference)?;
    let raw = resource.access.image_reference()?;
    let transformation = rule.transformation_type();
    let value = apply_named(transformation, &raw)?;
    if value.is_empty() {
        return Err(LocalizationError::EmptyValue {
            resource: reference.to_string(),
            transformation: transformation.to_string(),
        });
    }
    Ok(value)
}

fn substitute(files: &mut FileSet, target: &FileValueTarget, value: Value) -> Result<(), LocalizationError> {
    let content = files.read(&target.path)?;
    let updated = yaml::substitute(content, &target.value, value).map_err(|source| {
        LocalizationError::Substitution {
            file: target.path.clone(),
            value_path: target.value.clone(),
            source,
        }
    })?;
    debug!(file = %target.path, path = %target.value, "Substituted value");
    files.write(&target.path, updated)?;
    Ok(())
}

fn render_template(files: &mut FileSet, rule: &GoTemplateRule) -> Result<(), LocalizationError> {
    let path = &rule.file.path;
    let content = std::str::from_utf8(files.read(path)?)
        .map_err(|_| LocalizationError::NotUtf8(path.clone()))?;
    let data = rule.data.clone().unwrap_or_default();
    let delimiters = rule.delimiters.clone().unwrap_or_default();
    let rendered = template::render(content, &data, &delimiters).map_err(|source| {
        LocalizationError::Template {
            file: path.clone(),
            source,
        }
    })?;
    debug!(file = %path, "Rendered template");
    files.write(path, rendered.into_bytes())?;
    Ok(())
}

/// Apply localization rules to `files` in order
pub fn localize(
    files: &mut FileSet,
    rules: &[LocalizationRule],
    scope: &SourceScope<'_>,
) -> Result<(), LocalizationError> {
    for rule in rules {
        match rule {
            LocalizationRule::YamlSubstitution(rule) => {
                let value = resolve_source_value(scope, rule)?;
                substitute(files, &rule.target.file, Value::String(value))?;
            }
            LocalizationRule::GoTemplate(rule) => render_template(files, rule)?,
        }
    }
    Ok(())
}

/// Apply configuration rules to `files` in order
pub fn configure(files: &mut FileSet, rules: &[ConfigurationRule]) -> Result<(), LocalizationError> {
    for rule in rules {
        match rule {
            ConfigurationRule::YamlSubstitution(rule) => {
                substitute(files, &rule.target.file, yaml::literal(&rule.source.value))?
            }
            ConfigurationRule::GoTemplate(rule) => render_template(files, rule)?,
        }
    }
    Ok(())
}

/// Localize artifact bytes, returning the new bytes and their media type
pub fn localize_artifact(
    data: &[u8],
    rules: &[LocalizationRule],
    scope: &SourceScope<'_>,
) -> Result<(Vec<u8>, &'static str), LocalizationError> {
    let mut files = FileSet::from_bytes(data)?;
    localize(&mut files, rules, scope)?;
    Ok((files.to_bytes()?, files.media_type()))
}

/// Configure artifact bytes, returning the new bytes and their media type
pub fn configure_artifact(
    data: &[u8],
    rules: &[ConfigurationRule],
) -> Result<(Vec<u8>, &'static str), LocalizationError> {
    let mut files = FileSet::from_bytes(data)?;
    configure(&mut files, rules)?;
    Ok((files.to_bytes()?, files.media_type()))
}

/// Digest identifying a rule list, recorded in status as the config hash
pub fn rules_hash<R: Serialize>(rules: &[R]) -> Result<String, LocalizationError> {
    Ok(sha256_digest(&serde_json::to_vec(rules)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ocm::descriptor::ComponentDescriptor;
    use serde::de::DeserializeOwned;

    const DESCRIPTOR: &str = r#"
meta:
  schemaVersion: v2
component:
  name: example.com/app
  version: 1.0.0
  provider: acme
  resources:
    - name: image
      version: 1.25.0
      type: ociImage
      relation: external
      access:
        type: ociArtifact
        imageReference: docker.io/library/nginx:1.25
    - name: bare
      version: 1.0.0
      type: ociImage
      relation: external
      access:
        type: ociArtifact
        imageReference: nginx
"#;

    fn descriptors() -> DescriptorSet {
        DescriptorSet::new([ComponentDescriptor::from_slice(DESCRIPTOR.as_bytes()).unwrap()])
    }

    /// Decode rules the way the API server hands them over, as JSON
    fn decode_rules<R: DeserializeOwned>(yaml: &str) -> Vec<R> {
        serde_json::from_value(serde_yaml::from_str(yaml).unwrap()).unwrap()
    }

    #[test]
    fn test_template_then_substitution_order() {
        let set = descriptors();
        let scope = SourceScope {
            descriptors: &set,
            component: "example.com/app",
            version: "1.0.0",
        };
        let mut files = FileSet::from_files([("values.yaml", "name: {{ .name }}\n")]).unwrap();
        let rules: Vec<LocalizationRule> = decode_rules(
            r#"
- goTemplate:
    file:
      path: values.yaml
    data:
      name: demo
- yamlsubst:
    source:
      resource:
        name: image
    target:
      file:
        path: values.yaml
        value: image.repository
    transformation:
      type: Repository
"#,
        );
        localize(&mut files, &rules, &scope).unwrap();
        let doc: serde_yaml::Value = serde_yaml::from_slice(files.read("values.yaml").unwrap()).unwrap();
        assert_eq!(doc["name"].as_str(), Some("demo"));
        assert_eq!(doc["image"]["repository"].as_str(), Some("library/nginx"));
    }

    #[test]
    fn test_empty_value_is_rejected() {
        let set = descriptors();
        let scope = SourceScope {
            descriptors: &set,
            component: "example.com/app",
            version: "1.0.0",
        };
        let mut files = FileSet::from_files([("values.yaml", "registry: x\n")]).unwrap();
        let rules: Vec<LocalizationRule> = decode_rules(
            r#"
- yamlsubst:
    source:
      resource: bare
      transformation: Registry
    target:
      file:
        path: values.yaml
        value: registry
"#,
        );
        assert!(matches!(
            localize(&mut files, &rules, &scope),
            Err(LocalizationError::EmptyValue { .. })
        ));
    }

    #[test]
    fn test_configuration_rules() {
        let input = FileSet::from_files([("values.yaml", "replicas: 1\n")])
            .unwrap()
            .to_bytes()
            .unwrap();
        let rules: Vec<ConfigurationRule> = decode_rules(
            r#"
- yamlsubst:
    source:
      value: "3"
    target:
      file:
        path: values.yaml
        value: replicas
- yamlsubst:
    source:
      value: "'3'"
    target:
      file:
        path: values.yaml
        value: label
"#,
        );
        let (output, media_type) = configure_artifact(&input, &rules).unwrap();
        assert_eq!(media_type, crate::constants::TAR_GZIP_MEDIA_TYPE);
        let files = FileSet::from_bytes(&output).unwrap();
        let doc: serde_yaml::Value = serde_yaml::from_slice(files.read("values.yaml").unwrap()).unwrap();
        assert_eq!(doc["replicas"].as_u64(), Some(3));
        assert_eq!(doc["label"].as_str(), Some("3"));
    }

    #[test]
    fn test_missing_target_file() {
        let mut files = FileSet::from_files([("values.yaml", "a: 1\n")]).unwrap();
        let rules: Vec<ConfigurationRule> = decode_rules("- goTemplate:\n    file:\n      path: other.yaml\n");
        assert!(matches!(
            configure(&mut files, &rules),
            Err(LocalizationError::Archive(ArchiveError::FileNotFound(_)))
        ));
    }

    #[test]
    fn test_rules_hash_tracks_content() {
        let a: Vec<ConfigurationRule> =
            decode_rules("- yamlsubst: {source: {value: a}, target: {file: {path: f, value: v}}}");
        let b: Vec<ConfigurationRule> =
            decode_rules("- yamlsubst: {source: {value: b}, target: {file: {path: f, value: v}}}");
        assert_eq!(rules_hash(&a).unwrap(), rules_hash(&a).unwrap());
        assert_ne!(rules_hash(&a).unwrap(), rules_hash(&b).unwrap());
    }
}
