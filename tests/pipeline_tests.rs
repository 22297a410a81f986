//! # Pipeline Tests
//!
//! Drives one component version through every stage without a cluster:
//! version selection, descriptor set storage, resource lookup and fetch,
//! localization, configuration and manifest parsing.

mod common;

use common::{repository, COMPONENT};
use ocm_controller::artifact::{ArtifactStore, FileSet, MemoryArtifactStore};
use ocm_controller::constants::{DESCRIPTOR_SET_MEDIA_TYPE, TAR_GZIP_MEDIA_TYPE};
use ocm_controller::controller::stages::component::{resolve_component, ComponentRequest};
use ocm_controller::controller::stages::deployer::parse_manifests;
use ocm_controller::controller::stages::resource::locate;
use ocm_controller::crd::{
    ComponentInfo, ConfigurationRule, LocalizationRule, RepositorySpec, ResourceReference,
};
use ocm_controller::localization::{configure_artifact, localize_artifact, SourceScope};
use ocm_controller::oci::sha256_digest;
use ocm_controller::ocm::repository::fetch_blob;
use ocm_controller::ocm::DescriptorSet;
use kube::ResourceExt;
use serde::de::DeserializeOwned;

const LOCALIZATION: &str = r#"
- yamlsubst:
    source:
      resource:
        name: image
    target:
      file:
        path: values.yaml
        value: registry
    transformation:
      type: Registry
- yamlsubst:
    source:
      resource: image
      transformation: Tag
    target:
      file:
        path: values.yaml
        value: image.tag
- yamlsubst:
    source:
      resource: image
    target:
      file:
        path: deploy/deployment.yaml
        value: spec.template.spec.containers.0.image
- goTemplate:
    file:
      path: deploy/settings.yaml
    delimiters:
      left: "[["
      right: "]]"
    data:
      greeting: hello
"#;

const CONFIGURATION: &str = r#"
- yamlsubst:
    source:
      value: 3
    target:
      file:
        path: deploy/deployment.yaml
        value: spec.replicas
"#;

/// Decode a rule list the way the API server delivers it, as JSON
fn decode_rules<R: DeserializeOwned>(yaml: &str) -> Vec<R> {
    serde_json::from_value(serde_yaml::from_str(yaml).unwrap()).unwrap()
}

fn yaml(files: &FileSet, path: &str) -> serde_yaml::Value {
    serde_yaml::from_slice(files.read(path).unwrap()).unwrap()
}

#[tokio::test]
async fn test_component_to_deployable_manifests() {
    let repository = repository();
    let resolved = resolve_component(
        &repository,
        &ComponentRequest {
            component: COMPONENT,
            semver: ">=1.0.0 <2.0.0",
            semver_filter: None,
            previous: None,
            enforce_downgradability: false,
            verifications: &[],
        },
    )
    .await
    .unwrap();
    assert_eq!(resolved.version, "1.5.0");
    assert_eq!(resolved.descriptors.len(), 2);

    let store = MemoryArtifactStore::new();
    let set_artifact = store
        .put(&resolved.descriptors.to_yaml().unwrap(), DESCRIPTOR_SET_MEDIA_TYPE)
        .await
        .unwrap();
    let descriptors = DescriptorSet::from_yaml(&store.get(&set_artifact.digest).await.unwrap()).unwrap();

    let info = ComponentInfo {
        repository_spec: RepositorySpec::oci("ghcr.io/acme"),
        component: COMPONENT.to_string(),
        version: resolved.version.clone(),
    };
    let (resource, owner) = locate(&descriptors, &info, &ResourceReference::by_name("manifests")).unwrap();
    assert_eq!(owner.version(), "1.5.0");
    let (data, digest) = fetch_blob(&repository, owner, resource).await.unwrap();
    assert_eq!(digest, sha256_digest(&data));

    let scope = SourceScope {
        descriptors: &descriptors,
        component: COMPONENT,
        version: &resolved.version,
    };
    let rules: Vec<LocalizationRule> = decode_rules(LOCALIZATION);
    let (localized, media_type) = localize_artifact(&data, &rules, &scope).unwrap();
    assert_eq!(media_type, TAR_GZIP_MEDIA_TYPE);

    let files = FileSet::from_bytes(&localized).unwrap();
    let values = yaml(&files, "values.yaml");
    assert_eq!(values["registry"].as_str(), Some("docker.io"));
    assert_eq!(values["image"]["tag"].as_str(), Some("1.25"));
    let settings = yaml(&files, "deploy/settings.yaml");
    assert_eq!(settings["data"]["greeting"].as_str(), Some("hello"));
    assert_eq!(settings["data"]["braces"].as_str(), Some("{{ untouched }}"));

    let rules: Vec<ConfigurationRule> = decode_rules(CONFIGURATION);
    let (configured, _) = configure_artifact(&localized, &rules).unwrap();

    let objects = parse_manifests(&configured).unwrap();
    let names: Vec<String> = objects.iter().map(|o| o.name_any()).collect();
    assert_eq!(names, ["web", "web-settings"]);
    let deployment = &objects[0].data;
    assert_eq!(deployment["spec"]["replicas"], 3);
    assert_eq!(
        deployment["spec"]["template"]["spec"]["containers"][0]["image"],
        "docker.io/library/nginx:1.25"
    );
}

#[tokio::test]
async fn test_localization_is_deterministic() {
    let repository = repository();
    let descriptors = DescriptorSet::new([common::app_descriptor("1.0.0"), common::backend_descriptor()]);
    let scope = SourceScope {
        descriptors: &descriptors,
        component: COMPONENT,
        version: "1.0.0",
    };
    let owner = descriptors.lookup(COMPONENT, "1.0.0").unwrap();
    let resource = &owner.component.resources[0];
    let (data, _) = fetch_blob(&repository, owner, resource).await.unwrap();

    let rules: Vec<LocalizationRule> = decode_rules(LOCALIZATION);
    let (first, _) = localize_artifact(&data, &rules, &scope).unwrap();
    let (second, _) = localize_artifact(&data, &rules, &scope).unwrap();
    assert_eq!(first, second);
    assert_ne!(first, data);
}

#[test]
fn test_localization_through_reference_path() {
    let descriptors = DescriptorSet::new([common::app_descriptor("1.0.0"), common::backend_descriptor()]);
    let scope = SourceScope {
        descriptors: &descriptors,
        component: COMPONENT,
        version: "1.0.0",
    };
    let rules: Vec<LocalizationRule> = decode_rules(
        r#"
- yamlsubst:
    source:
      resource: image
      referencePath:
        - name: backend
    target:
      file:
        path: values.yaml
        value: backend.repository
    transformation:
      type: Repository
"#,
    );
    let input = FileSet::raw(common::VALUES.as_bytes().to_vec()).to_bytes().unwrap();
    let (output, _) = localize_artifact(&input, &rules, &scope).unwrap();
    let values: serde_yaml::Value = serde_yaml::from_slice(&output).unwrap();
    assert_eq!(values["backend"]["repository"].as_str(), Some("acme/backend"));
    assert_eq!(values["registry"].as_str(), Some("placeholder"));
}
