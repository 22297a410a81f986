//! # Effective Configuration Tests
//!
//! Secret and config references flow down the chain: an object's own
//! references win, otherwise it inherits the effective references its
//! upstream recorded in status.

use base64::Engine;
use ocm_controller::controller::error::Retryable;
use ocm_controller::crd::{
    Component, ComponentSpec, LocalObjectReference, OCMRepository, OCMRepositorySpec,
    OCMRepositoryStatus, RepositorySpec, Verification,
};
use ocm_controller::ocm::effective::{effective_refs, MemoryObjectReader};
use ocm_controller::ocm::{resolve_effective_config, ConfigError};

const OCM_CONFIG: &str = r#"
type: generic.config.ocm.software/v1
configurations:
  - type: credentials.config.ocm.software
    consumers:
      - identity:
          type: OCIRegistry
          hostname: ghcr.io
        credentials:
          - type: Credentials
            properties:
              username: robot
              password: base
sets:
  staging:
    configurations:
      - type: credentials.config.ocm.software
        consumers:
          - identity:
              type: OCIRegistry
              hostname: ghcr.io
            credentials:
              - type: Credentials
                properties:
                  username: robot
                  token: staging
"#;

fn repository(effective_secrets: &[&str]) -> OCMRepository {
    let mut repository = OCMRepository::new(
        "acme",
        OCMRepositorySpec {
            repository_spec: RepositorySpec::oci("ghcr.io/acme"),
            secret_ref: None,
            secret_refs: Vec::new(),
            config_ref: None,
            config_refs: Vec::new(),
            config_set: None,
            interval: "10m".to_string(),
            suspend: false,
        },
    );
    repository.status = Some(OCMRepositoryStatus {
        secret_refs: effective_secrets
            .iter()
            .map(|name| LocalObjectReference::new(*name))
            .collect(),
        config_set: Some("staging".to_string()),
        ..OCMRepositoryStatus::default()
    });
    repository
}

fn component(secret_ref: Option<&str>) -> Component {
    Component::new(
        "app",
        ComponentSpec {
            repository_ref: LocalObjectReference::new("acme"),
            component: "acme.org/app".to_string(),
            enforce_downgradability: false,
            semver: ">=1.0.0".to_string(),
            semver_filter: None,
            verify: Vec::new(),
            secret_ref: secret_ref.map(LocalObjectReference::new),
            secret_refs: Vec::new(),
            config_ref: None,
            config_refs: Vec::new(),
            config_set: None,
            interval: "10m".to_string(),
            suspend: false,
        },
    )
}

fn names(refs: &[LocalObjectReference]) -> Vec<&str> {
    refs.iter().map(|r| r.name.as_str()).collect()
}

#[test]
fn test_own_references_win() {
    let upstream = repository(&["registry-creds"]);
    let refs = effective_refs(&component(Some("own-creds")), Some(&upstream));
    assert_eq!(names(&refs.secret_refs), ["own-creds"]);
}

#[test]
fn test_references_inherited_from_upstream_status() {
    let upstream = repository(&["registry-creds"]);
    let refs = effective_refs(&component(None), Some(&upstream));
    assert_eq!(names(&refs.secret_refs), ["registry-creds"]);
    assert_eq!(refs.config_set.as_deref(), Some("staging"));
    assert!(refs.config_refs.is_empty());
}

#[test]
fn test_no_upstream_means_no_references() {
    let refs = effective_refs(&component(None), None);
    assert!(refs.secret_refs.is_empty());
    assert_eq!(refs.config_set, None);
}

#[tokio::test]
async fn test_config_set_overrides_base_credentials() {
    let reader = MemoryObjectReader::default()
        .with_secret("apps", "registry-creds", &[(".ocmconfig", OCM_CONFIG.as_bytes())]);
    let upstream = repository(&["registry-creds"]);
    let config = resolve_effective_config(&reader, "apps", &component(None), Some(&upstream), &[])
        .await
        .unwrap();
    let credential = config.credentials.for_host("ghcr.io").unwrap();
    assert_eq!(credential.username, "robot");
    assert_eq!(credential.password, "staging");
}

#[tokio::test]
async fn test_docker_config_credentials() {
    let docker = r#"{"auths":{"registry.local:5000":{"username":"ci","password":"pw"}}}"#;
    let reader = MemoryObjectReader::default()
        .with_secret("apps", "pull", &[(".dockerconfigjson", docker.as_bytes())]);
    let config = resolve_effective_config(&reader, "apps", &component(Some("pull")), None, &[])
        .await
        .unwrap();
    assert_eq!(config.credentials.for_host("registry.local:5000").unwrap().password, "pw");
    assert!(config.credentials.for_host("ghcr.io").is_none());
}

#[tokio::test]
async fn test_missing_secret_is_retryable() {
    let reader = MemoryObjectReader::default();
    let error = resolve_effective_config(&reader, "apps", &component(Some("absent")), None, &[])
        .await
        .unwrap_err();
    assert!(matches!(error, ConfigError::SecretFetch { .. }));
    assert!(Retryable::is_retryable(&error));
}

#[tokio::test]
async fn test_unknown_config_set_is_not_retryable() {
    let reader = MemoryObjectReader::default()
        .with_config_map("apps", "ocm", &[(".ocmconfig", "configurations: []\n")]);
    let mut object = component(None);
    object.spec.config_refs = vec![LocalObjectReference::new("ocm")];
    object.spec.config_set = Some("production".to_string());
    let error = resolve_effective_config(&reader, "apps", &object, None, &[])
        .await
        .unwrap_err();
    assert!(matches!(error, ConfigError::UnknownConfigSet(ref set) if set == "production"));
    assert!(!Retryable::is_retryable(&error));
}

#[tokio::test]
async fn test_verification_keys_resolved_from_value_and_secret() {
    let key = ed25519_dalek::SigningKey::from_bytes(&[7; 32])
        .verifying_key()
        .to_bytes();
    let encoded = base64::engine::general_purpose::STANDARD.encode(key);
    let reader = MemoryObjectReader::default().with_secret("apps", "keys", &[("acme", &key[..])]);
    let verifications = [
        Verification {
            signature: "inline".to_string(),
            secret_ref: None,
            value: Some(encoded),
        },
        Verification {
            signature: "acme".to_string(),
            secret_ref: Some("keys".to_string()),
            value: None,
        },
    ];
    let config = resolve_effective_config(&reader, "apps", &component(None), None, &verifications)
        .await
        .unwrap();
    let signatures: Vec<&str> = config
        .verifications
        .iter()
        .map(|v| v.signature.as_str())
        .collect();
    assert_eq!(signatures, ["inline", "acme"]);
    assert_eq!(config.verifications[0].key.to_bytes(), key);
}

#[tokio::test]
async fn test_verification_without_key_fails() {
    let reader = MemoryObjectReader::default();
    let verifications = [Verification {
        signature: "acme".to_string(),
        secret_ref: None,
        value: None,
    }];
    let error = resolve_effective_config(&reader, "apps", &component(None), None, &verifications)
        .await
        .unwrap_err();
    assert!(matches!(error, ConfigError::Verification { .. }));
}
