//! # Effective Configuration
//!
//! Resolves the secret/config references, config set, registry credentials
//! and verification keys that apply to an object.
//!
//! References come from the object's own spec when it declares any, and from
//! the default object's status otherwise. The default's status is already
//! effective, so resolution never recurses.

use crate::constants::{DOCKER_CONFIG_KEY, OCM_CONFIG_KEY};
use crate::crd::{ConfigScope, LocalObjectReference, Verification};
use crate::ocm::signing::parse_public_key;
use async_trait::async_trait;
use base64::Engine;
use ed25519_dalek::VerifyingKey;
use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use kube::Api;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use thiserror::Error;
use tracing::debug;

const CREDENTIALS_CONFIG_TYPE: &str = "credentials.config.ocm.software";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to fetch secret {namespace}/{name}: {reason}")]
    SecretFetch {
        namespace: String,
        name: String,
        reason: String,
    },
    #[error("failed to fetch config map {namespace}/{name}: {reason}")]
    ConfigFetch {
        namespace: String,
        name: String,
        reason: String,
    },
    #[error("invalid configuration in {origin}: {reason}")]
    Configure { origin: String, reason: String },
    #[error("config set {0:?} is not defined by any referenced configuration")]
    UnknownConfigSet(String),
    #[error("verification {signature} is invalid: {reason}")]
    Verification { signature: String, reason: String },
}

impl ConfigError {
    /// Fetch failures are transient; everything else needs a spec change
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ConfigError::SecretFetch { .. } | ConfigError::ConfigFetch { .. }
        )
    }
}

/// Read access to the objects configuration is resolved from
#[async_trait]
pub trait ObjectReader: Send + Sync {
    /// `None` when the secret does not exist
    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>, kube::Error>;
    /// `None` when the config map does not exist
    async fn get_config_map(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ConfigMap>, kube::Error>;
}

#[async_trait]
impl ObjectReader for kube::Client {
    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>, kube::Error> {
        Api::<Secret>::namespaced(self.clone(), namespace)
            .get_opt(name)
            .await
    }

    async fn get_config_map(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ConfigMap>, kube::Error> {
        Api::<ConfigMap>::namespaced(self.clone(), namespace)
            .get_opt(name)
            .await
    }
}

/// Object reader backed by maps, keyed by `namespace/name`
#[derive(Debug, Clone, Default)]
pub struct MemoryObjectReader {
    pub secrets: HashMap<String, Secret>,
    pub config_maps: HashMap<String, ConfigMap>,
}

impl MemoryObjectReader {
    pub fn with_secret(mut self, namespace: &str, name: &str, data: &[(&str, &[u8])]) -> Self {
        let mut secret = Secret::default();
        secret.metadata.name = Some(name.to_string());
        secret.metadata.namespace = Some(namespace.to_string());
        secret.data = Some(
            data.iter()
                .map(|(k, v)| (k.to_string(), k8s_openapi::ByteString(v.to_vec())))
                .collect(),
        );
        self.secrets.insert(format!("{namespace}/{name}"), secret);
        self
    }

    pub fn with_config_map(mut self, namespace: &str, name: &str, data: &[(&str, &str)]) -> Self {
        let mut config_map = ConfigMap::default();
        config_map.metadata.name = Some(name.to_string());
        config_map.metadata.namespace = Some(namespace.to_string());
        config_map.data = Some(
            data.iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        );
        self.config_maps
            .insert(format!("{namespace}/{name}"), config_map);
        self
    }
}

#[async_trait]
impl ObjectReader for MemoryObjectReader {
    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>, kube::Error> {
        Ok(self.secrets.get(&format!("{namespace}/{name}")).cloned())
    }

    async fn get_config_map(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ConfigMap>, kube::Error> {
        Ok(self.config_maps.get(&format!("{namespace}/{name}")).cloned())
    }
}

/// Effective references of an object, written to its status
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EffectiveRefs {
    pub secret_refs: Vec<LocalObjectReference>,
    pub config_refs: Vec<LocalObjectReference>,
    pub config_set: Option<String>,
}

/// Compute effective references from the object's spec and its default's status
pub fn effective_refs<O: ConfigScope + ?Sized>(
    object: &O,
    default: Option<&dyn ConfigScope>,
) -> EffectiveRefs {
    let mut secret_refs = object.spec_secret_refs();
    if secret_refs.is_empty() {
        if let Some(default) = default {
            secret_refs = default.effective_secret_refs().to_vec();
        }
    }

    let mut config_refs = object.spec_config_refs();
    if config_refs.is_empty() {
        if let Some(default) = default {
            config_refs = default.effective_config_refs().to_vec();
        }
    }

    let config_set = object
        .spec_config_set()
        .or_else(|| default.and_then(|d| d.effective_config_set()))
        .map(str::to_string);

    EffectiveRefs {
        secret_refs,
        config_refs,
        config_set,
    }
}

/// Credentials for one registry host
#[derive(Clone, PartialEq, Eq)]
pub struct RegistryCredential {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for RegistryCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistryCredential")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Registry credentials keyed by `host[:port]`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    by_host: BTreeMap<String, RegistryCredential>,
}

/// Reduce a registry key such as `https://index.docker.io/v1/` to its host
fn normalize_host(raw: &str) -> String {
    let without_scheme = raw
        .strip_prefix("https://")
        .or_else(|| raw.strip_prefix("http://"))
        .unwrap_or(raw);
    without_scheme
        .split('/')
        .next()
        .unwrap_or(without_scheme)
        .to_ascii_lowercase()
}

impl Credentials {
    pub fn insert(&mut self, host: &str, credential: RegistryCredential) {
        self.by_host.insert(normalize_host(host), credential);
    }

    /// Credentials for `host`, falling back to the host without port
    pub fn for_host(&self, host: &str) -> Option<&RegistryCredential> {
        let host = normalize_host(host);
        self.by_host.get(&host).or_else(|| {
            host.split_once(':')
                .and_then(|(bare, _)| self.by_host.get(bare))
        })
    }

    pub fn is_empty(&self) -> bool {
        self.by_host.is_empty()
    }
}

/// A verification with its resolved public key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedVerification {
    pub signature: String,
    pub key: VerifyingKey,
}

/// Fully resolved configuration of an object
#[derive(Debug, Clone, Default)]
pub struct EffectiveConfig {
    pub refs: EffectiveRefs,
    pub credentials: Credentials,
    pub verifications: Vec<ResolvedVerification>,
}

#[derive(Debug, Default, Deserialize)]
struct OcmConfigDocument {
    #[serde(default)]
    configurations: Vec<serde_json::Value>,
    #[serde(default)]
    sets: BTreeMap<String, OcmConfigSet>,
}

#[derive(Debug, Default, Deserialize)]
struct OcmConfigSet {
    #[serde(default)]
    configurations: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct CredentialsConfig {
    #[serde(default)]
    consumers: Vec<CredentialConsumer>,
}

#[derive(Debug, Deserialize)]
struct CredentialConsumer {
    identity: BTreeMap<String, String>,
    #[serde(default)]
    credentials: Vec<CredentialEntry>,
}

#[derive(Debug, Deserialize)]
struct CredentialEntry {
    #[serde(default)]
    properties: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct DockerConfig {
    #[serde(default)]
    auths: BTreeMap<String, DockerAuth>,
}

#[derive(Debug, Deserialize)]
struct DockerAuth {
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    password: Option<String>,
    #[serde(default)]
    auth: Option<String>,
}

fn parse_docker_config(data: &[u8], origin: &str) -> Result<Credentials, ConfigError> {
    let configure = |reason: String| ConfigError::Configure {
        origin: origin.to_string(),
        reason,
    };
    let config: DockerConfig = serde_json::from_slice(data).map_err(|e| configure(e.to_string()))?;
    let mut credentials = Credentials::default();
    for (host, auth) in config.auths {
        let (username, password) = match (auth.username, auth.password, auth.auth) {
            (Some(username), Some(password), _) => (username, password),
            (_, _, Some(encoded)) => {
                let decoded = base64::engine::general_purpose::STANDARD
                    .decode(encoded.trim())
                    .map_err(|e| configure(format!("auth of {host}: {e}")))?;
                let decoded = String::from_utf8(decoded)
                    .map_err(|e| configure(format!("auth of {host}: {e}")))?;
                let (username, password) = decoded
                    .split_once(':')
                    .ok_or_else(|| configure(format!("auth of {host} is not user:password")))?;
                (username.to_string(), password.to_string())
            }
            _ => continue,
        };
        credentials.insert(&host, RegistryCredential { username, password });
    }
    Ok(credentials)
}

/// Apply the credential configurations of an OCM config document
fn apply_configurations(
    configurations: &[serde_json::Value],
    credentials: &mut Credentials,
    origin: &str,
) -> Result<(), ConfigError> {
    for configuration in configurations {
        let config_type = configuration
            .get("type")
            .and_then(serde_json::Value::as_str)
            .unwrap_or_default();
        if !config_type.starts_with(CREDENTIALS_CONFIG_TYPE) {
            debug!(config_type, origin, "Skipping unsupported OCM configuration");
            continue;
        }
        let parsed: CredentialsConfig =
            serde_json::from_value(configuration.clone()).map_err(|e| ConfigError::Configure {
                origin: origin.to_string(),
                reason: e.to_string(),
            })?;
        for consumer in parsed.consumers {
            let Some(hostname) = consumer.identity.get("hostname") else {
                continue;
            };
            let host = match consumer.identity.get("port") {
                Some(port) => format!("{hostname}:{port}"),
                None => hostname.clone(),
            };
            for entry in consumer.credentials {
                let username = entry.properties.get("username").cloned().unwrap_or_default();
                let password = entry
                    .properties
                    .get("password")
                    .or_else(|| entry.properties.get("token"))
                    .cloned()
                    .unwrap_or_default();
                credentials.insert(&host, RegistryCredential { username, password });
            }
        }
    }
    Ok(())
}

fn parse_ocm_config(data: &[u8], origin: &str) -> Result<OcmConfigDocument, ConfigError> {
    serde_yaml::from_slice(data).map_err(|e| ConfigError::Configure {
        origin: origin.to_string(),
        reason: e.to_string(),
    })
}

fn secret_value(secret: &Secret, key: &str) -> Option<Vec<u8>> {
    secret
        .data
        .as_ref()
        .and_then(|d| d.get(key))
        .map(|v| v.0.clone())
        .or_else(|| {
            secret
                .string_data
                .as_ref()
                .and_then(|d| d.get(key))
                .map(|v| v.clone().into_bytes())
        })
}

async fn fetch_secret(
    reader: &dyn ObjectReader,
    namespace: &str,
    name: &str,
) -> Result<Secret, ConfigError> {
    let fetch_error = |reason: String| ConfigError::SecretFetch {
        namespace: namespace.to_string(),
        name: name.to_string(),
        reason,
    };
    reader
        .get_secret(namespace, name)
        .await
        .map_err(|e| fetch_error(e.to_string()))?
        .ok_or_else(|| fetch_error("not found".to_string()))
}

/// Resolve the effective configuration of an object.
///
/// `verifications` are the object's own verifications; kinds without the
/// capability pass an empty slice.
pub async fn resolve_effective_config<O: ConfigScope + ?Sized>(
    reader: &dyn ObjectReader,
    namespace: &str,
    object: &O,
    default: Option<&dyn ConfigScope>,
    verifications: &[Verification],
) -> Result<EffectiveConfig, ConfigError> {
    let refs = effective_refs(object, default);
    let mut credentials = Credentials::default();
    let mut documents: Vec<(String, OcmConfigDocument)> = Vec::new();
    let mut secrets = Vec::with_capacity(refs.secret_refs.len());

    for reference in &refs.secret_refs {
        let secret = fetch_secret(reader, namespace, &reference.name).await?;
        let origin = format!("secret {namespace}/{}", reference.name);
        if let Some(docker) = secret_value(&secret, DOCKER_CONFIG_KEY) {
            for (host, credential) in parse_docker_config(&docker, &origin)?.by_host {
                credentials.insert(&host, credential);
            }
        }
        if let Some(document) = secret_value(&secret, OCM_CONFIG_KEY) {
            documents.push((origin.clone(), parse_ocm_config(&document, &origin)?));
        }
        secrets.push(secret);
    }

    for reference in &refs.config_refs {
        let fetch_error = |reason: String| ConfigError::ConfigFetch {
            namespace: namespace.to_string(),
            name: reference.name.clone(),
            reason,
        };
        let config_map = reader
            .get_config_map(namespace, &reference.name)
            .await
            .map_err(|e| fetch_error(e.to_string()))?
            .ok_or_else(|| fetch_error("not found".to_string()))?;
        let origin = format!("config map {namespace}/{}", reference.name);
        if let Some(document) = config_map.data.as_ref().and_then(|d| d.get(OCM_CONFIG_KEY)) {
            documents.push((origin.clone(), parse_ocm_config(document.as_bytes(), &origin)?));
        }
    }

    for (origin, document) in &documents {
        apply_configurations(&document.configurations, &mut credentials, origin)?;
    }

    if let Some(set_name) = &refs.config_set {
        let (origin, set) = documents
            .iter()
            .find_map(|(origin, d)| d.sets.get(set_name).map(|s| (origin, s)))
            .ok_or_else(|| ConfigError::UnknownConfigSet(set_name.clone()))?;
        apply_configurations(&set.configurations, &mut credentials, origin)?;
    }

    let mut resolved = Vec::with_capacity(verifications.len());
    for verification in verifications {
        let invalid = |reason: String| ConfigError::Verification {
            signature: verification.signature.clone(),
            reason,
        };
        let key_data = if let Some(value) = &verification.value {
            base64::engine::general_purpose::STANDARD
                .decode(value.trim())
                .map_err(|e| invalid(format!("value is not base64: {e}")))?
        } else if let Some(secret_name) = &verification.secret_ref {
            let secret = fetch_secret(reader, namespace, secret_name).await?;
            secret_value(&secret, &verification.signature).ok_or_else(|| {
                invalid(format!(
                    "secret {namespace}/{secret_name} has no key {}",
                    verification.signature
                ))
            })?
        } else {
            secrets
                .iter()
                .find_map(|s| secret_value(s, &verification.signature))
                .ok_or_else(|| invalid("key not found in any referenced secret".to_string()))?
        };
        let key = parse_public_key(&key_data).map_err(|e| invalid(e.to_string()))?;
        resolved.push(ResolvedVerification {
            signature: verification.signature.clone(),
            key,
        });
    }

    Ok(EffectiveConfig {
        refs,
        credentials,
        verifications: resolved,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_host() {
        assert_eq!(normalize_host("https://index.docker.io/v1/"), "index.docker.io");
        assert_eq!(normalize_host("GHCR.io"), "ghcr.io");
        assert_eq!(normalize_host("localhost:5000"), "localhost:5000");
    }

    #[test]
    fn test_credentials_port_fallback() {
        let mut credentials = Credentials::default();
        credentials.insert(
            "registry.local",
            RegistryCredential {
                username: "u".to_string(),
                password: "p".to_string(),
            },
        );
        assert!(credentials.for_host("registry.local:5000").is_some());
        assert!(credentials.for_host("other.local").is_none());
    }

    #[test]
    fn test_parse_docker_config_auth_field() {
        let auth = base64::engine::general_purpose::STANDARD.encode("bob:secret");
        let data = format!(r#"{{"auths":{{"ghcr.io":{{"auth":"{auth}"}}}}}}"#);
        let credentials = parse_docker_config(data.as_bytes(), "test").unwrap();
        let credential = credentials.for_host("ghcr.io").unwrap();
        assert_eq!(credential.username, "bob");
        assert_eq!(credential.password, "secret");
    }

    #[test]
    fn test_credential_debug_redacts_password() {
        let credential = RegistryCredential {
            username: "bob".to_string(),
            password: "hunter2".to_string(),
        };
        assert!(!format!("{credential:?}").contains("hunter2"));
    }

    #[test]
    fn test_config_error_classification() {
        assert!(ConfigError::SecretFetch {
            namespace: "ns".to_string(),
            name: "s".to_string(),
            reason: "not found".to_string(),
        }
        .is_retryable());
        assert!(!ConfigError::UnknownConfigSet("prod".to_string()).is_retryable());
    }
}
