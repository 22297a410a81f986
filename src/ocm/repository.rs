//! # Component Repositories
//!
//! Access to component versions stored in a repository.
//!
//! OCI registries store a component version as the manifest
//! `<base>/component-descriptors/<component>:<version>` (with `+` in the
//! version written as `.build-`). The descriptor is a layer holding either
//! the YAML document itself or a tar archive containing
//! `component-descriptor.yaml`.

use crate::constants::COMPONENT_DESCRIPTOR_FILE;
use crate::crd::RepositorySpec;
use crate::oci::{sha256_digest, RegistryClient, RegistryError, RegistryOptions};
use crate::ocm::descriptor::{ComponentDescriptor, DescriptorError, DescriptorResource};
use crate::ocm::effective::Credentials;
use crate::ocm::transformation::ImageReference;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::io::Read;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

const BUILD_TAG_SEPARATOR: &str = ".build-";
const GENERIC_BLOB_DIGEST: &str = "genericBlobDigest/v1";

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Descriptor(#[from] DescriptorError),
    #[error("component {0} not found in repository")]
    ComponentNotFound(String),
    #[error("component version {component}:{version} not found in repository")]
    VersionNotFound { component: String, version: String },
    #[error("invalid descriptor layer of {component}:{version}: {reason}")]
    InvalidDescriptorLayer {
        component: String,
        version: String,
        reason: String,
    },
    #[error("unsupported repository type {0:?}")]
    UnsupportedRepository(String),
    #[error("unsupported access type {0:?}")]
    UnsupportedAccess(String),
    #[error("blob {0} not found")]
    BlobNotFound(String),
    #[error("digest of resource {resource} does not match descriptor: expected {expected}, got {actual}")]
    DigestMismatch {
        resource: String,
        expected: String,
        actual: String,
    },
}

impl RepositoryError {
    /// Transport failures and not-yet-published versions are transient
    pub fn is_retryable(&self) -> bool {
        match self {
            RepositoryError::Registry(e) => e.is_retryable(),
            RepositoryError::ComponentNotFound(_) | RepositoryError::VersionNotFound { .. } => true,
            _ => false,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, RepositoryError::Registry(e) if e.is_timeout())
    }
}

/// A repository of component versions
#[async_trait]
pub trait ComponentRepository: Send + Sync {
    /// Raw version strings published for `component`
    async fn list_versions(&self, component: &str) -> Result<Vec<String>, RepositoryError>;

    async fn get_descriptor(
        &self,
        component: &str,
        version: &str,
    ) -> Result<ComponentDescriptor, RepositoryError>;

    /// Raw bytes behind a resource's access specification
    async fn fetch_resource(
        &self,
        owner: &ComponentDescriptor,
        resource: &DescriptorResource,
    ) -> Result<Vec<u8>, RepositoryError>;

    async fn ping(&self) -> Result<(), RepositoryError>;
}

/// Opens repositories for a repository spec and effective configuration
pub trait RepositoryProvider: Send + Sync {
    fn open(
        &self,
        spec: &RepositorySpec,
        credentials: &Credentials,
    ) -> Result<Arc<dyn ComponentRepository>, RepositoryError>;
}

/// Fetch a resource blob and verify it against the declared digest.
///
/// Only generic blob digests describe the fetched bytes; other normalisations
/// (such as OCI manifest digests) are not comparable and are skipped.
pub async fn fetch_blob(
    repository: &dyn ComponentRepository,
    owner: &ComponentDescriptor,
    resource: &DescriptorResource,
) -> Result<(Vec<u8>, String), RepositoryError> {
    let data = repository.fetch_resource(owner, resource).await?;
    let digest = sha256_digest(&data);
    if let Some(declared) = &resource.digest {
        if declared.normalisation_algorithm == GENERIC_BLOB_DIGEST
            && declared.hash_algorithm.eq_ignore_ascii_case("SHA-256")
        {
            let actual = digest.trim_start_matches("sha256:");
            if !declared.value.eq_ignore_ascii_case(actual) {
                return Err(RepositoryError::DigestMismatch {
                    resource: resource.name.clone(),
                    expected: declared.value.clone(),
                    actual: actual.to_string(),
                });
            }
        }
    }
    Ok((data, digest))
}

fn version_to_tag(version: &str) -> String {
    version.replace('+', BUILD_TAG_SEPARATOR)
}

fn tag_to_version(tag: &str) -> String {
    tag.replace(BUILD_TAG_SEPARATOR, "+")
}

/// Split `host/path` into host and path prefix
fn split_base_url(base_url: &str) -> (&str, &str) {
    let trimmed = base_url
        .strip_prefix("https://")
        .or_else(|| base_url.strip_prefix("http://"))
        .unwrap_or(base_url)
        .trim_end_matches('/');
    trimmed.split_once('/').unwrap_or((trimmed, ""))
}

/// Registry host and repository of an image reference, with docker hub defaults
fn image_location(reference: &ImageReference<'_>) -> (String, String) {
    let explicit_registry = reference.registry.contains('.')
        || reference.registry.contains(':')
        || reference.registry == "localhost";
    let (registry, repository) = if explicit_registry {
        (reference.registry.to_string(), reference.repository.to_string())
    } else if reference.registry.is_empty() {
        ("docker.io".to_string(), format!("library/{}", reference.repository))
    } else {
        (
            "docker.io".to_string(),
            format!("{}/{}", reference.registry, reference.repository),
        )
    };
    let host = if registry == "docker.io" {
        "registry-1.docker.io".to_string()
    } else {
        registry
    };
    (host, repository)
}

fn extract_descriptor(
    layer: &[u8],
    component: &str,
    version: &str,
) -> Result<ComponentDescriptor, RepositoryError> {
    let invalid = |reason: String| RepositoryError::InvalidDescriptorLayer {
        component: component.to_string(),
        version: version.to_string(),
        reason,
    };
    // ustar magic at offset 257
    let is_tar = layer.len() > 262 && &layer[257..262] == b"ustar";
    if !is_tar {
        return Ok(ComponentDescriptor::from_slice(layer)?);
    }
    let mut archive = tar::Archive::new(layer);
    for entry in archive.entries().map_err(|e| invalid(e.to_string()))? {
        let mut entry = entry.map_err(|e| invalid(e.to_string()))?;
        let is_descriptor = entry
            .path()
            .map(|p| p.file_name().is_some_and(|n| n == COMPONENT_DESCRIPTOR_FILE))
            .unwrap_or(false);
        if is_descriptor {
            let mut data = Vec::new();
            entry
                .read_to_end(&mut data)
                .map_err(|e| invalid(e.to_string()))?;
            return Ok(ComponentDescriptor::from_slice(&data)?);
        }
    }
    Err(invalid(format!("archive has no {COMPONENT_DESCRIPTOR_FILE}")))
}

/// Component repository in an OCI registry
#[derive(Debug)]
pub struct OciRepository {
    client: RegistryClient,
    prefix: String,
    credentials: Credentials,
    timeout: Duration,
}

impl OciRepository {
    pub fn new(
        spec: &RepositorySpec,
        credentials: &Credentials,
        timeout: Duration,
    ) -> Result<Self, RepositoryError> {
        if spec.r#type != "OCIRegistry" && spec.r#type != "OCIRepository" {
            return Err(RepositoryError::UnsupportedRepository(spec.r#type.clone()));
        }
        let (host, path) = split_base_url(&spec.base_url);
        let prefix = [path, spec.sub_path.as_deref().unwrap_or_default()]
            .iter()
            .map(|p| p.trim_matches('/'))
            .filter(|p| !p.is_empty())
            .collect::<Vec<_>>()
            .join("/");
        let client = RegistryClient::new(
            host,
            RegistryOptions {
                insecure: spec.insecure || spec.base_url.starts_with("http://"),
                root_ca: None,
                credential: credentials.for_host(host).cloned(),
                timeout: Some(timeout),
            },
        )?;
        Ok(Self {
            client,
            prefix,
            credentials: credentials.clone(),
            timeout,
        })
    }

    fn descriptor_repository(&self, component: &str) -> String {
        if self.prefix.is_empty() {
            format!("component-descriptors/{component}")
        } else {
            format!("{}/component-descriptors/{component}", self.prefix)
        }
    }

    async fn fetch_oci_artifact(&self, image_reference: &str) -> Result<Vec<u8>, RepositoryError> {
        let reference = ImageReference::parse(image_reference);
        let (host, repository) = image_location(&reference);
        let client = if host == self.client.host() {
            self.client.clone()
        } else {
            RegistryClient::new(
                &host,
                RegistryOptions {
                    credential: self.credentials.for_host(&host).cloned(),
                    timeout: Some(self.timeout),
                    ..Default::default()
                },
            )?
        };
        let manifest_reference = match (reference.digest, reference.tag) {
            (digest, _) if !digest.is_empty() => digest,
            (_, tag) if !tag.is_empty() => tag,
            _ => "latest",
        };
        let (manifest, _) = client.get_manifest(&repository, manifest_reference).await?;
        let layer = manifest
            .layers
            .first()
            .ok_or_else(|| RepositoryError::BlobNotFound(image_reference.to_string()))?;
        Ok(client.get_blob(&repository, &layer.digest).await?)
    }
}

#[async_trait]
impl ComponentRepository for OciRepository {
    async fn list_versions(&self, component: &str) -> Result<Vec<String>, RepositoryError> {
        match self
            .client
            .list_tags(&self.descriptor_repository(component))
            .await
        {
            Ok(tags) => Ok(tags.iter().map(|t| tag_to_version(t)).collect()),
            Err(RegistryError::NotFound { .. }) => {
                Err(RepositoryError::ComponentNotFound(component.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn get_descriptor(
        &self,
        component: &str,
        version: &str,
    ) -> Result<ComponentDescriptor, RepositoryError> {
        let repository = self.descriptor_repository(component);
        let (manifest, _) = match self
            .client
            .get_manifest(&repository, &version_to_tag(version))
            .await
        {
            Ok(found) => found,
            Err(RegistryError::NotFound { .. }) => {
                return Err(RepositoryError::VersionNotFound {
                    component: component.to_string(),
                    version: version.to_string(),
                })
            }
            Err(e) => return Err(e.into()),
        };
        let layer = manifest
            .layers
            .iter()
            .find(|l| l.media_type.contains("component-descriptor"))
            .or_else(|| manifest.layers.first())
            .ok_or_else(|| RepositoryError::InvalidDescriptorLayer {
                component: component.to_string(),
                version: version.to_string(),
                reason: "manifest has no layers".to_string(),
            })?;
        debug!(component, version, media_type = %layer.media_type, "Fetching descriptor layer");
        let data = self.client.get_blob(&repository, &layer.digest).await?;
        extract_descriptor(&data, component, version)
    }

    async fn fetch_resource(
        &self,
        owner: &ComponentDescriptor,
        resource: &DescriptorResource,
    ) -> Result<Vec<u8>, RepositoryError> {
        match resource.access.base_type() {
            "localBlob" => {
                let digest = resource
                    .access
                    .local_reference()
                    .ok_or_else(|| RepositoryError::BlobNotFound(resource.name.clone()))?;
                Ok(self
                    .client
                    .get_blob(&self.descriptor_repository(owner.name()), digest)
                    .await?)
            }
            "ociArtifact" | "ociRegistry" | "ociImage" => {
                let image_reference = resource.access.image_reference()?;
                self.fetch_oci_artifact(&image_reference).await
            }
            other => Err(RepositoryError::UnsupportedAccess(other.to_string())),
        }
    }

    async fn ping(&self) -> Result<(), RepositoryError> {
        Ok(self.client.ping().await?)
    }
}

/// Opens OCI registry repositories
#[derive(Debug, Clone)]
pub struct OciRepositoryProvider {
    pub timeout: Duration,
}

impl RepositoryProvider for OciRepositoryProvider {
    fn open(
        &self,
        spec: &RepositorySpec,
        credentials: &Credentials,
    ) -> Result<Arc<dyn ComponentRepository>, RepositoryError> {
        Ok(Arc::new(OciRepository::new(spec, credentials, self.timeout)?))
    }
}

/// Repository held in memory, keyed by (component, version)
#[derive(Debug, Clone, Default)]
pub struct InMemoryRepository {
    descriptors: BTreeMap<(String, String), ComponentDescriptor>,
    /// Blobs keyed by local reference digest or image reference
    blobs: HashMap<String, Vec<u8>>,
    unavailable: bool,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_descriptor(mut self, descriptor: ComponentDescriptor) -> Self {
        self.descriptors.insert(
            (descriptor.name().to_string(), descriptor.version().to_string()),
            descriptor,
        );
        self
    }

    #[must_use]
    pub fn with_blob(mut self, key: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        self.blobs.insert(key.into(), data.into());
        self
    }

    /// Make `ping` fail
    #[must_use]
    pub fn unavailable(mut self) -> Self {
        self.unavailable = true;
        self
    }
}

#[async_trait]
impl ComponentRepository for InMemoryRepository {
    async fn list_versions(&self, component: &str) -> Result<Vec<String>, RepositoryError> {
        let versions: Vec<String> = self
            .descriptors
            .keys()
            .filter(|(name, _)| name == component)
            .map(|(_, version)| version.clone())
            .collect();
        if versions.is_empty() {
            return Err(RepositoryError::ComponentNotFound(component.to_string()));
        }
        Ok(versions)
    }

    async fn get_descriptor(
        &self,
        component: &str,
        version: &str,
    ) -> Result<ComponentDescriptor, RepositoryError> {
        self.descriptors
            .get(&(component.to_string(), version.to_string()))
            .cloned()
            .ok_or_else(|| RepositoryError::VersionNotFound {
                component: component.to_string(),
                version: version.to_string(),
            })
    }

    async fn fetch_resource(
        &self,
        _owner: &ComponentDescriptor,
        resource: &DescriptorResource,
    ) -> Result<Vec<u8>, RepositoryError> {
        let key = match resource.access.base_type() {
            "localBlob" => resource
                .access
                .local_reference()
                .map(str::to_string)
                .ok_or_else(|| RepositoryError::BlobNotFound(resource.name.clone()))?,
            "ociArtifact" | "ociRegistry" | "ociImage" => resource.access.image_reference()?,
            other => return Err(RepositoryError::UnsupportedAccess(other.to_string())),
        };
        self.blobs
            .get(&key)
            .cloned()
            .ok_or(RepositoryError::BlobNotFound(key))
    }

    async fn ping(&self) -> Result<(), RepositoryError> {
        if self.unavailable {
            return Err(RepositoryError::ComponentNotFound(
                "repository unavailable".to_string(),
            ));
        }
        Ok(())
    }
}

/// Provider handing out one shared repository regardless of spec
#[derive(Clone)]
pub struct StaticRepositoryProvider(pub Arc<dyn ComponentRepository>);

impl std::fmt::Debug for StaticRepositoryProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("StaticRepositoryProvider")
    }
}

impl RepositoryProvider for StaticRepositoryProvider {
    fn open(
        &self,
        _spec: &RepositorySpec,
        _credentials: &Credentials,
    ) -> Result<Arc<dyn ComponentRepository>, RepositoryError> {
        Ok(Arc::clone(&self.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ocm::descriptor::{AccessSpec, DescriptorComponent, DigestSpec, Meta, Relation};

    fn descriptor_with_blob(digest: Option<DigestSpec>) -> (ComponentDescriptor, DescriptorResource) {
        let resource = DescriptorResource {
            name: "manifests".to_string(),
            version: Some("1.0.0".to_string()),
            r#type: "blob".to_string(),
            relation: Relation::Local,
            access: AccessSpec {
                r#type: "localBlob".to_string(),
                attributes: serde_json::json!({"localReference": "sha256:blob"})
                    .as_object()
                    .cloned()
                    .unwrap(),
            },
            digest,
            extra_identity: BTreeMap::new(),
            labels: Vec::new(),
        };
        let descriptor = ComponentDescriptor {
            meta: Meta::default(),
            component: DescriptorComponent {
                name: "acme.org/app".to_string(),
                version: "1.0.0".to_string(),
                resources: vec![resource.clone()],
                ..Default::default()
            },
            signatures: Vec::new(),
        };
        (descriptor, resource)
    }

    #[test]
    fn test_version_tag_mapping() {
        assert_eq!(version_to_tag("1.0.0+build.5"), "1.0.0.build-build.5");
        assert_eq!(tag_to_version("1.0.0.build-build.5"), "1.0.0+build.5");
    }

    #[test]
    fn test_split_base_url() {
        assert_eq!(split_base_url("ghcr.io/acme/"), ("ghcr.io", "acme"));
        assert_eq!(split_base_url("https://localhost:5000"), ("localhost:5000", ""));
    }

    #[test]
    fn test_image_location_defaults() {
        let nginx = ImageReference::parse("nginx:1.25");
        assert_eq!(
            image_location(&nginx),
            ("registry-1.docker.io".to_string(), "library/nginx".to_string())
        );
        let ghcr = ImageReference::parse("ghcr.io/acme/app:1.0");
        assert_eq!(
            image_location(&ghcr),
            ("ghcr.io".to_string(), "acme/app".to_string())
        );
    }

    #[test]
    fn test_extract_descriptor_from_yaml_and_tar() {
        let yaml = b"meta:\n  schemaVersion: v2\ncomponent:\n  name: acme.org/app\n  version: 1.0.0\n";
        let plain = extract_descriptor(yaml, "acme.org/app", "1.0.0").unwrap();
        assert_eq!(plain.name(), "acme.org/app");

        let mut builder = tar::Builder::new(Vec::new());
        let mut header = tar::Header::new_ustar();
        header.set_size(yaml.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder
            .append_data(&mut header, COMPONENT_DESCRIPTOR_FILE, &yaml[..])
            .unwrap();
        let archive = builder.into_inner().unwrap();
        let from_tar = extract_descriptor(&archive, "acme.org/app", "1.0.0").unwrap();
        assert_eq!(from_tar, plain);
    }

    #[tokio::test]
    async fn test_fetch_blob_verifies_generic_digest() {
        let data = b"kind: ConfigMap\n".to_vec();
        let good = DigestSpec {
            hash_algorithm: "SHA-256".to_string(),
            normalisation_algorithm: GENERIC_BLOB_DIGEST.to_string(),
            value: sha256_digest(&data).trim_start_matches("sha256:").to_string(),
        };
        let (descriptor, resource) = descriptor_with_blob(Some(good));
        let repository = InMemoryRepository::new().with_blob("sha256:blob", data.clone());
        let (fetched, digest) = fetch_blob(&repository, &descriptor, &resource).await.unwrap();
        assert_eq!(fetched, data);
        assert_eq!(digest, sha256_digest(&data));

        let bad = DigestSpec {
            value: "00".repeat(32),
            ..resource.digest.clone().unwrap()
        };
        let (descriptor, resource) = descriptor_with_blob(Some(bad));
        let err = fetch_blob(&repository, &descriptor, &resource)
            .await
            .unwrap_err();
        assert!(matches!(err, RepositoryError::DigestMismatch { .. }));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_in_memory_repository_lists_versions() {
        let (descriptor, _) = descriptor_with_blob(None);
        let repository = InMemoryRepository::new().with_descriptor(descriptor);
        assert_eq!(
            repository.list_versions("acme.org/app").await.unwrap(),
            vec!["1.0.0".to_string()]
        );
        assert!(matches!(
            repository.list_versions("acme.org/other").await,
            Err(RepositoryError::ComponentNotFound(_))
        ));
    }
}
