//! # OCMDeployer Stage
//!
//! Reads the manifests in an artifact (every `*.yaml`/`*.yml` file of an
//! archive, or a raw blob) and applies them with server-side apply. Objects
//! applied by a previous run but missing from the current artifact are
//! deleted. Namespaced objects are owned by the deployer.

use crate::artifact::{ArchiveError, ArchiveFormat, FileSet};
use crate::constants::FIELD_MANAGER;
use crate::controller::context::Context;
use crate::controller::error::{reasons, ReasonExt, ReconcileError, Retryable};
use crate::controller::stages::{namespace_of, ArtifactSource};
use crate::controller::state_machine::{interval_of, Stage, StageOutcome};
use crate::crd::{DeployedObjectReference, OCMDeployer, OCMDeployerStatus};
use crate::observability;
use async_trait::async_trait;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::api::{DeleteParams, DynamicObject, Patch, PatchParams};
use kube::core::GroupVersionKind;
use kube::discovery::{pinned_kind, Scope};
use kube::{Api, Client, Resource, ResourceExt};
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error(transparent)]
    Archive(#[from] ArchiveError),
    #[error("failed to parse manifests in {file}: {source}")]
    Yaml {
        file: String,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("invalid manifest in {file}: {reason}")]
    Invalid { file: String, reason: String },
}

impl Retryable for ManifestError {
    fn is_retryable(&self) -> bool {
        false
    }
}

fn is_manifest_file(path: &str) -> bool {
    path.ends_with(".yaml") || path.ends_with(".yml")
}

fn display_path(path: &str) -> &str {
    if path.is_empty() {
        "<blob>"
    } else {
        path
    }
}

/// Parse one multi-document YAML file into objects, skipping empty documents
fn parse_documents(file: &str, content: &[u8]) -> Result<Vec<DynamicObject>, ManifestError> {
    let invalid = |reason: String| ManifestError::Invalid {
        file: file.to_string(),
        reason,
    };
    let mut objects = Vec::new();
    for document in serde_yaml::Deserializer::from_slice(content) {
        let value = serde_yaml::Value::deserialize(document).map_err(|source| ManifestError::Yaml {
            file: file.to_string(),
            source,
        })?;
        if value.is_null() {
            continue;
        }
        let json = serde_json::to_value(&value).map_err(|e| invalid(e.to_string()))?;
        for field in ["apiVersion", "kind"] {
            if !json.get(field).is_some_and(serde_json::Value::is_string) {
                return Err(invalid(format!("document without {field}")));
            }
        }
        if !json
            .pointer("/metadata/name")
            .is_some_and(serde_json::Value::is_string)
        {
            return Err(invalid("document without metadata.name".to_string()));
        }
        let object: DynamicObject = serde_json::from_value(json).map_err(|e| invalid(e.to_string()))?;
        objects.push(object);
    }
    Ok(objects)
}

/// Objects contained in artifact bytes, in path order
pub fn parse_manifests(data: &[u8]) -> Result<Vec<DynamicObject>, ManifestError> {
    let files = FileSet::from_bytes(data)?;
    let raw = files.format() == ArchiveFormat::Raw;
    let mut objects = Vec::new();
    for path in files.paths() {
        if !raw && !is_manifest_file(path) {
            debug!(path, "Skipping non-manifest file");
            continue;
        }
        objects.extend(parse_documents(display_path(path), files.read(path)?)?);
    }
    Ok(objects)
}

/// Split `apiVersion` into group and version
fn group_version_kind(api_version: &str, kind: &str) -> GroupVersionKind {
    let (group, version) = api_version.split_once('/').unwrap_or(("", api_version));
    GroupVersionKind::gvk(group, version, kind)
}

fn object_reference(object: &DynamicObject, namespace: Option<String>) -> DeployedObjectReference {
    let types = object.types.clone().unwrap_or_default();
    DeployedObjectReference {
        api_version: types.api_version,
        kind: types.kind,
        name: object.name_any(),
        namespace,
    }
}

/// Previously deployed objects absent from the current set
pub fn removed_objects<'a>(
    previous: &'a [DeployedObjectReference],
    current: &[DeployedObjectReference],
) -> Vec<&'a DeployedObjectReference> {
    previous.iter().filter(|p| !current.contains(p)).collect()
}

/// Dynamic API for a deployed object; namespace is `None` for cluster-scoped kinds
async fn dynamic_api(
    client: &Client,
    api_version: &str,
    kind: &str,
    namespace: Option<&str>,
) -> Result<(Api<DynamicObject>, bool), ReconcileError> {
    let gvk = group_version_kind(api_version, kind);
    let (resource, capabilities) = pinned_kind(client, &gvk)
        .await
        .reason(reasons::APPLY_FAILED)?;
    let namespaced = matches!(capabilities.scope, Scope::Namespaced);
    let api = match (namespaced, namespace) {
        (true, Some(namespace)) => Api::namespaced_with(client.clone(), namespace, &resource),
        (true, None) => {
            return Err(ReconcileError::non_retryable(
                reasons::APPLY_FAILED,
                format!("{kind} is namespaced but no namespace is known"),
            ))
        }
        (false, _) => Api::all_with(client.clone(), &resource),
    };
    Ok((api, namespaced))
}

async fn apply_object(
    client: &Client,
    mut object: DynamicObject,
    owner: &OwnerReference,
    default_namespace: &str,
) -> Result<DeployedObjectReference, ReconcileError> {
    let types = object.types.clone().unwrap_or_default();
    let namespace = object
        .metadata
        .namespace
        .clone()
        .unwrap_or_else(|| default_namespace.to_string());
    let (api, namespaced) = dynamic_api(client, &types.api_version, &types.kind, Some(&namespace)).await?;

    if namespaced {
        object.metadata.namespace = Some(namespace.clone());
        if namespace == default_namespace {
            object.metadata.owner_references = Some(vec![owner.clone()]);
        }
    } else {
        object.metadata.namespace = None;
    }

    let name = object.name_any();
    api.patch(&name, &PatchParams::apply(FIELD_MANAGER).force(), &Patch::Apply(&object))
        .await
        .reason(reasons::APPLY_FAILED)?;
    debug!(kind = %types.kind, name = %name, "Applied object");
    Ok(object_reference(&object, namespaced.then_some(namespace)))
}

async fn delete_object(client: &Client, reference: &DeployedObjectReference) -> Result<(), ReconcileError> {
    let (api, _) = dynamic_api(
        client,
        &reference.api_version,
        &reference.kind,
        reference.namespace.as_deref(),
    )
    .await?;
    match api.delete(&reference.name, &DeleteParams::default()).await {
        Ok(_) => {
            info!(kind = %reference.kind, name = %reference.name, "Deleted object");
            Ok(())
        }
        Err(kube::Error::Api(response)) if response.code == 404 => Ok(()),
        Err(e) => Err(e.classify(reasons::DELETION_FAILED)),
    }
}

impl OCMDeployer {
    fn deployed(&self) -> &[DeployedObjectReference] {
        self.status.as_ref().map_or(&[][..], |s| s.deployed.as_slice())
    }
}

#[async_trait]
impl Stage for OCMDeployer {
    async fn run(&self, ctx: &Context) -> Result<StageOutcome, ReconcileError> {
        let namespace = namespace_of(self)?;
        let source = ArtifactSource::fetch_ready(ctx, &namespace, &self.spec.resource_ref).await?;
        let artifact = source.artifact()?;
        let owner = self.controller_owner_ref(&()).ok_or_else(|| {
            ReconcileError::non_retryable(reasons::APPLY_FAILED, "deployer has no uid")
        })?;

        let data = ctx
            .store
            .get(&artifact.digest)
            .await
            .reason(reasons::GET_BLOB_FAILED)?;
        let objects = parse_manifests(&data).reason(reasons::APPLY_FAILED)?;

        let mut deployed = Vec::with_capacity(objects.len());
        for object in objects {
            deployed.push(apply_object(&ctx.client, object, &owner, &namespace).await?);
        }
        observability::increment_objects_applied(deployed.len() as u64);

        for stale in removed_objects(self.deployed(), &deployed) {
            if let Err(e) = delete_object(&ctx.client, stale).await {
                warn!(kind = %stale.kind, name = %stale.name, error = %e, "Failed to prune object");
                return Err(e);
            }
        }

        info!(
            objects = deployed.len(),
            source = %source.name(),
            digest = %artifact.digest,
            "Applied manifests"
        );
        let requeue = interval_of(self)?.min(source.interval()?);
        let count = deployed.len();
        let status = OCMDeployerStatus {
            applied_digest: Some(artifact.digest.clone()),
            deployed,
            ..OCMDeployerStatus::default()
        };
        Ok(StageOutcome::new(&status, format!("Applied {count} objects"))?.requeue_after(requeue))
    }

    async fn finalize(&self, ctx: &Context) -> Result<(), ReconcileError> {
        for reference in self.deployed() {
            delete_object(&ctx.client, reference).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MANIFESTS: &str = r#"
apiVersion: v1
kind: ConfigMap
metadata:
  name: settings
data:
  mode: production
---
---
apiVersion: apps/v1
kind: Deployment
metadata:
  name: podinfo
  namespace: apps
spec:
  replicas: 2
"#;

    #[test]
    fn test_parse_raw_multi_document() {
        let objects = parse_manifests(MANIFESTS.as_bytes()).unwrap();
        assert_eq!(objects.len(), 2);
        assert_eq!(objects[0].name_any(), "settings");
        assert_eq!(objects[0].data["data"]["mode"], "production");
        assert_eq!(objects[1].metadata.namespace.as_deref(), Some("apps"));
        assert_eq!(
            objects[1].types.as_ref().map(|t| t.kind.as_str()),
            Some("Deployment")
        );
    }

    #[test]
    fn test_parse_archive_skips_other_files() {
        let archive = FileSet::from_files([
            ("deploy/app.yaml", MANIFESTS.as_bytes().to_vec()),
            ("README.md", b"# podinfo".to_vec()),
        ])
        .unwrap()
        .to_bytes()
        .unwrap();
        assert_eq!(parse_manifests(&archive).unwrap().len(), 2);
    }

    #[test]
    fn test_document_without_kind_is_rejected() {
        let error = parse_manifests(b"apiVersion: v1\nmetadata:\n  name: x\n").unwrap_err();
        assert!(matches!(error, ManifestError::Invalid { .. }));
        assert!(error.to_string().contains("without kind"));
        assert!(!error.is_retryable());
    }

    #[test]
    fn test_group_version_kind() {
        let core = group_version_kind("v1", "ConfigMap");
        assert_eq!((core.group.as_str(), core.version.as_str()), ("", "v1"));
        let apps = group_version_kind("apps/v1", "Deployment");
        assert_eq!((apps.group.as_str(), apps.version.as_str()), ("apps", "v1"));
    }

    #[test]
    fn test_removed_objects() {
        let reference = |name: &str| DeployedObjectReference {
            api_version: "v1".to_string(),
            kind: "ConfigMap".to_string(),
            name: name.to_string(),
            namespace: Some("default".to_string()),
        };
        let previous = vec![reference("a"), reference("b")];
        let current = vec![reference("b"), reference("c")];
        assert_eq!(removed_objects(&previous, &current), vec![&reference("a")]);
    }
}
