//! # Resource Stage
//!
//! Resolves a resource reference against the stored descriptor set of a
//! ready Component, fetches the blob with the component's effective
//! credentials, verifies its digest and stores it.

use crate::constants::OCTET_STREAM_MEDIA_TYPE;
use crate::controller::context::Context;
use crate::controller::error::{reasons, ReasonExt, ReconcileError};
use crate::controller::stages::{delete_artifact, namespace_of, store_artifact};
use crate::controller::state_machine::{Stage, StageOutcome};
use crate::crd::{
    ArtifactProducer, ArtifactRef, Component, ComponentInfo, ConfigScope, ResourceInfo, ResourceReference,
    ResourceStatus,
};
use crate::ocm::repository::fetch_blob;
use crate::ocm::{
    resolve_effective_config, resolve_resource, ComponentDescriptor, DescriptorResource,
    DescriptorSet,
};
use async_trait::async_trait;
use kube::ResourceExt;
use tracing::info;

/// Descriptor information recorded in status
pub fn resource_info(
    resource: &DescriptorResource,
    digest: &str,
) -> Result<ResourceInfo, ReconcileError> {
    Ok(ResourceInfo {
        name: resource.name.clone(),
        r#type: resource.r#type.clone(),
        version: resource.version.clone(),
        access: serde_json::to_value(&resource.access).reason(reasons::RESOLVE_RESOURCE_FAILED)?,
        digest: Some(digest.to_string()),
    })
}

/// Locate `reference` inside the descriptor set of `info`
pub fn locate<'a>(
    descriptors: &'a DescriptorSet,
    info: &ComponentInfo,
    reference: &ResourceReference,
) -> Result<(&'a DescriptorResource, &'a ComponentDescriptor), ReconcileError> {
    resolve_resource(descriptors, &info.component, &info.version, reference)
        .reason(reasons::RESOLVE_RESOURCE_FAILED)
}

/// Resolved component of a ready Component, waiting while it settles
pub(crate) fn resolved_component(
    component: &Component,
) -> Result<(&ComponentInfo, &ArtifactRef), ReconcileError> {
    let status = component.status.as_ref();
    match (
        status.and_then(|s| s.component.as_ref()),
        status.and_then(|s| s.artifact.as_ref()),
    ) {
        (Some(info), Some(artifact)) => Ok((info, artifact)),
        _ => Err(ReconcileError::waiting(format!(
            "Component {} has not resolved a version yet",
            component.name_any()
        ))),
    }
}

#[async_trait]
impl Stage for crate::crd::Resource {
    async fn run(&self, ctx: &Context) -> Result<StageOutcome, ReconcileError> {
        let namespace = namespace_of(self)?;
        let component: Component = ctx
            .ready_dependency(&namespace, &self.spec.component_ref.name)
            .await?;
        let (info, set_artifact) = resolved_component(&component)?;

        let config = resolve_effective_config(
            ctx.reader.as_ref(),
            &namespace,
            self,
            Some(&component as &dyn ConfigScope),
            &[],
        )
        .await?;

        let set_data = ctx
            .store
            .get(&set_artifact.digest)
            .await
            .reason(reasons::GET_BLOB_FAILED)?;
        let descriptors = DescriptorSet::from_yaml(&set_data).reason(reasons::RESOLVE_RESOURCE_FAILED)?;
        let reference = &self.spec.resource.by_reference;
        let (resource, owner) = locate(&descriptors, info, reference)?;

        let repository = ctx
            .repositories
            .open(&info.repository_spec, &config.credentials)
            .reason(reasons::REPOSITORY_UNAVAILABLE)?;
        let (data, digest) = fetch_blob(repository.as_ref(), owner, resource)
            .await
            .reason(reasons::GET_BLOB_FAILED)?;

        let media_type = resource.access.media_type().unwrap_or(OCTET_STREAM_MEDIA_TYPE);
        let artifact = store_artifact(ctx, "Resource", &data, media_type).await?;
        info!(
            resource = %reference,
            component = %info.component,
            version = %info.version,
            digest = %digest,
            "Fetched resource"
        );

        let status = ResourceStatus {
            artifact: Some(artifact),
            resource: Some(resource_info(resource, &digest)?),
            component: Some(info.clone()),
            secret_refs: config.refs.secret_refs,
            config_refs: config.refs.config_refs,
            config_set: config.refs.config_set,
            ..ResourceStatus::default()
        };
        StageOutcome::new(
            &status,
            format!("Resource {reference} of {}:{} stored", info.component, info.version),
        )
    }

    async fn finalize(&self, ctx: &Context) -> Result<(), ReconcileError> {
        delete_artifact(ctx, self.artifact()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::error::ErrorKind;
    use crate::crd::RepositorySpec;

    const SET: &str = r#"
components:
  - meta:
      schemaVersion: v2
    component:
      name: acme.org/app
      version: 1.0.0
      resources:
        - name: manifests
          type: blob
          access:
            type: localBlob
            localReference: sha256:abc
            mediaType: application/x-tar
      componentReferences:
        - name: backend
          componentName: acme.org/backend
          version: 2.0.0
  - meta:
      schemaVersion: v2
    component:
      name: acme.org/backend
      version: 2.0.0
      resources:
        - name: image
          version: 2.0.0
          type: ociImage
          relation: external
          access:
            type: ociArtifact
            imageReference: ghcr.io/acme/backend:2.0.0
"#;

    fn info() -> ComponentInfo {
        ComponentInfo {
            repository_spec: RepositorySpec::oci("ghcr.io/acme"),
            component: "acme.org/app".to_string(),
            version: "1.0.0".to_string(),
        }
    }

    #[test]
    fn test_locate_through_reference_path() {
        let set = DescriptorSet::from_yaml(SET.as_bytes()).unwrap();
        let reference = ResourceReference::by_name("image").through("backend");
        let (resource, owner) = locate(&set, &info(), &reference).unwrap();
        assert_eq!(resource.name, "image");
        assert_eq!(owner.name(), "acme.org/backend");

        let status = resource_info(resource, "sha256:def").unwrap();
        assert_eq!(status.access["imageReference"], "ghcr.io/acme/backend:2.0.0");
        assert_eq!(status.version.as_deref(), Some("2.0.0"));
    }

    #[test]
    fn test_locate_missing_resource_is_not_retryable() {
        let set = DescriptorSet::from_yaml(SET.as_bytes()).unwrap();
        let error = locate(&set, &info(), &ResourceReference::by_name("chart")).unwrap_err();
        assert_eq!(error.kind, ErrorKind::NonRetryable);
        assert_eq!(error.reason, reasons::RESOLVE_RESOURCE_FAILED);
    }
}
