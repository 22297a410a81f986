//! # LocalizedResource Stage
//!
//! Applies a LocalizationConfig to the artifact of a ready Resource. Source
//! values are resolved against the descriptor set of the Resource's
//! Component, which must still be at the version the Resource was fetched
//! from.

use crate::artifact::BlobArena;
use crate::controller::context::Context;
use crate::controller::error::{reasons, ReasonExt, ReconcileError};
use crate::controller::stages::resource::resolved_component;
use crate::controller::stages::{delete_artifact, namespace_of, store_artifact};
use crate::controller::state_machine::{Stage, StageOutcome};
use crate::crd::{
    ArtifactProducer, Component, ComponentInfo, ConfigScope, LocalizationConfig,
    LocalizedResource, LocalizedResourceStatus, Resource,
};
use crate::localization::{localize_artifact, rules_hash, SourceScope};
use crate::ocm::{resolve_effective_config, DescriptorSet};
use async_trait::async_trait;
use kube::ResourceExt;
use tracing::info;

/// Require the Resource to have been fetched from the component's current version
pub fn ensure_same_version(
    resource: &Resource,
    current: &ComponentInfo,
) -> Result<(), ReconcileError> {
    let fetched = resource
        .status
        .as_ref()
        .and_then(|s| s.component.as_ref())
        .ok_or_else(|| {
            ReconcileError::waiting(format!(
                "Resource {} has not recorded its component",
                resource.name_any()
            ))
        })?;
    if fetched.component != current.component || fetched.version != current.version {
        return Err(ReconcileError::waiting(format!(
            "Resource {} was fetched from {}:{} but the component is at {}:{}",
            resource.name_any(),
            fetched.component,
            fetched.version,
            current.component,
            current.version
        )));
    }
    Ok(())
}

#[async_trait]
impl Stage for LocalizedResource {
    async fn run(&self, ctx: &Context) -> Result<StageOutcome, ReconcileError> {
        let namespace = namespace_of(self)?;
        let target: Resource = ctx.ready_dependency(&namespace, &self.spec.target.name).await?;
        let rules = ctx
            .get::<LocalizationConfig>(&namespace, &self.spec.config.name)
            .await?
            .ok_or_else(|| {
                ReconcileError::waiting(format!(
                    "LocalizationConfig {namespace}/{} not found",
                    self.spec.config.name
                ))
            })?
            .spec
            .rules;

        let component: Component = ctx
            .ready_dependency(&namespace, &target.spec.component_ref.name)
            .await?;
        let (info, set_artifact) = resolved_component(&component)?;
        ensure_same_version(&target, info)?;
        let target_artifact = target.artifact().ok_or_else(|| {
            ReconcileError::waiting(format!("Resource {} has no artifact yet", target.name_any()))
        })?;

        let config = resolve_effective_config(
            ctx.reader.as_ref(),
            &namespace,
            self,
            Some(&target as &dyn ConfigScope),
            &[],
        )
        .await?;

        let mut arena = BlobArena::new();
        let descriptors = DescriptorSet::from_yaml(
            arena
                .fetch(ctx.store.as_ref(), &set_artifact.digest)
                .await
                .reason(reasons::GET_BLOB_FAILED)?,
        )
        .reason(reasons::LOCALIZATION_FAILED)?;
        let input = arena
            .fetch(ctx.store.as_ref(), &target_artifact.digest)
            .await
            .reason(reasons::GET_BLOB_FAILED)?;

        let scope = SourceScope {
            descriptors: &descriptors,
            component: &info.component,
            version: &info.version,
        };
        let (localized, media_type) =
            localize_artifact(input, &rules, &scope).reason(reasons::LOCALIZATION_FAILED)?;
        let artifact = store_artifact(ctx, "LocalizedResource", &localized, media_type).await?;
        info!(
            rules = rules.len(),
            source = %target_artifact.digest,
            digest = %artifact.digest,
            "Localized resource"
        );

        let status = LocalizedResourceStatus {
            artifact: Some(artifact),
            config_hash: Some(rules_hash(&rules).reason(reasons::LOCALIZATION_FAILED)?),
            secret_refs: config.refs.secret_refs,
            config_refs: config.refs.config_refs,
            config_set: config.refs.config_set,
            ..LocalizedResourceStatus::default()
        };
        StageOutcome::new(
            &status,
            format!("Applied {} localization rules", rules.len()),
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
    use crate::crd::{
        LocalObjectReference, RepositorySpec, ResourceReference, ResourceSelector, ResourceSpec,
        ResourceStatus,
    };

    fn info(version: &str) -> ComponentInfo {
        ComponentInfo {
            repository_spec: RepositorySpec::oci("ghcr.io/acme"),
            component: "acme.org/app".to_string(),
            version: version.to_string(),
        }
    }

    fn resource(fetched_from: Option<&str>) -> Resource {
        let mut resource = Resource::new(
            "manifests",
            ResourceSpec {
                component_ref: LocalObjectReference::new("app"),
                resource: ResourceSelector {
                    by_reference: ResourceReference::by_name("manifests"),
                },
                secret_ref: None,
                secret_refs: Vec::new(),
                config_ref: None,
                config_refs: Vec::new(),
                config_set: None,
                interval: "10m".to_string(),
                suspend: false,
            },
        );
        resource.status = Some(ResourceStatus {
            component: fetched_from.map(info),
            ..ResourceStatus::default()
        });
        resource
    }

    #[test]
    fn test_same_version_passes() {
        assert!(ensure_same_version(&resource(Some("1.0.0")), &info("1.0.0")).is_ok());
    }

    #[test]
    fn test_version_drift_waits() {
        let error = ensure_same_version(&resource(Some("1.0.0")), &info("1.1.0")).unwrap_err();
        assert_eq!(error.kind, ErrorKind::Waiting);
        assert!(error.message.contains("acme.org/app:1.1.0"));

        let unknown = ensure_same_version(&resource(None), &info("1.0.0")).unwrap_err();
        assert_eq!(unknown.kind, ErrorKind::Waiting);
    }
}
