//! # ConfiguredResource Stage
//!
//! Applies the literal-valued rules of a ResourceConfig to the artifact of a
//! Resource, LocalizedResource or another ConfiguredResource.

use crate::controller::context::Context;
use crate::controller::error::{reasons, ReasonExt, ReconcileError};
use crate::controller::stages::{delete_artifact, namespace_of, store_artifact, ArtifactSource};
use crate::controller::state_machine::{Stage, StageOutcome};
use crate::crd::{ArtifactProducer, ConfiguredResource, ConfiguredResourceStatus, ResourceConfig};
use crate::localization::{configure_artifact, rules_hash};
use crate::ocm::resolve_effective_config;
use async_trait::async_trait;
use tracing::info;

#[async_trait]
impl Stage for ConfiguredResource {
    async fn run(&self, ctx: &Context) -> Result<StageOutcome, ReconcileError> {
        let namespace = namespace_of(self)?;
        let source = ArtifactSource::fetch_ready(ctx, &namespace, &self.spec.target).await?;
        let source_artifact = source.artifact()?;
        let rules = ctx
            .get::<ResourceConfig>(&namespace, &self.spec.config.name)
            .await?
            .ok_or_else(|| {
                ReconcileError::waiting(format!(
                    "ResourceConfig {namespace}/{} not found",
                    self.spec.config.name
                ))
            })?
            .spec
            .rules;

        let config = resolve_effective_config(
            ctx.reader.as_ref(),
            &namespace,
            self,
            Some(source.scope()),
            &[],
        )
        .await?;

        let input = ctx
            .store
            .get(&source_artifact.digest)
            .await
            .reason(reasons::GET_BLOB_FAILED)?;
        let (configured, media_type) =
            configure_artifact(&input, &rules).reason(reasons::CONFIGURATION_FAILED)?;
        let artifact = store_artifact(ctx, "ConfiguredResource", &configured, media_type).await?;
        info!(
            source_kind = source.kind().as_str(),
            source = %source.name(),
            digest = %artifact.digest,
            "Configured resource"
        );

        let status = ConfiguredResourceStatus {
            artifact: Some(artifact),
            config_hash: Some(rules_hash(&rules).reason(reasons::CONFIGURATION_FAILED)?),
            secret_refs: config.refs.secret_refs,
            config_refs: config.refs.config_refs,
            config_set: config.refs.config_set,
            ..ConfiguredResourceStatus::default()
        };
        StageOutcome::new(
            &status,
            format!("Applied {} configuration rules", rules.len()),
        )
    }

    async fn finalize(&self, ctx: &Context) -> Result<(), ReconcileError> {
        delete_artifact(ctx, self.artifact()).await
    }
}
