//! # Stages
//!
//! Kind-specific reconciliation work driven by the state machine.
//!
//! ## Module Structure
//!
//! - `repository.rs` - OCMRepository: effective config and availability
//! - `component.rs` - Component: version selection, signatures, descriptor set
//! - `resource.rs` - Resource: reference resolution and blob fetch
//! - `localized.rs` - LocalizedResource: localization rules
//! - `configured.rs` - ConfiguredResource: configuration rules
//! - `deployer.rs` - OCMDeployer: server-side apply of manifests

pub mod component;
pub mod configured;
pub mod deployer;
pub mod localized;
pub mod repository;
pub mod resource;

use crate::artifact::StoreError;
use crate::controller::context::Context;
use crate::controller::error::{reasons, ReasonExt, ReconcileError, Retryable};
use crate::controller::state_machine::interval_of;
use crate::crd::{
    ArtifactProducer, ArtifactRef, ArtifactSourceKind, ArtifactSourceRef, ConfigScope,
    ConfiguredResource, LocalizedResource, Resource,
};
use crate::observability;
use kube::ResourceExt;
use std::time::Duration;
use tracing::{debug, info};

/// Namespace of a namespaced object
pub(crate) fn namespace_of<K: ResourceExt>(object: &K) -> Result<String, ReconcileError> {
    object.namespace().ok_or_else(|| {
        ReconcileError::non_retryable(reasons::INVALID_SPEC, "object has no namespace")
    })
}

/// Write `data` to the artifact store
pub(crate) async fn store_artifact(
    ctx: &Context,
    kind: &str,
    data: &[u8],
    media_type: &str,
) -> Result<ArtifactRef, ReconcileError> {
    let artifact = ctx
        .store
        .put(data, media_type)
        .await
        .reason(reasons::STORAGE_FAILED)?;
    observability::increment_artifacts_stored(kind);
    debug!(digest = %artifact.digest, size = artifact.size, "Stored artifact");
    Ok(artifact)
}

/// Remove the artifact an object produced, tolerating one that is already gone
pub(crate) async fn delete_artifact(
    ctx: &Context,
    artifact: Option<&ArtifactRef>,
) -> Result<(), ReconcileError> {
    let Some(artifact) = artifact else {
        return Ok(());
    };
    match ctx.store.delete(&artifact.digest).await {
        Ok(()) | Err(StoreError::NotFound(_)) => {
            info!(digest = %artifact.digest, "Deleted artifact");
            Ok(())
        }
        Err(e) => Err(e.classify(reasons::DELETION_FAILED)),
    }
}

/// The upstream object whose artifact a ConfiguredResource or OCMDeployer consumes
#[derive(Debug, Clone)]
pub enum ArtifactSource {
    Resource(Box<Resource>),
    LocalizedResource(Box<LocalizedResource>),
    ConfiguredResource(Box<ConfiguredResource>),
}

impl ArtifactSource {
    /// Fetch the referenced object and require it to be ready
    pub async fn fetch_ready(
        ctx: &Context,
        namespace: &str,
        reference: &ArtifactSourceRef,
    ) -> Result<Self, ReconcileError> {
        let namespace = reference.namespace.as_deref().unwrap_or(namespace);
        let name = reference.name.as_str();
        Ok(match reference.kind {
            ArtifactSourceKind::Resource => {
                Self::Resource(Box::new(ctx.ready_dependency(namespace, name).await?))
            }
            ArtifactSourceKind::LocalizedResource => {
                Self::LocalizedResource(Box::new(ctx.ready_dependency(namespace, name).await?))
            }
            ArtifactSourceKind::ConfiguredResource => {
                Self::ConfiguredResource(Box::new(ctx.ready_dependency(namespace, name).await?))
            }
        })
    }

    pub fn kind(&self) -> ArtifactSourceKind {
        match self {
            Self::Resource(_) => ArtifactSourceKind::Resource,
            Self::LocalizedResource(_) => ArtifactSourceKind::LocalizedResource,
            Self::ConfiguredResource(_) => ArtifactSourceKind::ConfiguredResource,
        }
    }

    pub fn name(&self) -> String {
        match self {
            Self::Resource(r) => r.name_any(),
            Self::LocalizedResource(r) => r.name_any(),
            Self::ConfiguredResource(r) => r.name_any(),
        }
    }

    /// Default scope for the consumer's effective configuration
    pub fn scope(&self) -> &dyn ConfigScope {
        match self {
            Self::Resource(r) => r.as_ref(),
            Self::LocalizedResource(r) => r.as_ref(),
            Self::ConfiguredResource(r) => r.as_ref(),
        }
    }

    /// The produced artifact; a ready source without one is still settling
    pub fn artifact(&self) -> Result<&ArtifactRef, ReconcileError> {
        let artifact = match self {
            Self::Resource(r) => r.artifact(),
            Self::LocalizedResource(r) => r.artifact(),
            Self::ConfiguredResource(r) => r.artifact(),
        };
        artifact.ok_or_else(|| {
            ReconcileError::waiting(format!(
                "{} {} has no artifact yet",
                self.kind().as_str(),
                self.name()
            ))
        })
    }

    pub fn interval(&self) -> Result<Duration, ReconcileError> {
        match self {
            Self::Resource(r) => interval_of(r.as_ref()),
            Self::LocalizedResource(r) => interval_of(r.as_ref()),
            Self::ConfiguredResource(r) => interval_of(r.as_ref()),
        }
    }
}
