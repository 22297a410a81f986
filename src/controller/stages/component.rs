//! # Component Stage
//!
//! Selects the highest version matching `spec.semver`, guards against
//! downgrades, verifies the configured signatures and stores the transitive
//! descriptor set of the selected version.

use crate::constants::DESCRIPTOR_SET_MEDIA_TYPE;
use crate::controller::context::Context;
use crate::controller::error::{reasons, ReasonExt, ReconcileError, Retryable};
use crate::controller::stages::{delete_artifact, namespace_of, store_artifact};
use crate::controller::state_machine::{Stage, StageOutcome};
use crate::crd::{
    ArtifactProducer, Component, ComponentInfo, ComponentStatus, ConfigScope, OCMRepository,
};
use crate::observability;
use crate::ocm::effective::ResolvedVerification;
use crate::ocm::signing::verify_signature;
use crate::ocm::version::{check_downgrade, compile_filter, select_version, VersionConstraint};
use crate::ocm::{resolve_effective_config, ComponentDescriptor, ComponentRepository, DescriptorSet, VersionError};
use async_trait::async_trait;
use std::collections::{HashSet, VecDeque};
use tracing::{debug, info};

/// Inputs of a component version resolution
#[derive(Debug, Clone, Copy)]
pub struct ComponentRequest<'a> {
    pub component: &'a str,
    pub semver: &'a str,
    pub semver_filter: Option<&'a str>,
    /// Version observed by the previous successful reconciliation
    pub previous: Option<&'a str>,
    pub enforce_downgradability: bool,
    pub verifications: &'a [ResolvedVerification],
}

/// The selected version and its transitive descriptor set
#[derive(Debug, Clone)]
pub struct ResolvedComponent {
    pub version: String,
    pub descriptors: DescriptorSet,
}

/// Fetch the descriptors reachable from `root` through component references,
/// breadth first and deduplicated by (name, version)
pub async fn transitive_descriptors(
    repository: &dyn ComponentRepository,
    root: ComponentDescriptor,
) -> Result<DescriptorSet, ReconcileError> {
    let mut seen: HashSet<(String, String)> = HashSet::new();
    seen.insert((root.name().to_string(), root.version().to_string()));
    let mut queue: VecDeque<ComponentDescriptor> = VecDeque::from([root]);
    let mut collected = Vec::new();

    while let Some(descriptor) = queue.pop_front() {
        for reference in &descriptor.component.component_references {
            let key = (reference.component_name.clone(), reference.version.clone());
            if !seen.insert(key) {
                continue;
            }
            let referenced = repository
                .get_descriptor(&reference.component_name, &reference.version)
                .await
                .reason(reasons::GET_COMPONENT_VERSION_FAILED)?;
            debug!(
                component = %reference.component_name,
                version = %reference.version,
                "Fetched referenced component"
            );
            queue.push_back(referenced);
        }
        collected.push(descriptor);
    }
    Ok(DescriptorSet::new(collected))
}

/// Resolve a component version against `repository`
pub async fn resolve_component(
    repository: &dyn ComponentRepository,
    request: &ComponentRequest<'_>,
) -> Result<ResolvedComponent, ReconcileError> {
    let constraint = VersionConstraint::parse(request.semver).reason(reasons::INVALID_SPEC)?;
    let filter = compile_filter(request.semver_filter).reason(reasons::INVALID_SPEC)?;

    let available = repository
        .list_versions(request.component)
        .await
        .reason(reasons::GET_COMPONENT_VERSION_FAILED)?;
    let (raw, selected) = select_version(&available, &constraint, filter.as_ref()).ok_or_else(|| {
        VersionError::NoMatchingVersion {
            component: request.component.to_string(),
            constraint: request.semver.to_string(),
        }
        .classify(reasons::GET_COMPONENT_VERSION_FAILED)
    })?;

    check_downgrade(request.previous, &selected, request.enforce_downgradability)
        .reason(reasons::CHECK_VERSION_FAILED)?;

    let root = repository
        .get_descriptor(request.component, &raw)
        .await
        .reason(reasons::GET_COMPONENT_VERSION_FAILED)?;

    for verification in request.verifications {
        verify_signature(&root, &verification.signature, &verification.key)
            .reason(reasons::VERIFICATION_FAILED)?;
        debug!(signature = %verification.signature, "Signature verified");
    }

    let descriptors = transitive_descriptors(repository, root).await?;
    Ok(ResolvedComponent {
        version: raw,
        descriptors,
    })
}

impl Component {
    /// Version recorded by the last successful resolution of the same component
    fn previous_version(&self) -> Option<&str> {
        self.status
            .as_ref()
            .and_then(|s| s.component.as_ref())
            .filter(|info| info.component == self.spec.component)
            .map(|info| info.version.as_str())
    }
}

#[async_trait]
impl Stage for Component {
    async fn run(&self, ctx: &Context) -> Result<StageOutcome, ReconcileError> {
        let namespace = namespace_of(self)?;
        let repository: OCMRepository = ctx
            .ready_dependency(&namespace, &self.spec.repository_ref.name)
            .await?;

        let config = resolve_effective_config(
            ctx.reader.as_ref(),
            &namespace,
            self,
            Some(&repository as &dyn ConfigScope),
            &self.spec.verify,
        )
        .await?;

        let source = ctx
            .repositories
            .open(&repository.spec.repository_spec, &config.credentials)
            .reason(reasons::REPOSITORY_UNAVAILABLE)?;

        let request = ComponentRequest {
            component: &self.spec.component,
            semver: &self.spec.semver,
            semver_filter: self.spec.semver_filter.as_deref(),
            previous: self.previous_version(),
            enforce_downgradability: self.spec.enforce_downgradability,
            verifications: &config.verifications,
        };
        let resolved = resolve_component(source.as_ref(), &request).await?;
        observability::increment_component_versions_resolved();

        let data = resolved
            .descriptors
            .to_yaml()
            .reason(reasons::GET_COMPONENT_VERSION_FAILED)?;
        let artifact = store_artifact(ctx, "Component", &data, DESCRIPTOR_SET_MEDIA_TYPE).await?;
        info!(
            component = %self.spec.component,
            version = %resolved.version,
            descriptors = resolved.descriptors.len(),
            "Resolved component version"
        );

        let status = ComponentStatus {
            artifact: Some(artifact),
            component: Some(ComponentInfo {
                repository_spec: repository.spec.repository_spec.clone(),
                component: self.spec.component.clone(),
                version: resolved.version.clone(),
            }),
            secret_refs: config.refs.secret_refs,
            config_refs: config.refs.config_refs,
            config_set: config.refs.config_set,
            ..ComponentStatus::default()
        };
        StageOutcome::new(
            &status,
            format!("Applied version {}", resolved.version),
        )
    }

    async fn finalize(&self, ctx: &Context) -> Result<(), ReconcileError> {
        delete_artifact(ctx, self.artifact()).await
    }
}
