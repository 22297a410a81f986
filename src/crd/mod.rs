//! # Custom Resource Definitions
//!
//! CRD types served by the controller under `delivery.ocm.software/v1alpha1`.
//!
//! ## Module Structure
//!
//! - `common.rs` - Shared reference, condition and artifact types
//! - `repository.rs` - OCMRepository
//! - `component.rs` - Component
//! - `resource.rs` - Resource
//! - `localization.rs` - LocalizationConfig and LocalizedResource
//! - `configuration.rs` - ResourceConfig and ConfiguredResource
//! - `deployer.rs` - OCMDeployer
//! - `traits.rs` - Accessor traits implemented by the kinds

pub(crate) mod common;
mod component;
mod configuration;
mod deployer;
mod localization;
mod repository;
mod resource;
mod traits;

// Re-export all public types
pub use common::{
    default_interval, is_ready, ArtifactRef, ArtifactSourceKind, ArtifactSourceRef, Condition,
    Identity, LocalObjectReference, ObjectKey, ResourceReference, Verification,
};
pub use component::{Component, ComponentInfo, ComponentSpec, ComponentStatus};
pub use configuration::{
    ConfigSubstitutionRule, ConfigurationRule, ConfiguredResource, ConfiguredResourceSpec,
    ConfiguredResourceStatus, LiteralSource, ResourceConfig, ResourceConfigSpec,
};
pub use deployer::{DeployedObjectReference, OCMDeployer, OCMDeployerSpec, OCMDeployerStatus};
pub use localization::{
    FileTarget, FileValueTarget, GoTemplateDelimiters, GoTemplateRule, LocalizationConfig,
    LocalizationConfigSpec, LocalizationRule, LocalizationSource, LocalizedResource,
    LocalizedResourceSpec, LocalizedResourceStatus, TransformationSpec, ValueTarget,
    YamlSubstitutionRule,
};
pub use repository::{OCMRepository, OCMRepositorySpec, OCMRepositoryStatus, RepositorySpec};
pub use resource::{Resource, ResourceInfo, ResourceSelector, ResourceSpec, ResourceStatus};
pub use traits::{
    ArtifactProducer, ConditionsHolder, ConfigRefProvider, ConfigScope, Reconcilable,
    SecretRefProvider, VerificationProvider,
};

use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::CustomResourceExt;

/// Definitions of every served kind, in dependency order
pub fn all_crds() -> Vec<CustomResourceDefinition> {
    vec![
        OCMRepository::crd(),
        Component::crd(),
        Resource::crd(),
        LocalizationConfig::crd(),
        LocalizedResource::crd(),
        ResourceConfig::crd(),
        ConfiguredResource::crd(),
        OCMDeployer::crd(),
    ]
}

/// All definitions as one multi-document YAML stream
pub fn render_crds() -> Result<String, serde_yaml::Error> {
    let documents = all_crds()
        .iter()
        .map(serde_yaml::to_string)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(documents.join("---\n"))
}
