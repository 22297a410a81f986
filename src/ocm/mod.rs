//! # OCM
//!
//! Component model logic: descriptors, reference resolution, version
//! selection, signatures, transformations, repositories and effective
//! configuration.

pub mod descriptor;
pub mod effective;
pub mod reference;
pub mod repository;
pub mod signing;
pub mod transformation;
pub mod version;

pub use descriptor::{ComponentDescriptor, DescriptorError, DescriptorResource, DescriptorSet};
pub use effective::{resolve_effective_config, ConfigError, EffectiveConfig, ObjectReader};
pub use reference::resolve_resource;
pub use repository::{ComponentRepository, RepositoryError, RepositoryProvider};
pub use signing::SignatureError;
pub use transformation::{TransformError, TransformationType};
pub use version::VersionError;
