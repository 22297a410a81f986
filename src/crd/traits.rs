//! # Capability Traits
//!
//! Small accessor traits the reconciliation state machine and the effective
//! configuration resolver depend on. Each kind supplies its own storage.

use crate::crd::{
    ArtifactRef, Component, Condition, ConfiguredResource, LocalObjectReference,
    LocalizedResource, OCMDeployer, OCMRepository, Resource, Verification,
};

/// Access to status conditions
pub trait ConditionsHolder {
    fn conditions(&self) -> &[Condition];
    fn observed_generation(&self) -> Option<i64>;
}

/// Object the state machine can drive
pub trait Reconcilable: ConditionsHolder {
    fn suspended(&self) -> bool;
    /// Raw `spec.interval` duration string
    fn interval(&self) -> &str;
}

/// Secret references declared in spec and the effective ones in status
pub trait SecretRefProvider {
    /// `spec.secretRef` followed by `spec.secretRefs`, without duplicates
    fn spec_secret_refs(&self) -> Vec<LocalObjectReference>;
    fn effective_secret_refs(&self) -> &[LocalObjectReference];
}

/// Config references and config set declared in spec and the effective ones in status
pub trait ConfigRefProvider {
    fn spec_config_refs(&self) -> Vec<LocalObjectReference>;
    fn spec_config_set(&self) -> Option<&str>;
    fn effective_config_refs(&self) -> &[LocalObjectReference];
    fn effective_config_set(&self) -> Option<&str>;
}

/// Objects that declare signatures to verify
pub trait VerificationProvider {
    fn verifications(&self) -> &[Verification];
}

/// Objects whose status points at a stored artifact
pub trait ArtifactProducer {
    fn artifact(&self) -> Option<&ArtifactRef>;
}

/// Objects that can serve as the default of another object's effective configuration
///
/// `Sync` so a borrowed default can be held across awaits of a reconciliation.
pub trait ConfigScope: SecretRefProvider + ConfigRefProvider + Sync {}

impl<T: SecretRefProvider + ConfigRefProvider + Sync + ?Sized> ConfigScope for T {}

/// Merge a single reference with a list, keeping first occurrence order
pub(crate) fn merge_refs(
    single: Option<&LocalObjectReference>,
    many: &[LocalObjectReference],
) -> Vec<LocalObjectReference> {
    let mut merged: Vec<LocalObjectReference> = Vec::with_capacity(many.len() + 1);
    for reference in single.into_iter().chain(many.iter()) {
        if !merged.contains(reference) {
            merged.push(reference.clone());
        }
    }
    merged
}

macro_rules! impl_reconcilable {
    ($kind:ty) => {
        impl ConditionsHolder for $kind {
            fn conditions(&self) -> &[Condition] {
                self.status
                    .as_ref()
                    .map_or(&[][..], |s| s.conditions.as_slice())
            }

            fn observed_generation(&self) -> Option<i64> {
                self.status.as_ref().and_then(|s| s.observed_generation)
            }
        }

        impl Reconcilable for $kind {
            fn suspended(&self) -> bool {
                self.spec.suspend
            }

            fn interval(&self) -> &str {
                &self.spec.interval
            }
        }
    };
}

macro_rules! impl_config_scope {
    ($kind:ty) => {
        impl SecretRefProvider for $kind {
            fn spec_secret_refs(&self) -> Vec<LocalObjectReference> {
                merge_refs(self.spec.secret_ref.as_ref(), &self.spec.secret_refs)
            }

            fn effective_secret_refs(&self) -> &[LocalObjectReference] {
                self.status
                    .as_ref()
                    .map_or(&[][..], |s| s.secret_refs.as_slice())
            }
        }

        impl ConfigRefProvider for $kind {
            fn spec_config_refs(&self) -> Vec<LocalObjectReference> {
                merge_refs(self.spec.config_ref.as_ref(), &self.spec.config_refs)
            }

            fn spec_config_set(&self) -> Option<&str> {
                self.spec.config_set.as_deref()
            }

            fn effective_config_refs(&self) -> &[LocalObjectReference] {
                self.status
                    .as_ref()
                    .map_or(&[][..], |s| s.config_refs.as_slice())
            }

            fn effective_config_set(&self) -> Option<&str> {
                self.status.as_ref().and_then(|s| s.config_set.as_deref())
            }
        }
    };
}

macro_rules! impl_artifact_producer {
    ($kind:ty) => {
        impl ArtifactProducer for $kind {
            fn artifact(&self) -> Option<&ArtifactRef> {
                self.status.as_ref().and_then(|s| s.artifact.as_ref())
            }
        }
    };
}

impl_reconcilable!(OCMRepository);
impl_reconcilable!(Component);
impl_reconcilable!(Resource);
impl_reconcilable!(LocalizedResource);
impl_reconcilable!(ConfiguredResource);
impl_reconcilable!(OCMDeployer);

impl_config_scope!(OCMRepository);
impl_config_scope!(Component);
impl_config_scope!(Resource);
impl_config_scope!(LocalizedResource);
impl_config_scope!(ConfiguredResource);

impl_artifact_producer!(Component);
impl_artifact_producer!(Resource);
impl_artifact_producer!(LocalizedResource);
impl_artifact_producer!(ConfiguredResource);

impl VerificationProvider for Component {
    fn verifications(&self) -> &[Verification] {
        &self.spec.verify
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_refs_deduplicates() {
        let a = LocalObjectReference::new("a");
        let b = LocalObjectReference::new("b");
        let merged = merge_refs(Some(&a), &[b.clone(), a.clone()]);
        assert_eq!(merged, vec![a, b]);
    }

    #[test]
    fn test_merge_refs_empty() {
        assert!(merge_refs(None, &[]).is_empty());
    }
}
