//! # OCMRepository Stage
//!
//! Resolves the repository's effective configuration and checks that the
//! repository answers with it. Nothing is stored.

use crate::controller::context::Context;
use crate::controller::error::{reasons, ReasonExt, ReconcileError};
use crate::controller::stages::namespace_of;
use crate::controller::state_machine::{Stage, StageOutcome};
use crate::crd::{OCMRepository, OCMRepositoryStatus};
use crate::ocm::effective::EffectiveRefs;
use crate::ocm::resolve_effective_config;
use async_trait::async_trait;
use tracing::debug;

/// Status fields a repository publishes for its components
pub fn repository_status(refs: EffectiveRefs) -> OCMRepositoryStatus {
    OCMRepositoryStatus {
        secret_refs: refs.secret_refs,
        config_refs: refs.config_refs,
        config_set: refs.config_set,
        ..OCMRepositoryStatus::default()
    }
}

#[async_trait]
impl Stage for OCMRepository {
    async fn run(&self, ctx: &Context) -> Result<StageOutcome, ReconcileError> {
        let namespace = namespace_of(self)?;
        let config = resolve_effective_config(ctx.reader.as_ref(), &namespace, self, None, &[]).await?;

        let repository = ctx
            .repositories
            .open(&self.spec.repository_spec, &config.credentials)
            .reason(reasons::REPOSITORY_UNAVAILABLE)?;
        repository
            .ping()
            .await
            .reason(reasons::REPOSITORY_UNAVAILABLE)?;
        debug!(base_url = %self.spec.repository_spec.base_url, "Repository reachable");

        StageOutcome::new(
            &repository_status(config.refs),
            format!("Repository {} is reachable", self.spec.repository_spec.base_url),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::LocalObjectReference;

    #[test]
    fn test_repository_status_carries_refs() {
        let status = repository_status(EffectiveRefs {
            secret_refs: vec![LocalObjectReference::new("pull")],
            config_refs: Vec::new(),
            config_set: Some("prod".to_string()),
        });
        assert_eq!(status.secret_refs, vec![LocalObjectReference::new("pull")]);
        assert_eq!(status.config_set.as_deref(), Some("prod"));
        assert!(status.conditions.is_empty());
    }
}
