//! # Reconciler Context
//!
//! Shared collaborators handed to every reconciliation: the Kubernetes
//! client, the object reader used for effective configuration, the
//! repository provider, the artifact store and per-object backoff state.

use crate::artifact::ArtifactStore;
use crate::config::SharedControllerConfig;
use crate::controller::backoff::BackoffState;
use crate::controller::error::{reasons, ReasonExt, ReconcileError};
use crate::crd::Reconcilable;
use crate::ocm::{ObjectReader, RepositoryProvider};
use kube::{Api, Client, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

pub struct Context {
    pub client: Client,
    pub reader: Arc<dyn ObjectReader>,
    pub repositories: Arc<dyn RepositoryProvider>,
    pub store: Arc<dyn ArtifactStore>,
    pub config: SharedControllerConfig,
    /// Backoff per object, keyed `Kind/namespace/name`
    pub backoff_states: Mutex<HashMap<String, BackoffState>>,
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Context {
    pub fn new(
        client: Client,
        repositories: Arc<dyn RepositoryProvider>,
        store: Arc<dyn ArtifactStore>,
        config: SharedControllerConfig,
    ) -> Self {
        Self {
            reader: Arc::new(client.clone()),
            client,
            repositories,
            store,
            config,
            backoff_states: Mutex::new(HashMap::new()),
        }
    }

    /// Forget the backoff of an object after it reconciled successfully
    pub fn reset_backoff(&self, key: &str) {
        if let Ok(mut states) = self.backoff_states.lock() {
            states.remove(key);
        }
    }

    /// Fetch a namespaced object, `None` when it does not exist
    pub async fn get<K>(&self, namespace: &str, name: &str) -> Result<Option<K>, ReconcileError>
    where
        K: Resource<DynamicType = (), Scope = k8s_openapi::NamespaceResourceScope>
            + Clone
            + DeserializeOwned
            + fmt::Debug,
    {
        Api::<K>::namespaced(self.client.clone(), namespace)
            .get_opt(name)
            .await
            .reason(reasons::DEPENDENCY_NOT_FOUND)
    }

    /// Fetch an upstream object that must exist, not be deleting and be ready
    pub async fn ready_dependency<K>(&self, namespace: &str, name: &str) -> Result<K, ReconcileError>
    where
        K: Resource<DynamicType = (), Scope = k8s_openapi::NamespaceResourceScope>
            + Reconcilable
            + Clone
            + DeserializeOwned
            + fmt::Debug,
    {
        let kind = K::kind(&());
        let object = self
            .get::<K>(namespace, name)
            .await?
            .ok_or_else(|| ReconcileError::waiting(format!("{kind} {namespace}/{name} not found")))?;
        ensure_ready(&object)?;
        Ok(object)
    }
}

/// Fail with a waiting error unless `object` is ready and not being deleted
pub fn ensure_ready<K: Resource<DynamicType = ()> + Reconcilable>(object: &K) -> Result<(), ReconcileError> {
    let kind = K::kind(&());
    let name = object.name_any();
    if object.meta().deletion_timestamp.is_some() {
        return Err(ReconcileError::waiting(format!("{kind} {name} is being deleted")));
    }
    if !crate::crd::is_ready(object.conditions()) {
        return Err(ReconcileError::waiting(format!("{kind} {name} is not ready")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::error::ErrorKind;
    use crate::crd::{Condition, OCMRepository, OCMRepositorySpec, OCMRepositoryStatus, RepositorySpec};

    fn repository(ready: bool) -> OCMRepository {
        let mut repository = OCMRepository::new(
            "repo",
            OCMRepositorySpec {
                repository_spec: RepositorySpec::oci("ghcr.io/acme"),
                secret_ref: None,
                secret_refs: Vec::new(),
                config_ref: None,
                config_refs: Vec::new(),
                config_set: None,
                interval: "10m".to_string(),
                suspend: false,
            },
        );
        repository.status = Some(OCMRepositoryStatus {
            conditions: vec![Condition {
                r#type: "Ready".to_string(),
                status: if ready { "True" } else { "False" }.to_string(),
                last_transition_time: None,
                reason: None,
                message: None,
                observed_generation: None,
            }],
            ..Default::default()
        });
        repository
    }

    #[test]
    fn test_ensure_ready() {
        assert!(ensure_ready(&repository(true)).is_ok());
        let error = ensure_ready(&repository(false)).unwrap_err();
        assert_eq!(error.kind, ErrorKind::Waiting);
        assert!(error.message.contains("OCMRepository repo is not ready"));
    }

    #[test]
    fn test_deleting_dependency_is_not_ready() {
        let mut repository = repository(true);
        repository.metadata.deletion_timestamp =
            serde_json::from_value(serde_json::json!("2024-01-01T00:00:00Z")).unwrap();
        let error = ensure_ready(&repository).unwrap_err();
        assert!(error.message.contains("being deleted"));
    }
}
