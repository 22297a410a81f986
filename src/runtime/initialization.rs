//! # Initialization
//!
//! Controller startup: rustls provider, logging, metrics, the probe server,
//! the Kubernetes client and the artifact registry.

use crate::artifact::{wait_for_store, ArtifactStore, RegistryArtifactStore};
use crate::config::{ControllerConfig, SharedControllerConfig};
use crate::controller::Context;
use crate::crd::{
    Component, ConfiguredResource, LocalizationConfig, LocalizedResource, OCMDeployer,
    OCMRepository, Resource, ResourceConfig,
};
use crate::oci::{RegistryClient, RegistryOptions};
use crate::observability;
use crate::ocm::repository::OciRepositoryProvider;
use crate::server::{start_server, ServerState};
use anyhow::{anyhow, Context as _, Result};
use kube::api::ListParams;
use kube::{Api, Client};
use serde::de::DeserializeOwned;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

const SERVER_STARTUP_TIMEOUT: Duration = Duration::from_secs(10);
const SERVER_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Everything the watch loop needs
pub struct Runtime {
    pub client: Client,
    pub context: Arc<Context>,
    pub server_state: Arc<ServerState>,
}

impl Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("server_ready", &self.server_state.is_ready())
            .finish_non_exhaustive()
    }
}

pub async fn initialize() -> Result<Runtime> {
    // Fails only when another provider is already installed, which is fine
    let _ = rustls::crypto::ring::default_provider().install_default();

    let config: SharedControllerConfig = Arc::new(ControllerConfig::from_env());
    observability::logging::init_logging(&config)?;
    info!(
        version = env!("CARGO_PKG_VERSION"),
        git_hash = env!("BUILD_GIT_HASH"),
        built = env!("BUILD_DATETIME"),
        "Starting OCM controller"
    );

    observability::register_metrics()?;

    let server_state = Arc::new(ServerState::new());
    let port = config.metrics_port;
    let server_handle = tokio::spawn({
        let state = Arc::clone(&server_state);
        async move {
            if let Err(e) = start_server(port, state).await {
                error!("HTTP server error: {}", e);
            }
        }
    });
    wait_for_server_ready(&server_state, &server_handle).await?;

    let client = Client::try_default()
        .await
        .context("Failed to create Kubernetes client")?;
    check_crds(&client).await;

    let store = artifact_store(&config).await?;
    let repositories = Arc::new(OciRepositoryProvider {
        timeout: config.fetch_timeout(),
    });
    let context = Arc::new(Context::new(client.clone(), repositories, store, config));

    info!("Controller initialized, starting watch loop...");
    Ok(Runtime {
        client,
        context,
        server_state,
    })
}

/// PEM bundle trusted for the artifact registry, when configured
async fn load_root_ca(path: Option<&str>) -> Result<Option<Vec<u8>>> {
    let Some(path) = path else {
        return Ok(None);
    };
    let pem = tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read registry root CA {path}"))?;
    if !pem.starts_with(b"-----BEGIN") {
        return Err(anyhow!("Registry root CA {path} is not a PEM file"));
    }
    Ok(Some(pem))
}

/// Connect to the artifact registry and wait until it answers
async fn artifact_store(config: &ControllerConfig) -> Result<Arc<dyn ArtifactStore>> {
    let root_ca = load_root_ca(config.registry_root_ca.as_deref()).await?;
    let client = RegistryClient::new(
        &config.registry_addr,
        RegistryOptions {
            insecure: config.registry_insecure_skip_verify,
            root_ca,
            credential: None,
            timeout: Some(config.fetch_timeout()),
        },
    )
    .context("Failed to configure artifact registry client")?;
    let store: Arc<dyn ArtifactStore> = Arc::new(RegistryArtifactStore::new(
        client,
        config.artifact_repository.clone(),
    ));

    info!(registry = %config.registry_addr, "Waiting for artifact registry");
    wait_for_store(
        store.as_ref(),
        config.registry_ping_timeout(),
        config.registry_ping_interval(),
    )
    .await
    .context("Artifact registry did not become available")?;
    Ok(store)
}

async fn wait_for_server_ready(
    server_state: &ServerState,
    server_handle: &tokio::task::JoinHandle<()>,
) -> Result<()> {
    let started = Instant::now();
    loop {
        if server_handle.is_finished() {
            return Err(anyhow!("HTTP server failed to start"));
        }
        if server_state.is_ready() {
            info!("HTTP server is ready and accepting connections");
            return Ok(());
        }
        if started.elapsed() > SERVER_STARTUP_TIMEOUT {
            return Err(anyhow!(
                "HTTP server failed to become ready within {} seconds",
                SERVER_STARTUP_TIMEOUT.as_secs()
            ));
        }
        tokio::time::sleep(SERVER_POLL_INTERVAL).await;
    }
}

/// Count the existing objects of one kind, warning when its CRD is not installed
async fn count_objects<K>(client: &Client) -> Option<usize>
where
    K: kube::Resource<DynamicType = ()> + Clone + DeserializeOwned + Debug,
{
    let kind = K::kind(&());
    match Api::<K>::all(client.clone()).list(&ListParams::default()).await {
        Ok(list) => {
            info!(kind = %kind, count = list.items.len(), "Found existing objects");
            Some(list.items.len())
        }
        Err(e) => {
            warn!(kind = %kind, error = %e, "CRD is not queryable, is it installed? Run crdgen to generate it");
            None
        }
    }
}

/// Startup summary of the served kinds; missing CRDs are reported, not fatal
async fn check_crds(client: &Client) {
    let counts = [
        count_objects::<OCMRepository>(client).await,
        count_objects::<Component>(client).await,
        count_objects::<Resource>(client).await,
        count_objects::<LocalizationConfig>(client).await,
        count_objects::<LocalizedResource>(client).await,
        count_objects::<ResourceConfig>(client).await,
        count_objects::<ConfiguredResource>(client).await,
        count_objects::<OCMDeployer>(client).await,
    ];
    let missing = counts.iter().filter(|c| c.is_none()).count();
    if missing > 0 {
        warn!(missing, "Some CRDs are not installed; their controllers will retry");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[tokio::test]
    async fn test_root_ca_is_optional() {
        assert!(load_root_ca(None).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_root_ca_read_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"-----BEGIN CERTIFICATE-----\nMIIB\n-----END CERTIFICATE-----\n")
            .unwrap();
        let path = file.path().to_str().unwrap().to_string();
        let pem = load_root_ca(Some(&path)).await.unwrap().unwrap();
        assert!(pem.starts_with(b"-----BEGIN CERTIFICATE-----"));
    }

    #[tokio::test]
    async fn test_root_ca_rejects_non_pem_and_missing_files() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"not a certificate").unwrap();
        let path = file.path().to_str().unwrap().to_string();
        assert!(load_root_ca(Some(&path)).await.is_err());

        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("ca.pem");
        let error = load_root_ca(missing.to_str()).await.unwrap_err();
        assert!(error.to_string().contains("Failed to read registry root CA"));
    }
}
