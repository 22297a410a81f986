//! # OCM Controller
//!
//! Kubernetes controller that resolves OCM component versions from OCI
//! registries, fetches and localizes their resources, and deploys the
//! resulting manifests.
//!
//! Controllers run for `OCMRepository`, `Component`, `Resource`,
//! `LocalizedResource`, `ConfiguredResource` and `OCMDeployer`. Produced
//! artifacts are stored in the registry named by `REGISTRY_ADDR`.

use anyhow::Result;
use ocm_controller::runtime::{initialization::initialize, watch_loop::run_watch_loop};

#[tokio::main]
async fn main() -> Result<()> {
    let runtime = initialize().await?;
    run_watch_loop(runtime.client, runtime.context, runtime.server_state).await
}
