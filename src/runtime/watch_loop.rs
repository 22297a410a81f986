//! # Watch Loop
//!
//! One controller per kind. Each controller also watches the kinds it
//! depends on and maps their changes onto the dependents cached in its own
//! reflector store, so a dependent reconciles as soon as its upstream turns
//! ready or produces a new artifact.

use crate::controller::state_machine::{reconcile, Stage};
use crate::controller::Context;
use crate::crd::{
    ArtifactSourceKind, ArtifactSourceRef, Component, ConfiguredResource, LocalizationConfig,
    LocalizedResource, OCMDeployer, OCMRepository, Resource, ResourceConfig,
};
use crate::runtime::error_policy::{handle_reconciliation_error, handle_watch_stream_error};
use crate::server::ServerState;
use futures::StreamExt;
use kube::{Api, Client, ResourceExt};
use kube_runtime::controller::Config as ControllerSettings;
use kube_runtime::reflector::{ObjectRef, Store};
use kube_runtime::{watcher, Controller};
use std::sync::Arc;
use tracing::{debug, info, warn};

fn watcher_config() -> watcher::Config {
    watcher::Config::default().any_semantic()
}

/// `dependent` names `changed` through a same-namespace reference
pub fn local_ref(dependent: &impl ResourceExt, reference: &str, changed: &impl ResourceExt) -> bool {
    dependent.namespace() == changed.namespace() && reference == changed.name_any()
}

/// `dependent` names `changed` of `kind` through an artifact source reference
pub fn source_ref(
    dependent: &impl ResourceExt,
    reference: &ArtifactSourceRef,
    kind: ArtifactSourceKind,
    changed: &impl ResourceExt,
) -> bool {
    reference.kind == kind
        && reference.name == changed.name_any()
        && reference.namespace.clone().or_else(|| dependent.namespace()) == changed.namespace()
}

/// Cached objects for which `refers` holds
fn referencing<K>(store: &Store<K>, refers: impl Fn(&K) -> bool) -> Vec<ObjectRef<K>>
where
    K: kube::Resource<DynamicType = ()> + Clone + 'static,
{
    store
        .state()
        .iter()
        .filter(|object| refers(object))
        .map(|object| ObjectRef::from_obj(object.as_ref()))
        .collect()
}

fn repository_controller(client: &Client) -> Controller<OCMRepository> {
    Controller::new(Api::all(client.clone()), watcher_config())
}

fn component_controller(client: &Client) -> Controller<Component> {
    let controller = Controller::new(Api::<Component>::all(client.clone()), watcher_config());
    let store = controller.store();
    controller.watches(
        Api::<OCMRepository>::all(client.clone()),
        watcher_config(),
        move |repository| {
            referencing(&store, |c: &Component| {
                local_ref(c, &c.spec.repository_ref.name, &repository)
            })
        },
    )
}

fn resource_controller(client: &Client) -> Controller<Resource> {
    let controller = Controller::new(Api::<Resource>::all(client.clone()), watcher_config());
    let store = controller.store();
    controller.watches(
        Api::<Component>::all(client.clone()),
        watcher_config(),
        move |component| {
            referencing(&store, |r: &Resource| {
                local_ref(r, &r.spec.component_ref.name, &component)
            })
        },
    )
}

fn localized_controller(client: &Client) -> Controller<LocalizedResource> {
    let controller =
        Controller::new(Api::<LocalizedResource>::all(client.clone()), watcher_config());
    let targets = controller.store();
    let configs = controller.store();
    controller
        .watches(
            Api::<Resource>::all(client.clone()),
            watcher_config(),
            move |resource| {
                referencing(&targets, |l: &LocalizedResource| {
                    local_ref(l, &l.spec.target.name, &resource)
                })
            },
        )
        .watches(
            Api::<LocalizationConfig>::all(client.clone()),
            watcher_config(),
            move |config| {
                referencing(&configs, |l: &LocalizedResource| {
                    local_ref(l, &l.spec.config.name, &config)
                })
            },
        )
}

fn configured_controller(client: &Client) -> Controller<ConfiguredResource> {
    let controller =
        Controller::new(Api::<ConfiguredResource>::all(client.clone()), watcher_config());
    let (resources, localized, configured, configs) = (
        controller.store(),
        controller.store(),
        controller.store(),
        controller.store(),
    );
    controller
        .watches(
            Api::<Resource>::all(client.clone()),
            watcher_config(),
            move |source| {
                referencing(&resources, |c: &ConfiguredResource| {
                    source_ref(c, &c.spec.target, ArtifactSourceKind::Resource, &source)
                })
            },
        )
        .watches(
            Api::<LocalizedResource>::all(client.clone()),
            watcher_config(),
            move |source| {
                referencing(&localized, |c: &ConfiguredResource| {
                    source_ref(c, &c.spec.target, ArtifactSourceKind::LocalizedResource, &source)
                })
            },
        )
        .watches(
            Api::<ConfiguredResource>::all(client.clone()),
            watcher_config(),
            move |source| {
                referencing(&configured, |c: &ConfiguredResource| {
                    source_ref(c, &c.spec.target, ArtifactSourceKind::ConfiguredResource, &source)
                })
            },
        )
        .watches(
            Api::<ResourceConfig>::all(client.clone()),
            watcher_config(),
            move |config| {
                referencing(&configs, |c: &ConfiguredResource| {
                    local_ref(c, &c.spec.config.name, &config)
                })
            },
        )
}

fn deployer_controller(client: &Client) -> Controller<OCMDeployer> {
    let controller = Controller::new(Api::<OCMDeployer>::all(client.clone()), watcher_config());
    let (resources, localized, configured) =
        (controller.store(), controller.store(), controller.store());
    controller
        .watches(
            Api::<Resource>::all(client.clone()),
            watcher_config(),
            move |source| {
                referencing(&resources, |d: &OCMDeployer| {
                    source_ref(d, &d.spec.resource_ref, ArtifactSourceKind::Resource, &source)
                })
            },
        )
        .watches(
            Api::<LocalizedResource>::all(client.clone()),
            watcher_config(),
            move |source| {
                referencing(&localized, |d: &OCMDeployer| {
                    source_ref(d, &d.spec.resource_ref, ArtifactSourceKind::LocalizedResource, &source)
                })
            },
        )
        .watches(
            Api::<ConfiguredResource>::all(client.clone()),
            watcher_config(),
            move |source| {
                referencing(&configured, |d: &OCMDeployer| {
                    source_ref(d, &d.spec.resource_ref, ArtifactSourceKind::ConfiguredResource, &source)
                })
            },
        )
}

/// Run the controller built by `build` until shutdown, restarting its stream when it ends
async fn supervise<K, F>(build: F, ctx: Arc<Context>, server_state: Arc<ServerState>)
where
    K: Stage,
    F: Fn() -> Controller<K>,
{
    let kind = K::kind(&()).to_string();
    let restart_delay = ctx.config.watch_restart_delay();

    loop {
        if !server_state.is_ready() {
            break;
        }

        let watch_span = tracing::info_span!("controller.watch", kind = %kind);
        info!(parent: &watch_span, "Starting controller");
        let settings =
            ControllerSettings::default().concurrency(ctx.config.max_concurrent_reconciliations);
        build()
            .with_config(settings)
            .shutdown_on_signal()
            .run(reconcile::<K>, handle_reconciliation_error::<K>, Arc::clone(&ctx))
            .filter_map(|event| {
                let kind = kind.clone();
                async move {
                    let rendered = match &event {
                        Ok((object, _)) => {
                            debug!(kind = %kind, object = %object, "watch.event.reconciled");
                            None
                        }
                        Err(e) => Some(format!("{e:?}")),
                    };
                    match rendered {
                        None => Some(event),
                        Some(error) => handle_watch_stream_error(&kind, &error, restart_delay)
                            .await
                            .then_some(event),
                    }
                }
            })
            .for_each(|_| futures::future::ready(()))
            .await;

        if !server_state.is_ready() {
            break;
        }
        warn!(kind = %kind, "Controller stream ended, restarting in {:?}", restart_delay);
        tokio::time::sleep(restart_delay).await;
    }
    info!(kind = %kind, "Controller stopped");
}

/// Run every controller until a shutdown signal arrives
pub async fn run_watch_loop(
    client: Client,
    ctx: Arc<Context>,
    server_state: Arc<ServerState>,
) -> anyhow::Result<()> {
    let shutdown_state = Arc::clone(&server_state);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received shutdown signal, waiting for in-flight reconciliations");
            shutdown_state.set_ready(false);
        }
    });

    tokio::join!(
        supervise(
            || repository_controller(&client),
            Arc::clone(&ctx),
            Arc::clone(&server_state)
        ),
        supervise(
            || component_controller(&client),
            Arc::clone(&ctx),
            Arc::clone(&server_state)
        ),
        supervise(
            || resource_controller(&client),
            Arc::clone(&ctx),
            Arc::clone(&server_state)
        ),
        supervise(
            || localized_controller(&client),
            Arc::clone(&ctx),
            Arc::clone(&server_state)
        ),
        supervise(
            || configured_controller(&client),
            Arc::clone(&ctx),
            Arc::clone(&server_state)
        ),
        supervise(
            || deployer_controller(&client),
            Arc::clone(&ctx),
            Arc::clone(&server_state)
        ),
    );

    info!("Controllers stopped gracefully");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{OCMDeployerSpec, ResourceConfigSpec};

    fn named<K: kube::Resource>(mut object: K, namespace: &str) -> K {
        object.meta_mut().namespace = Some(namespace.to_string());
        object
    }

    fn deployer(reference: ArtifactSourceRef) -> OCMDeployer {
        named(
            OCMDeployer::new(
                "deploy",
                OCMDeployerSpec {
                    resource_ref: reference,
                    interval: "10m".to_string(),
                    suspend: false,
                },
            ),
            "apps",
        )
    }

    fn config(name: &str, namespace: &str) -> ResourceConfig {
        named(
            ResourceConfig::new(name, ResourceConfigSpec { rules: Vec::new() }),
            namespace,
        )
    }

    #[test]
    fn test_local_ref_requires_same_namespace() {
        let dependent = deployer(ArtifactSourceRef {
            kind: ArtifactSourceKind::Resource,
            name: "manifests".to_string(),
            namespace: None,
        });
        assert!(local_ref(&dependent, "settings", &config("settings", "apps")));
        assert!(!local_ref(&dependent, "settings", &config("settings", "other")));
        assert!(!local_ref(&dependent, "settings", &config("defaults", "apps")));
    }

    #[test]
    fn test_source_ref_matches_kind_and_namespace() {
        let changed = config("manifests", "shared");
        let explicit = deployer(ArtifactSourceRef {
            kind: ArtifactSourceKind::LocalizedResource,
            name: "manifests".to_string(),
            namespace: Some("shared".to_string()),
        });
        assert!(source_ref(
            &explicit,
            &explicit.spec.resource_ref,
            ArtifactSourceKind::LocalizedResource,
            &changed
        ));
        assert!(!source_ref(
            &explicit,
            &explicit.spec.resource_ref,
            ArtifactSourceKind::Resource,
            &changed
        ));

        let implicit = deployer(ArtifactSourceRef {
            kind: ArtifactSourceKind::LocalizedResource,
            name: "manifests".to_string(),
            namespace: None,
        });
        assert!(!source_ref(
            &implicit,
            &implicit.spec.resource_ref,
            ArtifactSourceKind::LocalizedResource,
            &changed
        ));
    }
}
