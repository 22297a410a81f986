//! # Reconciliation State Machine
//!
//! One generic driver for every kind. Per invocation:
//!
//! 1. `spec.suspend` set: nothing happens, no status write, wait for a change
//! 2. Deletion timestamp set: run the kind's cleanup, then drop the finalizer
//! 3. Otherwise ensure the finalizer, run the kind's stage and classify:
//!    - success: full status with `Ready=True`, requeue after `spec.interval`
//!    - waiting: `Ready=False`, requeue after the dependency delay
//!    - retryable: `Ready=False`, error handed to `error_policy` for backoff
//!    - non-retryable: `Ready=False`, no requeue until the spec changes

use crate::constants::{FIELD_MANAGER, FINALIZER};
use crate::controller::context::Context;
use crate::controller::duration::parse_duration;
use crate::controller::error::{reasons, ErrorKind, ReasonExt, ReconcileError};
use crate::controller::status::{current_status, failure_status, success_status, write_status};
use crate::crd::Reconcilable;
use crate::observability;
use async_trait::async_trait;
use k8s_openapi::NamespaceResourceScope;
use kube::api::{Patch, PatchParams};
use kube::{Api, Resource, ResourceExt};
use kube_runtime::controller::Action;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use std::fmt::Debug;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, info_span, warn, Instrument};

/// Result of a successful stage run
#[derive(Debug, Clone)]
pub struct StageOutcome {
    /// Kind-specific status fields; conditions are added by the driver
    pub status: Value,
    /// Overrides the requeue after `spec.interval`
    pub requeue_after: Option<Duration>,
    /// Message of the `Ready` condition
    pub message: String,
}

impl StageOutcome {
    pub fn new(status: &impl Serialize, message: impl Into<String>) -> Result<Self, ReconcileError> {
        Ok(Self {
            status: serde_json::to_value(status).reason(reasons::STATUS_UPDATE_FAILED)?,
            requeue_after: None,
            message: message.into(),
        })
    }

    #[must_use]
    pub fn requeue_after(mut self, after: Duration) -> Self {
        self.requeue_after = Some(after);
        self
    }
}

/// Kind-specific reconciliation work
#[async_trait]
pub trait Stage:
    Resource<DynamicType = (), Scope = NamespaceResourceScope>
    + Reconcilable
    + Clone
    + Serialize
    + DeserializeOwned
    + Debug
    + Send
    + Sync
    + 'static
{
    async fn run(&self, ctx: &Context) -> Result<StageOutcome, ReconcileError>;

    /// Cleanup before the finalizer is removed
    async fn finalize(&self, _ctx: &Context) -> Result<(), ReconcileError> {
        Ok(())
    }
}

/// What the runtime should do after a reconciliation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Requeue {
    After(Duration),
    AwaitChange,
    /// Hand the error to `error_policy`
    Backoff,
}

pub fn requeue_for(outcome: Result<Duration, ErrorKind>, dependency_requeue: Duration) -> Requeue {
    match outcome {
        Ok(interval) => Requeue::After(interval),
        Err(ErrorKind::Waiting) => Requeue::After(dependency_requeue),
        Err(ErrorKind::Retryable) => Requeue::Backoff,
        Err(ErrorKind::NonRetryable) => Requeue::AwaitChange,
    }
}

/// Parsed `spec.interval`
pub fn interval_of<K: Reconcilable>(object: &K) -> Result<Duration, ReconcileError> {
    parse_duration(object.interval()).map_err(|e| {
        ReconcileError::non_retryable(reasons::INVALID_SPEC, format!("spec.interval: {e}"))
    })
}

/// Key identifying an object across kinds, used for backoff state
pub fn object_key<K: Resource<DynamicType = ()>>(object: &K) -> String {
    format!(
        "{}/{}/{}",
        K::kind(&()),
        object.namespace().unwrap_or_default(),
        object.name_any()
    )
}

fn patch_params() -> PatchParams {
    PatchParams {
        field_manager: Some(FIELD_MANAGER.to_string()),
        ..PatchParams::default()
    }
}

async fn set_finalizers<K: Stage>(
    api: &Api<K>,
    object: &K,
    finalizers: Vec<String>,
) -> Result<K, ReconcileError> {
    let patch = json!({
        "metadata": {
            "finalizers": finalizers,
            "resourceVersion": object.resource_version(),
        }
    });
    api.patch(&object.name_any(), &patch_params(), &Patch::Merge(&patch))
        .await
        .reason(reasons::STATUS_UPDATE_FAILED)
}

async fn delete<K: Stage>(api: &Api<K>, object: &K, ctx: &Context) -> Result<Action, ReconcileError> {
    if !object.finalizers().iter().any(|f| f == FINALIZER) {
        return Ok(Action::await_change());
    }
    info!("Running cleanup before deletion");
    object.finalize(ctx).await?;

    let remaining: Vec<String> = object
        .finalizers()
        .iter()
        .filter(|f| *f != FINALIZER)
        .cloned()
        .collect();
    set_finalizers(api, object, remaining).await?;
    info!("Finalizer removed");
    Ok(Action::await_change())
}

async fn run_stage<K: Stage>(object: &K, ctx: &Context) -> Result<(StageOutcome, Duration), ReconcileError> {
    let interval = interval_of(object)?;
    let outcome = object.run(ctx).await?;
    Ok((outcome, interval))
}

/// Drive one reconciliation of `object`
pub async fn reconcile<K: Stage>(object: Arc<K>, ctx: Arc<Context>) -> Result<Action, ReconcileError> {
    let kind = K::kind(&()).to_string();
    let name = object.name_any();
    let namespace = object.namespace().unwrap_or_default();
    let span = info_span!("reconcile", kind = %kind, name = %name, namespace = %namespace);

    async move {
        let start = Instant::now();
        observability::increment_reconciliations(&kind);

        if object.suspended() {
            info!("Reconciliation suspended");
            return Ok(Action::await_change());
        }

        let api = Api::<K>::namespaced(ctx.client.clone(), &namespace);

        if object.meta().deletion_timestamp.is_some() {
            return delete(&api, object.as_ref(), &ctx).await;
        }

        let object = if object.finalizers().iter().any(|f| f == FINALIZER) {
            object
        } else {
            debug!("Adding finalizer");
            let mut finalizers = object.finalizers().to_vec();
            finalizers.push(FINALIZER.to_string());
            Arc::new(set_finalizers(&api, object.as_ref(), finalizers).await?)
        };

        let generation = object.meta().generation;
        let current = current_status(object.as_ref());

        match run_stage(object.as_ref(), &ctx).await {
            Ok((outcome, interval)) => {
                let desired = success_status(&current, outcome.status, &outcome.message, generation);
                write_status(&api, object.as_ref(), desired).await?;
                ctx.reset_backoff(&object_key(object.as_ref()));

                let requeue = outcome.requeue_after.unwrap_or(interval);
                observability::observe_reconciliation_duration(&kind, start.elapsed().as_secs_f64());
                observability::increment_requeues_total("timer-based");
                info!(
                    message = %outcome.message,
                    requeue_after_secs = requeue.as_secs(),
                    "Reconciliation succeeded"
                );
                Ok(Action::requeue(requeue))
            }
            Err(error) => {
                observability::increment_reconciliation_errors(&kind, error.reason);
                let desired = failure_status(&current, &error, generation);
                write_status(&api, object.as_ref(), desired).await?;

                match requeue_for(Err(error.kind), ctx.config.dependency_requeue()) {
                    Requeue::After(delay) => {
                        info!(reason = error.reason, message = %error.message, "Waiting for dependency");
                        observability::increment_requeues_total("dependency");
                        Ok(Action::requeue(delay))
                    }
                    Requeue::AwaitChange => {
                        warn!(
                            reason = error.reason,
                            message = %error.message,
                            "Reconciliation failed, waiting for a spec change"
                        );
                        Ok(Action::await_change())
                    }
                    Requeue::Backoff => Err(error),
                }
            }
        }
    }
    .instrument(span)
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::MemoryArtifactStore;
    use crate::config::ControllerConfig;
    use crate::crd::{OCMRepository, OCMRepositorySpec, RepositorySpec};
    use crate::ocm::effective::MemoryObjectReader;
    use crate::ocm::repository::{InMemoryRepository, StaticRepositoryProvider};
    use http::{Method, Request, Response};
    use kube::client::Body;
    use kube::Client;
    use tower_test::mock::{self, Handle};

    type ApiServer = Handle<Request<Body>, Response<Body>>;

    #[test]
    fn test_requeue_classification() {
        let dependency = Duration::from_secs(10);
        let interval = Duration::from_secs(600);
        assert_eq!(requeue_for(Ok(interval), dependency), Requeue::After(interval));
        assert_eq!(
            requeue_for(Err(ErrorKind::Waiting), dependency),
            Requeue::After(dependency)
        );
        assert_eq!(requeue_for(Err(ErrorKind::Retryable), dependency), Requeue::Backoff);
        assert_eq!(
            requeue_for(Err(ErrorKind::NonRetryable), dependency),
            Requeue::AwaitChange
        );
    }

    fn repository(interval: &str) -> OCMRepository {
        let mut repository = OCMRepository::new(
            "ghcr",
            OCMRepositorySpec {
                repository_spec: RepositorySpec::oci("ghcr.io/acme"),
                secret_ref: None,
                secret_refs: Vec::new(),
                config_ref: None,
                config_refs: Vec::new(),
                config_set: None,
                interval: interval.to_string(),
                suspend: false,
            },
        );
        repository.metadata.namespace = Some("team-a".to_string());
        repository
    }

    #[test]
    fn test_interval_of() {
        assert_eq!(interval_of(&repository("1h30m")).unwrap(), Duration::from_secs(5400));
        let error = interval_of(&repository("soon")).unwrap_err();
        assert_eq!(error.kind, ErrorKind::NonRetryable);
        assert_eq!(error.reason, reasons::INVALID_SPEC);
    }

    #[test]
    fn test_object_key() {
        assert_eq!(object_key(&repository("10m")), "OCMRepository/team-a/ghcr");
    }

    #[test]
    fn test_stage_outcome_override() {
        let outcome = StageOutcome::new(&json!({"deployed": []}), "applied")
            .unwrap()
            .requeue_after(Duration::from_secs(30));
        assert_eq!(outcome.requeue_after, Some(Duration::from_secs(30)));
        assert_eq!(outcome.message, "applied");
    }

    fn context(repository: InMemoryRepository) -> (Arc<Context>, ApiServer) {
        let (service, server) = mock::pair::<Request<Body>, Response<Body>>();
        let mut ctx = Context::new(
            Client::new(service, "default"),
            Arc::new(StaticRepositoryProvider(Arc::new(repository))),
            Arc::new(MemoryArtifactStore::new()),
            Arc::new(ControllerConfig::default()),
        );
        ctx.reader = Arc::new(MemoryObjectReader::default());
        (Arc::new(ctx), server)
    }

    /// Repository as the API server would return it
    fn stored(interval: &str, finalizers: &[&str]) -> OCMRepository {
        let mut repository = repository(interval);
        repository.metadata.resource_version = Some("7".to_string());
        repository.metadata.generation = Some(2);
        repository.metadata.finalizers = Some(finalizers.iter().map(|f| f.to_string()).collect());
        repository
    }

    fn object_path(suffix: &str) -> String {
        format!("{}/ghcr{suffix}", OCMRepository::url_path(&(), Some("team-a")))
    }

    /// Answer the next request, which must be a PATCH, with `object`
    async fn expect_patch(server: &mut ApiServer, object: &OCMRepository) -> (String, Value) {
        let (request, send) = server.next_request().await.expect("no request sent");
        assert_eq!(request.method(), Method::PATCH);
        let path = request.uri().path().to_string();
        let body = request.into_body().collect_bytes().await.unwrap();
        send.send_response(
            Response::builder()
                .body(Body::from(serde_json::to_vec(object).unwrap()))
                .unwrap(),
        );
        (path, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn test_suspended_object_is_left_alone() {
        let mut object = stored("10m", &[FINALIZER]);
        object.spec.suspend = true;
        let (ctx, mut server) = context(InMemoryRepository::new());

        let action = tokio::time::timeout(Duration::from_secs(5), reconcile(Arc::new(object), ctx))
            .await
            .expect("suspended reconcile waited on the API server")
            .unwrap();
        assert_eq!(action, Action::await_change());

        let pending = tokio::time::timeout(Duration::from_millis(100), server.next_request()).await;
        assert!(!matches!(pending, Ok(Some(_))), "suspended reconcile sent a request");
    }

    #[tokio::test]
    async fn test_deletion_runs_cleanup_and_drops_finalizer() {
        let mut object = stored("10m", &[FINALIZER, "example.com/keep"]);
        object.metadata.deletion_timestamp =
            serde_json::from_value(json!("2024-01-01T00:00:00Z")).unwrap();
        let (ctx, mut server) = context(InMemoryRepository::new());
        let task = tokio::spawn(reconcile(Arc::new(object.clone()), ctx));

        let mut released = object.clone();
        released.metadata.finalizers = Some(vec!["example.com/keep".to_string()]);
        let (path, body) = expect_patch(&mut server, &released).await;
        assert_eq!(path, object_path(""));
        assert_eq!(body["metadata"]["finalizers"], json!(["example.com/keep"]));
        assert_eq!(body["metadata"]["resourceVersion"], "7");

        assert_eq!(task.await.unwrap().unwrap(), Action::await_change());
    }

    #[tokio::test]
    async fn test_success_adds_finalizer_then_reports_ready() {
        let object = stored("10m", &[]);
        let (ctx, mut server) = context(InMemoryRepository::new());
        let task = tokio::spawn(reconcile(Arc::new(object.clone()), ctx));

        let mut finalized = object.clone();
        finalized.metadata.finalizers = Some(vec![FINALIZER.to_string()]);
        let (path, body) = expect_patch(&mut server, &finalized).await;
        assert_eq!(path, object_path(""));
        assert_eq!(body["metadata"]["finalizers"], json!([FINALIZER]));

        let (path, body) = expect_patch(&mut server, &finalized).await;
        assert_eq!(path, object_path("/status"));
        assert_eq!(body["status"]["conditions"][0]["status"], "True");
        assert_eq!(body["status"]["observedGeneration"], 2);

        assert_eq!(
            task.await.unwrap().unwrap(),
            Action::requeue(Duration::from_secs(600))
        );
    }

    #[tokio::test]
    async fn test_non_retryable_failure_waits_for_spec_change() {
        let object = stored("soon", &[FINALIZER]);
        let (ctx, mut server) = context(InMemoryRepository::new());
        let task = tokio::spawn(reconcile(Arc::new(object.clone()), ctx));

        let (path, body) = expect_patch(&mut server, &object).await;
        assert_eq!(path, object_path("/status"));
        let ready = &body["status"]["conditions"][0];
        assert_eq!(ready["type"], "Ready");
        assert_eq!(ready["status"], "False");
        assert_eq!(ready["reason"], reasons::INVALID_SPEC);

        assert_eq!(task.await.unwrap().unwrap(), Action::await_change());
    }

    #[tokio::test]
    async fn test_retryable_failure_is_handed_to_backoff() {
        let object = stored("10m", &[FINALIZER]);
        let (ctx, mut server) = context(InMemoryRepository::new().unavailable());
        let task = tokio::spawn(reconcile(Arc::new(object.clone()), ctx));

        let (path, body) = expect_patch(&mut server, &object).await;
        assert_eq!(path, object_path("/status"));
        assert_eq!(body["status"]["conditions"][0]["status"], "False");
        assert_eq!(
            body["status"]["conditions"][0]["reason"],
            reasons::REPOSITORY_UNAVAILABLE
        );

        let error = task.await.unwrap().unwrap_err();
        assert_eq!(error.kind, ErrorKind::Retryable);
        assert_eq!(error.reason, reasons::REPOSITORY_UNAVAILABLE);
    }
}
