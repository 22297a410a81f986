//! # Error Policy
//!
//! Backoff for failed reconciliations and classification of watch stream errors.

use crate::controller::backoff::BackoffState;
use crate::controller::state_machine::{object_key, Stage};
use crate::controller::{Context, ReconcileError};
use crate::observability;
use kube_runtime::controller::Action;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{error, info, warn};

/// Fallback when the backoff table cannot be locked
const DEFAULT_BACKOFF_SECS: u64 = 60;

/// Advance the backoff of `key`, returning the delay and the error count
pub fn next_backoff(
    states: &Mutex<HashMap<String, BackoffState>>,
    key: &str,
    min_secs: u64,
    max_secs: u64,
) -> (u64, u32) {
    match states.lock() {
        Ok(mut states) => {
            let state = states
                .entry(key.to_string())
                .or_insert_with(|| BackoffState::new(min_secs, max_secs));
            state.increment_error();
            (state.backoff.next_backoff_seconds(), state.error_count)
        }
        Err(e) => {
            warn!("Failed to lock backoff states: {}, using default backoff", e);
            (DEFAULT_BACKOFF_SECS, 0)
        }
    }
}

/// Requeue a retryable failure with Fibonacci backoff tracked per object
///
/// Waiting and non-retryable outcomes never reach this policy; the state
/// machine turns them into actions itself.
pub fn handle_reconciliation_error<K: Stage>(
    object: Arc<K>,
    error: &ReconcileError,
    ctx: Arc<Context>,
) -> Action {
    let key = object_key(object.as_ref());
    let (backoff_secs, error_count) = next_backoff(
        &ctx.backoff_states,
        &key,
        ctx.config.backoff_min_secs,
        ctx.config.backoff_max_secs,
    );

    error!(object = %key, reason = error.reason, error = %error.message, "Reconciliation failed");
    info!(
        object = %key,
        error_count,
        "Retrying in {}s (trigger source: error-backoff)",
        backoff_secs
    );
    observability::increment_requeues_total("error-backoff");
    Action::requeue(Duration::from_secs(backoff_secs))
}

/// How a watch stream error is handled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchErrorClass {
    /// RBAC revoked or token expired
    Unauthorized,
    /// Resource version too old
    Expired,
    /// API server throttling or storage reinitializing
    Throttled,
    /// Object or CRD missing
    NotFound,
    Other,
}

impl WatchErrorClass {
    /// Classify a rendered controller error. 404 is checked before 401 since a
    /// plain-text 404 body surfaces as a failed watch.
    pub fn classify(error: &str) -> Self {
        let not_found =
            error.contains("ObjectNotFound") || error.contains("404") || error.contains("not found");
        if not_found {
            WatchErrorClass::NotFound
        } else if error.contains("401") || error.contains("Unauthorized") {
            WatchErrorClass::Unauthorized
        } else if error.contains("410")
            || error.contains("too old resource version")
            || error.contains("Expired")
            || error.contains("Gone")
        {
            WatchErrorClass::Expired
        } else if error.contains("429")
            || error.contains("storage is (re)initializing")
            || error.contains("TooManyRequests")
        {
            WatchErrorClass::Throttled
        } else {
            WatchErrorClass::Other
        }
    }
}

/// Handle a controller stream error
///
/// Sleeps where the API server needs time, then reports whether the event
/// should be kept (`true`) or dropped.
pub async fn handle_watch_stream_error(kind: &str, error: &str, restart_delay: Duration) -> bool {
    match WatchErrorClass::classify(error) {
        WatchErrorClass::NotFound => {
            warn!(kind, error, "Watched object not found (404), the CRD may be missing");
            true
        }
        WatchErrorClass::Unauthorized => {
            error!(
                kind,
                "Watch authentication failed (401), check the controller's ClusterRole and ServiceAccount"
            );
            tokio::time::sleep(restart_delay).await;
            false
        }
        WatchErrorClass::Expired => {
            warn!(kind, "Watch resource version expired (410), watch will restart");
            false
        }
        WatchErrorClass::Throttled => {
            warn!(kind, "API server throttling (429), backing off for {:?}", restart_delay);
            tokio::time::sleep(restart_delay).await;
            false
        }
        WatchErrorClass::Other => {
            error!(kind, error, "Controller stream error");
            tokio::time::sleep(restart_delay).await;
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_grows_per_object() {
        let states = Mutex::new(HashMap::new());
        let first: Vec<u64> = (0..4)
            .map(|_| next_backoff(&states, "Component/default/app", 5, 300).0)
            .collect();
        assert!(first.windows(2).all(|w| w[0] <= w[1]));
        assert!(first.iter().all(|s| (5..=300).contains(s)));

        let (other, count) = next_backoff(&states, "Component/default/other", 5, 300);
        assert_eq!(other, first[0]);
        assert_eq!(count, 1);
        assert_eq!(next_backoff(&states, "Component/default/app", 5, 300).1, 5);
    }

    #[test]
    fn test_watch_error_classification() {
        assert_eq!(
            WatchErrorClass::classify("ApiError: Unauthorized (401)"),
            WatchErrorClass::Unauthorized
        );
        assert_eq!(
            WatchErrorClass::classify("WatchFailed: invalid type: integer `404`"),
            WatchErrorClass::NotFound
        );
        assert_eq!(
            WatchErrorClass::classify("too old resource version: 123 (456)"),
            WatchErrorClass::Expired
        );
        assert_eq!(
            WatchErrorClass::classify("storage is (re)initializing"),
            WatchErrorClass::Throttled
        );
        assert_eq!(WatchErrorClass::classify("connection reset"), WatchErrorClass::Other);
    }
}
