//! # Status Updates
//!
//! Builds the `Ready` condition and writes status through merge patches that
//! carry `metadata.resourceVersion`, so a concurrent writer surfaces as a 409
//! conflict instead of being overwritten.
//!
//! A patch is only sent when the desired status differs from the current one;
//! an unchanged status would still bump the resource version and trigger a
//! watch event for every reconciliation.

use crate::constants::FIELD_MANAGER;
use crate::controller::error::{reasons, ReasonExt, ReconcileError};
use crate::crd::Condition;
use kube::api::{Patch, PatchParams};
use kube::{Api, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::fmt::Debug;
use tracing::debug;

pub const READY: &str = "Ready";

/// Build the `Ready` condition, keeping the previous transition time when the
/// status did not flip
pub fn ready_condition(
    previous: &[Condition],
    ready: bool,
    reason: &str,
    message: &str,
    generation: Option<i64>,
) -> Condition {
    let status = if ready { "True" } else { "False" };
    let last_transition_time = previous
        .iter()
        .find(|c| c.r#type == READY && c.status == status)
        .and_then(|c| c.last_transition_time.clone())
        .or_else(|| Some(chrono::Utc::now().to_rfc3339()));

    Condition {
        r#type: READY.to_string(),
        status: status.to_string(),
        last_transition_time,
        reason: Some(reason.to_string()),
        message: Some(message.to_string()),
        observed_generation: generation,
    }
}

/// Replace the condition of the same type, or append it
pub fn set_condition(conditions: &mut Vec<Condition>, condition: Condition) {
    match conditions.iter_mut().find(|c| c.r#type == condition.r#type) {
        Some(existing) => *existing = condition,
        None => conditions.push(condition),
    }
}

/// Current status of `object` as JSON, `null` when unset
pub fn current_status<K: Serialize>(object: &K) -> Value {
    serde_json::to_value(object)
        .ok()
        .and_then(|mut v| v.get_mut("status").map(Value::take))
        .unwrap_or(Value::Null)
}

fn conditions_of(status: &Value) -> Vec<Condition> {
    status
        .get("conditions")
        .cloned()
        .and_then(|c| serde_json::from_value(c).ok())
        .unwrap_or_default()
}

fn with_condition(mut status: Value, condition: Condition, generation: Option<i64>) -> Value {
    if !status.is_object() {
        status = Value::Object(Map::new());
    }
    let mut conditions = conditions_of(&status);
    set_condition(&mut conditions, condition);
    if let Value::Object(map) = &mut status {
        map.insert("conditions".to_string(), json!(conditions));
        match generation {
            Some(generation) => map.insert("observedGeneration".to_string(), json!(generation)),
            None => map.remove("observedGeneration"),
        };
    }
    status
}

/// Status after a successful stage: the stage's status plus `Ready=True`
pub fn success_status(
    current: &Value,
    stage_status: Value,
    message: &str,
    generation: Option<i64>,
) -> Value {
    let condition = ready_condition(&conditions_of(current), true, reasons::SUCCEEDED, message, generation);
    let mut status = stage_status;
    if let (Value::Object(map), Some(existing)) = (&mut status, current.get("conditions")) {
        // Conditions other than Ready are owned by nobody else; keep them
        map.insert("conditions".to_string(), existing.clone());
    }
    with_condition(status, condition, generation)
}

/// Status after a failed stage: the current status with `Ready=False`
pub fn failure_status(current: &Value, error: &ReconcileError, generation: Option<i64>) -> Value {
    let condition = ready_condition(
        &conditions_of(current),
        false,
        error.reason,
        &error.message,
        generation,
    );
    with_condition(current.clone(), condition, generation)
}

/// Set every key present in `existing` but missing from `desired` to `null`,
/// so a merge patch removes it
pub fn nullify_removed(existing: &Value, desired: &mut Value) {
    if let (Value::Object(existing), Value::Object(desired)) = (existing, desired) {
        for (key, old) in existing {
            match desired.get_mut(key) {
                Some(new) => nullify_removed(old, new),
                None => {
                    desired.insert(key.clone(), Value::Null);
                }
            }
        }
    }
}

/// The merge patch turning `current` into `desired`, `None` when equal
pub fn status_patch(current: &Value, desired: &Value) -> Option<Value> {
    if current == desired {
        return None;
    }
    let mut patch = desired.clone();
    nullify_removed(current, &mut patch);
    Some(patch)
}

/// Write `desired` as the status of `object`.
///
/// Returns whether a patch was sent.
pub async fn write_status<K>(api: &Api<K>, object: &K, desired: Value) -> Result<bool, ReconcileError>
where
    K: Resource<DynamicType = ()> + Clone + Serialize + DeserializeOwned + Debug,
{
    let current = current_status(object);
    let Some(patch) = status_patch(&current, &desired) else {
        debug!("Skipping status update - status unchanged");
        return Ok(false);
    };

    let body = json!({
        "metadata": { "resourceVersion": object.resource_version() },
        "status": patch,
    });
    let params = PatchParams {
        field_manager: Some(FIELD_MANAGER.to_string()),
        ..PatchParams::default()
    };
    api.patch_status(&object.name_any(), &params, &Patch::Merge(&body))
        .await
        .reason(reasons::STATUS_UPDATE_FAILED)?;
    Ok(true)
}
