//! # Controller
//!
//! Reconciliation machinery shared by every kind.
//!
//! - `backoff`: Fibonacci backoff for retryable errors
//! - `context`: collaborators handed to each reconciliation
//! - `duration`: interval parsing
//! - `error`: error classification and condition reasons
//! - `stages`: the per-kind work
//! - `state_machine`: suspend, finalizers, status and requeue around a stage
//! - `status`: Ready condition and status patch helpers

pub mod backoff;
pub mod context;
pub mod duration;
pub mod error;
pub mod stages;
pub mod state_machine;
pub mod status;

pub use context::Context;
pub use error::{ErrorKind, ReconcileError};
pub use state_machine::{reconcile, Stage, StageOutcome};
