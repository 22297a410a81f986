//! # Runtime
//!
//! Process wiring: startup, the per-kind controller loops and their error policy.

pub mod error_policy;
pub mod initialization;
pub mod watch_loop;
