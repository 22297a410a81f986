//! # OCM Controller Library
//!
//! - `crd`: the served kinds
//! - `ocm`: descriptors, repositories, versions, signatures and effective configuration
//! - `artifact`: artifact storage and archive handling
//! - `localization`: localization and configuration rules
//! - `oci`: OCI distribution client
//! - `controller`: the reconciliation state machine and per-kind stages
//! - `runtime`: startup and controller loops

pub mod artifact;
pub mod config;
pub mod constants;
pub mod controller;
pub mod crd;
pub mod localization;
pub mod observability;
pub mod oci;
pub mod ocm;
pub mod runtime;
pub mod server;
