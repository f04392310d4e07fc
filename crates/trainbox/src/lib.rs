//! Trainbox: provisioning and operations for a single multi-tenant GPU
//! training host.
//!
//! The library is consumed by the `trainbox` binary and the integration
//! tests. Modules map to the operator surface: validate the host, register
//! users against the allocation registry, generate the compose manifest,
//! drive the container runtime, and keep storage, backups and alerting
//! running.

pub mod alert;
pub mod backup;
pub mod compose;
pub mod config;
pub mod probe;
pub mod registry;
pub mod runtime;
pub mod storage;
pub mod system;
pub mod validate;
