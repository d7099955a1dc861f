//! Core engine library for the Upstra power-failure orchestrator.
//!
//! `shutdown` and `rollback` are the two entry points the CLI binaries
//! drive; everything else (`vcenter`, `bmc`, `eventlog`, `secrets`,
//! `plan`) is a collaborator they depend on.

pub mod bmc;
pub mod config;
pub mod eventlog;
pub mod logging;
pub mod metrics;
pub mod plan;
pub mod rollback;
pub mod secrets;
pub mod shutdown;
pub mod ups;
pub mod vcenter;

pub use upstra_common::{Error, Result};
