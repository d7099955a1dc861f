//! Shared domain types and error taxonomy for the Upstra orchestrator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// BMC (iLO/Redfish-style) credentials for one host's out-of-band management
/// interface. `password` is plaintext in memory; it is only ever encrypted
/// at the event-log serialization boundary, never here.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BmcCredentials {
    pub address: String,
    pub user: String,
    pub password: String,
}

/// A host as named in a plan document, before discovery against the
/// controller.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HostDescriptor {
    pub display_name: String,
    pub managed_id: String,
    pub bmc: BmcCredentials,
}

/// The run-wide status markers written alongside the forward/rollback
/// event stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunStatus {
    PowerFailure,
    StartMigration,
    EndMigration,
    StartRollback,
    EndRollback,
}

impl RunStatus {
    pub fn action(&self) -> &'static str {
        match self {
            RunStatus::PowerFailure => "POWER_FAILURE",
            RunStatus::StartMigration => "START_MIGRATION",
            RunStatus::EndMigration => "END_MIGRATION",
            RunStatus::StartRollback => "START_ROLLBACK",
            RunStatus::EndRollback => "END_ROLLBACK",
        }
    }
}

/// Which half of a run an event belongs to. Namespaces `entity_id` as
/// `{phase}_{run_id}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Phase {
    Forward,
    Rollback,
    Error,
}

impl Phase {
    pub fn prefix(&self) -> &'static str {
        match self {
            Phase::Forward => "migration",
            Phase::Rollback => "rollback",
            Phase::Error => "error",
        }
    }
}

/// The closed sum of durable event kinds. Each non-error variant has
/// exactly one inverse, dispatched in `upstra_core::rollback`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind")]
pub enum Event {
    VmStopped { vm_id: String, host_id: String },
    VmMigrated { vm_id: String, origin_host_id: String },
    VmStarted { vm_id: String, host_id: String },
    ServerStopped { host_id: String, bmc: BmcCredentials },
    ServerStarted { host_id: String },
    MigrationError { title: String, message: String },
}

impl Event {
    /// The `action` column value as written to the event log.
    pub fn action(&self) -> &'static str {
        match self {
            Event::VmStopped { .. } => "VM_STOPPED",
            Event::VmMigrated { .. } => "VM_MIGRATED",
            Event::VmStarted { .. } => "VM_STARTED",
            Event::ServerStopped { .. } => "SERVER_STOPPED",
            Event::ServerStarted { .. } => "SERVER_STARTED",
            Event::MigrationError { .. } => "MIGRATION_ERROR",
        }
    }
}

/// One row as it comes back out of the event log, action/payload already
/// reunited with its phase and timestamp.
#[derive(Debug, Clone)]
pub struct LoggedEvent {
    pub run_id: String,
    pub phase: Phase,
    pub event: Event,
    pub created_at: DateTime<Utc>,
}

/// The orchestrator's error taxonomy. Transient remote, logical
/// precondition, and authentication failures never surface as this type
/// — they are reified as `Event::MigrationError` inside the engines.
/// Only durability and configuration failures become `Error`, and both
/// are fatal: they propagate via `?` out of a binary's `main`.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("host not found: {0}")]
    HostNotFound(String),

    #[error("vm not found: {0}")]
    VmNotFound(String),

    #[error("invalid plan: {0}")]
    InvalidPlan(String),

    #[error("invalid controller credentials")]
    InvalidCredentials,

    #[error("decryption failed: {0}")]
    Decryption(String),

    #[error("event log durability failure: {0}")]
    Durability(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_action_names_are_stable_strings() {
        assert_eq!(
            Event::VmStopped { vm_id: "v1".into(), host_id: "h1".into() }.action(),
            "VM_STOPPED"
        );
        assert_eq!(
            Event::MigrationError { title: "t".into(), message: "m".into() }.action(),
            "MIGRATION_ERROR"
        );
    }

    #[test]
    fn phase_prefixes_are_stable_strings() {
        assert_eq!(Phase::Forward.prefix(), "migration");
        assert_eq!(Phase::Rollback.prefix(), "rollback");
        assert_eq!(Phase::Error.prefix(), "error");
    }

    #[test]
    fn run_status_actions_are_stable_strings() {
        assert_eq!(RunStatus::EndRollback.action(), "END_ROLLBACK");
        assert_eq!(RunStatus::StartRollback.action(), "START_ROLLBACK");
    }

    #[test]
    fn event_roundtrips_through_json() {
        let ev = Event::ServerStopped {
            host_id: "h1".into(),
            bmc: BmcCredentials {
                address: "10.0.0.5".into(),
                user: "admin".into(),
                password: "secret".into(),
            },
        };
        let json = serde_json::to_string(&ev).unwrap();
        let back: Event = serde_json::from_str(&json).unwrap();
        assert_eq!(ev, back);
    }
}
