//! Event log (C5): the durable, append-only, per-run timeline with
//! status markers.
//!
//! Single relational table (`history_event`: `entity`, `entity_id`,
//! `action`, `metadata`, `actor`, `created_at`) over a `SqlitePool`,
//! with an idempotent `CREATE TABLE IF NOT EXISTS` schema init run once
//! at startup and manual row-to-struct mapping rather than compile-time
//! query macros.

use chrono::{DateTime, TimeZone, Utc};
use sqlx::{Row, SqlitePool};
use std::path::{Path, PathBuf};

use upstra_common::{Error, Event, LoggedEvent, Phase, Result, RunStatus};

use crate::secrets;

const ACTOR: &str = "UPSTRA";

pub struct EventLog {
    pool: SqlitePool,
    pointer_path: PathBuf,
    master_key: String,
}

impl EventLog {
    pub async fn connect(database_url: &str, pointer_path: impl AsRef<Path>, master_key: String) -> Result<Self> {
        if let Some(path) = database_url.strip_prefix("sqlite://") {
            if let Some(parent) = Path::new(path).parent() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let pool = SqlitePool::connect(database_url)
            .await
            .map_err(|e| Error::Durability(format!("connect: {e}")))?;
        let log = Self { pool, pointer_path: pointer_path.as_ref().to_path_buf(), master_key };
        log.init_schema().await?;
        Ok(log)
    }

    async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS history_event (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                entity TEXT NOT NULL,
                entity_id TEXT NOT NULL,
                action TEXT NOT NULL,
                metadata TEXT,
                actor TEXT NOT NULL,
                created_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| Error::Durability(format!("init schema: {e}")))?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_history_event_entity_id ON history_event(entity_id)")
            .execute(&self.pool)
            .await
            .map_err(|e| Error::Durability(format!("init index: {e}")))?;

        Ok(())
    }

    /// Reads the pointer file, if present. Absence means "no run in
    /// progress".
    pub fn current_run_id(&self) -> Result<Option<String>> {
        match std::fs::read_to_string(&self.pointer_path) {
            Ok(contents) => Ok(Some(contents.trim().to_string())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::Io(e)),
        }
    }

    fn write_pointer(&self, run_id: &str) -> Result<()> {
        if let Some(parent) = self.pointer_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.pointer_path, run_id)?;
        Ok(())
    }

    /// Creates or loads the run id from the pointer file (written before
    /// the first status marker — the single durability seam per spec
    /// §9), and writes a `START_MIGRATION` marker.
    pub async fn begin_run(&self) -> Result<String> {
        let run_id = match self.current_run_id()? {
            Some(id) => id,
            None => {
                let id = uuid::Uuid::new_v4().to_string();
                self.write_pointer(&id)?;
                id
            }
        };
        self.mark_status(&run_id, Phase::Forward, RunStatus::StartMigration).await?;
        Ok(run_id)
    }

    /// Records the initial `POWER_FAILURE` marker, creating the run if
    /// none exists yet.
    pub async fn record_power_failure(&self) -> Result<String> {
        let run_id = match self.current_run_id()? {
            Some(id) => id,
            None => {
                let id = uuid::Uuid::new_v4().to_string();
                self.write_pointer(&id)?;
                id
            }
        };
        self.mark_status(&run_id, Phase::Forward, RunStatus::PowerFailure).await?;
        Ok(run_id)
    }

    /// Appends one event row. Encrypts the BMC password field of
    /// `ServerStopped` payloads before the row is serialized — it is
    /// never written to disk in cleartext.
    pub async fn append(&self, run_id: &str, phase: Phase, event: &Event) -> Result<()> {
        let metadata = self.serialize_event(event)?;
        let entity_id = format!("{}_{}", phase.prefix(), run_id);

        sqlx::query(
            "INSERT INTO history_event (entity, entity_id, action, metadata, actor, created_at) VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind("migration")
        .bind(entity_id)
        .bind(event.action())
        .bind(metadata)
        .bind(ACTOR)
        .bind(Utc::now().timestamp())
        .execute(&self.pool)
        .await
        .map_err(|e| Error::Durability(format!("append: {e}")))?;

        Ok(())
    }

    /// Writes a run-wide status marker (`POWER_FAILURE`, `START_MIGRATION`,
    /// `END_MIGRATION`, `START_ROLLBACK`, `END_ROLLBACK`).
    pub async fn mark_status(&self, run_id: &str, phase: Phase, status: RunStatus) -> Result<()> {
        let entity_id = format!("{}_{}", phase.prefix(), run_id);
        sqlx::query(
            "INSERT INTO history_event (entity, entity_id, action, metadata, actor, created_at) VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind("migration")
        .bind(entity_id)
        .bind(status.action())
        .bind(Option::<String>::None)
        .bind(ACTOR)
        .bind(Utc::now().timestamp())
        .execute(&self.pool)
        .await
        .map_err(|e| Error::Durability(format!("mark_status: {e}")))?;
        Ok(())
    }

    /// Forward-phase events for `run_id`, in insertion order.
    pub async fn read_forward(&self, run_id: &str) -> Result<Vec<LoggedEvent>> {
        self.read_events(Phase::Forward, run_id, false).await
    }

    /// Forward-phase events for `run_id`, in reverse insertion order —
    /// what the rollback engine replays.
    pub async fn read_for_rollback(&self, run_id: &str) -> Result<Vec<LoggedEvent>> {
        self.read_events(Phase::Forward, run_id, true).await
    }

    /// `MigrationError` events for `run_id`, in insertion order. Segregated
    /// from the forward/rollback streams under `error_<run_id>` so replay
    /// never picks them up.
    pub async fn read_errors(&self, run_id: &str) -> Result<Vec<LoggedEvent>> {
        self.read_events(Phase::Error, run_id, false).await
    }

    async fn read_events(&self, phase: Phase, run_id: &str, reverse: bool) -> Result<Vec<LoggedEvent>> {
        let entity_id = format!("{}_{}", phase.prefix(), run_id);
        let order = if reverse { "DESC" } else { "ASC" };
        let sql = format!(
            "SELECT action, metadata, created_at FROM history_event WHERE entity_id = ? ORDER BY id {order}"
        );
        let rows = sqlx::query(&sql)
            .bind(&entity_id)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| Error::Durability(format!("read: {e}")))?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let action: String = row.try_get("action").map_err(|e| Error::Durability(e.to_string()))?;
            let metadata: Option<String> = row.try_get("metadata").map_err(|e| Error::Durability(e.to_string()))?;
            let created_at: i64 = row.try_get("created_at").map_err(|e| Error::Durability(e.to_string()))?;

            if let Some(event) = self.deserialize_event(&action, metadata.as_deref())? {
                out.push(LoggedEvent {
                    run_id: run_id.to_string(),
                    phase,
                    event,
                    created_at: timestamp_to_datetime(created_at),
                });
            }
        }
        Ok(out)
    }

    /// Writes `END_ROLLBACK` and deletes the pointer file.
    pub async fn end_run(&self, run_id: &str) -> Result<()> {
        self.mark_status(run_id, Phase::Rollback, RunStatus::EndRollback).await?;
        match std::fs::remove_file(&self.pointer_path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::Io(e)),
        }
    }

    fn serialize_event(&self, event: &Event) -> Result<String> {
        let mut value = serde_json::to_value(event)?;
        if let Event::ServerStopped { .. } = event {
            if let Some(bmc) = value.get_mut("bmc") {
                if let Some(password) = bmc.get("password").and_then(|p| p.as_str()) {
                    let encrypted = secrets::encrypt(&self.master_key, password)?;
                    bmc["password"] = serde_json::Value::String(encrypted);
                }
            }
        }
        Ok(serde_json::to_string(&value)?)
    }

    fn deserialize_event(&self, action: &str, metadata: Option<&str>) -> Result<Option<Event>> {
        // Status markers have no event payload to reconstruct.
        if metadata.is_none() {
            return Ok(None);
        }
        let mut value: serde_json::Value = serde_json::from_str(metadata.unwrap())?;

        if action == "SERVER_STOPPED" {
            if let Some(bmc) = value.get_mut("bmc") {
                if let Some(ciphertext) = bmc.get("password").and_then(|p| p.as_str()) {
                    let plain = secrets::decrypt(&self.master_key, ciphertext)?;
                    bmc["password"] = serde_json::Value::String(plain);
                }
            }
        }

        let event: Event = serde_json::from_value(value)?;
        Ok(Some(event))
    }
}

fn timestamp_to_datetime(ts: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(ts, 0).single().unwrap_or_else(Utc::now)
}

#[cfg(test)]
mod tests {
    use super::*;
    use upstra_common::BmcCredentials as Bmc;

    async fn test_log() -> (EventLog, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let pointer = dir.path().join("run_id");
        let log = EventLog::connect("sqlite::memory:", pointer, "test-master".to_string())
            .await
            .unwrap();
        (log, dir)
    }

    #[tokio::test]
    async fn begin_run_creates_pointer_and_marker() {
        let (log, _dir) = test_log().await;
        assert!(log.current_run_id().unwrap().is_none());
        let run_id = log.begin_run().await.unwrap();
        assert_eq!(log.current_run_id().unwrap().unwrap(), run_id);
    }

    #[tokio::test]
    async fn append_then_read_forward_preserves_order() {
        let (log, _dir) = test_log().await;
        let run_id = log.begin_run().await.unwrap();

        log.append(&run_id, Phase::Forward, &Event::VmStopped { vm_id: "a".into(), host_id: "h".into() })
            .await
            .unwrap();
        log.append(&run_id, Phase::Forward, &Event::VmStopped { vm_id: "b".into(), host_id: "h".into() })
            .await
            .unwrap();

        let events = log.read_forward(&run_id).await.unwrap();
        assert_eq!(events.len(), 2);
        match &events[0].event {
            Event::VmStopped { vm_id, .. } => assert_eq!(vm_id, "a"),
            _ => panic!("wrong event"),
        }
    }

    #[tokio::test]
    async fn read_for_rollback_reverses_order() {
        let (log, _dir) = test_log().await;
        let run_id = log.begin_run().await.unwrap();

        log.append(&run_id, Phase::Forward, &Event::VmStopped { vm_id: "a".into(), host_id: "h".into() })
            .await
            .unwrap();
        log.append(&run_id, Phase::Forward, &Event::VmStopped { vm_id: "b".into(), host_id: "h".into() })
            .await
            .unwrap();

        let events = log.read_for_rollback(&run_id).await.unwrap();
        match &events[0].event {
            Event::VmStopped { vm_id, .. } => assert_eq!(vm_id, "b"),
            _ => panic!("wrong event"),
        }
    }

    #[tokio::test]
    async fn server_stopped_password_is_encrypted_at_rest() {
        let (log, _dir) = test_log().await;
        let run_id = log.begin_run().await.unwrap();

        let event = Event::ServerStopped {
            host_id: "h1".into(),
            bmc: Bmc { address: "10.0.0.1".into(), user: "admin".into(), password: "topsecret".into() },
        };
        log.append(&run_id, Phase::Forward, &event).await.unwrap();

        let raw_row = sqlx::query("SELECT metadata FROM history_event WHERE action = 'SERVER_STOPPED'")
            .fetch_one(&log.pool)
            .await
            .unwrap();
        let raw_metadata: String = raw_row.try_get("metadata").unwrap();
        assert!(!raw_metadata.contains("topsecret"));

        let events = log.read_forward(&run_id).await.unwrap();
        match &events[0].event {
            Event::ServerStopped { bmc, .. } => assert_eq!(bmc.password, "topsecret"),
            _ => panic!("wrong event"),
        }
    }

    #[tokio::test]
    async fn end_run_deletes_pointer_file() {
        let (log, _dir) = test_log().await;
        let run_id = log.begin_run().await.unwrap();
        log.end_run(&run_id).await.unwrap();
        assert!(log.current_run_id().unwrap().is_none());
    }

    #[tokio::test]
    async fn status_markers_carry_no_metadata() {
        let (log, _dir) = test_log().await;
        let run_id = log.begin_run().await.unwrap();
        // begin_run already wrote one START_MIGRATION marker; reading
        // forward events should not surface it as an Event.
        let events = log.read_forward(&run_id).await.unwrap();
        assert!(events.is_empty());
    }
}
