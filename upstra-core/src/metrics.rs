//! Metric cache (C6, external collaborator): periodic per-entity
//! snapshots for UI consumption.
//!
//! A thin, fixed-interval poll loop driving the read-only surface C3
//! exposes. It never touches plan state or the event log; its cache
//! table is intentionally disjoint from both.

use sqlx::SqlitePool;

use upstra_common::{Error, Result};

use crate::vcenter::VirtualizationClient;

pub struct MetricCache {
    pool: SqlitePool,
}

impl MetricCache {
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = SqlitePool::connect(database_url)
            .await
            .map_err(|e| Error::Durability(format!("connect: {e}")))?;
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS metric_snapshot (
                entity_kind TEXT NOT NULL,
                managed_id TEXT NOT NULL,
                powered_on INTEGER NOT NULL,
                captured_at INTEGER NOT NULL,
                PRIMARY KEY (entity_kind, managed_id)
            )
            "#,
        )
        .execute(&pool)
        .await
        .map_err(|e| Error::Durability(format!("init schema: {e}")))?;
        Ok(Self { pool })
    }

    /// One poll cycle: list all hosts and VMs and upsert their power
    /// state snapshot.
    pub async fn poll_once(&self, vcenter: &dyn VirtualizationClient) -> Result<()> {
        let now = chrono::Utc::now().timestamp();

        for host in vcenter.list_all_hosts().await.map_err(|e| Error::Durability(e.to_string()))? {
            self.upsert("host", &host.managed_id, host.powered_on, now).await?;
        }
        for vm in vcenter.list_all_vms().await.map_err(|e| Error::Durability(e.to_string()))? {
            self.upsert("vm", &vm.managed_id, vm.powered_on, now).await?;
        }
        Ok(())
    }

    async fn upsert(&self, kind: &str, managed_id: &str, powered_on: bool, now: i64) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO metric_snapshot (entity_kind, managed_id, powered_on, captured_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(entity_kind, managed_id) DO UPDATE SET powered_on = excluded.powered_on, captured_at = excluded.captured_at
            "#,
        )
        .bind(kind)
        .bind(managed_id)
        .bind(powered_on as i64)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| Error::Durability(format!("upsert: {e}")))?;
        Ok(())
    }
}
