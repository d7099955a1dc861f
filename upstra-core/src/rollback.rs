//! Rollback engine (C8): reads the event log and inverts each recorded
//! operation, in reverse order.
//!
//! Reverse iteration over the forward event list, one match-based
//! dispatch per kind with a sleep between reconnect polls — a
//! tagged-enum-to-inverse-procedure table rather than a chain of
//! type checks.

use std::time::Duration;

use upstra_common::{BmcCredentials, Event, Phase, Result, RunStatus};

use crate::bmc::BmcClient;
use crate::eventlog::EventLog;
use crate::vcenter::VirtualizationClient;

pub struct RollbackEngine<'a> {
    vcenter: &'a dyn VirtualizationClient,
    eventlog: &'a EventLog,
    run_id: String,
    bmc_verify_tls: bool,
    restart_grace_seconds: u64,
}

impl<'a> RollbackEngine<'a> {
    pub fn new(
        vcenter: &'a dyn VirtualizationClient,
        eventlog: &'a EventLog,
        run_id: String,
        bmc_verify_tls: bool,
        restart_grace_seconds: u64,
    ) -> Self {
        Self { vcenter, eventlog, run_id, bmc_verify_tls, restart_grace_seconds }
    }

    /// Replays the forward event list in reverse, applying each event's
    /// inverse, then writes `END_ROLLBACK` and deletes the run pointer.
    pub async fn run(&self) -> Result<()> {
        self.eventlog
            .mark_status(&self.run_id, Phase::Rollback, RunStatus::StartRollback)
            .await?;

        let events = self.eventlog.read_for_rollback(&self.run_id).await?;
        for logged in events {
            self.invert(logged.event).await?;
        }

        self.eventlog.end_run(&self.run_id).await
    }

    /// Blocks until `host_id`'s connection state is `connected`,
    /// sleeping `restart_grace_seconds` between polls. Unbounded — an
    /// operator must intervene if a host never returns.
    async fn wait_for_connected(&self, host_id: &str) {
        loop {
            if let Ok(Some(info)) = self.vcenter.get_host(host_id).await {
                if info.connected {
                    return;
                }
            }
            tracing::debug!(host_id, "waiting for host to reconnect");
            tokio::time::sleep(Duration::from_secs(self.restart_grace_seconds)).await;
        }
    }

    async fn invert(&self, event: Event) -> Result<()> {
        match event {
            Event::VmStopped { vm_id, host_id } => {
                self.wait_for_connected(&host_id).await;
                match self.vcenter.vm_start(&vm_id).await {
                    Ok(outcome) if outcome.is_success() => {
                        self.append(Event::VmStarted { vm_id, host_id }).await
                    }
                    _ => self.error("VM won't start", &vm_id).await,
                }
            }
            Event::VmMigrated { vm_id, origin_host_id } => {
                self.wait_for_connected(&origin_host_id).await;
                match self.vcenter.vm_migrate(&vm_id, &origin_host_id).await {
                    Ok(outcome) if outcome.is_success() => {
                        self.append(Event::VmMigrated { vm_id, origin_host_id }).await
                    }
                    _ => self.error("VM won't migrate back", &vm_id).await,
                }
            }
            Event::VmStarted { vm_id, host_id } => match self.vcenter.vm_stop(&vm_id).await {
                Ok(outcome) if outcome.is_success() => {
                    self.append(Event::VmStopped { vm_id, host_id }).await
                }
                _ => self.error("VM won't stop", &vm_id).await,
            },
            Event::ServerStopped { host_id, bmc } => self.restart_server(host_id, bmc).await,
            Event::ServerStarted { .. } => Ok(()), // rollback-phase only; never read back
            Event::MigrationError { .. } => Ok(()), // advisory, no inverse
        }
    }

    async fn restart_server(&self, host_id: String, bmc: BmcCredentials) -> Result<()> {
        let mut client = match BmcClient::new(&bmc, self.bmc_verify_tls) {
            Ok(c) => c,
            Err(_) => return self.error("Server won't start", &host_id).await,
        };
        if client.get_power_state().await.is_err() {
            return self.error("Server won't start", &host_id).await;
        }
        match client.start().await {
            Ok(true) => self.append(Event::ServerStarted { host_id }).await,
            _ => self.error("Server won't start", &host_id).await,
        }
    }

    async fn append(&self, event: Event) -> Result<()> {
        self.eventlog.append(&self.run_id, Phase::Rollback, &event).await
    }

    async fn error(&self, title: &str, message: &str) -> Result<()> {
        let event = Event::MigrationError { title: title.to_string(), message: message.to_string() };
        self.eventlog.append(&self.run_id, Phase::Error, &event).await
    }
}
