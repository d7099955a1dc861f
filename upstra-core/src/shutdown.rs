//! Shutdown engine (C7): executes the forward plan, emitting one event
//! per successful operation.
//!
//! A linear step sequence per host (resolve host, resolve destination,
//! walk the VM order, power the host off) with best-effort continuation
//! on a per-step failure, generalized to a data-dependent N-hosts x
//! M-VMs plan rather than a fixed template.
//!
//! Public contract: never returns `Err` for a remote/API condition —
//! every such condition becomes a `MIGRATION_ERROR` event and the engine
//! proceeds. Only event-log durability failures propagate as `Err`,
//! ending the run with a non-zero exit.

use upstra_common::{Event, Phase, Result};

use crate::bmc::BmcClient;
use crate::eventlog::EventLog;
use crate::plan::{CompiledPlan, HostPlan};
use crate::vcenter::VirtualizationClient;

pub struct ShutdownEngine<'a> {
    vcenter: &'a dyn VirtualizationClient,
    eventlog: &'a EventLog,
    run_id: String,
    bmc_verify_tls: bool,
}

impl<'a> ShutdownEngine<'a> {
    pub fn new(vcenter: &'a dyn VirtualizationClient, eventlog: &'a EventLog, run_id: String, bmc_verify_tls: bool) -> Self {
        Self { vcenter, eventlog, run_id, bmc_verify_tls }
    }

    /// Runs the whole plan to completion, host by host, in declared
    /// order.
    pub async fn run(&self, plan: &CompiledPlan) -> Result<()> {
        for host_plan in &plan.0.hosts {
            self.run_host(host_plan).await?;
        }
        self.eventlog
            .mark_status(&self.run_id, Phase::Forward, upstra_common::RunStatus::EndMigration)
            .await?;
        Ok(())
    }

    async fn run_host(&self, host_plan: &HostPlan) -> Result<()> {
        let host_id = &host_plan.host.managed_id;

        // Step 1: resolve the host itself.
        let host_info = match self.vcenter.get_host(host_id).await {
            Ok(Some(info)) => info,
            Ok(None) => {
                self.error("host not found", host_id).await?;
                return Ok(());
            }
            Err(e) => {
                self.error("host unreachable", &e.to_string()).await?;
                return Ok(());
            }
        };
        if !host_info.powered_on {
            self.error("host already off", host_id).await?;
            return Ok(());
        }

        // Step 2: resolve the destination, if any.
        let destination = self.resolve_destination(host_plan).await;

        // Step 3: walk vm_order.
        for vm_id in &host_plan.vm_order {
            self.run_vm(host_plan, vm_id, destination).await?;
        }

        // Step 4: power the host off.
        self.power_off_host(host_plan).await?;
        Ok(())
    }

    async fn resolve_destination<'p>(&self, host_plan: &'p HostPlan) -> Option<&'p upstra_common::HostDescriptor> {
        let destination = host_plan.destination.as_ref()?;

        let dest_info = match self.vcenter.get_host(&destination.managed_id).await {
            Ok(Some(info)) => info,
            _ => return None,
        };

        if !dest_info.powered_on {
            let mut bmc = match BmcClient::new(&destination.bmc, self.bmc_verify_tls) {
                Ok(c) => c,
                Err(_) => return None,
            };
            if bmc.get_power_state().await.is_err() {
                return None;
            }
            match bmc.start().await {
                Ok(true) => {}
                _ => return None,
            }
        }

        Some(destination)
    }

    async fn run_vm(
        &self,
        host_plan: &HostPlan,
        vm_id: &str,
        destination: Option<&upstra_common::HostDescriptor>,
    ) -> Result<()> {
        let host_id = &host_plan.host.managed_id;

        let vm_info = match self.vcenter.get_vm(vm_id).await {
            Ok(Some(info)) => info,
            Ok(None) => {
                self.error("vm not found", vm_id).await?;
                return Ok(());
            }
            Err(e) => {
                self.error("vm unreachable", &e.to_string()).await?;
                return Ok(());
            }
        };

        let already_off = !vm_info.powered_on;

        if !already_off {
            match self.vcenter.vm_stop(vm_id).await {
                Ok(outcome) if outcome.is_success() => {
                    self.append(Event::VmStopped { vm_id: vm_id.to_string(), host_id: host_id.clone() }).await?;
                }
                Ok(_) | Err(_) => {
                    self.error("VM won't stop", vm_id).await?;
                    return Ok(());
                }
            }
        }
        // already_off: silent no-op, nothing to invert.

        if let Some(destination) = destination {
            self.migrate_vm(host_plan, vm_id, destination).await?;
        }

        Ok(())
    }

    async fn migrate_vm(
        &self,
        host_plan: &HostPlan,
        vm_id: &str,
        destination: &upstra_common::HostDescriptor,
    ) -> Result<()> {
        let host_id = host_plan.host.managed_id.clone();

        match self.vcenter.vm_migrate(vm_id, &destination.managed_id).await {
            Ok(outcome) if outcome.is_success() => {
                self.append(Event::VmMigrated { vm_id: vm_id.to_string(), origin_host_id: host_id }).await?;
            }
            Ok(_) | Err(_) => {
                self.error("VM won't migrate", vm_id).await?;
                return Ok(());
            }
        }

        match self.vcenter.vm_start(vm_id).await {
            Ok(outcome) if outcome.is_success() => {
                self.append(Event::VmStarted { vm_id: vm_id.to_string(), host_id: destination.managed_id.clone() })
                    .await?;
            }
            Ok(_) | Err(_) => {
                self.error("VM won't start", vm_id).await?;
            }
        }

        Ok(())
    }

    async fn power_off_host(&self, host_plan: &HostPlan) -> Result<()> {
        let host_id = host_plan.host.managed_id.clone();

        let mut bmc = match BmcClient::new(&host_plan.host.bmc, self.bmc_verify_tls) {
            Ok(c) => c,
            Err(_) => {
                self.error("Server won't stop", &host_id).await?;
                return Ok(());
            }
        };

        if bmc.get_power_state().await.is_err() {
            self.error("Server won't stop", &host_id).await?;
            return Ok(());
        }

        match bmc.stop().await {
            Ok(true) => {
                self.append(Event::ServerStopped { host_id, bmc: host_plan.host.bmc.clone() }).await?;
            }
            _ => {
                self.error("Server won't stop", &host_id).await?;
            }
        }
        Ok(())
    }

    async fn append(&self, event: Event) -> Result<()> {
        self.eventlog.append(&self.run_id, Phase::Forward, &event).await
    }

    async fn error(&self, title: &str, message: &str) -> Result<()> {
        let event = Event::MigrationError { title: title.to_string(), message: message.to_string() };
        self.eventlog.append(&self.run_id, Phase::Error, &event).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vcenter::{HostInfo, VcenterError, VcenterOutcome, VirtualizationClient, VmInfo};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use upstra_common::{BmcCredentials, HostDescriptor};

    struct FakeVcenter {
        hosts: HashMap<String, HostInfo>,
        vms: Mutex<HashMap<String, VmInfo>>,
    }

    #[async_trait]
    impl VirtualizationClient for FakeVcenter {
        async fn get_host(&self, id: &str) -> std::result::Result<Option<HostInfo>, VcenterError> {
            Ok(self.hosts.get(id).cloned())
        }
        async fn get_vm(&self, id: &str) -> std::result::Result<Option<VmInfo>, VcenterError> {
            Ok(self.vms.lock().unwrap().get(id).cloned())
        }
        async fn list_all_hosts(&self) -> std::result::Result<Vec<HostInfo>, VcenterError> {
            Ok(self.hosts.values().cloned().collect())
        }
        async fn list_all_vms(&self) -> std::result::Result<Vec<VmInfo>, VcenterError> {
            Ok(self.vms.lock().unwrap().values().cloned().collect())
        }
        async fn vm_start(&self, id: &str) -> std::result::Result<VcenterOutcome, VcenterError> {
            if let Some(vm) = self.vms.lock().unwrap().get_mut(id) {
                vm.powered_on = true;
            }
            Ok(VcenterOutcome::Success)
        }
        async fn vm_stop(&self, id: &str) -> std::result::Result<VcenterOutcome, VcenterError> {
            if let Some(vm) = self.vms.lock().unwrap().get_mut(id) {
                vm.powered_on = false;
            }
            Ok(VcenterOutcome::Success)
        }
        async fn vm_migrate(&self, id: &str, target: &str) -> std::result::Result<VcenterOutcome, VcenterError> {
            if let Some(vm) = self.vms.lock().unwrap().get_mut(id) {
                vm.host_managed_id = target.to_string();
            }
            Ok(VcenterOutcome::Success)
        }
    }

    fn host_plan(vm_order: Vec<&str>) -> HostPlan {
        HostPlan {
            host: HostDescriptor {
                display_name: "esx1".into(),
                managed_id: "host-1".into(),
                bmc: BmcCredentials { address: "10.0.1.1".into(), user: "a".into(), password: "p".into() },
            },
            destination: None,
            vm_order: vm_order.into_iter().map(String::from).collect(),
        }
    }

    #[tokio::test]
    async fn single_host_two_vms_emits_stop_then_stop() {
        let mut vms = HashMap::new();
        vms.insert(
            "vm-a".to_string(),
            VmInfo { managed_id: "vm-a".into(), name: "a".into(), powered_on: true, host_managed_id: "host-1".into() },
        );
        vms.insert(
            "vm-b".to_string(),
            VmInfo { managed_id: "vm-b".into(), name: "b".into(), powered_on: true, host_managed_id: "host-1".into() },
        );
        let mut hosts = HashMap::new();
        hosts.insert(
            "host-1".to_string(),
            HostInfo { managed_id: "host-1".into(), name: "esx1".into(), powered_on: true, connected: true },
        );
        let vcenter = FakeVcenter { hosts, vms: Mutex::new(vms) };

        let dir = tempfile::tempdir().unwrap();
        let log = EventLog::connect("sqlite::memory:", dir.path().join("run_id"), "k".to_string())
            .await
            .unwrap();
        let run_id = log.begin_run().await.unwrap();

        let engine = ShutdownEngine::new(&vcenter, &log, run_id.clone(), false);
        let hp = host_plan(vec!["vm-a", "vm-b"]);
        engine.run_host(&hp).await.unwrap();

        let events = log.read_forward(&run_id).await.unwrap();
        let stops: Vec<_> = events
            .iter()
            .filter(|e| matches!(e.event, Event::VmStopped { .. }))
            .collect();
        assert_eq!(stops.len(), 2);
    }

    #[tokio::test]
    async fn already_off_vm_emits_no_stop_event() {
        let mut vms = HashMap::new();
        vms.insert(
            "vm-a".to_string(),
            VmInfo { managed_id: "vm-a".into(), name: "a".into(), powered_on: false, host_managed_id: "host-1".into() },
        );
        let mut hosts = HashMap::new();
        hosts.insert(
            "host-1".to_string(),
            HostInfo { managed_id: "host-1".into(), name: "esx1".into(), powered_on: true, connected: true },
        );
        let vcenter = FakeVcenter { hosts, vms: Mutex::new(vms) };

        let dir = tempfile::tempdir().unwrap();
        let log = EventLog::connect("sqlite::memory:", dir.path().join("run_id"), "k".to_string())
            .await
            .unwrap();
        let run_id = log.begin_run().await.unwrap();
        let engine = ShutdownEngine::new(&vcenter, &log, run_id.clone(), false);

        let hp = host_plan(vec!["vm-a"]);
        engine.run_vm(&hp, "vm-a", None).await.unwrap();

        let events = log.read_forward(&run_id).await.unwrap();
        assert!(events.iter().all(|e| !matches!(e.event, Event::VmStopped { .. })));
    }

    #[tokio::test]
    async fn missing_host_emits_single_error() {
        let vcenter = FakeVcenter { hosts: HashMap::new(), vms: Mutex::new(HashMap::new()) };
        let dir = tempfile::tempdir().unwrap();
        let log = EventLog::connect("sqlite::memory:", dir.path().join("run_id"), "k".to_string())
            .await
            .unwrap();
        let run_id = log.begin_run().await.unwrap();
        let engine = ShutdownEngine::new(&vcenter, &log, run_id.clone(), false);

        let hp = host_plan(vec!["vm-a"]);
        engine.run_host(&hp).await.unwrap();

        assert!(log.read_forward(&run_id).await.unwrap().is_empty());

        let errors = log.read_errors(&run_id).await.unwrap();
        assert_eq!(errors.len(), 1);
        assert!(matches!(errors[0].event, Event::MigrationError { .. }));
    }
}
