//! Plan loader (C2): parses the YAML plan document into validated
//! entities.
//!
//! Top-level keys are `controller`, `ups`, `hosts`. Passwords in the raw
//! document are base64 ciphertext; the loader decrypts them via
//! [`crate::secrets`] synchronously at load time.

use serde::{Deserialize, Serialize};
use std::path::Path;

use upstra_common::{BmcCredentials, Error, HostDescriptor, Result};

use crate::secrets;

#[derive(Debug, Clone, Deserialize, Serialize)]
struct RawBmc {
    address: String,
    user: String,
    password: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
struct RawHost {
    name: String,
    managed_id: String,
    bmc: RawBmc,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
struct RawController {
    address: String,
    user: String,
    password: String,
    #[serde(default = "default_controller_port")]
    port: u16,
}

fn default_controller_port() -> u16 {
    443
}

#[derive(Debug, Clone, Deserialize, Serialize)]
struct RawGrace {
    shutdown_grace: u64,
    restart_grace: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
struct RawHostPlan {
    host: RawHost,
    #[serde(default)]
    destination: Option<RawHost>,
    vm_order: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
struct RawPlan {
    controller: RawController,
    ups: RawGrace,
    hosts: Vec<RawHostPlan>,
}

/// Fully resolved controller connection info (password already decrypted).
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    pub address: String,
    pub user: String,
    pub password: String,
    pub port: u16,
}

/// Fully resolved grace periods.
#[derive(Debug, Clone, Copy)]
pub struct GraceConfig {
    pub shutdown_grace_seconds: u64,
    pub restart_grace_seconds: u64,
}

/// One host's forward-plan entry, post-decryption.
#[derive(Debug, Clone)]
pub struct HostPlan {
    pub host: HostDescriptor,
    pub destination: Option<HostDescriptor>,
    pub vm_order: Vec<String>,
}

/// The fully parsed and decrypted, but not yet semantically validated,
/// plan document.
#[derive(Debug, Clone)]
pub struct Plan {
    pub controller: ControllerConfig,
    pub grace: GraceConfig,
    pub hosts: Vec<HostPlan>,
}

/// A plan that has passed [`Plan::compile`]'s structural checks and is
/// safe to hand to the shutdown engine.
#[derive(Debug, Clone)]
pub struct CompiledPlan(pub Plan);

impl Plan {
    /// Parses and decrypts, but does not validate cross-field invariants
    /// (that's [`Plan::compile`]).
    pub fn load(path: &Path, master_key: &str) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let raw: RawPlan = serde_yaml::from_str(&text)
            .map_err(|e| Error::Configuration(format!("plan parse error: {e}")))?;
        Self::from_raw(raw, master_key)
    }

    fn from_raw(raw: RawPlan, master_key: &str) -> Result<Self> {
        let controller = ControllerConfig {
            address: raw.controller.address,
            user: raw.controller.user,
            password: secrets::decrypt(master_key, &raw.controller.password)?,
            port: raw.controller.port,
        };

        let grace = GraceConfig {
            shutdown_grace_seconds: raw.ups.shutdown_grace,
            restart_grace_seconds: raw.ups.restart_grace,
        };

        let mut hosts = Vec::with_capacity(raw.hosts.len());
        for entry in raw.hosts {
            let host = decode_host(entry.host, master_key)?;
            let destination = entry
                .destination
                .map(|d| decode_host(d, master_key))
                .transpose()?;
            hosts.push(HostPlan {
                host,
                destination,
                vm_order: entry.vm_order,
            });
        }

        Ok(Plan { controller, grace, hosts })
    }

    /// Validates cross-field invariants: every VM in `vm_order` is
    /// unique per host, and `destination.managed_id` (when present)
    /// differs from `host.managed_id`. Structural parse already
    /// guaranteed required fields exist; this step is semantic.
    pub fn compile(self) -> Result<CompiledPlan> {
        for hp in &self.hosts {
            let mut seen = std::collections::HashSet::new();
            for vm in &hp.vm_order {
                if !seen.insert(vm.as_str()) {
                    return Err(Error::InvalidPlan(format!(
                        "vm '{}' listed more than once on host '{}'",
                        vm, hp.host.managed_id
                    )));
                }
            }
            if let Some(dest) = &hp.destination {
                if dest.managed_id == hp.host.managed_id {
                    return Err(Error::InvalidPlan(format!(
                        "host '{}' names itself as its own destination",
                        hp.host.managed_id
                    )));
                }
            }
        }
        Ok(CompiledPlan(self))
    }
}

fn decode_host(raw: RawHost, master_key: &str) -> Result<HostDescriptor> {
    Ok(HostDescriptor {
        display_name: raw.name,
        managed_id: raw.managed_id,
        bmc: BmcCredentials {
            address: raw.bmc.address,
            user: raw.bmc.user,
            password: secrets::decrypt(master_key, &raw.bmc.password)?,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const MASTER: &str = "test-master-key";

    fn yaml_with(vm_order: &str, destination: &str) -> String {
        let pw = secrets::encrypt(MASTER, "pw").unwrap();
        format!(
            r#"
controller:
  address: 10.0.0.1
  user: admin
  password: "{pw}"
ups:
  shutdown_grace: 30
  restart_grace: 15
hosts:
  - host:
      name: esx1
      managed_id: host-1
      bmc:
        address: 10.0.1.1
        user: bmcadmin
        password: "{pw}"
    {destination}
    vm_order: [{vm_order}]
"#
        )
    }

    #[test]
    fn loads_minimal_plan() {
        let text = yaml_with("vm-a, vm-b", "");
        let raw: RawPlan = serde_yaml::from_str(&text).unwrap();
        let plan = Plan::from_raw(raw, MASTER).unwrap();
        assert_eq!(plan.hosts.len(), 1);
        assert_eq!(plan.hosts[0].vm_order, vec!["vm-a", "vm-b"]);
        assert_eq!(plan.controller.port, 443);
    }

    #[test]
    fn rejects_duplicate_vm_in_order() {
        let text = yaml_with("vm-a, vm-a", "");
        let raw: RawPlan = serde_yaml::from_str(&text).unwrap();
        let plan = Plan::from_raw(raw, MASTER).unwrap();
        assert!(plan.compile().is_err());
    }

    #[test]
    fn rejects_self_destination() {
        let pw = secrets::encrypt(MASTER, "pw").unwrap();
        let destination = format!(
            "destination:\n      name: esx1\n      managed_id: host-1\n      bmc:\n        address: 10.0.1.1\n        user: bmcadmin\n        password: \"{pw}\""
        );
        let text = yaml_with("vm-a", &destination);
        let raw: RawPlan = serde_yaml::from_str(&text).unwrap();
        let plan = Plan::from_raw(raw, MASTER).unwrap();
        assert!(plan.compile().is_err());
    }
}
