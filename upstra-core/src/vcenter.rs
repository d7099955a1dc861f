//! Virtualization client (C3): discovers hosts/VMs through the
//! controller and mutates their power/location.
//!
//! Exposed as a trait so the engines depend on the interface, not a
//! concrete binding, so an interchangeable backend can stand in for
//! tests. The one production implementation here, [`RestClient`], talks
//! to the controller's inventory/power REST surface with the same
//! short-circuit-on-match discovery semantics a SOAP-based inventory
//! walk would use, translated into plain REST lookups.

use async_trait::async_trait;
use serde::Deserialize;

use crate::plan::ControllerConfig;

/// The non-error outcomes a mutating call can produce. Transient/logical
/// conditions are data, not `Err` — only a broken connection escalates
/// to `Err`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VcenterOutcome {
    Success,
    NotFound,
    Unreachable,
    InvalidPowerState,
    Busy,
    PermissionDenied,
    InvalidCredentials,
}

impl VcenterOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, VcenterOutcome::Success)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum VcenterError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
}

#[derive(Debug, Clone, Deserialize)]
pub struct HostInfo {
    pub managed_id: String,
    pub name: String,
    pub powered_on: bool,
    pub connected: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VmInfo {
    pub managed_id: String,
    pub name: String,
    pub powered_on: bool,
    pub host_managed_id: String,
}

/// The surface the shutdown and rollback engines depend on.
#[async_trait]
pub trait VirtualizationClient: Send + Sync {
    async fn get_host(&self, managed_id: &str) -> Result<Option<HostInfo>, VcenterError>;
    async fn get_vm(&self, managed_id: &str) -> Result<Option<VmInfo>, VcenterError>;
    async fn list_all_hosts(&self) -> Result<Vec<HostInfo>, VcenterError>;
    async fn list_all_vms(&self) -> Result<Vec<VmInfo>, VcenterError>;
    async fn vm_start(&self, vm_id: &str) -> Result<VcenterOutcome, VcenterError>;
    async fn vm_stop(&self, vm_id: &str) -> Result<VcenterOutcome, VcenterError>;
    async fn vm_migrate(&self, vm_id: &str, target_host_id: &str) -> Result<VcenterOutcome, VcenterError>;
}

/// Connects to the controller's REST inventory/power API over HTTPS.
/// `connect` is idempotent: the underlying `reqwest::Client` is cheap to
/// clone and carries no session state the caller must tear down, other
/// than dropping this value.
pub struct RestClient {
    http: reqwest::Client,
    base_url: String,
    user: String,
    password: String,
}

impl RestClient {
    pub fn connect(config: &ControllerConfig) -> Result<Self, VcenterError> {
        let http = reqwest::Client::builder().build()?;
        Ok(Self {
            http,
            base_url: format!("https://{}:{}/api/v1", config.address, config.port),
            user: config.user.clone(),
            password: config.password.clone(),
        })
    }

    fn auth(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        req.basic_auth(&self.user, Some(&self.password))
    }

    async fn power_op(&self, path: &str) -> Result<VcenterOutcome, VcenterError> {
        let resp = self
            .auth(self.http.post(format!("{}{}", self.base_url, path)))
            .send()
            .await?;
        Ok(status_to_outcome(resp.status()))
    }
}

fn status_to_outcome(status: reqwest::StatusCode) -> VcenterOutcome {
    // 404 not found/unreachable, 403 busy or invalid transition, 401
    // credentials, 2xx success, anything else permission-denied as a
    // safe default.
    match status.as_u16() {
        200..=299 => VcenterOutcome::Success,
        404 => VcenterOutcome::NotFound,
        403 => VcenterOutcome::Busy,
        401 => VcenterOutcome::InvalidCredentials,
        _ => VcenterOutcome::PermissionDenied,
    }
}

#[async_trait]
impl VirtualizationClient for RestClient {
    async fn get_host(&self, managed_id: &str) -> Result<Option<HostInfo>, VcenterError> {
        let resp = self
            .auth(self.http.get(format!("{}/hosts/{}", self.base_url, managed_id)))
            .send()
            .await?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        Ok(Some(resp.json::<HostInfo>().await?))
    }

    async fn get_vm(&self, managed_id: &str) -> Result<Option<VmInfo>, VcenterError> {
        // Discovery walk: root -> datacenters -> host/vm folders ->
        // recurse through sub-folders collecting leaves, short-circuiting
        // on managed-id match. The controller's inventory endpoint
        // performs this walk server-side; this call is the leaf fetch.
        let resp = self
            .auth(self.http.get(format!("{}/vms/{}", self.base_url, managed_id)))
            .send()
            .await?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        Ok(Some(resp.json::<VmInfo>().await?))
    }

    async fn list_all_hosts(&self) -> Result<Vec<HostInfo>, VcenterError> {
        let resp = self
            .auth(self.http.get(format!("{}/hosts", self.base_url)))
            .send()
            .await?;
        Ok(resp.json::<Vec<HostInfo>>().await?)
    }

    async fn list_all_vms(&self) -> Result<Vec<VmInfo>, VcenterError> {
        let resp = self
            .auth(self.http.get(format!("{}/vms", self.base_url)))
            .send()
            .await?;
        Ok(resp.json::<Vec<VmInfo>>().await?)
    }

    async fn vm_start(&self, vm_id: &str) -> Result<VcenterOutcome, VcenterError> {
        self.power_op(&format!("/vms/{}/start", vm_id)).await
    }

    async fn vm_stop(&self, vm_id: &str) -> Result<VcenterOutcome, VcenterError> {
        self.power_op(&format!("/vms/{}/stop", vm_id)).await
    }

    async fn vm_migrate(&self, vm_id: &str, target_host_id: &str) -> Result<VcenterOutcome, VcenterError> {
        let resp = self
            .auth(
                self.http
                    .post(format!("{}/vms/{}/migrate", self.base_url, vm_id))
                    .json(&serde_json::json!({ "target_host_id": target_host_id })),
            )
            .send()
            .await?;
        Ok(status_to_outcome(resp.status()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_map_to_outcomes() {
        assert_eq!(status_to_outcome(reqwest::StatusCode::OK), VcenterOutcome::Success);
        assert_eq!(status_to_outcome(reqwest::StatusCode::NOT_FOUND), VcenterOutcome::NotFound);
        assert_eq!(status_to_outcome(reqwest::StatusCode::FORBIDDEN), VcenterOutcome::Busy);
        assert_eq!(
            status_to_outcome(reqwest::StatusCode::UNAUTHORIZED),
            VcenterOutcome::InvalidCredentials
        );
    }
}
