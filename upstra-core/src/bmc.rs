//! BMC client (C4): remote power on/off via the out-of-band management
//! REST endpoint (Redfish-style).
//!
//! `get_power_state` must be called first — it discovers the
//! `#ComputerSystem.Reset` action's target URI from the response body,
//! and `start`/`stop` POST to that discovered URI rather than a
//! hardcoded one.

use serde_json::Value;

use upstra_common::BmcCredentials;

#[derive(Debug, thiserror::Error)]
pub enum BmcError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("reset action target not known; call get_power_state() first")]
    ResetUriNotKnown,

    #[error("unexpected response from BMC: {status} {body}")]
    UnexpectedResponse { status: u16, body: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerState {
    On,
    Off,
    Unknown,
}

pub struct BmcClient {
    http: reqwest::Client,
    base: String,
    user: String,
    password: String,
    reset_uri: Option<String>,
}

impl BmcClient {
    pub fn new(creds: &BmcCredentials, verify_tls: bool) -> Result<Self, BmcError> {
        let http = reqwest::Client::builder()
            .danger_accept_invalid_certs(!verify_tls)
            .build()?;
        Ok(Self {
            http,
            base: format!("https://{}", creds.address),
            user: creds.user.clone(),
            password: creds.password.clone(),
            reset_uri: None,
        })
    }

    /// GET `/redfish/v1/Systems/1/`, extracting the reset action's
    /// target URI for subsequent `start`/`stop` calls.
    pub async fn get_power_state(&mut self) -> Result<PowerState, BmcError> {
        let url = format!("{}/redfish/v1/Systems/1/", self.base);
        let resp = self
            .http
            .get(&url)
            .basic_auth(&self.user, Some(&self.password))
            .send()
            .await?;

        let status = resp.status();
        let body: Value = resp.json().await.unwrap_or(Value::Null);

        if !status.is_success() {
            return Ok(PowerState::Unknown);
        }

        if let Some(target) = body
            .get("Actions")
            .and_then(|a| a.get("#ComputerSystem.Reset"))
            .and_then(|r| r.get("target"))
            .and_then(|t| t.as_str())
        {
            self.reset_uri = Some(target.to_string());
        }

        let power_state = body
            .get("PowerState")
            .and_then(|v| v.as_str())
            .unwrap_or("UNKNOWN")
            .to_uppercase();

        Ok(match power_state.as_str() {
            "ON" => PowerState::On,
            "OFF" => PowerState::Off,
            _ => PowerState::Unknown,
        })
    }

    pub async fn start(&self) -> Result<bool, BmcError> {
        self.send_reset("On").await
    }

    pub async fn stop(&self) -> Result<bool, BmcError> {
        self.send_reset("ForceOff").await
    }

    async fn send_reset(&self, reset_type: &str) -> Result<bool, BmcError> {
        let uri = self.reset_uri.as_ref().ok_or(BmcError::ResetUriNotKnown)?;
        let url = format!("{}{}", self.base, uri);
        let resp = self
            .http
            .post(&url)
            .basic_auth(&self.user, Some(&self.password))
            .json(&serde_json::json!({ "ResetType": reset_type }))
            .send()
            .await?;

        let status = resp.status();
        // Success is any 2xx (200/202/204) per the BMC's own convention.
        Ok(status.is_success())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_without_probe_is_an_error() {
        // Constructed but never probed: reset_uri is None.
        let creds = BmcCredentials {
            address: "10.0.0.5".into(),
            user: "admin".into(),
            password: "pw".into(),
        };
        let client = BmcClient::new(&creds, false).unwrap();
        assert!(client.reset_uri.is_none());
    }
}
