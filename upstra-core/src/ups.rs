//! UPS watcher (C9, external collaborator): polls UPS state and owns the
//! `POWER_FAILURE` / `ON_LINE` transitions.
//!
//! Shells out to the Network UPS Tools `upsc` client and parses its
//! `key: value` output, watching `ups.status` for `OL` (on line) vs `OB`
//! (on battery).

use tokio::process::Command;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsState {
    OnLine,
    OnBattery,
    Unknown,
}

/// Runs `upsc <ups_name>@<host>` and parses the `ups.status` line.
pub async fn read_ups_state(ups_name: &str, host: &str) -> UpsState {
    let target = format!("{ups_name}@{host}");
    let output = match Command::new("upsc").arg(&target).output().await {
        Ok(o) if o.status.success() => o,
        _ => return UpsState::Unknown,
    };

    let text = String::from_utf8_lossy(&output.stdout);
    for line in text.lines() {
        if let Some((key, value)) = line.split_once(':') {
            if key.trim() == "ups.status" {
                let value = value.trim();
                if value.contains("OB") {
                    return UpsState::OnBattery;
                }
                if value.contains("OL") {
                    return UpsState::OnLine;
                }
            }
        }
    }
    UpsState::Unknown
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_on_battery_status_line() {
        let text = "battery.charge: 90\nups.status: OB\n";
        let mut state = UpsState::Unknown;
        for line in text.lines() {
            if let Some((key, value)) = line.split_once(':') {
                if key.trim() == "ups.status" && value.trim().contains("OB") {
                    state = UpsState::OnBattery;
                }
            }
        }
        assert_eq!(state, UpsState::OnBattery);
    }
}
