//! `upstra-ups-watcherd <plan-path>` — C9: polls UPS state and owns the
//! `POWER_FAILURE` -> grace-sleep -> shutdown, and `ON_LINE` -> rollback
//! transitions. Invocations are serialized: the watcher always awaits
//! the spawned engine before polling again, so only one engine ever runs
//! at a time.

use std::path::PathBuf;
use std::time::Duration;

use tokio::process::Command;

use upstra_core::config::Config;
use upstra_core::eventlog::EventLog;
use upstra_core::secrets;
use upstra_core::ups::{read_ups_state, UpsState};

fn sibling_binary(name: &str) -> PathBuf {
    let mut path = std::env::current_exe().unwrap_or_else(|_| PathBuf::from(name));
    path.set_file_name(name);
    path
}

async fn run_engine(binary: &str, plan_path: &str) {
    match Command::new(sibling_binary(binary)).arg(plan_path).status().await {
        Ok(status) if status.success() => tracing::info!(binary, "engine completed"),
        Ok(status) => tracing::warn!(binary, code = status.code(), "engine exited non-zero"),
        Err(e) => tracing::error!(binary, error = %e, "failed to spawn engine"),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let plan_path = std::env::args()
        .nth(1)
        .ok_or_else(|| anyhow::anyhow!("usage: upstra-ups-watcherd <plan-path>"))?;

    let config = Config::load()?;
    config.logging.init()?;

    let master_key = secrets::master_key_from_env()?;
    let plan = upstra_core::plan::Plan::load(&PathBuf::from(&plan_path), &master_key)?.compile()?;

    let eventlog = EventLog::connect(&config.database.url, &config.paths.run_pointer_file, master_key).await?;

    let mut last_state = UpsState::Unknown;
    loop {
        let state = read_ups_state(&config.ups.name, &config.ups.host).await;

        if state == UpsState::OnBattery && last_state != UpsState::OnBattery {
            tracing::warn!("power failure detected, starting grace period");
            eventlog.record_power_failure().await?;
            tokio::time::sleep(Duration::from_secs(plan.0.grace.shutdown_grace_seconds)).await;
            run_engine("upstra-shutdown", &plan_path).await;
        } else if state == UpsState::OnLine && last_state == UpsState::OnBattery {
            if eventlog.current_run_id()?.is_some() {
                tracing::info!("power restored, starting rollback");
                run_engine("upstra-rollback", &plan_path).await;
            }
        }

        last_state = state;
        tokio::time::sleep(Duration::from_secs(10)).await;
    }
}
