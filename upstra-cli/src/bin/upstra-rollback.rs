//! `upstra-rollback <plan-path>` — C8 entry point. Precondition: a run
//! pointer must exist; its absence is a fatal configuration error.

use std::path::PathBuf;

use upstra_core::config::Config;
use upstra_core::eventlog::EventLog;
use upstra_core::rollback::RollbackEngine;
use upstra_core::secrets;
use upstra_core::vcenter::RestClient;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let plan_path = std::env::args()
        .nth(1)
        .ok_or_else(|| anyhow::anyhow!("usage: upstra-rollback <plan-path>"))?;

    let config = Config::load()?;
    config.logging.init()?;

    let master_key = secrets::master_key_from_env()?;
    let plan = upstra_core::plan::Plan::load(&PathBuf::from(plan_path), &master_key)?.compile()?;

    let eventlog = EventLog::connect(&config.database.url, &config.paths.run_pointer_file, master_key).await?;
    let run_id = eventlog
        .current_run_id()?
        .ok_or_else(|| anyhow::anyhow!("no run in progress; nothing to roll back"))?;

    let vcenter = RestClient::connect(&plan.0.controller).map_err(|e| anyhow::anyhow!(e.to_string()))?;
    let engine = RollbackEngine::new(
        &vcenter,
        &eventlog,
        run_id,
        config.bmc.verify_tls,
        plan.0.grace.restart_grace_seconds,
    );

    engine.run().await?;

    tracing::info!("rollback completed");
    Ok(())
}
