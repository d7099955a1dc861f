//! `upstra-shutdown <plan-path>` — C7 entry point. Exit 0 on clean
//! completion (even if individual VM/host operations failed and were
//! logged as `MIGRATION_ERROR`), non-zero only on a configuration or
//! durability failure.

use std::path::PathBuf;

use upstra_core::config::Config;
use upstra_core::eventlog::EventLog;
use upstra_core::secrets;
use upstra_core::shutdown::ShutdownEngine;
use upstra_core::vcenter::RestClient;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let plan_path = std::env::args()
        .nth(1)
        .ok_or_else(|| anyhow::anyhow!("usage: upstra-shutdown <plan-path>"))?;

    let config = Config::load()?;
    config.logging.init()?;

    let master_key = secrets::master_key_from_env()?;
    let plan = upstra_core::plan::Plan::load(&PathBuf::from(plan_path), &master_key)?.compile()?;

    let eventlog = EventLog::connect(&config.database.url, &config.paths.run_pointer_file, master_key).await?;
    let run_id = eventlog.begin_run().await?;

    let vcenter = RestClient::connect(&plan.0.controller).map_err(|e| anyhow::anyhow!(e.to_string()))?;
    let engine = ShutdownEngine::new(&vcenter, &eventlog, run_id, config.bmc.verify_tls);

    engine.run(&plan).await?;

    tracing::info!("shutdown plan completed");
    Ok(())
}
