//! `upstra-metric-polld <plan-path>` — C6: independent, fixed-interval
//! poller writing into the metric cache. Never touches plan or event
//! state.

use std::path::PathBuf;
use std::time::Duration;

use upstra_core::config::Config;
use upstra_core::metrics::MetricCache;
use upstra_core::secrets;
use upstra_core::vcenter::RestClient;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let plan_path = std::env::args()
        .nth(1)
        .ok_or_else(|| anyhow::anyhow!("usage: upstra-metric-polld <plan-path>"))?;

    let config = Config::load()?;
    config.logging.init()?;

    let master_key = secrets::master_key_from_env()?;
    let plan = upstra_core::plan::Plan::load(&PathBuf::from(plan_path), &master_key)?.compile()?;

    let cache = MetricCache::connect(&config.database.url).await?;
    let vcenter = RestClient::connect(&plan.0.controller).map_err(|e| anyhow::anyhow!(e.to_string()))?;

    loop {
        if let Err(e) = cache.poll_once(&vcenter).await {
            tracing::warn!(error = %e, "metric poll failed");
        }
        tokio::time::sleep(Duration::from_secs(config.metrics.poll_interval_seconds)).await;
    }
}
