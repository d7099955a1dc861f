//! Structured logging setup, shared by all four binaries.

use crate::config::LoggingConfig;

impl LoggingConfig {
    /// Initialize the global `tracing` subscriber. Safe to call once per
    /// process; a second call is a no-op (`try_init` swallows the error).
    pub fn init(&self) -> anyhow::Result<()> {
        let level = if self.level.is_empty() {
            "info".to_string()
        } else {
            self.level.clone()
        };

        let subscriber = tracing_subscriber::fmt()
            .with_target(true)
            .with_level(true)
            .with_thread_ids(false)
            .with_env_filter(tracing_subscriber::EnvFilter::new(level));

        if self.json_format {
            let _ = subscriber.json().try_init();
        } else {
            let _ = subscriber.try_init();
        }

        tracing::info!("logging initialized");
        Ok(())
    }

    pub fn init_default() -> anyhow::Result<()> {
        LoggingConfig::default().init()
    }
}

/// Structured log context span, matching the shape used across the
/// engines: `log_context!(run_id = run_id, host = host_id)`.
#[macro_export]
macro_rules! log_context {
    ($($key:ident = $value:expr),* $(,)?) => {
        {
            use tracing::field;
            tracing::info_span!(
                "context",
                $(
                    $key = field::display(&$value)
                ),*
            )
        }
    };
}
