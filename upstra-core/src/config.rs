//! Layered configuration: defaults, then an optional TOML file, then
//! environment variable overrides.

use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};

use upstra_common::{Error, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// sqlx connection string, e.g. `sqlite:///var/lib/upstra/events.db`.
    pub url: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite:///var/lib/upstra/events.db".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Pointer file holding the active run id. Absence means "no run in
    /// progress".
    pub run_pointer_file: String,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            run_pointer_file: "/var/lib/upstra/run_id".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BmcConfig {
    /// Self-signed BMCs are the norm; verification is off by default.
    pub verify_tls: bool,
}

impl Default for BmcConfig {
    fn default() -> Self {
        Self { verify_tls: false }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    pub poll_interval_seconds: u64,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            poll_interval_seconds: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpsConfig {
    /// NUT ups name and host, as passed to `upsc <name>@<host>`.
    pub name: String,
    pub host: String,
}

impl Default for UpsConfig {
    fn default() -> Self {
        Self { name: "ups".to_string(), host: "localhost".to_string() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LoggingConfig {
    pub level: String,
    pub json_format: bool,
    pub file_path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub bmc: BmcConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub ups: UpsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load, precedence low to high: built-in defaults, an optional TOML
    /// file, then `UPSTRA_*` environment variables.
    pub fn load() -> Result<Self> {
        let mut cfg = match Self::find_config_file() {
            Some(path) => Self::load_from_file(&path)?,
            None => Config::default(),
        };
        cfg.apply_env_overrides();
        Ok(cfg)
    }

    fn find_config_file() -> Option<PathBuf> {
        if let Ok(path) = env::var("UPSTRA_CONFIG") {
            return Some(PathBuf::from(path));
        }
        for candidate in ["/etc/upstra/config.toml", "./upstra.toml"] {
            let p = Path::new(candidate);
            if p.exists() {
                return Some(p.to_path_buf());
            }
        }
        None
    }

    fn load_from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        toml::from_str(&text)
            .map_err(|e| Error::Configuration(format!("{}: {}", path.display(), e)))
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(url) = env::var("UPSTRA_DATABASE_URL") {
            self.database.url = url;
        }
        if let Ok(path) = env::var("UPSTRA_RUN_POINTER_FILE") {
            self.paths.run_pointer_file = path;
        }
        if let Ok(verify) = env::var("UPSTRA_BMC_VERIFY_TLS") {
            self.bmc.verify_tls = verify == "true" || verify == "1";
        }
        if let Ok(interval) = env::var("UPSTRA_METRICS_POLL_INTERVAL_SECONDS") {
            if let Ok(v) = interval.parse() {
                self.metrics.poll_interval_seconds = v;
            }
        }
        if let Ok(level) = env::var("RUST_LOG") {
            self.logging.level = level;
        }
        if let Ok(path) = env::var("UPSTRA_LOG_PATH") {
            self.logging.file_path = Some(path);
        }
        if let Ok(name) = env::var("UPSTRA_UPS_NAME") {
            self.ups.name = name;
        }
        if let Ok(host) = env::var("UPSTRA_UPS_HOST") {
            self.ups.host = host;
        }
    }
}
