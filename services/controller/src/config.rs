//! Configuration for the controller.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};

/// Default upper bound for a single external call.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(10);

/// Controller configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// JSON manifest holding the rule sets to reconcile.
    pub rules_file: PathBuf,

    /// Workload API base URL. The in-memory workload backend is used when
    /// unset.
    pub workload_api_url: Option<String>,

    /// Upper bound for every external call (event source, workload API).
    pub call_timeout: Duration,

    /// How often the supervisor re-lists rule sets.
    pub resync_interval: Duration,

    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        let rules_file = std::env::var("GAMESCALE_RULES_FILE")
            .unwrap_or_else(|_| "rules.json".to_string())
            .into();

        let workload_api_url = std::env::var("GAMESCALE_WORKLOAD_API_URL")
            .ok()
            .filter(|url| !url.is_empty());

        let call_timeout = Duration::from_secs(secs_from_env(
            "GAMESCALE_CALL_TIMEOUT_SECS",
            DEFAULT_CALL_TIMEOUT.as_secs(),
        )?);
        let resync_interval =
            Duration::from_secs(secs_from_env("GAMESCALE_RESYNC_INTERVAL_SECS", 15)?);

        let log_level =
            std::env::var("GAMESCALE_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        Ok(Self {
            rules_file,
            workload_api_url,
            call_timeout,
            resync_interval,
            log_level,
        })
    }
}

fn secs_from_env(name: &str, default: u64) -> Result<u64> {
    match std::env::var(name) {
        Ok(value) => {
            let secs: u64 = value
                .parse()
                .with_context(|| format!("{name} must be a whole number of seconds"))?;
            anyhow::ensure!(secs > 0, "{name} must be positive");
            Ok(secs)
        }
        Err(_) => Ok(default),
    }
}
