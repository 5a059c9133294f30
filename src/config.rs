//! Environment-driven node configuration.
//!
//! Mirrors the donor's `NetworkConfig`: a plain struct with a `validate`
//! pass, loaded once at startup. No CLI parser — every value here was an
//! env var in the original node and stays one.

use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub port: u16,
    pub bootstrap_peer: Option<String>,
    pub db_path: String,
    pub main_cycle_interval: Duration,
    pub idle_suite_interval: Duration,
    pub advertised_url: String,
}

const DEFAULT_PORT: u16 = 8009;
const DEFAULT_MAIN_CYCLE_SECS: u64 = 900;
const DEFAULT_IDLE_SUITE_SECS: u64 = 30;

impl NodeConfig {
    pub fn from_env() -> Self {
        let port = std::env::var("PORT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_PORT);

        let bootstrap_peer = std::env::var("BOOTSTRAP_PEER")
            .ok()
            .filter(|s| !s.is_empty());

        let db_path = std::env::var("AXIOM_DB_PATH").unwrap_or_else(|| default_db_path(port));

        let main_cycle_interval =
            Duration::from_secs(env_u64("AXIOM_MAIN_CYCLE_INTERVAL", DEFAULT_MAIN_CYCLE_SECS));
        let idle_suite_interval =
            Duration::from_secs(env_u64("AXIOM_IDLE_SUITE_INTERVAL", DEFAULT_IDLE_SUITE_SECS));

        let advertised_url = std::env::var("AXIOM_ADVERTISED_URL")
            .unwrap_or_else(|| format!("http://127.0.0.1:{port}"));

        Self {
            port,
            bootstrap_peer,
            db_path,
            main_cycle_interval,
            idle_suite_interval,
            advertised_url,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.port == 0 {
            return Err(ConfigError::InvalidPort("listen port cannot be 0".into()));
        }
        if self.main_cycle_interval.is_zero() {
            return Err(ConfigError::InvalidInterval(
                "main cycle interval must be > 0".into(),
            ));
        }
        if self.idle_suite_interval.is_zero() {
            return Err(ConfigError::InvalidInterval(
                "idle suite interval must be > 0".into(),
            ));
        }
        Ok(())
    }
}

fn default_db_path(port: u16) -> String {
    if port == DEFAULT_PORT {
        "axiom_ledger.db".to_string()
    } else {
        format!("axiom_ledger_{port}.db")
    }
}

fn env_u64(name: &str, default: u64) -> u64 {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid port configuration: {0}")]
    InvalidPort(String),

    #[error("invalid interval configuration: {0}")]
    InvalidInterval(String),
}
