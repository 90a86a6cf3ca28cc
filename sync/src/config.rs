//! Configuration management for the sync layer.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Default quiet period before a quantity change is written remotely.
pub const DEFAULT_DEBOUNCE_MS: u64 = 600;

/// What a session does with a mutation that arrives while another is in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BusyPolicy {
    /// Wait for the running operation, then run (FIFO)
    #[default]
    Queue,
    /// Fail fast with `SyncError::Busy`
    Reject,
}

impl std::str::FromStr for BusyPolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "queue" => Ok(BusyPolicy::Queue),
            "reject" => Ok(BusyPolicy::Reject),
            _ => Err(ConfigError::InvalidBusyPolicy(s.to_string())),
        }
    }
}

/// Tuning knobs shared by the cart and favorites sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSettings {
    /// Quiet period for debounced quantity writes
    pub debounce: Duration,
    pub busy_policy: BusyPolicy,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(DEFAULT_DEBOUNCE_MS),
            busy_policy: BusyPolicy::Queue,
        }
    }
}

/// Configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// PostgreSQL connection URL
    pub database_url: String,
    /// Signed-in account to run as; guest when absent
    pub account_id: Option<String>,
    /// File backing guest local storage
    pub storage_path: PathBuf,
    pub session: SessionSettings,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url = env::var("DATABASE_URL").map_err(|_| ConfigError::MissingDatabaseUrl)?;

        let account_id = env::var("TOTE_ACCOUNT_ID")
            .ok()
            .filter(|id| !id.trim().is_empty());

        let storage_path = env::var("TOTE_STORAGE_PATH")
            .unwrap_or_else(|_| "tote-storage.json".to_string())
            .into();

        let debounce_ms = env::var("TOTE_DEBOUNCE_MS")
            .unwrap_or_else(|_| DEFAULT_DEBOUNCE_MS.to_string())
            .parse()
            .map_err(|_| ConfigError::InvalidDebounce)?;

        let busy_policy = match env::var("TOTE_BUSY_POLICY") {
            Ok(value) => value.parse()?,
            Err(_) => BusyPolicy::default(),
        };

        Ok(Self {
            database_url,
            account_id,
            storage_path,
            session: SessionSettings {
                debounce: Duration::from_millis(debounce_ms),
                busy_policy,
            },
        })
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("DATABASE_URL environment variable is required")]
    MissingDatabaseUrl,

    #[error("Invalid TOTE_DEBOUNCE_MS value")]
    InvalidDebounce,

    #[error("Invalid TOTE_BUSY_POLICY value: {0} (expected queue or reject)")]
    InvalidBusyPolicy(String),
}
