//! Configuration for the lock registry, UTXO reservation and logging.
//!
//! Settings are stored in TOML. Every field has a default, so an empty file
//! (or a missing section) yields the stock behavior:
//!
//! ```toml
//! [locks]
//! send_tx_timeout_ms = 120000
//! hsm_timeout_ms = 120000
//!
//! [reservation]
//! proposal_ttl_ms = 300000
//! # send_ttl_ms unset: inputs of a send stay reserved until spent
//!
//! [logging]
//! level = "info"
//! ```

use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::error::{config_error, config_error_with_source, with_io_context, CoreResult};
use crate::lock::LockTimeouts;
use crate::logging::{log_config, LogConfig, LogLevel};
use crate::wallet_operations::ReservationPolicy;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub locks: LockConfig,

    #[serde(default)]
    pub reservation: ReservationConfig,

    #[serde(default)]
    pub logging: LogConfig,
}

/// Auto-release timeouts of the lock registry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockConfig {
    #[serde(default = "default_unlock_timeout_ms")]
    pub send_tx_timeout_ms: u64,

    #[serde(default = "default_unlock_timeout_ms")]
    pub hsm_timeout_ms: u64,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            send_tx_timeout_ms: default_unlock_timeout_ms(),
            hsm_timeout_ms: default_unlock_timeout_ms(),
        }
    }
}

/// Reservation lifetimes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReservationConfig {
    #[serde(default = "default_proposal_ttl_ms")]
    pub proposal_ttl_ms: u64,

    /// Unset means a send's inputs stay reserved until spent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub send_ttl_ms: Option<u64>,
}

impl Default for ReservationConfig {
    fn default() -> Self {
        Self {
            proposal_ttl_ms: default_proposal_ttl_ms(),
            send_ttl_ms: None,
        }
    }
}

impl Config {
    /// Load configuration from file
    pub fn load(path: &str) -> CoreResult<Self> {
        let content = with_io_context(
            fs::read_to_string(path),
            format!("Failed to read config file {}", path),
        )?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| config_error_with_source("Failed to parse config file", e))?;

        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self, path: &str) -> CoreResult<()> {
        let content = toml::to_string_pretty(self)?;

        with_io_context(
            fs::write(path, content),
            format!("Failed to write config file {}", path),
        )?;

        log_config(
            LogLevel::Debug,
            "config saved",
            Some(json!({
                "path": path,
                "send_tx_timeout_ms": self.locks.send_tx_timeout_ms,
                "hsm_timeout_ms": self.locks.hsm_timeout_ms,
                "proposal_ttl_ms": self.reservation.proposal_ttl_ms,
            })),
        );

        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self) -> CoreResult<()> {
        if self.locks.send_tx_timeout_ms == 0 {
            return Err(config_error("Invalid SEND_TX timeout: must be greater than 0"));
        }

        if self.locks.hsm_timeout_ms == 0 {
            return Err(config_error("Invalid HSM timeout: must be greater than 0"));
        }

        if self.reservation.proposal_ttl_ms == 0 {
            return Err(config_error("Invalid proposal TTL: must be greater than 0"));
        }

        if self.reservation.send_ttl_ms == Some(0) {
            return Err(config_error(
                "Invalid send TTL: must be greater than 0 when set",
            ));
        }

        Ok(())
    }

    pub fn lock_timeouts(&self) -> LockTimeouts {
        LockTimeouts {
            send_tx: Duration::from_millis(self.locks.send_tx_timeout_ms),
            hsm: Duration::from_millis(self.locks.hsm_timeout_ms),
        }
    }

    pub fn reservation_policy(&self) -> ReservationPolicy {
        ReservationPolicy {
            send_ttl: self.reservation.send_ttl_ms.map(Duration::from_millis),
            proposal_ttl: Some(Duration::from_millis(self.reservation.proposal_ttl_ms)),
        }
    }
}

/// Ensure a configuration file exists at the specified path
/// If it doesn't exist, create it with default values
pub fn ensure_config_exists(path: &Path) -> CoreResult<()> {
    if !path.exists() {
        let content = toml::to_string_pretty(&Config::default())?;

        if let Some(parent) = path.parent() {
            if !parent.exists() {
                with_io_context(
                    fs::create_dir_all(parent),
                    "Failed to create config directory",
                )?;
            }
        }

        with_io_context(
            fs::write(path, content),
            "Failed to write default config file",
        )?;
    }

    Ok(())
}

// Default value functions

fn default_unlock_timeout_ms() -> u64 {
    2 * 60 * 1000
}

fn default_proposal_ttl_ms() -> u64 {
    5 * 60 * 1000
}
