//! Logging infrastructure for the headless wallet core
//!
//! This module wires the `log` facade to an `env_logger` backend and offers
//! structured helpers per subsystem:
//! - Lock acquisition, refusal and timer expiry
//! - Coin selection outcomes
//! - UTXO reservation changes
//! - Transaction build and broadcast steps
//!
//! Addresses are truncated with [`sanitize_for_logging`] before they are
//! logged. Structured logging (JSON lines) is available for machine processing.
//!
//! # Usage
//!
//! ```
//! use headless_common::logging::{self, LogConfig, LogLevel};
//! use serde_json::json;
//!
//! logging::init(&LogConfig::default()).expect("Failed to initialize logging");
//!
//! logging::log_lock(
//!     LogLevel::Info,
//!     "lock acquired",
//!     Some(json!({"lock_type": "SEND_TX", "wallet_id": "w1"})),
//! );
//! ```

use chrono::Local;
use log::{debug, LevelFilter};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fs::OpenOptions;
use std::io::Write as IoWrite;
use std::sync::OnceLock;

/// Log severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Error conditions
    Error,
    /// Warning conditions
    Warn,
    /// Informational messages
    Info,
    /// Debug-level messages
    Debug,
    /// Trace level (very verbose)
    Trace,
}

/// Log context categories for structured logging
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogContext {
    /// Lock registry and mutex timers
    Lock,
    /// Coin selection
    Selection,
    /// UTXO reservation (mark/unmark selected)
    Reservation,
    /// Transaction build, sign and broadcast
    Transaction,
    /// Configuration loading and validation
    Config,
}

/// Configuration for the logging system
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Default log level for all contexts
    #[serde(default = "default_level")]
    pub level: LogLevel,
    /// Path to log file (None for console-only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_file: Option<String>,
    /// Whether to include timestamps in log messages
    #[serde(default = "default_true")]
    pub include_timestamps: bool,
    /// Whether to include source location in log messages
    #[serde(default)]
    pub include_source_location: bool,
    /// Whether to use JSON format for logs (machine-readable)
    #[serde(default)]
    pub json_format: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            log_file: None,
            include_timestamps: true,
            include_source_location: false,
            json_format: false,
        }
    }
}

fn default_level() -> LogLevel {
    LogLevel::Info
}

fn default_true() -> bool {
    true
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Error => LevelFilter::Error,
            LogLevel::Warn => LevelFilter::Warn,
            LogLevel::Info => LevelFilter::Info,
            LogLevel::Debug => LevelFilter::Debug,
            LogLevel::Trace => LevelFilter::Trace,
        }
    }
}

impl From<LogLevel> for log::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Error => log::Level::Error,
            LogLevel::Warn => log::Level::Warn,
            LogLevel::Info => log::Level::Info,
            LogLevel::Debug => log::Level::Debug,
            LogLevel::Trace => log::Level::Trace,
        }
    }
}

// Outcome of the first initialization, returned to every later call
static LOGGING_INIT: OnceLock<Result<(), String>> = OnceLock::new();

/// Initialize the logging system with the given configuration
///
/// Only the first call installs a logger. Later calls return the outcome of
/// that first call, including a failure to open the log file.
pub fn init(config: &LogConfig) -> Result<(), String> {
    LOGGING_INIT.get_or_init(|| install(config)).clone()
}

fn install(config: &LogConfig) -> Result<(), String> {
    let include_timestamps = config.include_timestamps;
    let include_source_location = config.include_source_location;
    let json_format = config.json_format;
    let log_file = config.log_file.clone();
    let level = config.level;

    let mut builder = env_logger::Builder::new();
    builder.filter_level(level.into());

    builder.format(move |buf, record| {
        let mut style = buf.style();
        style.set_bold(true);

        let timestamp = if include_timestamps {
            Local::now().format("%Y-%m-%d %H:%M:%S%.3f").to_string()
        } else {
            String::new()
        };

        let source_location = if include_source_location {
            format!(
                " [{}:{}]",
                record.file().unwrap_or("unknown"),
                record.line().unwrap_or(0)
            )
        } else {
            String::new()
        };

        if json_format {
            let line = json!({
                "timestamp": timestamp,
                "level": record.level().to_string(),
                "target": record.target(),
                "location": source_location,
                "message": record.args().to_string(),
            });

            writeln!(buf, "{}", line)
        } else {
            if include_timestamps {
                write!(buf, "{} ", timestamp)?;
            }

            writeln!(
                buf,
                "[{}{}] {}",
                style.value(record.level()),
                source_location,
                record.args()
            )
        }
    });

    if let Some(file_path) = &log_file {
        match OpenOptions::new().create(true).append(true).open(file_path) {
            Ok(file) => {
                builder.target(env_logger::Target::Pipe(Box::new(file)));
            }
            Err(e) => {
                return Err(format!("Failed to open log file {}: {}", file_path, e));
            }
        }
    }

    // Tests and embedding services may have installed a logger already
    if let Err(e) = builder.try_init() {
        debug!("Logger already initialized, using existing instance: {}", e);
    }

    Ok(())
}

/// Truncate a potentially sensitive value (address, xpub) for logging
pub fn sanitize_for_logging(input: &str) -> String {
    if input.is_empty() {
        return String::new();
    }

    let chars: Vec<char> = input.chars().collect();
    if chars.len() <= 8 {
        return "*****".to_string();
    }

    let first: String = chars[..4].iter().collect();
    let last: String = chars[chars.len() - 4..].iter().collect();
    format!("{}...{}", first, last)
}

fn log_with_context(
    level: LogLevel,
    context: LogContext,
    message: &str,
    params: Option<serde_json::Value>,
) {
    let level: log::Level = level.into();
    match params {
        Some(params) => log::log!(level, "[{:?}] {} {}", context, message, params),
        None => log::log!(level, "[{:?}] {}", context, message),
    }
}

/// Log a lock registry event
pub fn log_lock(level: LogLevel, message: &str, params: Option<serde_json::Value>) {
    log_with_context(level, LogContext::Lock, message, params);
}

/// Log a coin selection event
pub fn log_selection(level: LogLevel, message: &str, params: Option<serde_json::Value>) {
    log_with_context(level, LogContext::Selection, message, params);
}

/// Log a UTXO reservation event
pub fn log_reservation(level: LogLevel, message: &str, params: Option<serde_json::Value>) {
    log_with_context(level, LogContext::Reservation, message, params);
}

/// Log a transaction build or broadcast event
pub fn log_transaction(level: LogLevel, message: &str, params: Option<serde_json::Value>) {
    log_with_context(level, LogContext::Transaction, message, params);
}

/// Log a configuration event
pub fn log_config(level: LogLevel, message: &str, params: Option<serde_json::Value>) {
    log_with_context(level, LogContext::Config, message, params);
}
