//! Standardized error handling for the headless wallet core
//!
//! This module defines the error taxonomy shared by the lock registry, the
//! coin selector, the UTXO reservation layer and the transaction-build
//! orchestrator.
//!
//! # Taxonomy
//!
//! - `Busy`: a lock was refused. Recoverable by the caller retrying later;
//!   never retried internally.
//! - `InsufficientFunds`: coin selection could not cover a token's amount.
//!   Terminal for the request; nothing was reserved or built.
//! - `Build` / `Broadcast`: the delegated transaction library failed. Any
//!   reservation made for the request was released before the error surfaced.
//! - `Reservation` / `Store` / `UtxoNotFound` / `UtxoReserved`: the UTXO store
//!   could not honor a query or a mark/unmark request.
//! - `Config` / `Io` / `Serialization`: loading or saving the configuration
//!   file failed.
//!
//! # Usage
//!
//! ```
//! use headless_common::error::{CoreError, ErrorCategory};
//! use headless_common::lock::LockType;
//!
//! let err = CoreError::Busy { lock_type: LockType::SendTx };
//! assert_eq!(err.category(), ErrorCategory::Busy);
//! assert!(err.is_retryable());
//! ```

use bitcoin::OutPoint;
use std::error::Error as StdError;
use std::io;
use thiserror::Error;

use crate::lock::LockType;
use crate::types::TokenId;

/// Boxed error source carried by context-style variants
pub type BoxedSource = Box<dyn StdError + Send + Sync>;

/// The main error type for the headless wallet core
#[derive(Debug, Error)]
pub enum CoreError {
    /// A lock was refused because another flow holds it
    #[error("{}", .lock_type.busy_message())]
    Busy { lock_type: LockType },

    /// Coin selection could not cover the requested amount
    #[error("No utxos available for the query filter for this amount (token {token}: required {required}, available {available})")]
    InsufficientFunds {
        token: TokenId,
        required: u64,
        available: u64,
    },

    /// A UTXO referenced by a caller does not exist in the store
    #[error("UTXO not found: {0}")]
    UtxoNotFound(OutPoint),

    /// A UTXO is already reserved by another flow
    #[error("UTXO already reserved: {0}")]
    UtxoReserved(OutPoint),

    /// Reserving or releasing UTXOs failed
    #[error("Reservation error: {context}")]
    Reservation {
        context: String,
        #[source]
        source: Option<BoxedSource>,
    },

    /// The UTXO store failed to answer a query
    #[error("Store error: {context}")]
    Store {
        context: String,
        #[source]
        source: Option<BoxedSource>,
    },

    /// The delegated library failed to prepare transaction data
    #[error("Transaction build failed: {context}")]
    Build {
        context: String,
        #[source]
        source: Option<BoxedSource>,
    },

    /// The delegated library failed to sign or broadcast
    #[error("Transaction broadcast failed: {context}")]
    Broadcast {
        context: String,
        #[source]
        source: Option<BoxedSource>,
    },

    /// Caller input rejected before any state was touched
    #[error("Validation error: {0}")]
    Validation(String),

    /// Configuration errors
    #[error("Configuration error: {context}")]
    Config {
        context: String,
        #[source]
        source: Option<BoxedSource>,
    },

    /// I/O errors
    #[error("I/O error: {context}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },

    /// Serialization/deserialization errors
    #[error("Serialization error: {context}")]
    Serialization {
        context: String,
        #[source]
        source: Option<BoxedSource>,
    },
}

/// Type alias for a Result with CoreError
pub type CoreResult<T> = Result<T, CoreError>;

/// Attach context to an I/O failure
pub fn with_io_context<T>(result: Result<T, io::Error>, context: impl Into<String>) -> CoreResult<T> {
    result.map_err(|err| CoreError::Io {
        context: context.into(),
        source: err,
    })
}

impl From<toml::ser::Error> for CoreError {
    fn from(err: toml::ser::Error) -> Self {
        CoreError::Serialization {
            context: format!("TOML serialization error: {}", err),
            source: Some(Box::new(err)),
        }
    }
}

/// Create a build error from a failure reported by the transaction library
pub fn build_error(context: impl Into<String>, source: anyhow::Error) -> CoreError {
    CoreError::Build {
        context: context.into(),
        source: Some(source.into()),
    }
}

/// Create a broadcast error from a failure reported by the transaction library
pub fn broadcast_error(context: impl Into<String>, source: anyhow::Error) -> CoreError {
    CoreError::Broadcast {
        context: context.into(),
        source: Some(source.into()),
    }
}

/// Create a store error with context
pub fn store_error<S: Into<String>>(context: S) -> CoreError {
    CoreError::Store {
        context: context.into(),
        source: None,
    }
}

/// Create a reservation error wrapping the failure that caused it
pub fn reservation_error<S: Into<String>>(context: S, source: CoreError) -> CoreError {
    CoreError::Reservation {
        context: context.into(),
        source: Some(Box::new(source)),
    }
}

/// Create a new configuration error with context
pub fn config_error<S: Into<String>>(context: S) -> CoreError {
    CoreError::Config {
        context: context.into(),
        source: None,
    }
}

/// Create a new configuration error with context and source
pub fn config_error_with_source<S: Into<String>, E: StdError + Send + Sync + 'static>(
    context: S,
    source: E,
) -> CoreError {
    CoreError::Config {
        context: context.into(),
        source: Some(Box::new(source)),
    }
}

/// Error category for logging and metrics purposes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Busy,
    InsufficientFunds,
    Reservation,
    Store,
    Build,
    Broadcast,
    Validation,
    Config,
    Io,
    Serialization,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Busy => "Busy",
            ErrorCategory::InsufficientFunds => "InsufficientFunds",
            ErrorCategory::Reservation => "Reservation",
            ErrorCategory::Store => "Store",
            ErrorCategory::Build => "Build",
            ErrorCategory::Broadcast => "Broadcast",
            ErrorCategory::Validation => "Validation",
            ErrorCategory::Config => "Config",
            ErrorCategory::Io => "Io",
            ErrorCategory::Serialization => "Serialization",
        }
    }
}

impl CoreError {
    /// Get the category of this error for metrics and logging
    pub fn category(&self) -> ErrorCategory {
        match self {
            CoreError::Busy { .. } => ErrorCategory::Busy,
            CoreError::InsufficientFunds { .. } => ErrorCategory::InsufficientFunds,
            CoreError::UtxoNotFound(_)
            | CoreError::UtxoReserved(_)
            | CoreError::Reservation { .. } => ErrorCategory::Reservation,
            CoreError::Store { .. } => ErrorCategory::Store,
            CoreError::Build { .. } => ErrorCategory::Build,
            CoreError::Broadcast { .. } => ErrorCategory::Broadcast,
            CoreError::Validation(_) => ErrorCategory::Validation,
            CoreError::Config { .. } => ErrorCategory::Config,
            CoreError::Io { .. } => ErrorCategory::Io,
            CoreError::Serialization { .. } => ErrorCategory::Serialization,
        }
    }

    /// Whether the caller may retry the same request later
    ///
    /// Only lock refusals qualify. Nothing in this crate retries on the
    /// caller's behalf.
    pub fn is_retryable(&self) -> bool {
        matches!(self, CoreError::Busy { .. })
    }

    /// Message suitable for returning to an API client
    ///
    /// Library failures are reported with their context and root cause but
    /// without the internal source chain.
    pub fn user_message(&self) -> String {
        match self {
            CoreError::Build { context, source } | CoreError::Broadcast { context, source } => {
                match source {
                    Some(source) => format!("{}: {}", context, source),
                    None => context.clone(),
                }
            }
            CoreError::Store { .. } | CoreError::Io { .. } => {
                "Wallet storage is temporarily unavailable".to_string()
            }
            _ => self.to_string(),
        }
    }

    /// Create a new validation error
    pub fn validation<S: Into<String>>(message: S) -> Self {
        CoreError::Validation(message.into())
    }
}
