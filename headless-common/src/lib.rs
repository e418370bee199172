//! Headless Wallet Common Library
//!
//! Coin selection and concurrency control for the headless wallet service.
//! The service exposes wallet operations over HTTP and delegates signing,
//! script construction and broadcasting to a transaction library; this crate
//! decides which UTXOs a send spends and keeps concurrent requests from
//! spending the same ones.
//!
//! # Modules
//!
//! - `types`: Token ids, requested outputs and outpoint helpers
//! - `error`: Error taxonomy shared by every module
//! - `logging`: Logging setup and structured per-subsystem helpers
//! - `config`: TOML configuration for lock timeouts and reservation TTLs
//! - `lock`: Non-blocking timed mutexes and the per-wallet/global lock registry
//! - `utxo_selection`: The fund-filling coin selection algorithm
//! - `utxo_store`: The UTXO store collaborator and an in-memory implementation
//! - `utxo_management`: UTXO reservation with optional expiry
//! - `wallet_operations`: Orchestration of lock, selection, reservation and build
//!
//! # Concurrency
//!
//! Locks never block: a refused lock is reported to the caller as
//! [`CoreError::Busy`]. Flows that span several calls (proposals, swaps)
//! reserve their inputs with a TTL instead of holding a lock between calls.

/// Core domain types
pub mod types;

/// Error handling
pub mod error;

/// Logging infrastructure
pub mod logging;

/// Configuration management
pub mod config;

/// Timed mutexes and the lock registry
pub mod lock;

/// Coin selection
pub mod utxo_selection;

/// UTXO store collaborator
pub mod utxo_store;

/// UTXO reservation
pub mod utxo_management;

/// Transaction-build orchestration
pub mod wallet_operations;

pub use error::{CoreError, CoreResult, ErrorCategory};
pub use lock::{LockGuard, LockRegistry, LockScope, LockTimeouts, LockType, TimedMutex};
pub use types::{TokenId, TxOutput, NATIVE_TOKEN_UID};
pub use utxo_management::UtxoReservation;
pub use utxo_selection::{
    fill_amount, CoinSelector, SelectionResult, Utxo, UtxoFilter, UtxoQueryResult,
};
pub use utxo_store::{Clock, MemoryUtxoStore, SystemClock, UtxoStore};
pub use wallet_operations::{
    InputSelection, ReservationPolicy, SendRequest, SpendsInputs, TransactionBuilder,
    WalletOperations,
};

pub use bitcoin::{OutPoint, Txid};

/// Library version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library initialization
///
/// Sets up logging with the default configuration. Safe to call multiple
/// times; only the first call has an effect.
pub fn init() -> Result<(), String> {
    let config = logging::LogConfig::default();
    logging::init(&config).map_err(|e| format!("Failed to initialize logging: {}", e))
}
