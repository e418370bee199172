//! Coin selection
//!
//! - `types.rs` - UTXO, filter, query result and selection result types
//! - `selector.rs` - the fund-filling algorithm and its store-backed wrapper
//!
//! Selection has no side effects. Keeping two concurrent builds from picking
//! the same UTXO is the job of the lock registry and of UTXO reservation,
//! acting around the selector.

pub mod selector;
pub mod types;

pub use selector::{fill_amount, CoinSelector};
pub use types::{SelectionResult, Utxo, UtxoFilter, UtxoQueryResult};
