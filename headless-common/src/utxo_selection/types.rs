//! Core types for coin selection
//!
//! # Key Types
//!
//! - [`Utxo`]: a spendable output as reported by the UTXO store
//! - [`UtxoFilter`]: caller-supplied query constraints
//! - [`UtxoQueryResult`]: what the store returns for a filter
//! - [`SelectionResult`]: outcome of a selection, never partial
//!
//! # Example
//!
//! ```
//! use headless_common::types::TokenId;
//! use headless_common::utxo_selection::types::UtxoFilter;
//!
//! let filter = UtxoFilter::new()
//!     .with_token(TokenId::native())
//!     .with_amount_bigger_than(10)
//!     .with_max_utxos(255);
//! assert!(!filter.only_available);
//! ```

use bitcoin::OutPoint;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::TokenId;

/// Unspent output tracked by the wallet
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Utxo {
    /// `(transactionId, outputIndex)` reference
    pub outpoint: OutPoint,

    pub token: TokenId,

    /// Amount in the token's smallest unit
    pub amount: u64,

    pub address: String,

    /// Height or time lock not yet expired
    #[serde(default)]
    pub is_locked: bool,

    /// Reserved as input by an in-flight build
    #[serde(default)]
    pub selected_as_input: bool,

    /// End of the reservation; `None` means it never expires
    #[serde(default)]
    pub selection_expires_at: Option<DateTime<Utc>>,
}

impl Utxo {
    /// Create an unlocked, unreserved UTXO
    pub fn new(outpoint: OutPoint, token: TokenId, amount: u64, address: impl Into<String>) -> Self {
        Self {
            outpoint,
            token,
            amount,
            address: address.into(),
            is_locked: false,
            selected_as_input: false,
            selection_expires_at: None,
        }
    }

    /// Whether the reservation flag is set and has not expired at `now`
    ///
    /// An expired reservation is treated as if it had never been made.
    pub fn is_reserved_at(&self, now: DateTime<Utc>) -> bool {
        self.selected_as_input
            && self
                .selection_expires_at
                .map(|expires_at| expires_at > now)
                .unwrap_or(true)
    }

    /// Whether this UTXO may be returned by an `only_available` query at `now`
    pub fn is_available_at(&self, now: DateTime<Utc>) -> bool {
        !self.is_locked && !self.is_reserved_at(now)
    }
}

/// Query constraints for the UTXO store
///
/// Amount bounds are strict. `max_amount` caps the running sum of returned
/// amounts (UTXOs that would overflow it are skipped), `max_utxos` caps their
/// count.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UtxoFilter {
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub token: Option<TokenId>,
    #[serde(default)]
    pub amount_smaller_than: Option<u64>,
    #[serde(default)]
    pub amount_bigger_than: Option<u64>,
    #[serde(default)]
    pub max_amount: Option<u64>,
    #[serde(default)]
    pub max_utxos: Option<usize>,
    /// Exclude locked and reserved UTXOs
    #[serde(default)]
    pub only_available: bool,
}

impl UtxoFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.address = Some(address.into());
        self
    }

    pub fn with_token(mut self, token: TokenId) -> Self {
        self.token = Some(token);
        self
    }

    pub fn with_amount_smaller_than(mut self, amount: u64) -> Self {
        self.amount_smaller_than = Some(amount);
        self
    }

    pub fn with_amount_bigger_than(mut self, amount: u64) -> Self {
        self.amount_bigger_than = Some(amount);
        self
    }

    pub fn with_max_amount(mut self, amount: u64) -> Self {
        self.max_amount = Some(amount);
        self
    }

    pub fn with_max_utxos(mut self, count: usize) -> Self {
        self.max_utxos = Some(count);
        self
    }

    pub fn only_available(mut self) -> Self {
        self.only_available = true;
        self
    }

    /// Whether `utxo` satisfies the per-item constraints of this filter
    ///
    /// Availability and the aggregate caps (`max_amount`, `max_utxos`) are
    /// applied by the store while it walks its UTXOs.
    pub fn matches(&self, utxo: &Utxo) -> bool {
        if let Some(address) = &self.address {
            if &utxo.address != address {
                return false;
            }
        }
        if let Some(token) = &self.token {
            if &utxo.token != token {
                return false;
            }
        }
        if let Some(max) = self.amount_smaller_than {
            if utxo.amount >= max {
                return false;
            }
        }
        if let Some(min) = self.amount_bigger_than {
            if utxo.amount <= min {
                return false;
            }
        }
        true
    }
}

/// UTXOs returned by a store query
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UtxoQueryResult {
    pub utxos: Vec<Utxo>,
    pub total_amount_available: u64,
}

/// Result of coin selection
///
/// Either a non-empty list whose summed amount covers the request, or an
/// explicit insufficiency signal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelectionResult {
    Success {
        /// Chosen UTXOs, in descending amount order
        selected: Vec<Utxo>,
        /// Selected total minus the required amount
        change_amount: u64,
    },
    InsufficientFunds {
        available: u64,
        required: u64,
    },
}

impl SelectionResult {
    pub fn is_success(&self) -> bool {
        matches!(self, SelectionResult::Success { .. })
    }

    /// Outpoints of the selected UTXOs (empty when insufficient)
    pub fn outpoints(&self) -> Vec<OutPoint> {
        match self {
            SelectionResult::Success { selected, .. } => {
                selected.iter().map(|utxo| utxo.outpoint).collect()
            }
            SelectionResult::InsufficientFunds { .. } => Vec::new(),
        }
    }
}
