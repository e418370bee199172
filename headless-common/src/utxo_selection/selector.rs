//! Fund-filling coin selector
//!
//! Given a required amount of one token, [`CoinSelector`] queries the
//! available UTXOs and picks the inputs to spend:
//!
//! 1. Query with `only_available` forced on and the token pinned.
//! 2. If the reported total is below the required amount, stop: insufficient.
//! 3. Sort candidates by amount, descending. The sort is stable, so equal
//!    amounts keep the store's order. That order is not guaranteed.
//! 4. If the largest candidate alone exceeds the amount, return the smallest
//!    candidate that still covers it, alone.
//! 5. Otherwise accumulate in descending order until the running total
//!    reaches the amount. Exact equality stops immediately.
//!
//! This is first-fit-decreasing: it favors few, large inputs and does not
//! search for an exact subset sum.
//!
//! # Usage
//!
//! ```
//! use bitcoin::OutPoint;
//! use headless_common::types::TokenId;
//! use headless_common::utxo_selection::selector::fill_amount;
//! use headless_common::utxo_selection::types::{SelectionResult, Utxo};
//!
//! let utxos: Vec<Utxo> = [1u64, 2, 3]
//!     .iter()
//!     .enumerate()
//!     .map(|(i, amount)| {
//!         let mut outpoint = OutPoint::null();
//!         outpoint.vout = i as u32;
//!         Utxo::new(outpoint, TokenId::native(), *amount, "addr")
//!     })
//!     .collect();
//!
//! match fill_amount(utxos, 6, 4) {
//!     SelectionResult::Success { selected, change_amount } => {
//!         let amounts: Vec<u64> = selected.iter().map(|u| u.amount).collect();
//!         assert_eq!(amounts, vec![3, 2]);
//!         assert_eq!(change_amount, 1);
//!     }
//!     SelectionResult::InsufficientFunds { .. } => unreachable!(),
//! }
//! ```

use serde_json::json;
use std::sync::Arc;

use crate::error::{CoreError, CoreResult};
use crate::logging::{log_selection, LogLevel};
use crate::types::TokenId;
use crate::utxo_selection::types::{SelectionResult, Utxo, UtxoFilter};
use crate::utxo_store::UtxoStore;

/// Pick the inputs covering `required` from `candidates`
///
/// `total_available` is the total reported by the store for the same query.
/// A store whose candidates do not actually add up to `required` yields
/// [`SelectionResult::InsufficientFunds`], never a partial selection.
pub fn fill_amount(mut candidates: Vec<Utxo>, total_available: u64, required: u64) -> SelectionResult {
    let insufficient = |available: u64| SelectionResult::InsufficientFunds {
        available,
        required,
    };

    if total_available < required || candidates.is_empty() {
        return insufficient(total_available);
    }

    // Stable: equal amounts keep the order the store returned them in
    candidates.sort_by(|a, b| b.amount.cmp(&a.amount));

    if candidates[0].amount > required {
        let chosen = match candidates.iter().position(|utxo| utxo.amount < required) {
            Some(first_smaller) => candidates.swap_remove(first_smaller - 1),
            None => candidates.swap_remove(candidates.len() - 1),
        };
        let change_amount = chosen.amount - required;
        return SelectionResult::Success {
            selected: vec![chosen],
            change_amount,
        };
    }

    let mut total: u64 = 0;
    let mut selected = Vec::new();
    for utxo in candidates {
        total = total.saturating_add(utxo.amount);
        selected.push(utxo);
        if total >= required {
            return SelectionResult::Success {
                selected,
                change_amount: total - required,
            };
        }
    }

    insufficient(total)
}

/// Store-backed coin selector
pub struct CoinSelector<S: UtxoStore> {
    store: Arc<S>,
}

impl<S: UtxoStore> CoinSelector<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Select inputs covering `required` units of `token`
    ///
    /// The caller's filter is narrowed to `token` and to available UTXOs; its
    /// other constraints are passed to the store unchanged. Insufficiency is
    /// an ordinary result, not an error.
    pub async fn select(
        &self,
        required: u64,
        token: &TokenId,
        filter: &UtxoFilter,
    ) -> CoreResult<SelectionResult> {
        if required == 0 {
            return Err(CoreError::validation(
                "Required amount must be greater than zero",
            ));
        }

        let query = UtxoFilter {
            token: Some(token.clone()),
            only_available: true,
            ..filter.clone()
        };
        let available = self.store.query_utxos(&query).await?;
        let candidate_count = available.utxos.len();
        let result = fill_amount(available.utxos, available.total_amount_available, required);

        match &result {
            SelectionResult::Success {
                selected,
                change_amount,
            } => log_selection(
                LogLevel::Debug,
                "inputs selected",
                Some(json!({
                    "token": token.as_str(),
                    "required": required,
                    "candidates": candidate_count,
                    "selected": selected.len(),
                    "change": change_amount,
                })),
            ),
            SelectionResult::InsufficientFunds { available, .. } => log_selection(
                LogLevel::Info,
                "insufficient funds",
                Some(json!({
                    "token": token.as_str(),
                    "required": required,
                    "available": available,
                })),
            ),
        }

        Ok(result)
    }
}
