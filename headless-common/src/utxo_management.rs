use bitcoin::OutPoint;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{reservation_error, CoreResult};
use crate::logging::{log_reservation, LogLevel};
use crate::types::outpoint_id;
use crate::utxo_selection::Utxo;
use crate::utxo_store::UtxoStore;

/// Marks UTXOs as selected so concurrent flows skip them.
///
/// A reservation made with a TTL lapses on its own; the store treats an
/// expired reservation as if it had never been made. This is how flows that
/// span several calls (proposals, swaps) keep their inputs without holding
/// the `SEND_TX` lock between calls.
pub struct UtxoReservation<S: UtxoStore> {
    store: Arc<S>,
}

impl<S: UtxoStore> UtxoReservation<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Reserves every outpoint, expiring after `ttl` when given.
    ///
    /// Either all outpoints end up reserved or none do: if the store refuses
    /// one, the ones this call already marked are cleared before the error is
    /// returned. An outpoint under another unexpired reservation is refused
    /// and its reservation left untouched.
    pub async fn reserve(&self, outpoints: &[OutPoint], ttl: Option<Duration>) -> CoreResult<()> {
        for (done, outpoint) in outpoints.iter().enumerate() {
            if let Err(e) = self.store.mark_selected(outpoint, true, ttl).await {
                log_reservation(
                    LogLevel::Warn,
                    "reservation failed, rolling back",
                    Some(json!({
                        "outpoint": outpoint_id(outpoint),
                        "rolled_back": done,
                    })),
                );
                // Only the prefix was marked by this call. Release logs its own
                // failures; the reserve error is the one returned.
                let _ = self.release(&outpoints[..done]).await;
                return Err(reservation_error(
                    format!("Failed to reserve {}", outpoint_id(outpoint)),
                    e,
                ));
            }
        }

        log_reservation(
            LogLevel::Debug,
            "inputs reserved",
            Some(json!({
                "count": outpoints.len(),
                "ttl_ms": ttl.map(|ttl| ttl.as_millis() as u64),
            })),
        );
        Ok(())
    }

    /// Clears the reservation of every outpoint.
    ///
    /// Releasing an unreserved or unknown outpoint is a no-op. Every outpoint
    /// is attempted; the first store failure is returned afterwards.
    pub async fn release(&self, outpoints: &[OutPoint]) -> CoreResult<()> {
        let mut first_error = None;

        for outpoint in outpoints {
            if let Err(e) = self.store.mark_selected(outpoint, false, None).await {
                log_reservation(
                    LogLevel::Error,
                    "failed to release reservation",
                    Some(json!({
                        "outpoint": outpoint_id(outpoint),
                        "error": e.to_string(),
                    })),
                );
                if first_error.is_none() {
                    first_error = Some(reservation_error(
                        format!("Failed to release {}", outpoint_id(outpoint)),
                        e,
                    ));
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Lists UTXOs currently under an unexpired reservation.
    pub async fn reserved(&self) -> CoreResult<Vec<Utxo>> {
        self.store.selected_utxos().await
    }
}
