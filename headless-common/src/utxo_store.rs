//! UTXO store collaborator
//!
//! The wallet's UTXO index lives outside this crate. [`UtxoStore`] is the
//! narrow capability the selector and the reservation layer need from it:
//! a filtered query and a mark/unmark-selected call.
//!
//! [`MemoryUtxoStore`] is an in-process implementation of the same contract,
//! used by embedding services without a persistent index and by the tests.
//! Reservation expiry is lazy: an expired reservation is ignored on read and
//! never swept in the background.

use async_trait::async_trait;
use bitcoin::OutPoint;
use chrono::{DateTime, Utc};
use log::debug;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::error::{CoreError, CoreResult};
use crate::utxo_selection::types::{Utxo, UtxoFilter, UtxoQueryResult};

/// Source of the current time for reservation expiry
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Query and reservation capability of the wallet's UTXO index
#[async_trait]
pub trait UtxoStore: Send + Sync {
    /// Return the UTXOs matching `filter` with their summed amount
    ///
    /// With `only_available`, locked UTXOs and UTXOs under an unexpired
    /// reservation are excluded.
    async fn query_utxos(&self, filter: &UtxoFilter) -> CoreResult<UtxoQueryResult>;

    /// Set or clear the selected-as-input flag of one UTXO
    ///
    /// Setting with a `ttl` stores `now + ttl` as the expiry; without one the
    /// reservation never expires. Setting fails with `UtxoReserved` while an
    /// unexpired reservation is in place, so one flow cannot take over
    /// another's inputs. Clearing is unconditional and idempotent.
    async fn mark_selected(
        &self,
        outpoint: &OutPoint,
        selected: bool,
        ttl: Option<Duration>,
    ) -> CoreResult<()>;

    /// UTXOs currently under an unexpired reservation
    async fn selected_utxos(&self) -> CoreResult<Vec<Utxo>>;
}

/// In-memory UTXO index keeping insertion order
pub struct MemoryUtxoStore {
    utxos: Mutex<Vec<Utxo>>,
    clock: Arc<dyn Clock>,
}

impl MemoryUtxoStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            utxos: Mutex::new(Vec::new()),
            clock,
        }
    }

    fn utxos(&self) -> MutexGuard<'_, Vec<Utxo>> {
        self.utxos
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Index a new UTXO, replacing any entry with the same outpoint
    pub fn add_utxo(&self, utxo: Utxo) {
        let mut utxos = self.utxos();
        match utxos.iter_mut().find(|u| u.outpoint == utxo.outpoint) {
            Some(existing) => *existing = utxo,
            None => utxos.push(utxo),
        }
    }

    /// Remove a UTXO whose spending transaction was confirmed
    pub fn spend(&self, outpoint: &OutPoint) -> Option<Utxo> {
        let mut utxos = self.utxos();
        let position = utxos.iter().position(|u| u.outpoint == *outpoint)?;
        Some(utxos.remove(position))
    }

    /// Set the height/time lock flag of a UTXO
    pub fn set_locked(&self, outpoint: &OutPoint, locked: bool) -> CoreResult<()> {
        let mut utxos = self.utxos();
        let utxo = utxos
            .iter_mut()
            .find(|u| u.outpoint == *outpoint)
            .ok_or(CoreError::UtxoNotFound(*outpoint))?;
        utxo.is_locked = locked;
        Ok(())
    }

    pub fn get(&self, outpoint: &OutPoint) -> Option<Utxo> {
        self.utxos().iter().find(|u| u.outpoint == *outpoint).cloned()
    }

    pub fn len(&self) -> usize {
        self.utxos().len()
    }

    pub fn is_empty(&self) -> bool {
        self.utxos().is_empty()
    }
}

impl Default for MemoryUtxoStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl UtxoStore for MemoryUtxoStore {
    async fn query_utxos(&self, filter: &UtxoFilter) -> CoreResult<UtxoQueryResult> {
        let now = self.clock.now();
        let utxos = self.utxos();
        let mut result = UtxoQueryResult::default();

        for utxo in utxos.iter() {
            if filter
                .max_utxos
                .map(|max| result.utxos.len() >= max)
                .unwrap_or(false)
            {
                break;
            }
            if !filter.matches(utxo) {
                continue;
            }
            if filter.only_available && !utxo.is_available_at(now) {
                continue;
            }

            let total = match result.total_amount_available.checked_add(utxo.amount) {
                Some(total) => total,
                None => continue,
            };
            if filter.max_amount.map(|max| total > max).unwrap_or(false) {
                continue;
            }

            result.total_amount_available = total;
            result.utxos.push(utxo.clone());
        }

        Ok(result)
    }

    async fn mark_selected(
        &self,
        outpoint: &OutPoint,
        selected: bool,
        ttl: Option<Duration>,
    ) -> CoreResult<()> {
        let now = self.clock.now();
        let mut utxos = self.utxos();
        let utxo = match utxos.iter_mut().find(|u| u.outpoint == *outpoint) {
            Some(utxo) => utxo,
            // Clearing an outpoint that was spent or never indexed is a no-op
            None if !selected => return Ok(()),
            None => return Err(CoreError::UtxoNotFound(*outpoint)),
        };

        if selected {
            if utxo.is_reserved_at(now) {
                debug!(
                    "Refused to mark {}: reserved until {:?}",
                    outpoint, utxo.selection_expires_at
                );
                return Err(CoreError::UtxoReserved(*outpoint));
            }

            let expires_at = match ttl {
                Some(ttl) => {
                    let ttl = chrono::Duration::from_std(ttl).map_err(|e| {
                        CoreError::validation(format!("Invalid reservation TTL {:?}: {}", ttl, e))
                    })?;
                    let expires_at = now.checked_add_signed(ttl).ok_or_else(|| {
                        CoreError::validation(format!("Reservation TTL {} is out of range", ttl))
                    })?;
                    Some(expires_at)
                }
                None => None,
            };
            utxo.selected_as_input = true;
            utxo.selection_expires_at = expires_at;
            debug!("Marked {} as selected until {:?}", outpoint, expires_at);
        } else {
            utxo.selected_as_input = false;
            utxo.selection_expires_at = None;
            debug!("Cleared selection of {}", outpoint);
        }

        Ok(())
    }

    async fn selected_utxos(&self) -> CoreResult<Vec<Utxo>> {
        let now = self.clock.now();
        Ok(self
            .utxos()
            .iter()
            .filter(|utxo| utxo.is_reserved_at(now))
            .cloned()
            .collect())
    }
}
