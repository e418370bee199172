//! Transaction-build orchestration
//!
//! [`WalletOperations`] composes the lock registry, the coin selector and UTXO
//! reservation around the two calls delegated to the transaction library:
//! preparing transaction data and signing/broadcasting it.
//!
//! A send runs as:
//!
//! 1. Take `SEND_TX` for the wallet, or fail with `Busy`.
//! 2. Select inputs per token (or use the caller's explicit inputs).
//! 3. Prepare the transaction data.
//! 4. Reserve the inputs the prepared transaction spends.
//! 5. Release `SEND_TX`.
//! 6. Sign and broadcast. On failure the reservation is cleared.
//!
//! The lock is held by a [`LockGuard`], so every early return between steps
//! 1 and 5 releases it exactly once.

use async_trait::async_trait;
use bitcoin::OutPoint;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{broadcast_error, build_error, CoreError, CoreResult};
use crate::lock::{LockGuard, LockRegistry, LockType};
use crate::logging::{log_transaction, sanitize_for_logging, LogLevel};
use crate::types::{outpoint_id, sum_by_token, TxOutput};
use crate::utxo_management::UtxoReservation;
use crate::utxo_selection::{CoinSelector, SelectionResult, Utxo, UtxoFilter};
use crate::utxo_store::UtxoStore;

/// Default lifetime of the reservation made when building a proposal
pub const DEFAULT_PROPOSAL_TTL: Duration = Duration::from_secs(5 * 60);

/// Prepared transaction data that knows which outputs it spends
pub trait SpendsInputs {
    fn spent_inputs(&self) -> Vec<OutPoint>;
}

/// The delegated transaction library
///
/// Script construction, fees, signing and broadcasting all happen behind
/// this trait. Failures are reported as `anyhow::Error` and wrapped with
/// context by the orchestrator.
#[async_trait]
pub trait TransactionBuilder: Send + Sync {
    type TxData: SpendsInputs + Send + Sync;
    type Receipt: Send;

    /// Build unsigned transaction data from inputs and outputs
    ///
    /// The library may add inputs of its own; the returned data reports the
    /// final set through [`SpendsInputs`].
    async fn prepare_transaction_data(
        &self,
        inputs: &[OutPoint],
        outputs: &[TxOutput],
        change_address: Option<&str>,
    ) -> anyhow::Result<Self::TxData>;

    async fn sign_and_broadcast(&self, tx: &Self::TxData) -> anyhow::Result<Self::Receipt>;
}

/// How the inputs of a send are chosen
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputSelection {
    /// Select automatically with this filter, once per output token
    Query(UtxoFilter),
    /// Spend exactly these outpoints
    Explicit(Vec<OutPoint>),
}

impl Default for InputSelection {
    fn default() -> Self {
        InputSelection::Query(UtxoFilter::default())
    }
}

/// A send-style request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendRequest {
    pub outputs: Vec<TxOutput>,
    #[serde(default)]
    pub inputs: InputSelection,
    #[serde(default)]
    pub change_address: Option<String>,
}

impl SendRequest {
    pub fn new(outputs: Vec<TxOutput>) -> Self {
        Self {
            outputs,
            inputs: InputSelection::default(),
            change_address: None,
        }
    }

    pub fn with_inputs(mut self, inputs: InputSelection) -> Self {
        self.inputs = inputs;
        self
    }

    pub fn with_change_address(mut self, address: impl Into<String>) -> Self {
        self.change_address = Some(address.into());
        self
    }
}

/// Reservation lifetimes used by the orchestrator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReservationPolicy {
    /// TTL of inputs reserved by a send; `None` keeps them until spent
    pub send_ttl: Option<Duration>,
    /// TTL of inputs reserved by a proposal
    pub proposal_ttl: Option<Duration>,
}

impl Default for ReservationPolicy {
    fn default() -> Self {
        Self {
            send_ttl: None,
            proposal_ttl: Some(DEFAULT_PROPOSAL_TTL),
        }
    }
}

/// Send-style operations of one wallet
pub struct WalletOperations<S: UtxoStore, B: TransactionBuilder> {
    wallet_id: Option<String>,
    registry: Arc<LockRegistry>,
    selector: CoinSelector<S>,
    reservation: UtxoReservation<S>,
    builder: Arc<B>,
    policy: ReservationPolicy,
}

impl<S: UtxoStore, B: TransactionBuilder> WalletOperations<S, B> {
    pub fn new(
        wallet_id: impl Into<String>,
        registry: Arc<LockRegistry>,
        store: Arc<S>,
        builder: Arc<B>,
        policy: ReservationPolicy,
    ) -> Self {
        Self::build(Some(wallet_id.into()), registry, store, builder, policy)
    }

    /// Operations for a service running a single, unnamed wallet
    ///
    /// `SEND_TX` resolves to the registry's global mutex.
    pub fn single_wallet(
        registry: Arc<LockRegistry>,
        store: Arc<S>,
        builder: Arc<B>,
        policy: ReservationPolicy,
    ) -> Self {
        Self::build(None, registry, store, builder, policy)
    }

    fn build(
        wallet_id: Option<String>,
        registry: Arc<LockRegistry>,
        store: Arc<S>,
        builder: Arc<B>,
        policy: ReservationPolicy,
    ) -> Self {
        Self {
            wallet_id,
            registry,
            selector: CoinSelector::new(Arc::clone(&store)),
            reservation: UtxoReservation::new(store),
            builder,
            policy,
        }
    }

    pub fn wallet_id(&self) -> Option<&str> {
        self.wallet_id.as_deref()
    }

    fn lock_or_busy(&self, lock_type: LockType) -> CoreResult<LockGuard> {
        self.registry
            .acquire(lock_type, self.wallet_id())
            .ok_or(CoreError::Busy { lock_type })
    }

    /// Build, reserve and broadcast a transaction
    pub async fn send_transaction(&self, request: &SendRequest) -> CoreResult<B::Receipt> {
        let guard = self.lock_or_busy(LockType::SendTx)?;

        let tx = self.prepare(request).await?;
        let inputs = tx.spent_inputs();
        self.reservation.reserve(&inputs, self.policy.send_ttl).await?;
        guard.release();

        match self.builder.sign_and_broadcast(&tx).await {
            Ok(receipt) => {
                log_transaction(
                    LogLevel::Info,
                    "transaction sent",
                    Some(json!({"wallet_id": self.wallet_id(), "inputs": inputs.len()})),
                );
                Ok(receipt)
            }
            Err(e) => {
                log_transaction(
                    LogLevel::Warn,
                    "broadcast failed, releasing inputs",
                    Some(json!({"wallet_id": self.wallet_id(), "error": e.to_string()})),
                );
                if let Err(release_err) = self.reservation.release(&inputs).await {
                    log_transaction(
                        LogLevel::Error,
                        "inputs left reserved after failed broadcast",
                        Some(json!({"error": release_err.to_string()})),
                    );
                }
                Err(broadcast_error("Failed to sign and broadcast transaction", e))
            }
        }
    }

    /// Build transaction data without broadcasting it
    ///
    /// Used by flows that collect signatures across several calls. Unless
    /// `mark_as_selected` is false, the inputs are reserved with the proposal
    /// TTL so other sends skip them until the proposal is pushed or dropped.
    pub async fn build_proposal(
        &self,
        request: &SendRequest,
        mark_as_selected: bool,
    ) -> CoreResult<B::TxData> {
        let _guard = self.lock_or_busy(LockType::SendTx)?;

        let tx = self.prepare(request).await?;
        if mark_as_selected {
            self.reservation
                .reserve(&tx.spent_inputs(), self.policy.proposal_ttl)
                .await?;
        }

        log_transaction(
            LogLevel::Debug,
            "proposal built",
            Some(json!({
                "wallet_id": self.wallet_id(),
                "inputs": tx.spent_inputs().len(),
                "reserved": mark_as_selected,
            })),
        );
        Ok(tx)
    }

    /// Broadcast previously built transaction data
    ///
    /// A failed push leaves the proposal's reservation in place; the caller
    /// frees it with [`unlock_inputs`](Self::unlock_inputs) or lets it lapse.
    pub async fn push_prepared(&self, tx: &B::TxData) -> CoreResult<B::Receipt> {
        let _guard = self.lock_or_busy(LockType::SendTx)?;

        self.builder
            .sign_and_broadcast(tx)
            .await
            .map_err(|e| broadcast_error("Failed to push prepared transaction", e))
    }

    /// Clear the reservation of a proposal's inputs
    pub async fn unlock_inputs(&self, inputs: &[OutPoint]) -> CoreResult<()> {
        let _guard = self.lock_or_busy(LockType::SendTx)?;

        self.reservation.release(inputs).await?;
        log_transaction(
            LogLevel::Debug,
            "inputs unlocked",
            Some(json!({
                "wallet_id": self.wallet_id(),
                "inputs": inputs.iter().map(outpoint_id).collect::<Vec<_>>(),
            })),
        );
        Ok(())
    }

    /// UTXOs currently reserved as inputs
    pub async fn locked_utxos(&self) -> CoreResult<Vec<Utxo>> {
        self.reservation.reserved().await
    }

    /// Run `session` while holding the global HSM lock
    pub async fn with_hsm_session<F, Fut, T>(&self, session: F) -> CoreResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = CoreResult<T>>,
    {
        let _guard = self.lock_or_busy(LockType::Hsm)?;
        session().await
    }

    /// Drop this wallet's mutexes
    ///
    /// Refused while one of the wallet's locks is held.
    pub fn stop(&self) -> CoreResult<()> {
        match self.wallet_id() {
            Some(wallet_id) => self
                .registry
                .forget_if_free(wallet_id)
                .map(|_| ())
                .map_err(|lock_type| CoreError::Busy { lock_type }),
            None => Ok(()),
        }
    }

    async fn prepare(&self, request: &SendRequest) -> CoreResult<B::TxData> {
        if request.outputs.is_empty() {
            return Err(CoreError::validation("At least one output is required"));
        }

        let inputs = match &request.inputs {
            InputSelection::Query(filter) => self.select_inputs(&request.outputs, filter).await?,
            InputSelection::Explicit(outpoints) => outpoints.clone(),
        };

        log_transaction(
            LogLevel::Debug,
            "preparing transaction",
            Some(json!({
                "wallet_id": self.wallet_id(),
                "inputs": inputs.len(),
                "outputs": request.outputs.len(),
                "change_address": request.change_address.as_deref().map(sanitize_for_logging),
            })),
        );

        self.builder
            .prepare_transaction_data(&inputs, &request.outputs, request.change_address.as_deref())
            .await
            .map_err(|e| build_error("Failed to prepare transaction data", e))
    }

    async fn select_inputs(
        &self,
        outputs: &[TxOutput],
        filter: &UtxoFilter,
    ) -> CoreResult<Vec<OutPoint>> {
        let mut inputs = Vec::new();

        for (token, required) in sum_by_token(outputs)? {
            match self.selector.select(required, &token, filter).await? {
                SelectionResult::Success { selected, .. } => {
                    inputs.extend(selected.iter().map(|utxo| utxo.outpoint));
                }
                SelectionResult::InsufficientFunds {
                    available,
                    required,
                } => {
                    return Err(CoreError::InsufficientFunds {
                        token,
                        required,
                        available,
                    })
                }
            }
        }

        Ok(inputs)
    }
}
