
use headless_common::error::{CoreError, ErrorCategory};
use headless_common::lock::{LockRegistry, LockTimeouts, LockType};
use headless_common::types::{TokenId, TxOutput};
use headless_common::utxo_selection::UtxoFilter;
use headless_common::utxo_store::{MemoryUtxoStore, UtxoStore};
use headless_common::wallet_operations::{
    InputSelection, ReservationPolicy, SendRequest, WalletOperations, DEFAULT_PROPOSAL_TTL,
};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use test_helpers::*;
use tokio::runtime::Handle;

const WALLET: &str = "wallet-1";

struct Fixture {
    registry: Arc<LockRegistry>,
    store: Arc<MemoryUtxoStore>,
    builder: Arc<MockBuilder>,
    ops: WalletOperations<MemoryUtxoStore, MockBuilder>,
}

fn fixture_with(utxos: Vec<headless_common::Utxo>, builder: MockBuilder) -> Fixture {
    init_test_logging();
    let registry = Arc::new(LockRegistry::new(Handle::current(), LockTimeouts::default()));
    fixture_on(registry, utxos, |_| builder)
}

fn fixture_on(
    registry: Arc<LockRegistry>,
    utxos: Vec<headless_common::Utxo>,
    builder: impl FnOnce(&Arc<LockRegistry>) -> MockBuilder,
) -> Fixture {
    let store = store_with(utxos);
    let builder = Arc::new(builder(&registry));
    let ops = WalletOperations::new(
        WALLET,
        Arc::clone(&registry),
        Arc::clone(&store),
        Arc::clone(&builder),
        ReservationPolicy::default(),
    );
    Fixture {
        registry,
        store,
        builder,
        ops,
    }
}

fn fixture(amounts: &[u64]) -> Fixture {
    fixture_with(native_utxos(amounts), MockBuilder::new())
}

async fn available_count(store: &MemoryUtxoStore) -> usize {
    store
        .query_utxos(&UtxoFilter::new().only_available())
        .await
        .unwrap()
        .utxos
        .len()
}

#[tokio::test]
async fn test_send_selects_reserves_and_broadcasts() {
    let f = fixture(&[1, 2, 3]);

    let receipt = f
        .ops
        .send_transaction(&SendRequest::new(vec![native_output(4)]))
        .await
        .unwrap();
    eprintln!("Receipt: {}", receipt);

    let prepared = f.builder.prepared.lock().unwrap()[0].clone();
    assert_eq!(prepared.inputs, vec![outpoint(3), outpoint(2)]);
    assert_eq!(f.builder.broadcast_count(), 1);

    // Inputs stay reserved until the store sees them spent
    let locked = f.ops.locked_utxos().await.unwrap();
    assert_eq!(amounts(&locked), vec![2, 3]);
    assert_eq!(available_count(&f.store).await, 1);
    assert!(!f.registry.is_locked(LockType::SendTx, Some(WALLET)));
}

#[tokio::test]
async fn test_send_releases_lock_before_broadcast() {
    init_test_logging();
    let registry = Arc::new(LockRegistry::new(Handle::current(), LockTimeouts::default()));
    let f = fixture_on(registry, native_utxos(&[10]), |registry| {
        MockBuilder::new().with_lock_probe(Arc::clone(registry), WALLET)
    });

    f.ops
        .send_transaction(&SendRequest::new(vec![native_output(5)]))
        .await
        .unwrap();

    assert_eq!(*f.builder.locked_at_broadcast.lock().unwrap(), vec![false]);
}

#[tokio::test]
async fn test_insufficient_funds_builds_nothing() {
    let f = fixture(&[1, 2, 3]);

    let err = f
        .ops
        .send_transaction(&SendRequest::new(vec![native_output(7)]))
        .await
        .unwrap_err();
    eprintln!("Send error: {}", err);

    match err {
        CoreError::InsufficientFunds {
            token,
            required,
            available,
        } => {
            assert_eq!(token, TokenId::native());
            assert_eq!(required, 7);
            assert_eq!(available, 6);
        }
        other => panic!("Expected insufficient funds, got {:?}", other),
    }
    assert_eq!(f.builder.prepared_count(), 0);
    assert!(f.ops.locked_utxos().await.unwrap().is_empty());
    assert!(!f.registry.is_locked(LockType::SendTx, Some(WALLET)));
}

#[tokio::test]
async fn test_build_failure_releases_lock_without_reserving() {
    let f = fixture(&[1, 2, 3]);
    f.builder.fail_prepare.store(true, Ordering::SeqCst);

    let err = f
        .ops
        .send_transaction(&SendRequest::new(vec![native_output(4)]))
        .await
        .unwrap_err();

    assert_eq!(err.category(), ErrorCategory::Build);
    assert!(err.user_message().contains("Invalid output script"));
    assert!(f.ops.locked_utxos().await.unwrap().is_empty());
    assert!(!f.registry.is_locked(LockType::SendTx, Some(WALLET)));
}

#[tokio::test]
async fn test_broadcast_failure_releases_reservation() {
    let f = fixture(&[1, 2, 3]);
    f.builder.fail_broadcast.store(true, Ordering::SeqCst);

    let err = f
        .ops
        .send_transaction(&SendRequest::new(vec![native_output(4)]))
        .await
        .unwrap_err();

    assert_eq!(err.category(), ErrorCategory::Broadcast);
    assert!(!err.is_retryable());
    assert!(f.ops.locked_utxos().await.unwrap().is_empty());
    assert_eq!(available_count(&f.store).await, 3);
    assert!(!f.registry.is_locked(LockType::SendTx, Some(WALLET)));
}

#[tokio::test]
async fn test_send_refused_while_wallet_is_busy() {
    let f = fixture(&[10]);
    assert!(f.registry.lock(LockType::SendTx, Some(WALLET)));

    let err = f
        .ops
        .send_transaction(&SendRequest::new(vec![native_output(5)]))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        CoreError::Busy {
            lock_type: LockType::SendTx
        }
    ));
    assert!(err.is_retryable());
    assert_eq!(
        err.to_string(),
        "You already have a transaction being sent. Please wait until it's done to send another."
    );
    assert_eq!(f.builder.prepared_count(), 0);

    // The refused call must not release the holder's lock
    assert!(f.registry.is_locked(LockType::SendTx, Some(WALLET)));
}

#[tokio::test]
async fn test_other_wallet_sends_while_one_is_busy() {
    let f = fixture(&[10]);
    assert!(f.registry.lock(LockType::SendTx, Some("wallet-2")));

    let result = f
        .ops
        .send_transaction(&SendRequest::new(vec![native_output(5)]))
        .await;
    assert!(result.is_ok());
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_sends_on_one_wallet() {
    let f = fixture_with(
        native_utxos(&[10, 20]),
        MockBuilder::new().with_prepare_delay(Duration::from_millis(500)),
    );
    let request = SendRequest::new(vec![native_output(5)]);

    let (first, second) = tokio::join!(
        f.ops.send_transaction(&request),
        f.ops.send_transaction(&request)
    );
    eprintln!("First: {:?}, second: {:?}", first, second);

    assert!(first.is_ok());
    assert!(matches!(second, Err(CoreError::Busy { .. })));
    assert_eq!(f.builder.prepared_count(), 1);

    // Once the first send finished, its input is reserved and the next
    // send on the same wallet picks the other UTXO
    f.ops.send_transaction(&request).await.unwrap();
    let prepared = f.builder.prepared.lock().unwrap().clone();
    assert_ne!(prepared[0].inputs, prepared[1].inputs);
}

#[tokio::test]
async fn test_multi_token_selection_in_output_order() {
    let token = custom_token(0xcd);
    let mut utxos = native_utxos(&[5, 8]);
    let mut token_utxo = native_utxo(10, 100);
    token_utxo.token = token.clone();
    utxos.push(token_utxo);
    let f = fixture_with(utxos, MockBuilder::new());

    let request = SendRequest::new(vec![
        TxOutput::new(OTHER_ADDRESS, 40, token.clone()),
        native_output(6),
        TxOutput::new(ADDRESS, 20, token),
    ]);
    f.ops.send_transaction(&request).await.unwrap();

    let prepared = f.builder.prepared.lock().unwrap()[0].clone();
    assert_eq!(prepared.inputs, vec![outpoint(10), outpoint(2)]);
    assert_eq!(prepared.outputs.len(), 3);
}

#[tokio::test]
async fn test_multi_token_insufficiency_aborts_whole_request() {
    let token = custom_token(0xcd);
    let f = fixture(&[5, 8]);

    let request = SendRequest::new(vec![
        native_output(6),
        TxOutput::new(OTHER_ADDRESS, 1, token.clone()),
    ]);
    let err = f.ops.send_transaction(&request).await.unwrap_err();

    assert!(matches!(err, CoreError::InsufficientFunds { token: t, .. } if t == token));
    assert_eq!(f.builder.prepared_count(), 0);
    assert_eq!(available_count(&f.store).await, 2);
}

#[tokio::test]
async fn test_explicit_inputs_and_change_address_pass_through() {
    let f = fixture(&[1, 2, 3]);

    let request = SendRequest::new(vec![native_output(1)])
        .with_inputs(InputSelection::Explicit(vec![outpoint(1), outpoint(3)]))
        .with_change_address(ADDRESS);
    f.ops.send_transaction(&request).await.unwrap();

    let prepared = f.builder.prepared.lock().unwrap()[0].clone();
    assert_eq!(prepared.inputs, vec![outpoint(1), outpoint(3)]);
    assert_eq!(prepared.change_address.as_deref(), Some(ADDRESS));
    assert_eq!(available_count(&f.store).await, 1);
}

#[tokio::test]
async fn test_reservation_failure_rolls_back_and_releases_lock() {
    let f = fixture(&[1, 2, 3]);

    let request = SendRequest::new(vec![native_output(1)])
        .with_inputs(InputSelection::Explicit(vec![outpoint(1), outpoint(404)]));
    let err = f.ops.send_transaction(&request).await.unwrap_err();
    eprintln!("Send error: {}", err);

    assert_eq!(err.category(), ErrorCategory::Reservation);
    assert!(f.ops.locked_utxos().await.unwrap().is_empty());
    assert_eq!(available_count(&f.store).await, 3);
    assert_eq!(f.builder.broadcast_count(), 0);
    assert!(!f.registry.is_locked(LockType::SendTx, Some(WALLET)));
}

#[tokio::test]
async fn test_explicit_send_cannot_take_proposal_inputs() {
    let f = fixture(&[1, 2, 3]);
    let proposal_request = SendRequest::new(vec![native_output(3)]);
    let proposal = f.ops.build_proposal(&proposal_request, true).await.unwrap();
    assert_eq!(proposal.inputs, vec![outpoint(3)]);

    f.builder.fail_broadcast.store(true, Ordering::SeqCst);
    let request = SendRequest::new(vec![native_output(3)])
        .with_inputs(InputSelection::Explicit(vec![outpoint(3)]));
    let err = f.ops.send_transaction(&request).await.unwrap_err();

    assert_eq!(err.category(), ErrorCategory::Reservation);
    assert_eq!(f.builder.broadcast_count(), 0);
    assert!(!f.registry.is_locked(LockType::SendTx, Some(WALLET)));

    // The proposal keeps its input, with its original expiry
    let locked = f.ops.locked_utxos().await.unwrap();
    assert_eq!(locked.len(), 1);
    assert_eq!(locked[0].outpoint, outpoint(3));
    assert!(locked[0].selection_expires_at.is_some());

    let second = f.ops.build_proposal(&proposal_request, true).await.unwrap();
    assert!(!second.inputs.contains(&outpoint(3)));
}

#[tokio::test]
async fn test_invalid_requests_are_rejected() {
    let f = fixture(&[1, 2, 3]);

    let err = f
        .ops
        .send_transaction(&SendRequest::new(Vec::new()))
        .await
        .unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Validation);

    let err = f
        .ops
        .send_transaction(&SendRequest::new(vec![native_output(0)]))
        .await
        .unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Validation);
    assert!(!f.registry.is_locked(LockType::SendTx, Some(WALLET)));
}

#[tokio::test]
async fn test_proposal_reserves_inputs_with_ttl() {
    let f = fixture(&[1, 2, 3]);
    let request = SendRequest::new(vec![native_output(3)]);

    let proposal = f.ops.build_proposal(&request, true).await.unwrap();
    assert_eq!(proposal.inputs, vec![outpoint(3)]);
    assert_eq!(f.builder.broadcast_count(), 0);

    let locked = f.ops.locked_utxos().await.unwrap();
    assert_eq!(locked.len(), 1);
    assert!(locked[0].selection_expires_at.is_some());
    assert!(!f.registry.is_locked(LockType::SendTx, Some(WALLET)));

    // A second proposal cannot pick the reserved input
    let second = f.ops.build_proposal(&request, true).await.unwrap();
    assert_eq!(second.inputs, vec![outpoint(2), outpoint(1)]);
}

#[tokio::test]
async fn test_proposal_without_marking() {
    let f = fixture(&[1, 2, 3]);
    let request = SendRequest::new(vec![native_output(3)]);

    let proposal = f.ops.build_proposal(&request, false).await.unwrap();
    assert_eq!(proposal.inputs, vec![outpoint(3)]);
    assert!(f.ops.locked_utxos().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_push_prepared_and_unlock_inputs() {
    let f = fixture(&[1, 2, 3]);
    let request = SendRequest::new(vec![native_output(3)]);
    let proposal = f.ops.build_proposal(&request, true).await.unwrap();

    // A failed push keeps the proposal's inputs reserved
    f.builder.fail_broadcast.store(true, Ordering::SeqCst);
    let err = f.ops.push_prepared(&proposal).await.unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Broadcast);
    assert_eq!(f.ops.locked_utxos().await.unwrap().len(), 1);
    assert!(!f.registry.is_locked(LockType::SendTx, Some(WALLET)));

    f.builder.fail_broadcast.store(false, Ordering::SeqCst);
    f.ops.push_prepared(&proposal).await.unwrap();
    assert_eq!(f.builder.broadcast_count(), 1);

    f.ops.unlock_inputs(&proposal.inputs).await.unwrap();
    assert!(f.ops.locked_utxos().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_proposal_operations_refused_while_busy() {
    let f = fixture(&[1, 2, 3]);
    let request = SendRequest::new(vec![native_output(3)]);
    let proposal = f.ops.build_proposal(&request, true).await.unwrap();

    assert!(f.registry.lock(LockType::SendTx, Some(WALLET)));
    assert!(matches!(
        f.ops.build_proposal(&request, true).await,
        Err(CoreError::Busy { .. })
    ));
    assert!(matches!(
        f.ops.push_prepared(&proposal).await,
        Err(CoreError::Busy { .. })
    ));
    assert!(matches!(
        f.ops.unlock_inputs(&proposal.inputs).await,
        Err(CoreError::Busy { .. })
    ));
    assert_eq!(f.ops.locked_utxos().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_proposal_reservation_lapses() {
    init_test_logging();
    let clock = Arc::new(ManualClock::new());
    let store = Arc::new(MemoryUtxoStore::with_clock(clock.clone()));
    store.add_utxo(native_utxo(1, 10));
    let registry = Arc::new(LockRegistry::new(Handle::current(), LockTimeouts::default()));
    let ops = WalletOperations::new(
        WALLET,
        registry,
        Arc::clone(&store),
        Arc::new(MockBuilder::new()),
        ReservationPolicy::default(),
    );
    let request = SendRequest::new(vec![native_output(5)]);

    ops.build_proposal(&request, true).await.unwrap();
    assert!(matches!(
        ops.build_proposal(&request, true).await,
        Err(CoreError::InsufficientFunds { .. })
    ));

    clock.advance(DEFAULT_PROPOSAL_TTL);
    let retry = ops.build_proposal(&request, true).await.unwrap();
    assert_eq!(retry.inputs, vec![outpoint(1)]);
}

#[tokio::test]
async fn test_hsm_session_is_exclusive_across_wallets() {
    let f = fixture(&[1]);
    let other = fixture_on(Arc::clone(&f.registry), native_utxos(&[1]), |_| {
        MockBuilder::new()
    });

    let outcome = f
        .ops
        .with_hsm_session(|| async {
            let nested = other.ops.with_hsm_session(|| async { Ok(()) }).await;
            assert!(matches!(
                nested,
                Err(CoreError::Busy {
                    lock_type: LockType::Hsm
                })
            ));
            Ok(42)
        })
        .await
        .unwrap();
    assert_eq!(outcome, 42);
    assert!(!f.registry.is_locked(LockType::Hsm, None));

    // A failing session still releases the lock
    let err = f
        .ops
        .with_hsm_session(|| async {
            Err::<(), _>(CoreError::validation("device disconnected"))
        })
        .await
        .unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Validation);
    assert!(other.ops.with_hsm_session(|| async { Ok(()) }).await.is_ok());
}

#[tokio::test]
async fn test_stop_waits_for_send_lock() {
    let f = fixture(&[1]);
    assert!(f.registry.lock(LockType::SendTx, Some(WALLET)));

    assert!(matches!(f.ops.stop(), Err(CoreError::Busy { .. })));
    assert_eq!(f.registry.wallet_count(), 1);

    f.registry.unlock(LockType::SendTx, Some(WALLET));
    f.ops.stop().unwrap();
    assert_eq!(f.registry.wallet_count(), 0);
}

#[tokio::test]
async fn test_single_wallet_mode_uses_global_lock() {
    init_test_logging();
    let registry = Arc::new(LockRegistry::new(Handle::current(), LockTimeouts::default()));
    let ops = WalletOperations::single_wallet(
        Arc::clone(&registry),
        store_with(native_utxos(&[10])),
        Arc::new(MockBuilder::new()),
        ReservationPolicy::default(),
    );
    assert_eq!(ops.wallet_id(), None);

    assert!(registry.lock(LockType::SendTx, None));
    let err = ops
        .send_transaction(&SendRequest::new(vec![native_output(1)]))
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::Busy { .. }));

    registry.unlock(LockType::SendTx, None);
    ops.send_transaction(&SendRequest::new(vec![native_output(1)]))
        .await
        .unwrap();
    ops.stop().unwrap();
}
