//! The bounded compare-and-swap retry: a settlement that loses the version
//! race re-reads and retries up to the bound, then surfaces
//! `ConcurrentModification` with no state moved.

use std::sync::Arc;

use pdk_ledger::seed_account;
use pdk_schemas::{AccountId, Micros, OrderStatus};
use pdk_settlement::{SettlementEngine, SettlementError, TradeCommand};
use pdk_store::{MemoryStore, SettlementStore};

async fn engine_with_account(dollars: i64) -> (Arc<MemoryStore>, SettlementEngine, AccountId) {
    let store = Arc::new(MemoryStore::new());
    let account_id = AccountId::new_v4();
    store
        .create_account(seed_account(account_id, dollars))
        .await
        .unwrap();
    let engine = SettlementEngine::new(store.clone());
    (store, engine, account_id)
}

#[tokio::test]
async fn lost_race_is_retried_and_settles() {
    let (store, engine, account_id) = engine_with_account(10_000).await;

    // The store reports a lost race on the first attempt; the engine must
    // re-read and land the commit on a retry.
    store.set_conflict_commits(1);
    let settled = engine
        .settle_buy(TradeCommand::market(
            account_id,
            "AAPL",
            3,
            Micros::from_dollars(140),
        ))
        .await
        .unwrap();

    assert_eq!(settled.account.cash_micros, Micros::from_dollars(9_580));
    assert_eq!(settled.account.version, 1);
    assert_eq!(settled.order.status, OrderStatus::Executed);

    // Exactly one order was staged across all attempts.
    assert_eq!(engine.orders(account_id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn retries_up_to_the_bound_then_settle() {
    let (store, engine, account_id) = engine_with_account(10_000).await;

    // Conflicts on the first attempt and every allowed retry but the last.
    store.set_conflict_commits(SettlementEngine::MAX_COMMIT_RETRIES);
    let settled = engine
        .settle_buy(TradeCommand::market(
            account_id,
            "AAPL",
            1,
            Micros::from_dollars(100),
        ))
        .await
        .unwrap();
    assert_eq!(settled.account.cash_micros, Micros::from_dollars(9_900));
}

#[tokio::test]
async fn exhausted_retries_surface_concurrent_modification() {
    let (store, engine, account_id) = engine_with_account(10_000).await;

    // One conflict more than the engine will absorb.
    store.set_conflict_commits(SettlementEngine::MAX_COMMIT_RETRIES + 1);
    let err = engine
        .settle_buy(TradeCommand::market(
            account_id,
            "AAPL",
            3,
            Micros::from_dollars(140),
        ))
        .await
        .unwrap_err();
    assert_eq!(err, SettlementError::ConcurrentModification);

    // The staged order is still pending and no funds moved.
    let orders = engine.orders(account_id).await.unwrap();
    assert_eq!(orders.len(), 1);
    assert_eq!(orders[0].status, OrderStatus::Pending);
    let account = engine.account(account_id).await.unwrap();
    assert_eq!(account.cash_micros, Micros::from_dollars(10_000));
    assert_eq!(account.version, 0);

    // The next request starts a fresh retry budget and settles.
    let settled = engine
        .settle_buy(TradeCommand::market(
            account_id,
            "AAPL",
            3,
            Micros::from_dollars(140),
        ))
        .await
        .unwrap();
    assert_eq!(settled.account.cash_micros, Micros::from_dollars(9_580));
}
