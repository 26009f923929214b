//! Atomicity under store failure: a commit that fails after the order is
//! staged leaves the order pending and moves no funds.

use std::sync::Arc;

use pdk_ledger::seed_account;
use pdk_schemas::{AccountId, Micros, OrderStatus};
use pdk_settlement::{SettlementEngine, SettlementError, TradeCommand};
use pdk_store::{MemoryStore, SettlementStore};

#[tokio::test]
async fn failed_commit_leaves_order_pending_and_funds_untouched() {
    let store = Arc::new(MemoryStore::new());
    let account_id = AccountId::new_v4();
    store
        .create_account(seed_account(account_id, 10_000))
        .await
        .unwrap();
    let engine = SettlementEngine::new(store.clone());

    store.set_fail_commits(true);
    let err = engine
        .settle_buy(TradeCommand::market(
            account_id,
            "AAPL",
            3,
            Micros::from_dollars(140),
        ))
        .await
        .unwrap_err();
    assert!(matches!(err, SettlementError::StoreUnavailable { .. }));

    // The order is durable but still pending; nothing else moved.
    let orders = engine.orders(account_id).await.unwrap();
    assert_eq!(orders.len(), 1);
    assert_eq!(orders[0].status, OrderStatus::Pending);
    assert!(orders[0].executed_at.is_none());

    let account = engine.account(account_id).await.unwrap();
    assert_eq!(account.cash_micros, Micros::from_dollars(10_000));
    assert_eq!(account.version, 0);
    assert!(engine.positions(account_id).await.unwrap().is_empty());
}

#[tokio::test]
async fn store_recovers_and_later_trades_settle() {
    let store = Arc::new(MemoryStore::new());
    let account_id = AccountId::new_v4();
    store
        .create_account(seed_account(account_id, 10_000))
        .await
        .unwrap();
    let engine = SettlementEngine::new(store.clone());

    store.set_fail_commits(true);
    let _ = engine
        .settle_buy(TradeCommand::market(
            account_id,
            "AAPL",
            3,
            Micros::from_dollars(140),
        ))
        .await
        .unwrap_err();

    store.set_fail_commits(false);
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

    // Audit log keeps both attempts; only the second executed.
    let orders = engine.orders(account_id).await.unwrap();
    assert_eq!(orders.len(), 2);
    assert_eq!(orders[0].status, OrderStatus::Pending);
    assert_eq!(orders[1].status, OrderStatus::Executed);
}
