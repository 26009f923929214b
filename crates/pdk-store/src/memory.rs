//! Deterministic in-memory store.
//!
//! Single-mutex design: every operation locks the whole state, which makes
//! `commit_settlement` trivially atomic and keeps iteration order stable
//! (BTreeMaps).  Throughput is not the point here — correctness under test
//! and DB-less operation are.
//!
//! Failure injection: [`MemoryStore::set_fail_commits`] and
//! [`MemoryStore::set_fail_pings`] flip the next matching operations into
//! [`StoreError::Unavailable`] without touching state, which is how the
//! atomicity and scheduler-abort scenarios are exercised.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use async_trait::async_trait;
use pdk_schemas::{
    Account, AccountId, Order, OrderId, OrderStatus, PerformanceRecord, Position,
};
use tokio::sync::Mutex;

use crate::{PositionUpdate, SettlementCommit, SettlementStore, StoreError};

#[derive(Default)]
struct Inner {
    accounts: BTreeMap<AccountId, Account>,
    /// Keyed by (account, symbol); absent means no holding.
    positions: BTreeMap<(AccountId, String), Position>,
    orders: BTreeMap<OrderId, Order>,
    /// Creation order of all orders; `orders_by_account` replays this.
    order_log: Vec<OrderId>,
    next_seq: u64,
    performance: BTreeMap<AccountId, PerformanceRecord>,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
    fail_commits: AtomicBool,
    fail_pings: AtomicBool,
    conflict_commits: AtomicU32,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `commit_settlement` fail with `Unavailable`
    /// (state untouched) until cleared.  Test wiring only.
    pub fn set_fail_commits(&self, fail: bool) {
        self.fail_commits.store(fail, Ordering::SeqCst);
    }

    /// Make every subsequent `ping` fail with `Unavailable` until cleared.
    pub fn set_fail_pings(&self, fail: bool) {
        self.fail_pings.store(fail, Ordering::SeqCst);
    }

    /// Make the next `n` commits fail with `VersionConflict` (state
    /// untouched), as if an out-of-process writer kept winning the race.
    /// Test wiring only.
    pub fn set_conflict_commits(&self, n: u32) {
        self.conflict_commits.store(n, Ordering::SeqCst);
    }
}

#[async_trait]
impl SettlementStore for MemoryStore {
    async fn ping(&self) -> Result<(), StoreError> {
        if self.fail_pings.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable {
                reason: "injected ping failure".to_string(),
            });
        }
        Ok(())
    }

    async fn create_account(&self, account: Account) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        if inner.accounts.contains_key(&account.account_id) {
            return Err(StoreError::AccountExists {
                account_id: account.account_id,
            });
        }
        inner.accounts.insert(account.account_id, account);
        Ok(())
    }

    async fn account(&self, account_id: AccountId) -> Result<Option<Account>, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner.accounts.get(&account_id).cloned())
    }

    async fn list_account_ids(&self) -> Result<Vec<AccountId>, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner.accounts.keys().copied().collect())
    }

    async fn position(
        &self,
        account_id: AccountId,
        symbol: &str,
    ) -> Result<Option<Position>, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .positions
            .get(&(account_id, symbol.to_string()))
            .cloned())
    }

    async fn positions_by_account(
        &self,
        account_id: AccountId,
    ) -> Result<Vec<Position>, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .positions
            .range((account_id, String::new())..)
            .take_while(|((id, _), _)| *id == account_id)
            .map(|(_, p)| p.clone())
            .collect())
    }

    async fn create_order(&self, mut order: Order) -> Result<Order, StoreError> {
        let mut inner = self.inner.lock().await;
        inner.next_seq += 1;
        order.seq = inner.next_seq;
        inner.order_log.push(order.order_id);
        inner.orders.insert(order.order_id, order.clone());
        Ok(order)
    }

    async fn order(&self, order_id: OrderId) -> Result<Option<Order>, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner.orders.get(&order_id).cloned())
    }

    async fn orders_by_account(&self, account_id: AccountId) -> Result<Vec<Order>, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .order_log
            .iter()
            .filter_map(|id| inner.orders.get(id))
            .filter(|o| o.account_id == account_id)
            .cloned()
            .collect())
    }

    async fn commit_settlement(&self, commit: SettlementCommit) -> Result<Account, StoreError> {
        if self.fail_commits.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable {
                reason: "injected commit failure".to_string(),
            });
        }
        if self
            .conflict_commits
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(StoreError::VersionConflict {
                account_id: commit.account_id,
            });
        }

        let mut inner = self.inner.lock().await;

        // Validate everything before the first write so a failed commit
        // leaves no partial state behind.
        let stored = inner
            .accounts
            .get(&commit.account_id)
            .ok_or(StoreError::AccountMissing {
                account_id: commit.account_id,
            })?;
        if stored.version != commit.expected_version {
            return Err(StoreError::VersionConflict {
                account_id: commit.account_id,
            });
        }
        let order = inner
            .orders
            .get(&commit.order_id)
            .ok_or(StoreError::OrderNotPending {
                order_id: commit.order_id,
            })?;
        if commit.executed_at.is_some()
            && !order.status.can_transition_to(OrderStatus::Executed)
        {
            return Err(StoreError::OrderNotPending {
                order_id: commit.order_id,
            });
        }

        // All checks passed; apply the triple.
        let account = Account {
            account_id: commit.account_id,
            cash_micros: commit.new_cash_micros,
            version: commit.expected_version + 1,
        };
        inner.accounts.insert(commit.account_id, account.clone());

        match commit.position {
            PositionUpdate::Upsert(p) => {
                inner.positions.insert((p.account_id, p.symbol.clone()), p);
            }
            PositionUpdate::Delete { symbol } => {
                inner.positions.remove(&(commit.account_id, symbol));
            }
        }

        if let Some(ts) = commit.executed_at {
            if let Some(order) = inner.orders.get_mut(&commit.order_id) {
                order.status = OrderStatus::Executed;
                order.executed_at = Some(ts);
            }
        }

        Ok(account)
    }

    async fn performance(
        &self,
        account_id: AccountId,
    ) -> Result<Option<PerformanceRecord>, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner.performance.get(&account_id).cloned())
    }

    async fn put_performance(&self, record: PerformanceRecord) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        inner.performance.insert(record.account_id, record);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use pdk_schemas::{Micros, OrderKind, Side};

    fn account(dollars: i64) -> Account {
        Account {
            account_id: AccountId::new_v4(),
            cash_micros: Micros::from_dollars(dollars),
            version: 0,
        }
    }

    fn pending_order(account_id: AccountId, symbol: &str) -> Order {
        Order {
            order_id: OrderId::new_v4(),
            account_id,
            symbol: symbol.to_string(),
            side: Side::Buy,
            kind: OrderKind::Market,
            qty: 1,
            price_micros: Micros::from_dollars(100),
            status: OrderStatus::Pending,
            created_at: Utc::now(),
            executed_at: None,
            seq: 0,
        }
    }

    fn upsert(account_id: AccountId, symbol: &str, qty: i64) -> PositionUpdate {
        PositionUpdate::Upsert(Position {
            account_id,
            symbol: symbol.to_string(),
            qty,
            avg_cost_micros: Micros::from_dollars(100),
        })
    }

    #[tokio::test]
    async fn create_account_rejects_duplicates() {
        let store = MemoryStore::new();
        let a = account(100);
        store.create_account(a.clone()).await.unwrap();
        assert_eq!(
            store.create_account(a.clone()).await,
            Err(StoreError::AccountExists {
                account_id: a.account_id
            })
        );
    }

    #[tokio::test]
    async fn orders_listed_in_creation_order() {
        let store = MemoryStore::new();
        let a = account(100);
        store.create_account(a.clone()).await.unwrap();

        let o1 = store.create_order(pending_order(a.account_id, "AAPL")).await.unwrap();
        let o2 = store.create_order(pending_order(a.account_id, "MSFT")).await.unwrap();
        let o3 = store.create_order(pending_order(a.account_id, "TSLA")).await.unwrap();
        assert!(o1.seq < o2.seq && o2.seq < o3.seq);

        let listed = store.orders_by_account(a.account_id).await.unwrap();
        let symbols: Vec<&str> = listed.iter().map(|o| o.symbol.as_str()).collect();
        assert_eq!(symbols, vec!["AAPL", "MSFT", "TSLA"]);
    }

    #[tokio::test]
    async fn commit_bumps_version_and_executes_order() {
        let store = MemoryStore::new();
        let a = account(1_000);
        store.create_account(a.clone()).await.unwrap();
        let order = store.create_order(pending_order(a.account_id, "AAPL")).await.unwrap();

        let ts = Utc::now();
        let committed = store
            .commit_settlement(SettlementCommit {
                account_id: a.account_id,
                expected_version: 0,
                new_cash_micros: Micros::from_dollars(900),
                position: upsert(a.account_id, "AAPL", 1),
                order_id: order.order_id,
                executed_at: Some(ts),
            })
            .await
            .unwrap();

        assert_eq!(committed.version, 1);
        assert_eq!(committed.cash_micros, Micros::from_dollars(900));
        let stored = store.order(order.order_id).await.unwrap().unwrap();
        assert_eq!(stored.status, OrderStatus::Executed);
        assert_eq!(stored.executed_at, Some(ts));
    }

    #[tokio::test]
    async fn stale_version_is_rejected_without_writes() {
        let store = MemoryStore::new();
        let a = account(1_000);
        store.create_account(a.clone()).await.unwrap();
        let order = store.create_order(pending_order(a.account_id, "AAPL")).await.unwrap();

        let err = store
            .commit_settlement(SettlementCommit {
                account_id: a.account_id,
                expected_version: 7,
                new_cash_micros: Micros::from_dollars(900),
                position: upsert(a.account_id, "AAPL", 1),
                order_id: order.order_id,
                executed_at: Some(Utc::now()),
            })
            .await;

        assert_eq!(
            err,
            Err(StoreError::VersionConflict {
                account_id: a.account_id
            })
        );
        // Nothing moved.
        let stored = store.account(a.account_id).await.unwrap().unwrap();
        assert_eq!(stored.cash_micros, Micros::from_dollars(1_000));
        assert_eq!(stored.version, 0);
        assert!(store.position(a.account_id, "AAPL").await.unwrap().is_none());
        let stored_order = store.order(order.order_id).await.unwrap().unwrap();
        assert_eq!(stored_order.status, OrderStatus::Pending);
    }

    #[tokio::test]
    async fn executed_order_cannot_be_executed_again() {
        let store = MemoryStore::new();
        let a = account(1_000);
        store.create_account(a.clone()).await.unwrap();
        let order = store.create_order(pending_order(a.account_id, "AAPL")).await.unwrap();

        let commit = SettlementCommit {
            account_id: a.account_id,
            expected_version: 0,
            new_cash_micros: Micros::from_dollars(900),
            position: upsert(a.account_id, "AAPL", 1),
            order_id: order.order_id,
            executed_at: Some(Utc::now()),
        };
        store.commit_settlement(commit.clone()).await.unwrap();

        let err = store
            .commit_settlement(SettlementCommit {
                expected_version: 1,
                ..commit
            })
            .await;
        assert_eq!(
            err,
            Err(StoreError::OrderNotPending {
                order_id: order.order_id
            })
        );
    }

    #[tokio::test]
    async fn injected_commit_failure_leaves_state_untouched() {
        let store = MemoryStore::new();
        let a = account(1_000);
        store.create_account(a.clone()).await.unwrap();
        let order = store.create_order(pending_order(a.account_id, "AAPL")).await.unwrap();

        store.set_fail_commits(true);
        let err = store
            .commit_settlement(SettlementCommit {
                account_id: a.account_id,
                expected_version: 0,
                new_cash_micros: Micros::from_dollars(900),
                position: upsert(a.account_id, "AAPL", 1),
                order_id: order.order_id,
                executed_at: Some(Utc::now()),
            })
            .await;
        assert!(matches!(err, Err(StoreError::Unavailable { .. })));

        let stored = store.account(a.account_id).await.unwrap().unwrap();
        assert_eq!(stored.version, 0);
        assert_eq!(stored.cash_micros, Micros::from_dollars(1_000));
    }

    #[tokio::test]
    async fn injected_conflicts_expire_after_n_commits() {
        let store = MemoryStore::new();
        let a = account(1_000);
        store.create_account(a.clone()).await.unwrap();
        let order = store.create_order(pending_order(a.account_id, "AAPL")).await.unwrap();

        let commit = SettlementCommit {
            account_id: a.account_id,
            expected_version: 0,
            new_cash_micros: Micros::from_dollars(900),
            position: upsert(a.account_id, "AAPL", 1),
            order_id: order.order_id,
            executed_at: Some(Utc::now()),
        };

        store.set_conflict_commits(2);
        for _ in 0..2 {
            assert_eq!(
                store.commit_settlement(commit.clone()).await,
                Err(StoreError::VersionConflict {
                    account_id: a.account_id
                })
            );
        }
        // Injection exhausted; the same commit now lands.
        let committed = store.commit_settlement(commit).await.unwrap();
        assert_eq!(committed.version, 1);
    }

    #[tokio::test]
    async fn delete_removes_position_row() {
        let store = MemoryStore::new();
        let a = account(1_000);
        store.create_account(a.clone()).await.unwrap();
        let buy = store.create_order(pending_order(a.account_id, "AAPL")).await.unwrap();
        store
            .commit_settlement(SettlementCommit {
                account_id: a.account_id,
                expected_version: 0,
                new_cash_micros: Micros::from_dollars(900),
                position: upsert(a.account_id, "AAPL", 1),
                order_id: buy.order_id,
                executed_at: Some(Utc::now()),
            })
            .await
            .unwrap();

        let sell = store.create_order(pending_order(a.account_id, "AAPL")).await.unwrap();
        store
            .commit_settlement(SettlementCommit {
                account_id: a.account_id,
                expected_version: 1,
                new_cash_micros: Micros::from_dollars(1_000),
                position: PositionUpdate::Delete {
                    symbol: "AAPL".to_string(),
                },
                order_id: sell.order_id,
                executed_at: Some(Utc::now()),
            })
            .await
            .unwrap();

        assert!(store.position(a.account_id, "AAPL").await.unwrap().is_none());
        assert!(store
            .positions_by_account(a.account_id)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn positions_by_account_is_scoped() {
        let store = MemoryStore::new();
        let a = account(1_000);
        let b = account(1_000);
        store.create_account(a.clone()).await.unwrap();
        store.create_account(b.clone()).await.unwrap();

        for (owner, symbol) in [(&a, "AAPL"), (&a, "MSFT"), (&b, "TSLA")] {
            let order = store
                .create_order(pending_order(owner.account_id, symbol))
                .await
                .unwrap();
            let version = store.account(owner.account_id).await.unwrap().unwrap().version;
            store
                .commit_settlement(SettlementCommit {
                    account_id: owner.account_id,
                    expected_version: version,
                    new_cash_micros: Micros::from_dollars(900),
                    position: upsert(owner.account_id, symbol, 1),
                    order_id: order.order_id,
                    executed_at: Some(Utc::now()),
                })
                .await
                .unwrap();
        }

        let for_a = store.positions_by_account(a.account_id).await.unwrap();
        assert_eq!(for_a.len(), 2);
        assert!(for_a.iter().all(|p| p.account_id == a.account_id));
    }
}
