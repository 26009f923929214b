//! Postgres-backed store (sqlx).
//!
//! The settlement commit runs in a single transaction with a
//! `where version = $expected` guard on the account row — the database-side
//! half of the optimistic compare-and-swap.  Zero rows updated means a
//! concurrent writer won; the transaction rolls back untouched.
//!
//! Integration tests follow the workspace convention: skip with a note when
//! `PDK_DATABASE_URL` is not set.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pdk_schemas::{
    Account, AccountId, Micros, Order, OrderId, OrderKind, OrderStatus, PerformanceRecord,
    Position, Side,
};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use uuid::Uuid;

use crate::{PositionUpdate, SettlementCommit, SettlementStore, StoreError, ENV_DB_URL};

pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Connect using `PDK_DATABASE_URL` and run embedded migrations.
    pub async fn connect_from_env() -> Result<Self, StoreError> {
        let url = std::env::var(ENV_DB_URL)
            .map_err(|_| StoreError::unavailable(format!("missing env var {ENV_DB_URL}")))?;
        Self::connect(&url).await
    }

    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(url)
            .await
            .map_err(StoreError::unavailable)?;
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(StoreError::unavailable)?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

// ---------------------------------------------------------------------------
// Row decoding
// ---------------------------------------------------------------------------

fn side_str(side: Side) -> &'static str {
    match side {
        Side::Buy => "buy",
        Side::Sell => "sell",
    }
}

fn kind_str(kind: OrderKind) -> &'static str {
    match kind {
        OrderKind::Market => "market",
        OrderKind::Limit => "limit",
    }
}

fn status_str(status: OrderStatus) -> &'static str {
    match status {
        OrderStatus::Pending => "pending",
        OrderStatus::Executed => "executed",
    }
}

fn parse_side(s: &str) -> Result<Side, StoreError> {
    match s {
        "buy" => Ok(Side::Buy),
        "sell" => Ok(Side::Sell),
        other => Err(StoreError::unavailable(format!("corrupt side column: {other}"))),
    }
}

fn parse_kind(s: &str) -> Result<OrderKind, StoreError> {
    match s {
        "market" => Ok(OrderKind::Market),
        "limit" => Ok(OrderKind::Limit),
        other => Err(StoreError::unavailable(format!("corrupt kind column: {other}"))),
    }
}

fn parse_status(s: &str) -> Result<OrderStatus, StoreError> {
    match s {
        "pending" => Ok(OrderStatus::Pending),
        "executed" => Ok(OrderStatus::Executed),
        other => Err(StoreError::unavailable(format!(
            "corrupt status column: {other}"
        ))),
    }
}

fn decode_account(row: &PgRow) -> Result<Account, StoreError> {
    Ok(Account {
        account_id: AccountId(row.try_get::<Uuid, _>("account_id").map_err(StoreError::unavailable)?),
        cash_micros: Micros::new(
            row.try_get::<i64, _>("cash_micros")
                .map_err(StoreError::unavailable)?,
        ),
        version: row
            .try_get::<i64, _>("version")
            .map_err(StoreError::unavailable)? as u64,
    })
}

fn decode_position(row: &PgRow) -> Result<Position, StoreError> {
    Ok(Position {
        account_id: AccountId(row.try_get::<Uuid, _>("account_id").map_err(StoreError::unavailable)?),
        symbol: row
            .try_get::<String, _>("symbol")
            .map_err(StoreError::unavailable)?,
        qty: row.try_get::<i64, _>("qty").map_err(StoreError::unavailable)?,
        avg_cost_micros: Micros::new(
            row.try_get::<i64, _>("avg_cost_micros")
                .map_err(StoreError::unavailable)?,
        ),
    })
}

fn decode_order(row: &PgRow) -> Result<Order, StoreError> {
    let side: String = row.try_get("side").map_err(StoreError::unavailable)?;
    let kind: String = row.try_get("kind").map_err(StoreError::unavailable)?;
    let status: String = row.try_get("status").map_err(StoreError::unavailable)?;
    Ok(Order {
        order_id: OrderId(row.try_get::<Uuid, _>("order_id").map_err(StoreError::unavailable)?),
        account_id: AccountId(row.try_get::<Uuid, _>("account_id").map_err(StoreError::unavailable)?),
        symbol: row
            .try_get::<String, _>("symbol")
            .map_err(StoreError::unavailable)?,
        side: parse_side(&side)?,
        kind: parse_kind(&kind)?,
        qty: row.try_get::<i64, _>("qty").map_err(StoreError::unavailable)?,
        price_micros: Micros::new(
            row.try_get::<i64, _>("price_micros")
                .map_err(StoreError::unavailable)?,
        ),
        status: parse_status(&status)?,
        created_at: row
            .try_get::<DateTime<Utc>, _>("created_at")
            .map_err(StoreError::unavailable)?,
        executed_at: row
            .try_get::<Option<DateTime<Utc>>, _>("executed_at")
            .map_err(StoreError::unavailable)?,
        seq: row.try_get::<i64, _>("seq").map_err(StoreError::unavailable)? as u64,
    })
}

// ---------------------------------------------------------------------------
// SettlementStore impl
// ---------------------------------------------------------------------------

#[async_trait]
impl SettlementStore for PgStore {
    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("select 1")
            .execute(&self.pool)
            .await
            .map_err(StoreError::unavailable)?;
        Ok(())
    }

    async fn create_account(&self, account: Account) -> Result<(), StoreError> {
        let result = sqlx::query(
            "insert into accounts (account_id, cash_micros, version)
             values ($1, $2, $3)
             on conflict (account_id) do nothing",
        )
        .bind(account.account_id.0)
        .bind(account.cash_micros.raw())
        .bind(account.version as i64)
        .execute(&self.pool)
        .await
        .map_err(StoreError::unavailable)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::AccountExists {
                account_id: account.account_id,
            });
        }
        Ok(())
    }

    async fn account(&self, account_id: AccountId) -> Result<Option<Account>, StoreError> {
        let row = sqlx::query(
            "select account_id, cash_micros, version from accounts where account_id = $1",
        )
        .bind(account_id.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(StoreError::unavailable)?;
        row.as_ref().map(decode_account).transpose()
    }

    async fn list_account_ids(&self) -> Result<Vec<AccountId>, StoreError> {
        let rows = sqlx::query("select account_id from accounts order by account_id")
            .fetch_all(&self.pool)
            .await
            .map_err(StoreError::unavailable)?;
        rows.iter()
            .map(|row| {
                row.try_get::<Uuid, _>("account_id")
                    .map(AccountId)
                    .map_err(StoreError::unavailable)
            })
            .collect()
    }

    async fn position(
        &self,
        account_id: AccountId,
        symbol: &str,
    ) -> Result<Option<Position>, StoreError> {
        let row = sqlx::query(
            "select account_id, symbol, qty, avg_cost_micros
             from positions where account_id = $1 and symbol = $2",
        )
        .bind(account_id.0)
        .bind(symbol)
        .fetch_optional(&self.pool)
        .await
        .map_err(StoreError::unavailable)?;
        row.as_ref().map(decode_position).transpose()
    }

    async fn positions_by_account(
        &self,
        account_id: AccountId,
    ) -> Result<Vec<Position>, StoreError> {
        let rows = sqlx::query(
            "select account_id, symbol, qty, avg_cost_micros
             from positions where account_id = $1 order by symbol",
        )
        .bind(account_id.0)
        .fetch_all(&self.pool)
        .await
        .map_err(StoreError::unavailable)?;
        rows.iter().map(decode_position).collect()
    }

    async fn create_order(&self, order: Order) -> Result<Order, StoreError> {
        let row = sqlx::query(
            "insert into orders
               (order_id, account_id, symbol, side, kind, qty, price_micros,
                status, created_at, executed_at)
             values ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
             returning seq",
        )
        .bind(order.order_id.0)
        .bind(order.account_id.0)
        .bind(&order.symbol)
        .bind(side_str(order.side))
        .bind(kind_str(order.kind))
        .bind(order.qty)
        .bind(order.price_micros.raw())
        .bind(status_str(order.status))
        .bind(order.created_at)
        .bind(order.executed_at)
        .fetch_one(&self.pool)
        .await
        .map_err(StoreError::unavailable)?;

        let seq = row.try_get::<i64, _>("seq").map_err(StoreError::unavailable)? as u64;
        Ok(Order { seq, ..order })
    }

    async fn order(&self, order_id: OrderId) -> Result<Option<Order>, StoreError> {
        let row = sqlx::query("select * from orders where order_id = $1")
            .bind(order_id.0)
            .fetch_optional(&self.pool)
            .await
            .map_err(StoreError::unavailable)?;
        row.as_ref().map(decode_order).transpose()
    }

    async fn orders_by_account(&self, account_id: AccountId) -> Result<Vec<Order>, StoreError> {
        let rows = sqlx::query("select * from orders where account_id = $1 order by seq")
            .bind(account_id.0)
            .fetch_all(&self.pool)
            .await
            .map_err(StoreError::unavailable)?;
        rows.iter().map(decode_order).collect()
    }

    async fn commit_settlement(&self, commit: SettlementCommit) -> Result<Account, StoreError> {
        let mut tx = self.pool.begin().await.map_err(StoreError::unavailable)?;

        // CAS on the account version; no row back = stale read or missing
        // row.  `returning` pins the reported state to this commit even when
        // another process lands a later one before we answer.
        let updated = sqlx::query(
            "update accounts set cash_micros = $1, version = version + 1
             where account_id = $2 and version = $3
             returning cash_micros, version",
        )
        .bind(commit.new_cash_micros.raw())
        .bind(commit.account_id.0)
        .bind(commit.expected_version as i64)
        .fetch_optional(&mut *tx)
        .await
        .map_err(StoreError::unavailable)?;

        let Some(updated) = updated else {
            let exists = sqlx::query("select 1 from accounts where account_id = $1")
                .bind(commit.account_id.0)
                .fetch_optional(&mut *tx)
                .await
                .map_err(StoreError::unavailable)?;
            // Rollback happens on drop.
            return Err(if exists.is_some() {
                StoreError::VersionConflict {
                    account_id: commit.account_id,
                }
            } else {
                StoreError::AccountMissing {
                    account_id: commit.account_id,
                }
            });
        };

        let account = Account {
            account_id: commit.account_id,
            cash_micros: Micros::new(
                updated
                    .try_get::<i64, _>("cash_micros")
                    .map_err(StoreError::unavailable)?,
            ),
            version: updated
                .try_get::<i64, _>("version")
                .map_err(StoreError::unavailable)? as u64,
        };

        match &commit.position {
            PositionUpdate::Upsert(p) => {
                sqlx::query(
                    "insert into positions (account_id, symbol, qty, avg_cost_micros)
                     values ($1, $2, $3, $4)
                     on conflict (account_id, symbol)
                     do update set qty = excluded.qty,
                                   avg_cost_micros = excluded.avg_cost_micros",
                )
                .bind(p.account_id.0)
                .bind(&p.symbol)
                .bind(p.qty)
                .bind(p.avg_cost_micros.raw())
                .execute(&mut *tx)
                .await
                .map_err(StoreError::unavailable)?;
            }
            PositionUpdate::Delete { symbol } => {
                sqlx::query("delete from positions where account_id = $1 and symbol = $2")
                    .bind(commit.account_id.0)
                    .bind(symbol)
                    .execute(&mut *tx)
                    .await
                    .map_err(StoreError::unavailable)?;
            }
        }

        if let Some(ts) = commit.executed_at {
            let executed = sqlx::query(
                "update orders set status = 'executed', executed_at = $1
                 where order_id = $2 and status = 'pending'",
            )
            .bind(ts)
            .bind(commit.order_id.0)
            .execute(&mut *tx)
            .await
            .map_err(StoreError::unavailable)?;
            if executed.rows_affected() == 0 {
                return Err(StoreError::OrderNotPending {
                    order_id: commit.order_id,
                });
            }
        }

        tx.commit().await.map_err(StoreError::unavailable)?;

        Ok(account)
    }

    async fn performance(
        &self,
        account_id: AccountId,
    ) -> Result<Option<PerformanceRecord>, StoreError> {
        let row = sqlx::query("select * from performance where account_id = $1")
            .bind(account_id.0)
            .fetch_optional(&self.pool)
            .await
            .map_err(StoreError::unavailable)?;
        row.map(|row| {
            Ok(PerformanceRecord {
                account_id: AccountId(
                    row.try_get::<Uuid, _>("account_id")
                        .map_err(StoreError::unavailable)?,
                ),
                market_value_micros: Micros::new(
                    row.try_get::<i64, _>("market_value_micros")
                        .map_err(StoreError::unavailable)?,
                ),
                cost_basis_micros: Micros::new(
                    row.try_get::<i64, _>("cost_basis_micros")
                        .map_err(StoreError::unavailable)?,
                ),
                unrealized_pnl_micros: Micros::new(
                    row.try_get::<i64, _>("unrealized_pnl_micros")
                        .map_err(StoreError::unavailable)?,
                ),
                daily_change_micros: Micros::new(
                    row.try_get::<i64, _>("daily_change_micros")
                        .map_err(StoreError::unavailable)?,
                ),
                computed_at: row
                    .try_get::<DateTime<Utc>, _>("computed_at")
                    .map_err(StoreError::unavailable)?,
            })
        })
        .transpose()
    }

    async fn put_performance(&self, record: PerformanceRecord) -> Result<(), StoreError> {
        sqlx::query(
            "insert into performance
               (account_id, market_value_micros, cost_basis_micros,
                unrealized_pnl_micros, daily_change_micros, computed_at)
             values ($1, $2, $3, $4, $5, $6)
             on conflict (account_id) do update set
               market_value_micros = excluded.market_value_micros,
               cost_basis_micros = excluded.cost_basis_micros,
               unrealized_pnl_micros = excluded.unrealized_pnl_micros,
               daily_change_micros = excluded.daily_change_micros,
               computed_at = excluded.computed_at",
        )
        .bind(record.account_id.0)
        .bind(record.market_value_micros.raw())
        .bind(record.cost_basis_micros.raw())
        .bind(record.unrealized_pnl_micros.raw())
        .bind(record.daily_change_micros.raw())
        .bind(record.computed_at)
        .execute(&self.pool)
        .await
        .map_err(StoreError::unavailable)?;
        Ok(())
    }
}
