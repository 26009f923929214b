//! Trade Settlement Engine — the single choke-point for all settlements.
//!
//! # Invariants
//!
//! - **Per-account linearizability.** An async mutex per account is held for
//!   the whole read-modify-write span, so two settlements on the same
//!   account can never both read the same pre-state.  Different accounts
//!   proceed fully in parallel.
//! - **Second line of defense.** Every commit carries the account version it
//!   read; the store refuses stale writes.  A conflict (possible only when
//!   another process shares the backing store) is re-read and retried up to
//!   [`SettlementEngine::MAX_COMMIT_RETRIES`] times before surfacing
//!   [`SettlementError::ConcurrentModification`].
//! - **Order-first staging.** The order record is durable with status
//!   `Pending` before any balance or position write.  A commit failure
//!   leaves the order pending and the account/position at their pre-trade
//!   values — never "funds moved, order missing".
//!
//! # Error policy
//!
//! Business-rule failures (`InvalidInput`, `InsufficientFunds`,
//! `InsufficientHoldings`, `AccountNotFound`) are client errors and are not
//! logged as system faults.  `StoreUnavailable` is logged with full context
//! and surfaced; the operation is never silently retried beyond the
//! version-conflict bound.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};

use chrono::Utc;
use pdk_ledger::LedgerError;
use pdk_schemas::{Account, AccountId, Micros, Order, OrderKind, OrderStatus, Position, Side};
use pdk_store::{PositionUpdate, SettlementCommit, SettlementStore, StoreError};
use tokio::sync::Mutex;
use tracing::{debug, error, warn};

mod command;

pub use command::TradeCommand;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// The settlement error taxonomy surfaced to callers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettlementError {
    /// Malformed quantity, price or symbol.
    InvalidInput { reason: String },
    AccountNotFound { account_id: AccountId },
    InsufficientFunds { needed: Micros, available: Micros },
    InsufficientHoldings { requested: i64, held: i64 },
    /// Lost the optimistic race more than the retry bound allows.
    ConcurrentModification,
    /// Durable-store failure; retried only by the caller's next request.
    StoreUnavailable { reason: String },
}

impl std::fmt::Display for SettlementError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidInput { reason } => write!(f, "invalid input: {reason}"),
            Self::AccountNotFound { account_id } => {
                write!(f, "account {account_id} not found")
            }
            Self::InsufficientFunds { needed, available } => {
                write!(f, "insufficient funds: need {needed}, available {available}")
            }
            Self::InsufficientHoldings { requested, held } => {
                write!(f, "insufficient holdings: requested {requested}, held {held}")
            }
            Self::ConcurrentModification => {
                write!(f, "concurrent modification: settlement retries exhausted")
            }
            Self::StoreUnavailable { reason } => write!(f, "store unavailable: {reason}"),
        }
    }
}

impl std::error::Error for SettlementError {}

impl SettlementError {
    /// Client error (400-class): the request itself was at fault and the
    /// failure is not a system fault.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidInput { .. }
                | Self::AccountNotFound { .. }
                | Self::InsufficientFunds { .. }
                | Self::InsufficientHoldings { .. }
        )
    }
}

impl From<LedgerError> for SettlementError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::InsufficientFunds { needed, available } => {
                SettlementError::InsufficientFunds { needed, available }
            }
            LedgerError::InsufficientHoldings { requested, held } => {
                SettlementError::InsufficientHoldings { requested, held }
            }
            other => SettlementError::InvalidInput {
                reason: other.to_string(),
            },
        }
    }
}

impl From<StoreError> for SettlementError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::AccountMissing { account_id } => {
                SettlementError::AccountNotFound { account_id }
            }
            StoreError::VersionConflict { .. } => SettlementError::ConcurrentModification,
            other => SettlementError::StoreUnavailable {
                reason: other.to_string(),
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Settlement result
// ---------------------------------------------------------------------------

/// The three records resulting from a committed settlement.
///
/// `position` is `None` when the sell exhausted the holding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settlement {
    pub account: Account,
    pub order: Order,
    pub position: Option<Position>,
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Orchestrates one buy/sell request end to end.  Cheap to share: hold it in
/// an `Arc` and call from as many tasks as needed.
pub struct SettlementEngine {
    store: Arc<dyn SettlementStore>,
    /// Per-account write locks.  The outer std mutex only guards the map
    /// itself and is never held across an await.
    locks: StdMutex<HashMap<AccountId, Arc<Mutex<()>>>>,
}

impl SettlementEngine {
    /// Bounded re-read-recompute attempts after a version conflict.
    pub const MAX_COMMIT_RETRIES: u32 = 3;

    pub fn new(store: Arc<dyn SettlementStore>) -> Self {
        Self {
            store,
            locks: StdMutex::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &Arc<dyn SettlementStore> {
        &self.store
    }

    /// Settle a buy: debit cash, fold the lot into the weighted-average
    /// cost basis, finalize the order.
    pub async fn settle_buy(&self, cmd: TradeCommand) -> Result<Settlement, SettlementError> {
        self.settle(Side::Buy, cmd).await
    }

    /// Settle a sell: credit proceeds, reduce (or delete) the position,
    /// finalize the order.  Average cost of the remaining lot is unchanged.
    pub async fn settle_sell(&self, cmd: TradeCommand) -> Result<Settlement, SettlementError> {
        self.settle(Side::Sell, cmd).await
    }

    /// Read-through: all orders for an account, creation order ascending.
    pub async fn orders(&self, account_id: AccountId) -> Result<Vec<Order>, SettlementError> {
        Ok(self.store.orders_by_account(account_id).await?)
    }

    /// Read-through: current positions for an account.
    pub async fn positions(&self, account_id: AccountId) -> Result<Vec<Position>, SettlementError> {
        Ok(self.store.positions_by_account(account_id).await?)
    }

    pub async fn account(&self, account_id: AccountId) -> Result<Account, SettlementError> {
        self.store
            .account(account_id)
            .await?
            .ok_or(SettlementError::AccountNotFound { account_id })
    }

    // -----------------------------------------------------------------------
    // Core flow
    // -----------------------------------------------------------------------

    async fn settle(&self, side: Side, cmd: TradeCommand) -> Result<Settlement, SettlementError> {
        let cmd = cmd.normalized();
        pdk_ledger::validate_request(&cmd.symbol, cmd.qty, cmd.price_micros)
            .map_err(SettlementError::from)?;

        // Serialize settlements on this account for the whole
        // read-modify-write span.  Other accounts are unaffected.
        let lock = self.account_lock(cmd.account_id);
        let _guard = lock.lock().await;

        let mut staged: Option<Order> = None;
        let mut attempt = 0u32;

        loop {
            let account = self
                .store
                .account(cmd.account_id)
                .await
                .map_err(Self::log_store_error)?
                .ok_or(SettlementError::AccountNotFound {
                    account_id: cmd.account_id,
                })?;
            let position = self
                .store
                .position(cmd.account_id, &cmd.symbol)
                .await
                .map_err(Self::log_store_error)?;

            // Compute the post-trade state; a business-rule failure here
            // surfaces before any order is staged (first attempt) and leaves
            // an already-staged order pending (conflict retries).
            let (next_account, next_position, update) = match side {
                Side::Buy => {
                    let out = pdk_ledger::settle_buy_state(
                        &account,
                        position.as_ref(),
                        &cmd.symbol,
                        cmd.qty,
                        cmd.price_micros,
                    )?;
                    let update = PositionUpdate::Upsert(out.position.clone());
                    (out.account, Some(out.position), update)
                }
                Side::Sell => {
                    let out = pdk_ledger::settle_sell_state(
                        &account,
                        position.as_ref(),
                        &cmd.symbol,
                        cmd.qty,
                        cmd.price_micros,
                    )?;
                    let update = match &out.position {
                        Some(p) => PositionUpdate::Upsert(p.clone()),
                        None => PositionUpdate::Delete {
                            symbol: cmd.symbol.clone(),
                        },
                    };
                    (out.account, out.position, update)
                }
            };

            // Post-compute guard: never hand the store a state that breaks
            // the balance/position invariants.
            pdk_ledger::check_invariants(&next_account, next_position.as_ref())?;

            // Stage the order (Pending) exactly once, before funds move.
            let order = match &staged {
                Some(order) => order.clone(),
                None => {
                    let order = self
                        .store
                        .create_order(cmd.to_order(side))
                        .await
                        .map_err(Self::log_store_error)?;
                    staged = Some(order.clone());
                    order
                }
            };

            // Market orders execute now; limit orders stay pending.
            let executed_at = match cmd.kind {
                OrderKind::Market => Some(Utc::now()),
                OrderKind::Limit => None,
            };

            let commit = SettlementCommit {
                account_id: cmd.account_id,
                expected_version: account.version,
                new_cash_micros: next_account.cash_micros,
                position: update,
                order_id: order.order_id,
                executed_at,
            };

            match self.store.commit_settlement(commit).await {
                Ok(committed) => {
                    debug!(
                        account_id = %cmd.account_id,
                        order_id = %order.order_id,
                        %side,
                        qty = cmd.qty,
                        price = %cmd.price_micros,
                        balance = %committed.cash_micros,
                        "settlement committed"
                    );
                    let order = finalize_order(order, executed_at);
                    return Ok(Settlement {
                        account: committed,
                        order,
                        position: next_position,
                    });
                }
                Err(StoreError::VersionConflict { .. }) if attempt < Self::MAX_COMMIT_RETRIES => {
                    attempt += 1;
                    warn!(
                        account_id = %cmd.account_id,
                        attempt,
                        "settlement commit lost version race; re-reading"
                    );
                    continue;
                }
                Err(StoreError::VersionConflict { .. }) => {
                    warn!(
                        account_id = %cmd.account_id,
                        retries = Self::MAX_COMMIT_RETRIES,
                        "settlement retries exhausted"
                    );
                    return Err(SettlementError::ConcurrentModification);
                }
                Err(err) => return Err(Self::log_store_error(err)),
            }
        }
    }

    fn account_lock(&self, account_id: AccountId) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().expect("lock map poisoned");
        locks
            .entry(account_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn log_store_error(err: StoreError) -> SettlementError {
        let mapped = SettlementError::from(err);
        if !mapped.is_client_error() {
            error!(error = %mapped, "settlement store failure");
        }
        mapped
    }
}

/// Mirror the status transition the store applied, so the caller gets the
/// final record without a re-read.
fn finalize_order(mut order: Order, executed_at: Option<chrono::DateTime<Utc>>) -> Order {
    if let Some(ts) = executed_at {
        order.status = OrderStatus::Executed;
        order.executed_at = Some(ts);
    }
    order
}
