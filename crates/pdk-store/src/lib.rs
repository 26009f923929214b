//! Durable keyed records for settlement: accounts, positions, orders and
//! derived performance.
//!
//! # Contract
//!
//! [`SettlementStore`] is the seam between the settlement engine and
//! whatever persistence backs it.  Two implementations ship here:
//!
//! - [`MemoryStore`] — deterministic in-process store used by tests, demos
//!   and DB-less deployments.
//! - [`PgStore`] — Postgres via sqlx, with embedded migrations.
//!
//! # Consistency model
//!
//! Every account carries a `version` counter.  [`SettlementStore::commit_settlement`]
//! is the **only** write that touches balances/positions, and it is
//! all-or-nothing: the balance write, the position upsert/delete and the
//! order status transition land together or not at all.  The commit carries
//! the version the caller read; a mismatch fails with
//! [`StoreError::VersionConflict`] and mutates nothing.
//!
//! Order records are staged separately via
//! [`SettlementStore::create_order`] **before** any funds move, so a crash
//! between staging and commit leaves a recoverable "order pending, funds
//! untouched" state — never "funds moved, order missing".

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pdk_schemas::{Account, AccountId, Micros, Order, OrderId, PerformanceRecord, Position};

mod memory;
mod pg;

pub use memory::MemoryStore;
pub use pg::PgStore;

/// Environment variable naming the Postgres connection string.
pub const ENV_DB_URL: &str = "PDK_DATABASE_URL";

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Failures a store operation can surface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The commit's `expected_version` no longer matches the stored account
    /// version (a concurrent settlement won the race).  Nothing was written.
    VersionConflict { account_id: AccountId },
    /// The commit referenced an account that does not exist.
    AccountMissing { account_id: AccountId },
    /// `create_account` for an id that already exists.
    AccountExists { account_id: AccountId },
    /// The commit referenced an order that does not exist or attempted an
    /// illegal status transition (only `Pending → Executed` is legal).
    OrderNotPending { order_id: OrderId },
    /// Connectivity or backend failure.  The current operation is lost;
    /// retry happens at the next client request or scheduler tick, never
    /// silently inside the store.
    Unavailable { reason: String },
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::VersionConflict { account_id } => {
                write!(f, "version conflict on account {account_id}")
            }
            Self::AccountMissing { account_id } => {
                write!(f, "account {account_id} does not exist")
            }
            Self::AccountExists { account_id } => {
                write!(f, "account {account_id} already exists")
            }
            Self::OrderNotPending { order_id } => {
                write!(f, "order {order_id} is missing or not pending")
            }
            Self::Unavailable { reason } => write!(f, "store unavailable: {reason}"),
        }
    }
}

impl std::error::Error for StoreError {}

impl StoreError {
    pub(crate) fn unavailable(err: impl std::fmt::Display) -> Self {
        StoreError::Unavailable {
            reason: err.to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Commit payload
// ---------------------------------------------------------------------------

/// What the settlement commit does to the account's position set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PositionUpdate {
    /// Create or replace the position row for `position.symbol`.
    Upsert(Position),
    /// Remove the position row (sell exhausted the holding).
    Delete { symbol: String },
}

/// The atomic order+position+account triple write.
///
/// `executed_at: Some(ts)` finalizes the staged order (`Pending → Executed`
/// with that timestamp); `None` leaves it pending (limit orders).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettlementCommit {
    pub account_id: AccountId,
    /// Version the caller read; compared on write.
    pub expected_version: u64,
    pub new_cash_micros: Micros,
    pub position: PositionUpdate,
    pub order_id: OrderId,
    pub executed_at: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// SettlementStore
// ---------------------------------------------------------------------------

/// The persistence seam for the settlement engine and the recompute
/// scheduler.  All methods are cancel-safe reads except `create_account`,
/// `create_order`, `commit_settlement` and `put_performance`.
#[async_trait]
pub trait SettlementStore: Send + Sync {
    /// Connectivity probe.  The scheduler calls this before each sweep and
    /// aborts the whole tick on failure.
    async fn ping(&self) -> Result<(), StoreError>;

    // --- Accounts ---

    async fn create_account(&self, account: Account) -> Result<(), StoreError>;
    async fn account(&self, account_id: AccountId) -> Result<Option<Account>, StoreError>;
    async fn list_account_ids(&self) -> Result<Vec<AccountId>, StoreError>;

    // --- Positions ---

    async fn position(
        &self,
        account_id: AccountId,
        symbol: &str,
    ) -> Result<Option<Position>, StoreError>;
    async fn positions_by_account(
        &self,
        account_id: AccountId,
    ) -> Result<Vec<Position>, StoreError>;

    // --- Orders (append-mostly audit log) ---

    /// Persist a new `Pending` order.  The store assigns the creation
    /// sequence number (the caller's `seq` is ignored) and returns the
    /// stored record.  Orders are never deleted.
    async fn create_order(&self, order: Order) -> Result<Order, StoreError>;
    async fn order(&self, order_id: OrderId) -> Result<Option<Order>, StoreError>;
    /// All orders for an account, ordered by creation sequence ascending.
    async fn orders_by_account(&self, account_id: AccountId) -> Result<Vec<Order>, StoreError>;

    // --- The atomic settlement commit ---

    /// Apply the order+position+account triple as one atomic unit, guarded
    /// by the account version.  Returns the post-commit account (version
    /// bumped).  On any error nothing has been written.
    async fn commit_settlement(&self, commit: SettlementCommit) -> Result<Account, StoreError>;

    // --- Derived performance (scheduler-owned) ---

    async fn performance(
        &self,
        account_id: AccountId,
    ) -> Result<Option<PerformanceRecord>, StoreError>;
    async fn put_performance(&self, record: PerformanceRecord) -> Result<(), StoreError>;
}
