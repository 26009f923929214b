//! Shared domain records for the paper-trading service.
//!
//! Pure data: every type here is `Serialize + Deserialize` and carries no
//! business logic beyond cheap predicates (status transitions, id display).
//! The settlement arithmetic lives in `pdk-ledger`; persistence in
//! `pdk-store`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub mod fixedpoint;

pub use fixedpoint::{Micros, MICROS_SCALE};

// ---------------------------------------------------------------------------
// Id newtypes
// ---------------------------------------------------------------------------

/// Opaque account identity.  Issued at registration (external to this core).
#[derive(
    Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct AccountId(pub Uuid);

impl AccountId {
    pub fn new_v4() -> Self {
        AccountId(Uuid::new_v4())
    }
}

impl std::fmt::Display for AccountId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Opaque order identity, assigned once at order creation.
#[derive(
    Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct OrderId(pub Uuid);

impl OrderId {
    pub fn new_v4() -> Self {
        OrderId(Uuid::new_v4())
    }
}

impl std::fmt::Display for OrderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// BUY or SELL.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Buy,
    Sell,
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Buy => write!(f, "buy"),
            Side::Sell => write!(f, "sell"),
        }
    }
}

/// Order kind.  Only `Market` settles synchronously; `Limit` orders persist
/// as `Pending` and are never executed by this core.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderKind {
    Market,
    Limit,
}

/// Order lifecycle status.
///
/// The only legal transition is `Pending → Executed`.  `Executed` is
/// terminal; there is no path out of it and no path back to `Pending`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Executed,
}

impl OrderStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, OrderStatus::Executed)
    }

    /// Whether `self → next` is a legal lifecycle transition.
    pub fn can_transition_to(self, next: OrderStatus) -> bool {
        matches!((self, next), (OrderStatus::Pending, OrderStatus::Executed))
    }
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// Per-account cash ledger record.
///
/// `cash_micros` is mutated only by the settlement engine and is never
/// negative after a committed settlement.  `version` is the store-owned
/// optimistic-concurrency stamp; it increments on every committed
/// settlement and is compared on write.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub account_id: AccountId,
    pub cash_micros: Micros,
    pub version: u64,
}

/// One account's holding of one instrument.
///
/// Exists only while `qty > 0`; a sell that exhausts the holding deletes the
/// record rather than retaining a zero row.  `avg_cost_micros` is the
/// weighted mean acquisition price, recomputed on every buy and left
/// untouched by sells.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub account_id: AccountId,
    pub symbol: String,
    pub qty: i64,
    pub avg_cost_micros: Micros,
}

/// A submitted order.  Append-mostly audit record: immutable after creation
/// except for the single `Pending → Executed` status transition, and never
/// deleted.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub order_id: OrderId,
    pub account_id: AccountId,
    pub symbol: String,
    pub side: Side,
    pub kind: OrderKind,
    pub qty: i64,
    pub price_micros: Micros,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
    /// Set exactly once, on the `Pending → Executed` transition.
    pub executed_at: Option<DateTime<Utc>>,
    /// Store-assigned creation sequence; `orders_by_account` is ordered by
    /// this, ascending, so listings are replayable.
    pub seq: u64,
}

/// Derived portfolio performance, written only by the recompute scheduler.
///
/// Never feeds back into settlement: cash and holdings are not read from
/// here.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PerformanceRecord {
    pub account_id: AccountId,
    /// Σ qty × current quote, over all held symbols.
    pub market_value_micros: Micros,
    /// Σ qty × average cost, over all held symbols.
    pub cost_basis_micros: Micros,
    /// `market_value - cost_basis`.
    pub unrealized_pnl_micros: Micros,
    /// Market value delta vs. the previously persisted record (0 on the
    /// first recompute).
    pub daily_change_micros: Micros,
    pub computed_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pending_to_executed_is_the_only_transition() {
        assert!(OrderStatus::Pending.can_transition_to(OrderStatus::Executed));
        assert!(!OrderStatus::Executed.can_transition_to(OrderStatus::Pending));
        assert!(!OrderStatus::Pending.can_transition_to(OrderStatus::Pending));
        assert!(!OrderStatus::Executed.can_transition_to(OrderStatus::Executed));
    }

    #[test]
    fn executed_is_terminal() {
        assert!(OrderStatus::Executed.is_terminal());
        assert!(!OrderStatus::Pending.is_terminal());
    }

    #[test]
    fn enums_serialize_snake_case() {
        assert_eq!(serde_json::to_string(&Side::Buy).unwrap(), "\"buy\"");
        assert_eq!(serde_json::to_string(&OrderKind::Market).unwrap(), "\"market\"");
        assert_eq!(
            serde_json::to_string(&OrderStatus::Pending).unwrap(),
            "\"pending\""
        );
    }

    #[test]
    fn order_json_round_trip() {
        let order = Order {
            order_id: OrderId::new_v4(),
            account_id: AccountId::new_v4(),
            symbol: "AAPL".to_string(),
            side: Side::Buy,
            kind: OrderKind::Market,
            qty: 3,
            price_micros: Micros::from_dollars(140),
            status: OrderStatus::Executed,
            created_at: Utc::now(),
            executed_at: Some(Utc::now()),
            seq: 1,
        };
        let json = serde_json::to_string(&order).unwrap();
        let back: Order = serde_json::from_str(&json).unwrap();
        assert_eq!(order, back);
    }
}
