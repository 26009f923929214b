//! The typed settlement command.
//!
//! Boundary layers (HTTP handlers, demo wiring) validate loose input into a
//! `TradeCommand` before the engine ever sees it; the engine never touches
//! untyped request bodies.

use chrono::Utc;
use pdk_schemas::{AccountId, Micros, Order, OrderId, OrderKind, OrderStatus, Side};

/// One validated buy/sell request against a single account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TradeCommand {
    pub account_id: AccountId,
    pub symbol: String,
    pub qty: i64,
    pub price_micros: Micros,
    pub kind: OrderKind,
}

impl TradeCommand {
    pub fn market(account_id: AccountId, symbol: impl Into<String>, qty: i64, price: Micros) -> Self {
        Self {
            account_id,
            symbol: symbol.into(),
            qty,
            price_micros: price,
            kind: OrderKind::Market,
        }
    }

    pub fn limit(account_id: AccountId, symbol: impl Into<String>, qty: i64, price: Micros) -> Self {
        Self {
            account_id,
            symbol: symbol.into(),
            qty,
            price_micros: price,
            kind: OrderKind::Limit,
        }
    }

    /// Canonical symbol form: trimmed, upper-cased.
    pub(crate) fn normalized(mut self) -> Self {
        self.symbol = self.symbol.trim().to_uppercase();
        self
    }

    /// The `Pending` order record staged for this command.  The store
    /// assigns `seq` on insert.
    pub(crate) fn to_order(&self, side: Side) -> Order {
        Order {
            order_id: OrderId::new_v4(),
            account_id: self.account_id,
            symbol: self.symbol.clone(),
            side,
            kind: self.kind,
            qty: self.qty,
            price_micros: self.price_micros,
            status: OrderStatus::Pending,
            created_at: Utc::now(),
            executed_at: None,
            seq: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalized_uppercases_and_trims() {
        let cmd = TradeCommand::market(
            AccountId::new_v4(),
            " aapl ",
            1,
            Micros::from_dollars(100),
        )
        .normalized();
        assert_eq!(cmd.symbol, "AAPL");
    }

    #[test]
    fn staged_order_is_pending_without_timestamp() {
        let cmd = TradeCommand::market(AccountId::new_v4(), "AAPL", 3, Micros::from_dollars(140));
        let order = cmd.to_order(Side::Buy);
        assert_eq!(order.status, OrderStatus::Pending);
        assert!(order.executed_at.is_none());
        assert_eq!(order.qty, 3);
        assert_eq!(order.seq, 0);
    }
}
