//! Request and response types for all pdk-daemon HTTP endpoints.
//!
//! These types are `Serialize + Deserialize` so they can be JSON-encoded
//! by Axum and decoded by tests.  No business logic lives here; the
//! dollars-to-micros conversion in [`TradeRequest::to_command`] is the only
//! transformation and it rejects rather than rounds away garbage.

use pdk_schemas::{Account, AccountId, Micros, Order, OrderKind, Position};
use pdk_settlement::TradeCommand;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// /v1/health
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub ok: bool,
    pub service: &'static str,
    pub version: &'static str,
}

// ---------------------------------------------------------------------------
// Error body (400 / 500)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

// ---------------------------------------------------------------------------
// POST /v1/trade/buy  /v1/trade/sell
// ---------------------------------------------------------------------------

/// Wire form of a trade: price in whole dollars (float), converted to
/// micros at this boundary.  `order_kind` defaults to market.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeRequest {
    pub account_id: Uuid,
    pub symbol: String,
    pub quantity: i64,
    pub price: f64,
    #[serde(default)]
    pub order_kind: Option<OrderKind>,
}

impl TradeRequest {
    /// Convert to the engine's typed command; fails when the price is not a
    /// representable positive amount.
    pub fn to_command(&self) -> Result<TradeCommand, String> {
        let price = Micros::from_dollars_f64(self.price)
            .ok_or_else(|| format!("price {} is not a representable amount", self.price))?;
        let account_id = AccountId(self.account_id);
        let cmd = match self.order_kind.unwrap_or(OrderKind::Market) {
            OrderKind::Market => {
                TradeCommand::market(account_id, self.symbol.clone(), self.quantity, price)
            }
            OrderKind::Limit => {
                TradeCommand::limit(account_id, self.symbol.clone(), self.quantity, price)
            }
        };
        Ok(cmd)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeResponse {
    pub account: Account,
    pub order: Order,
    /// Absent when a sell exhausted the holding.
    pub position: Option<Position>,
}

// ---------------------------------------------------------------------------
// GET /v1/accounts/{id}/orders  /positions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrdersResponse {
    pub orders: Vec<Order>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionsResponse {
    pub positions: Vec<Position>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(price: f64) -> TradeRequest {
        TradeRequest {
            account_id: Uuid::new_v4(),
            symbol: "AAPL".to_string(),
            quantity: 3,
            price,
            order_kind: None,
        }
    }

    #[test]
    fn price_converts_to_micros() {
        let cmd = request(140.25).to_command().unwrap();
        assert_eq!(cmd.price_micros, Micros::new(140_250_000));
        assert_eq!(cmd.kind, OrderKind::Market);
    }

    #[test]
    fn non_finite_price_is_rejected() {
        assert!(request(f64::NAN).to_command().is_err());
        assert!(request(f64::INFINITY).to_command().is_err());
    }

    #[test]
    fn order_kind_round_trips_through_json() {
        let body = r#"{"account_id":"00000000-0000-0000-0000-000000000000",
                       "symbol":"AAPL","quantity":1,"price":10.0,
                       "order_kind":"limit"}"#;
        let req: TradeRequest = serde_json::from_str(body).unwrap();
        assert_eq!(req.order_kind, Some(OrderKind::Limit));
        let cmd = req.to_command().unwrap();
        assert_eq!(cmd.kind, OrderKind::Limit);
    }
}
