//! The buy/sell state transitions.  Pure functions: current records in,
//! post-trade records out, inputs untouched on error.

use pdk_schemas::{Account, Micros, Position};

use crate::{validate_request, LedgerError};

/// Result of applying a buy against current state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuyOutcome {
    pub account: Account,
    pub position: Position,
    pub total_cost: Micros,
}

/// Result of applying a sell against current state.
///
/// `position` is `None` when the sell exhausted the holding (the record is
/// to be deleted, not zeroed).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SellOutcome {
    pub account: Account,
    pub position: Option<Position>,
    pub total_proceeds: Micros,
}

/// Apply a buy: validate, debit cash, fold the lot into the weighted-average
/// cost basis.
///
/// New average cost = `(old_qty × old_avg + qty × price) / (old_qty + qty)`,
/// computed in `i128` and truncated toward zero on division.  A first buy of
/// a symbol creates the position at exactly the trade price.
pub fn settle_buy_state(
    account: &Account,
    position: Option<&Position>,
    symbol: &str,
    qty: i64,
    price: Micros,
) -> Result<BuyOutcome, LedgerError> {
    validate_request(symbol, qty, price)?;

    let total_cost = price
        .checked_mul_qty(qty)
        .ok_or(LedgerError::ValueOverflow)?;

    if total_cost > account.cash_micros {
        return Err(LedgerError::InsufficientFunds {
            needed: total_cost,
            available: account.cash_micros,
        });
    }

    let (old_qty, old_avg) = match position {
        Some(p) => {
            debug_assert!(p.qty > 0, "existing position must have qty > 0");
            (p.qty, p.avg_cost_micros)
        }
        None => (0, Micros::ZERO),
    };

    let new_qty = old_qty.checked_add(qty).ok_or(LedgerError::ValueOverflow)?;

    // Widen before multiplying: old_qty × old_avg can exceed i64 even when
    // both operands fit.
    let old_basis = (old_qty as i128) * (old_avg.raw() as i128);
    let new_basis = old_basis + (total_cost.raw() as i128);
    let new_avg = new_basis / (new_qty as i128);
    if new_avg > i64::MAX as i128 {
        return Err(LedgerError::ValueOverflow);
    }

    let account = Account {
        account_id: account.account_id,
        cash_micros: account.cash_micros - total_cost,
        version: account.version,
    };
    let position = Position {
        account_id: account.account_id,
        symbol: symbol.to_string(),
        qty: new_qty,
        avg_cost_micros: Micros::new(new_avg as i64),
    };

    Ok(BuyOutcome {
        account,
        position,
        total_cost,
    })
}

/// Apply a sell: validate, check holdings, credit proceeds, reduce quantity.
///
/// Selling never changes the remaining lot's average cost; selling the full
/// held quantity yields `position: None` (delete the record).  No balance
/// validation is needed — selling only increases cash.
pub fn settle_sell_state(
    account: &Account,
    position: Option<&Position>,
    symbol: &str,
    qty: i64,
    price: Micros,
) -> Result<SellOutcome, LedgerError> {
    validate_request(symbol, qty, price)?;

    let existing = match position {
        Some(p) if p.qty >= qty => p,
        other => {
            return Err(LedgerError::InsufficientHoldings {
                requested: qty,
                held: other.map(|p| p.qty).unwrap_or(0),
            })
        }
    };
    let held = existing.qty;

    let total_proceeds = price
        .checked_mul_qty(qty)
        .ok_or(LedgerError::ValueOverflow)?;

    let account = Account {
        account_id: account.account_id,
        cash_micros: account.cash_micros.saturating_add(total_proceeds),
        version: account.version,
    };

    let remaining = held - qty;
    let position = if remaining == 0 {
        None
    } else {
        Some(Position {
            account_id: account.account_id,
            symbol: symbol.to_string(),
            qty: remaining,
            avg_cost_micros: existing.avg_cost_micros,
        })
    };

    Ok(SellOutcome {
        account,
        position,
        total_proceeds,
    })
}
