//! Pure settlement arithmetic — makes the average-cost and cash rules
//! explicit and isolated.
//!
//! # Purpose
//! This crate owns the invariant-checking boundary for balances and
//! positions.  [`settle_buy_state`] and [`settle_sell_state`] take the
//! current account/position records and return the post-trade records, or an
//! error.  Inputs are **never** mutated on error, so a caller that fails a
//! validation holds exactly its pre-trade state.
//!
//! # Accounting rule
//! Average-cost basis: every buy lot is folded into one running weighted
//! mean (`(old_qty × old_avg + qty × price) / (old_qty + qty)`).  Sells
//! reduce quantity and never change the remaining lot's average cost; a sell
//! that exhausts the holding deletes the position rather than leaving a zero
//! row.  There is no FIFO/LIFO lot tracking — one fixed-size record per
//! account×symbol.
//!
//! # Determinism
//! No IO, no time, no randomness.  All arithmetic widens to `i128` before
//! multiplying quantity by price so `i64` money cannot silently wrap.

use pdk_schemas::{Account, AccountId, Micros, Position};

mod accounting;

pub use accounting::{settle_buy_state, settle_sell_state, BuyOutcome, SellOutcome};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// All invariant and business-rule violations the ledger arithmetic can
/// surface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// Requested quantity must be strictly positive.
    NonPositiveQty { qty: i64 },
    /// Requested price must be strictly positive.
    NonPositivePrice { price_micros: i64 },
    /// Symbol must be non-empty (after trimming).
    EmptySymbol,
    /// qty × price overflowed the money range.
    ValueOverflow,
    /// Buy cost exceeds the account's cash balance.
    InsufficientFunds { needed: Micros, available: Micros },
    /// Sell quantity exceeds the held quantity (or nothing is held).
    InsufficientHoldings { requested: i64, held: i64 },
}

impl std::fmt::Display for LedgerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NonPositiveQty { qty } => {
                write!(f, "ledger invariant: qty must be > 0, got {qty}")
            }
            Self::NonPositivePrice { price_micros } => {
                write!(
                    f,
                    "ledger invariant: price_micros must be > 0, got {price_micros}"
                )
            }
            Self::EmptySymbol => write!(f, "ledger invariant: symbol must not be empty"),
            Self::ValueOverflow => write!(f, "ledger invariant: qty × price overflowed"),
            Self::InsufficientFunds { needed, available } => write!(
                f,
                "insufficient funds: need {needed}, available {available}"
            ),
            Self::InsufficientHoldings { requested, held } => write!(
                f,
                "insufficient holdings: requested {requested}, held {held}"
            ),
        }
    }
}

impl std::error::Error for LedgerError {}

impl LedgerError {
    /// `true` for malformed-input violations (as opposed to funds/holdings
    /// business rules).  Callers use this to pick the right error taxonomy
    /// bucket.
    pub fn is_invalid_input(&self) -> bool {
        matches!(
            self,
            Self::NonPositiveQty { .. }
                | Self::NonPositivePrice { .. }
                | Self::EmptySymbol
                | Self::ValueOverflow
        )
    }
}

// ---------------------------------------------------------------------------
// Shared validation
// ---------------------------------------------------------------------------

/// Validate the raw request triple shared by buys and sells.  Callers at the
/// engine boundary run this before staging any order record.
pub fn validate_request(symbol: &str, qty: i64, price: Micros) -> Result<(), LedgerError> {
    if symbol.trim().is_empty() {
        return Err(LedgerError::EmptySymbol);
    }
    if qty <= 0 {
        return Err(LedgerError::NonPositiveQty { qty });
    }
    if !price.is_positive() {
        return Err(LedgerError::NonPositivePrice {
            price_micros: price.raw(),
        });
    }
    Ok(())
}

/// Convenience for tests across the workspace: a fresh account with the
/// given whole-dollar balance and version 0.
pub fn seed_account(account_id: AccountId, dollars: i64) -> Account {
    Account {
        account_id,
        cash_micros: Micros::from_dollars(dollars),
        version: 0,
    }
}

/// Post-settlement invariant check: balance non-negative and, when a
/// position survives, strictly positive quantity with non-negative cost.
/// The engine runs this on every computed post-trade state before handing
/// it to the store.
pub fn check_invariants(account: &Account, position: Option<&Position>) -> Result<(), LedgerError> {
    if account.cash_micros.is_negative() {
        return Err(LedgerError::InsufficientFunds {
            needed: Micros::ZERO,
            available: account.cash_micros,
        });
    }
    if let Some(p) = position {
        if p.qty <= 0 {
            return Err(LedgerError::NonPositiveQty { qty: p.qty });
        }
        if p.avg_cost_micros.is_negative() {
            return Err(LedgerError::NonPositivePrice {
                price_micros: p.avg_cost_micros.raw(),
            });
        }
    }
    Ok(())
}
