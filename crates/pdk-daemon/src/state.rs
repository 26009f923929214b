//! Shared daemon state and process wiring helpers.

use std::sync::Arc;

use pdk_schemas::Micros;
use pdk_settlement::SettlementEngine;
use pdk_store::SettlementStore;

/// Env var overriding the cash balance new accounts start with (micros).
pub const ENV_INITIAL_CASH_MICROS: &str = "PDK_INITIAL_CASH_MICROS";

/// Every fresh account starts with 10 000.00 in paper cash.
pub const DEFAULT_INITIAL_CASH: Micros = Micros::from_dollars(10_000);

#[derive(Debug, Clone, Copy)]
pub struct BuildInfo {
    pub service: &'static str,
    pub version: &'static str,
}

pub struct AppState {
    pub engine: Arc<SettlementEngine>,
    pub build: BuildInfo,
    /// Opening balance applied by `POST /v1/accounts`.
    pub initial_cash: Micros,
}

impl AppState {
    pub fn new(store: Arc<dyn SettlementStore>, initial_cash: Micros) -> Self {
        Self {
            engine: Arc::new(SettlementEngine::new(store)),
            build: BuildInfo {
                service: "pdk-daemon",
                version: env!("CARGO_PKG_VERSION"),
            },
            initial_cash,
        }
    }
}

/// Opening balance from [`ENV_INITIAL_CASH_MICROS`], falling back to the
/// 10 000.00 default.  Non-positive overrides are ignored.
pub fn initial_cash_from_env() -> Micros {
    std::env::var(ENV_INITIAL_CASH_MICROS)
        .ok()
        .and_then(|raw| raw.parse::<i64>().ok())
        .map(Micros::new)
        .filter(|m| m.is_positive())
        .unwrap_or(DEFAULT_INITIAL_CASH)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_opening_balance_is_ten_thousand() {
        assert_eq!(DEFAULT_INITIAL_CASH, Micros::new(10_000_000_000));
    }
}
