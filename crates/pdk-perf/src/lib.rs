//! Performance Recompute Scheduler.
//!
//! A fixed-interval sweep that revalues every account from current quotes
//! and persists one [`PerformanceRecord`] per account.  The sweep is
//! best-effort: a failing account is logged and skipped, the rest of the
//! tick continues.  Two gates protect the rest of the system:
//!
//! - **Connectivity gate.** The tick starts with `store.ping()`; if the
//!   store is unreachable the whole tick is abandoned and retried at the
//!   next scheduled fire, never immediately.
//! - **Overlap guard.** If a tick is still running when the timer fires
//!   again, the new tick is skipped with a warning (an atomic running flag,
//!   not a queue).
//!
//! The sweep only ever writes performance rows.  Cash and holdings are
//! settlement-owned and are never touched from here.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use pdk_schemas::{AccountId, Micros, PerformanceRecord};
use pdk_store::{SettlementStore, StoreError};
use tracing::{debug, info, warn};

mod quotes;

pub use quotes::{HttpQuoteProvider, QuoteError, QuoteProvider, StaticQuotes, ENV_QUOTE_BASE_URL};

/// Env var overriding the sweep interval in seconds (default one hour).
pub const ENV_PERF_INTERVAL_SECS: &str = "PDK_PERF_INTERVAL_SECS";

pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(60 * 60);
pub const DEFAULT_QUOTE_TIMEOUT: Duration = Duration::from_secs(10);

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PerfError {
    Quote(QuoteError),
    Store(StoreError),
    /// The account's quote fetches did not finish inside the per-account
    /// budget.
    QuoteTimeout,
    /// qty × price overflowed while revaluing.
    ValueOverflow,
}

impl std::fmt::Display for PerfError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Quote(e) => write!(f, "quote failure: {e}"),
            Self::Store(e) => write!(f, "store failure: {e}"),
            Self::QuoteTimeout => write!(f, "quote fetch timed out"),
            Self::ValueOverflow => write!(f, "market value overflowed"),
        }
    }
}

impl std::error::Error for PerfError {}

impl From<QuoteError> for PerfError {
    fn from(e: QuoteError) -> Self {
        Self::Quote(e)
    }
}

impl From<StoreError> for PerfError {
    fn from(e: StoreError) -> Self {
        Self::Store(e)
    }
}

// ---------------------------------------------------------------------------
// Single-account recompute
// ---------------------------------------------------------------------------

/// Revalue one account from quotes and persist its performance row.
///
/// `daily_change_micros` is the delta of market value against the account's
/// previously persisted record; the first ever record carries zero.
pub async fn recompute_account(
    store: &dyn SettlementStore,
    quotes: &dyn QuoteProvider,
    account_id: AccountId,
) -> Result<PerformanceRecord, PerfError> {
    let positions = store.positions_by_account(account_id).await?;

    let mut market_value = Micros::ZERO;
    let mut cost_basis = Micros::ZERO;
    for position in &positions {
        let price = quotes.quote(&position.symbol).await?;
        let value = price
            .checked_mul_qty(position.qty)
            .ok_or(PerfError::ValueOverflow)?;
        let cost = position
            .avg_cost_micros
            .checked_mul_qty(position.qty)
            .ok_or(PerfError::ValueOverflow)?;
        market_value = market_value.saturating_add(value);
        cost_basis = cost_basis.saturating_add(cost);
    }

    let previous = store.performance(account_id).await?;
    let daily_change = match &previous {
        Some(prior) => market_value - prior.market_value_micros,
        None => Micros::ZERO,
    };

    let record = PerformanceRecord {
        account_id,
        market_value_micros: market_value,
        cost_basis_micros: cost_basis,
        unrealized_pnl_micros: market_value - cost_basis,
        daily_change_micros: daily_change,
        computed_at: Utc::now(),
    };
    store.put_performance(record.clone()).await?;
    debug!(
        %account_id,
        market_value = %record.market_value_micros,
        unrealized = %record.unrealized_pnl_micros,
        "performance recomputed"
    );
    Ok(record)
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

/// What one sweep accomplished.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TickReport {
    pub updated: u32,
    pub failed: u32,
}

pub struct PerformanceScheduler {
    store: Arc<dyn SettlementStore>,
    quotes: Arc<dyn QuoteProvider>,
    /// Budget for all quote fetches of a single account.
    quote_timeout: Duration,
    running: AtomicBool,
}

impl PerformanceScheduler {
    pub fn new(store: Arc<dyn SettlementStore>, quotes: Arc<dyn QuoteProvider>) -> Self {
        Self {
            store,
            quotes,
            quote_timeout: DEFAULT_QUOTE_TIMEOUT,
            running: AtomicBool::new(false),
        }
    }

    pub fn with_quote_timeout(mut self, timeout: Duration) -> Self {
        self.quote_timeout = timeout;
        self
    }

    /// Run one sweep now.  Aborts up front when the store ping fails.
    pub async fn run_tick(&self) -> Result<TickReport, PerfError> {
        if let Err(err) = self.store.ping().await {
            warn!(error = %err, "store unreachable; performance tick aborted");
            return Err(err.into());
        }

        let account_ids = self.store.list_account_ids().await?;
        let mut report = TickReport::default();
        for account_id in account_ids {
            let outcome = tokio::time::timeout(
                self.quote_timeout,
                recompute_account(self.store.as_ref(), self.quotes.as_ref(), account_id),
            )
            .await
            .unwrap_or(Err(PerfError::QuoteTimeout));

            match outcome {
                Ok(_) => report.updated += 1,
                Err(err) => {
                    // One bad account never stops the sweep.
                    warn!(%account_id, error = %err, "performance recompute failed");
                    report.failed += 1;
                }
            }
        }
        info!(
            updated = report.updated,
            failed = report.failed,
            "performance tick complete"
        );
        Ok(report)
    }

    /// Run a sweep unless one is already in flight; the overlapping fire is
    /// skipped, not queued.
    pub async fn try_tick(&self) -> Option<Result<TickReport, PerfError>> {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            warn!("previous performance tick still running; skipping this fire");
            return None;
        }
        let result = self.run_tick().await;
        self.running.store(false, Ordering::SeqCst);
        Some(result)
    }

    /// Spawn the interval loop.  Errors are logged inside `run_tick`; the
    /// loop itself never exits.
    pub fn spawn(self: Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // The first fire is immediate; records exist right after boot.
            loop {
                ticker.tick().await;
                let _ = self.try_tick().await;
            }
        })
    }
}

/// Sweep interval from [`ENV_PERF_INTERVAL_SECS`], falling back to hourly.
pub fn interval_from_env() -> Duration {
    std::env::var(ENV_PERF_INTERVAL_SECS)
        .ok()
        .and_then(|raw| raw.parse::<u64>().ok())
        .filter(|secs| *secs > 0)
        .map(Duration::from_secs)
        .unwrap_or(DEFAULT_INTERVAL)
}
