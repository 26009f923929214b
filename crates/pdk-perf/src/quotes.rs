//! Quote sources for the performance sweep.
//!
//! [`HttpQuoteProvider`] talks to the quote service over HTTP;
//! [`StaticQuotes`] is the deterministic stand-in used by tests and the
//! DB-less demo mode.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use pdk_schemas::Micros;
use serde::Deserialize;

/// Env var naming the quote service base URL, e.g. `http://127.0.0.1:9100`.
pub const ENV_QUOTE_BASE_URL: &str = "PDK_QUOTE_BASE_URL";

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QuoteError {
    /// The quote source could not be reached or answered non-200.
    Unavailable { reason: String },
    /// The source answered, but not with a usable positive price.
    Malformed { symbol: String, reason: String },
}

impl std::fmt::Display for QuoteError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unavailable { reason } => write!(f, "quote source unavailable: {reason}"),
            Self::Malformed { symbol, reason } => {
                write!(f, "malformed quote for {symbol}: {reason}")
            }
        }
    }
}

impl std::error::Error for QuoteError {}

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// One symbol, one current price.  Implementations must be safe to call
/// concurrently from the sweep.
#[async_trait]
pub trait QuoteProvider: Send + Sync {
    async fn quote(&self, symbol: &str) -> Result<Micros, QuoteError>;
}

// ---------------------------------------------------------------------------
// HTTP implementation
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct QuoteBody {
    price: f64,
}

/// `GET {base}/quote?symbol=AAPL` returning `{"price": 187.23}`.
pub struct HttpQuoteProvider {
    client: reqwest::Client,
    base_url: String,
}

impl HttpQuoteProvider {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }

    /// Read the base URL from [`ENV_QUOTE_BASE_URL`]; `None` when unset.
    pub fn from_env() -> Option<Self> {
        std::env::var(ENV_QUOTE_BASE_URL).ok().map(Self::new)
    }
}

#[async_trait]
impl QuoteProvider for HttpQuoteProvider {
    async fn quote(&self, symbol: &str) -> Result<Micros, QuoteError> {
        let url = format!("{}/quote", self.base_url.trim_end_matches('/'));
        let response = self
            .client
            .get(&url)
            .query(&[("symbol", symbol)])
            .send()
            .await
            .map_err(|e| QuoteError::Unavailable {
                reason: e.to_string(),
            })?;
        if !response.status().is_success() {
            return Err(QuoteError::Unavailable {
                reason: format!("status {}", response.status()),
            });
        }
        let body: QuoteBody = response.json().await.map_err(|e| QuoteError::Malformed {
            symbol: symbol.to_string(),
            reason: e.to_string(),
        })?;
        let price = Micros::from_dollars_f64(body.price).ok_or_else(|| QuoteError::Malformed {
            symbol: symbol.to_string(),
            reason: format!("price {} out of range", body.price),
        })?;
        if !price.is_positive() {
            return Err(QuoteError::Malformed {
                symbol: symbol.to_string(),
                reason: format!("non-positive price {}", body.price),
            });
        }
        Ok(price)
    }
}

// ---------------------------------------------------------------------------
// Static test double
// ---------------------------------------------------------------------------

#[derive(Default)]
struct StaticInner {
    prices: BTreeMap<String, Micros>,
    failing: BTreeSet<String>,
    delay: Option<Duration>,
}

/// Fixed price table with per-symbol failure injection and an optional
/// artificial delay, for exercising sweep isolation and timeouts.
#[derive(Default)]
pub struct StaticQuotes {
    inner: Mutex<StaticInner>,
}

impl StaticQuotes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, symbol: &str, price: Micros) {
        let mut inner = self.inner.lock().expect("quote table poisoned");
        inner.prices.insert(symbol.to_string(), price);
    }

    /// Make `quote(symbol)` fail with `Unavailable` until cleared.
    pub fn fail_symbol(&self, symbol: &str) {
        let mut inner = self.inner.lock().expect("quote table poisoned");
        inner.failing.insert(symbol.to_string());
    }

    /// Delay every quote by `delay` before answering.
    pub fn set_delay(&self, delay: Option<Duration>) {
        let mut inner = self.inner.lock().expect("quote table poisoned");
        inner.delay = delay;
    }
}

#[async_trait]
impl QuoteProvider for StaticQuotes {
    async fn quote(&self, symbol: &str) -> Result<Micros, QuoteError> {
        let (answer, delay) = {
            let inner = self.inner.lock().expect("quote table poisoned");
            let answer = if inner.failing.contains(symbol) {
                Err(QuoteError::Unavailable {
                    reason: format!("injected failure for {symbol}"),
                })
            } else {
                inner
                    .prices
                    .get(symbol)
                    .copied()
                    .ok_or_else(|| QuoteError::Malformed {
                        symbol: symbol.to_string(),
                        reason: "no such symbol".to_string(),
                    })
            };
            (answer, inner.delay)
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        answer
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn static_quotes_answer_and_fail_per_symbol() {
        let quotes = StaticQuotes::new();
        quotes.set("AAPL", Micros::from_dollars(150));
        quotes.fail_symbol("MSFT");

        assert_eq!(quotes.quote("AAPL").await, Ok(Micros::from_dollars(150)));
        assert!(matches!(
            quotes.quote("MSFT").await,
            Err(QuoteError::Unavailable { .. })
        ));
        assert!(matches!(
            quotes.quote("TSLA").await,
            Err(QuoteError::Malformed { .. })
        ));
    }
}
