//! Data provider traits and structured error types.
//!
//! The provider traits abstract over data sources (the J-Quants API, in-memory
//! fixtures) so the pipeline can swap implementations and mock for tests.

use std::collections::HashMap;

use chrono::NaiveDate;
use thiserror::Error;

use crate::domain::{PriceBar, Statement, Ticker};

/// Structured error types for data operations.
#[derive(Debug, Error)]
pub enum DataError {
    #[error("network unreachable: {0}")]
    NetworkUnreachable(String),

    #[error("rate limited by provider (HTTP 429)")]
    RateLimited,

    #[error("response format changed: {0}")]
    ResponseFormatChanged(String),

    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("hard stop: data provider has blocked requests (circuit breaker tripped)")]
    CircuitBreakerTripped,

    #[error("provider returned HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("data error: {0}")]
    Other(String),
}

/// Source of disclosed statements, keyed by disclosure date.
///
/// An empty vector means "no disclosures that day" and is not an error.
pub trait StatementProvider: Send + Sync {
    fn statements(&self, date: NaiveDate) -> Result<Vec<Statement>, DataError>;
}

/// Source of daily price bars.
///
/// Bars are returned in ascending date order over the inclusive range `[from, to]`.
/// Holidays are simply absent.
pub trait PriceProvider: Send + Sync {
    fn daily_bars(
        &self,
        ticker: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<PriceBar>, DataError>;
}

/// Source of company display names.
pub trait ListedInfoProvider: Send + Sync {
    fn listed_names(&self) -> Result<HashMap<Ticker, String>, DataError>;
}
