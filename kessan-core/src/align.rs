//! Quote alignment: map a decision date to the next trading day's bar.
//!
//! The aligner fetches `[reference, reference + lookahead]` and picks two bars:
//! the disclosure-day bar (for the previous close) and the first bar strictly
//! after the reference date (the entry bar). Provider output is sorted and
//! de-duplicated by date first, so ordering and repeated rows never change
//! the answer.
//!
//! When the reference date itself has no bar (a weekend or holiday disclosure),
//! the first available bar stands in as the "previous" bar. That close is not
//! the disclosure-day close, so such alignments are tagged
//! [`AlignmentBasis::Proxy`].

use std::sync::Arc;

use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::data::provider::{DataError, PriceProvider};
use crate::domain::PriceBar;

pub const DEFAULT_LOOKAHEAD_DAYS: u32 = 7;

/// How the previous bar was chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AlignmentBasis {
    /// A bar dated exactly on the reference date was found.
    Exact,
    /// No bar on the reference date; the first bar in the window was used.
    Proxy,
}

/// A (previous, entry) bar pair for one decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alignment {
    pub prev: PriceBar,
    pub entry: PriceBar,
    pub basis: AlignmentBasis,
}

impl Alignment {
    /// Opening gap of the entry bar over the previous close, in percent.
    pub fn gap_pct(&self) -> f64 {
        (self.entry.open - self.prev.close) / self.prev.close * 100.0
    }

    /// Best intraday move from the entry open to the entry high, in percent.
    pub fn open_to_high_pct(&self) -> f64 {
        (self.entry.high - self.entry.open) / self.entry.open * 100.0
    }
}

#[derive(Debug, Error)]
pub enum AlignError {
    #[error("invalid alignment request: {0}")]
    InvalidRequest(String),

    #[error("insufficient data for {ticker} after {reference}: {bars} usable bar(s)")]
    InsufficientData {
        ticker: String,
        reference: NaiveDate,
        bars: usize,
    },

    #[error("invalid price data for {ticker} on {date}: {reason}")]
    InvalidPriceData {
        ticker: String,
        date: NaiveDate,
        reason: String,
    },

    #[error("price fetch failed: {0}")]
    Fetch(#[from] DataError),
}

impl AlignError {
    /// True for the deliberate "cannot evaluate this trade" outcomes.
    pub fn is_unusable_data(&self) -> bool {
        matches!(
            self,
            AlignError::InsufficientData { .. } | AlignError::InvalidPriceData { .. }
        )
    }
}

/// Pick the (previous, entry) pair from a window of bars.
///
/// The entry bar is always dated strictly after `reference`.
pub fn align_bars(
    ticker: &str,
    bars: &[PriceBar],
    reference: NaiveDate,
) -> Result<Alignment, AlignError> {
    let mut sorted: Vec<&PriceBar> = bars.iter().collect();
    // Stable sort, so dedup keeps the first row the provider sent for a date.
    sorted.sort_by_key(|b| b.date);
    sorted.dedup_by_key(|b| b.date);

    let insufficient = || AlignError::InsufficientData {
        ticker: ticker.to_string(),
        reference,
        bars: sorted.len(),
    };

    if sorted.len() < 2 {
        return Err(insufficient());
    }

    let (prev_idx, basis) = match sorted.iter().position(|b| b.date == reference) {
        Some(idx) => (idx, AlignmentBasis::Exact),
        None => (0, AlignmentBasis::Proxy),
    };

    let entry = sorted[prev_idx + 1..]
        .iter()
        .find(|b| b.date > reference)
        .copied()
        .ok_or_else(insufficient)?;
    let prev = sorted[prev_idx];

    if !prev.has_valid_close() {
        return Err(AlignError::InvalidPriceData {
            ticker: ticker.to_string(),
            date: prev.date,
            reason: format!("previous close {} is not positive", prev.close),
        });
    }
    if !entry.has_valid_open() {
        return Err(AlignError::InvalidPriceData {
            ticker: ticker.to_string(),
            date: entry.date,
            reason: format!("entry open {} is not positive", entry.open),
        });
    }

    if basis == AlignmentBasis::Proxy {
        tracing::debug!(
            %ticker,
            %reference,
            proxy_date = %prev.date,
            "no bar on reference date; using first bar in window as previous close"
        );
    }

    Ok(Alignment {
        prev: prev.clone(),
        entry: entry.clone(),
        basis,
    })
}

/// Fetches a lookahead window from a price provider and aligns it.
#[derive(Clone)]
pub struct QuoteAligner {
    provider: Arc<dyn PriceProvider>,
    lookahead_days: u32,
}

impl QuoteAligner {
    pub fn new(provider: Arc<dyn PriceProvider>) -> Self {
        Self {
            provider,
            lookahead_days: DEFAULT_LOOKAHEAD_DAYS,
        }
    }

    pub fn with_lookahead_days(mut self, days: u32) -> Self {
        self.lookahead_days = days.max(1);
        self
    }

    pub fn lookahead_days(&self) -> u32 {
        self.lookahead_days
    }

    /// Align `ticker` to the first trading day after `reference`.
    ///
    /// Fetch errors propagate unchanged; there is no retry at this layer.
    pub fn align(&self, ticker: &str, reference: NaiveDate) -> Result<Alignment, AlignError> {
        if ticker.trim().is_empty() {
            return Err(AlignError::InvalidRequest("empty ticker".into()));
        }
        let to = reference + Duration::days(i64::from(self.lookahead_days));
        let bars = self.provider.daily_bars(ticker, reference, to)?;
        align_bars(ticker, &bars, reference)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::InMemoryProvider;

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn bar(date: &str, open: f64, high: f64, close: f64) -> PriceBar {
        PriceBar {
            ticker: "1234".into(),
            date: d(date),
            open,
            high,
            low: open.min(close),
            close,
            volume: 1_000.0,
        }
    }

    #[test]
    fn exact_reference_bar_then_next_day() {
        let bars = vec![
            bar("2025-07-10", 995.0, 1002.0, 1000.0),
            bar("2025-07-11", 1010.0, 1025.0, 1015.0),
            bar("2025-07-14", 1016.0, 1020.0, 1018.0),
        ];
        let a = align_bars("1234", &bars, d("2025-07-10")).unwrap();
        assert_eq!(a.basis, AlignmentBasis::Exact);
        assert_eq!(a.prev.date, d("2025-07-10"));
        assert_eq!(a.entry.date, d("2025-07-11"));
        assert!((a.gap_pct() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn unordered_and_duplicated_input_is_normalized() {
        let bars = vec![
            bar("2025-07-14", 1016.0, 1020.0, 1018.0),
            bar("2025-07-11", 1010.0, 1025.0, 1015.0),
            bar("2025-07-10", 995.0, 1002.0, 1000.0),
            bar("2025-07-11", 1.0, 1.0, 1.0),
        ];
        let a = align_bars("1234", &bars, d("2025-07-10")).unwrap();
        assert_eq!(a.entry.date, d("2025-07-11"));
        assert_eq!(a.entry.open, 1010.0);
    }

    #[test]
    fn weekend_reference_uses_proxy_previous_bar() {
        // Saturday disclosure: window starts on the weekend.
        let bars = vec![
            bar("2025-07-14", 1000.0, 1010.0, 1005.0),
            bar("2025-07-15", 1008.0, 1030.0, 1020.0),
        ];
        let a = align_bars("1234", &bars, d("2025-07-12")).unwrap();
        assert_eq!(a.basis, AlignmentBasis::Proxy);
        assert_eq!(a.prev.date, d("2025-07-14"));
        assert_eq!(a.entry.date, d("2025-07-15"));
    }

    #[test]
    fn fewer_than_two_bars_is_insufficient() {
        let bars = vec![bar("2025-07-10", 995.0, 1002.0, 1000.0)];
        let err = align_bars("1234", &bars, d("2025-07-10")).unwrap_err();
        assert!(err.is_unusable_data());
        assert!(matches!(err, AlignError::InsufficientData { bars: 1, .. }));
    }

    #[test]
    fn reference_bar_last_in_window_is_insufficient() {
        let bars = vec![
            bar("2025-07-09", 990.0, 1000.0, 995.0),
            bar("2025-07-10", 995.0, 1002.0, 1000.0),
        ];
        let err = align_bars("1234", &bars, d("2025-07-10")).unwrap_err();
        assert!(matches!(err, AlignError::InsufficientData { .. }));
    }

    #[test]
    fn non_positive_prices_are_invalid() {
        let zero_close = vec![
            bar("2025-07-10", 995.0, 1002.0, 0.0),
            bar("2025-07-11", 1010.0, 1025.0, 1015.0),
        ];
        assert!(matches!(
            align_bars("1234", &zero_close, d("2025-07-10")),
            Err(AlignError::InvalidPriceData { .. })
        ));

        let zero_open = vec![
            bar("2025-07-10", 995.0, 1002.0, 1000.0),
            bar("2025-07-11", 0.0, 1025.0, 1015.0),
        ];
        assert!(matches!(
            align_bars("1234", &zero_open, d("2025-07-10")),
            Err(AlignError::InvalidPriceData { .. })
        ));
    }

    #[test]
    fn aligner_fetches_lookahead_window() {
        let provider = InMemoryProvider::new()
            .with_bar(bar("2025-07-10", 995.0, 1002.0, 1000.0))
            .with_bar(bar("2025-07-11", 1010.0, 1025.0, 1015.0))
            .with_bar(bar("2025-07-18", 1.0, 1.0, 1.0));
        let aligner = QuoteAligner::new(Arc::new(provider)).with_lookahead_days(3);
        let a = aligner.align("1234", d("2025-07-10")).unwrap();
        assert_eq!(a.entry.date, d("2025-07-11"));
    }

    #[test]
    fn empty_ticker_is_rejected() {
        let aligner = QuoteAligner::new(Arc::new(InMemoryProvider::new()));
        assert!(matches!(
            aligner.align("  ", d("2025-07-10")),
            Err(AlignError::InvalidRequest(_))
        ));
    }

    #[test]
    fn fetch_errors_propagate() {
        let provider = InMemoryProvider::new().failing_ticker("1234");
        let aligner = QuoteAligner::new(Arc::new(provider));
        let err = aligner.align("1234", d("2025-07-10")).unwrap_err();
        assert!(matches!(err, AlignError::Fetch(_)));
        assert!(!err.is_unusable_data());
    }
}
