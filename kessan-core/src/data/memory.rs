//! In-memory provider for fixtures, offline replay and tests.
//!
//! Bars can be loaded from a CSV file with the columns
//! `ticker,date,open,high,low,close,volume`.

use super::provider::{DataError, ListedInfoProvider, PriceProvider, StatementProvider};
use crate::domain::{PriceBar, Statement, Ticker};
use chrono::NaiveDate;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};

#[derive(Debug, Deserialize)]
struct BarRow {
    ticker: String,
    date: NaiveDate,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    #[serde(default)]
    volume: f64,
}

/// Provider backed by plain collections.
#[derive(Debug, Default)]
pub struct InMemoryProvider {
    bars: HashMap<Ticker, Vec<PriceBar>>,
    statements: BTreeMap<NaiveDate, Vec<Statement>>,
    names: HashMap<Ticker, String>,
    failing_tickers: HashSet<Ticker>,
    failing_dates: HashSet<NaiveDate>,
    bar_requests: AtomicUsize,
}

impl InMemoryProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_bar(mut self, bar: PriceBar) -> Self {
        self.push_bar(bar);
        self
    }

    pub fn with_statement(mut self, statement: Statement) -> Self {
        self.statements
            .entry(statement.disclosed_date)
            .or_default()
            .push(statement);
        self
    }

    pub fn with_name(mut self, ticker: &str, name: &str) -> Self {
        self.names.insert(ticker.to_string(), name.to_string());
        self
    }

    /// Every bar request for this ticker fails with a network error.
    pub fn failing_ticker(mut self, ticker: &str) -> Self {
        self.failing_tickers.insert(ticker.to_string());
        self
    }

    /// Every statement request for this date fails with a network error.
    pub fn failing_date(mut self, date: NaiveDate) -> Self {
        self.failing_dates.insert(date);
        self
    }

    pub fn push_bar(&mut self, bar: PriceBar) {
        self.bars.entry(bar.ticker.clone()).or_default().push(bar);
    }

    /// Number of `daily_bars` calls served so far.
    pub fn bar_requests(&self) -> usize {
        self.bar_requests.load(Ordering::SeqCst)
    }

    /// Load bars from a CSV file.
    pub fn from_bars_csv(path: &Path) -> Result<Self, DataError> {
        let mut reader = csv::Reader::from_path(path)
            .map_err(|e| DataError::Other(format!("cannot open {}: {e}", path.display())))?;
        let mut provider = Self::new();
        for (line, row) in reader.deserialize::<BarRow>().enumerate() {
            let row = row.map_err(|e| {
                DataError::ResponseFormatChanged(format!(
                    "{} row {}: {e}",
                    path.display(),
                    line + 2
                ))
            })?;
            provider.push_bar(PriceBar {
                ticker: row.ticker,
                date: row.date,
                open: row.open,
                high: row.high,
                low: row.low,
                close: row.close,
                volume: row.volume,
            });
        }
        Ok(provider)
    }
}

impl PriceProvider for InMemoryProvider {
    fn daily_bars(
        &self,
        ticker: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<PriceBar>, DataError> {
        self.bar_requests.fetch_add(1, Ordering::SeqCst);
        if self.failing_tickers.contains(ticker) {
            return Err(DataError::NetworkUnreachable(format!(
                "simulated outage for {ticker}"
            )));
        }
        let mut bars: Vec<PriceBar> = self
            .bars
            .get(ticker)
            .map(|bars| {
                bars.iter()
                    .filter(|b| b.date >= from && b.date <= to)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        bars.sort_by_key(|b| b.date);
        Ok(bars)
    }
}

impl StatementProvider for InMemoryProvider {
    fn statements(&self, date: NaiveDate) -> Result<Vec<Statement>, DataError> {
        if self.failing_dates.contains(&date) {
            return Err(DataError::NetworkUnreachable(format!(
                "simulated outage for {date}"
            )));
        }
        Ok(self.statements.get(&date).cloned().unwrap_or_default())
    }
}

impl ListedInfoProvider for InMemoryProvider {
    fn listed_names(&self) -> Result<HashMap<Ticker, String>, DataError> {
        Ok(self.names.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn bar(ticker: &str, date: &str, close: f64) -> PriceBar {
        PriceBar {
            ticker: ticker.into(),
            date: d(date),
            open: close,
            high: close,
            low: close,
            close,
            volume: 100.0,
        }
    }

    #[test]
    fn daily_bars_filters_inclusive_range_and_sorts() {
        let provider = InMemoryProvider::new()
            .with_bar(bar("1234", "2025-07-14", 3.0))
            .with_bar(bar("1234", "2025-07-10", 1.0))
            .with_bar(bar("1234", "2025-07-11", 2.0))
            .with_bar(bar("1234", "2025-07-20", 9.0));

        let bars = provider
            .daily_bars("1234", d("2025-07-10"), d("2025-07-17"))
            .unwrap();
        let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
        assert_eq!(closes, vec![1.0, 2.0, 3.0]);
        assert_eq!(provider.bar_requests(), 1);
    }

    #[test]
    fn unknown_ticker_yields_empty() {
        let provider = InMemoryProvider::new();
        assert!(provider
            .daily_bars("0000", d("2025-07-10"), d("2025-07-17"))
            .unwrap()
            .is_empty());
    }

    #[test]
    fn failing_ticker_errors() {
        let provider = InMemoryProvider::new().failing_ticker("1234");
        assert!(provider
            .daily_bars("1234", d("2025-07-10"), d("2025-07-17"))
            .is_err());
    }

    #[test]
    fn loads_bars_from_csv() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "ticker,date,open,high,low,close,volume").unwrap();
        writeln!(file, "1234,2025-07-10,990,1005,985,1000,5000").unwrap();
        writeln!(file, "1234,2025-07-11,1010,1025,1008,1015,7000").unwrap();
        file.flush().unwrap();

        let provider = InMemoryProvider::from_bars_csv(file.path()).unwrap();
        let bars = provider
            .daily_bars("1234", d("2025-07-10"), d("2025-07-17"))
            .unwrap();
        assert_eq!(bars.len(), 2);
        assert_eq!(bars[1].high, 1025.0);
    }
}
