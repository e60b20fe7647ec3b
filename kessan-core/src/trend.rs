//! Short-horizon price trend summary used as evaluator input.
//!
//! Facts only, no verdict: trend direction over the window, average traded
//! value and average daily range over the last five sessions, latest close.

use chrono::{Duration, NaiveDate};

use crate::data::provider::{DataError, PriceProvider};
use crate::domain::PriceBar;

/// Calendar days of history looked at before the base date.
pub const TREND_LOOKBACK_DAYS: i64 = 20;
/// Sessions averaged for value and range.
pub const RECENT_SESSIONS: usize = 5;
/// Whole-window close change (percent) beyond which a trend is called.
pub const TREND_THRESHOLD_PCT: f64 = 5.0;

pub const INSUFFICIENT_TREND_DATA: &str = "Insufficient data (less than 5 days).";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrendDirection {
    Up,
    Down,
    Flat,
}

impl TrendDirection {
    pub fn label(&self) -> &'static str {
        match self {
            TrendDirection::Up => "UPTREND",
            TrendDirection::Down => "DOWNTREND",
            TrendDirection::Flat => "FLAT",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrendSummary {
    pub direction: TrendDirection,
    pub change_pct: f64,
    pub avg_traded_value: f64,
    pub avg_daily_range_pct: f64,
    pub latest_close: f64,
}

impl TrendSummary {
    /// Multi-line rendering stored in the ledger's Technicals column.
    pub fn render(&self) -> String {
        format!(
            "Trend: {} (Change: {:.2}% in {}days)\nAvg Trading Value: {:.0} JPY\nAvg Daily Volatility: {:.2}%\nLatest Close: {:.0}",
            self.direction.label(),
            self.change_pct,
            TREND_LOOKBACK_DAYS,
            self.avg_traded_value,
            self.avg_daily_range_pct,
            self.latest_close,
        )
    }
}

/// Summarize ascending bars. `None` when fewer than five bars are available.
pub fn summarize(bars: &[PriceBar]) -> Option<TrendSummary> {
    if bars.len() < RECENT_SESSIONS {
        return None;
    }
    let first = bars.first()?;
    let latest = bars.last()?;

    let recent = &bars[bars.len() - RECENT_SESSIONS..];
    let avg_traded_value =
        recent.iter().map(PriceBar::traded_value).sum::<f64>() / recent.len() as f64;
    let avg_daily_range_pct = recent
        .iter()
        .map(|b| {
            let base = if b.open > 0.0 { b.open } else { b.close };
            if base > 0.0 {
                (b.high - b.low) / base * 100.0
            } else {
                0.0
            }
        })
        .sum::<f64>()
        / recent.len() as f64;

    let change_pct = if first.close > 0.0 {
        (latest.close - first.close) / first.close * 100.0
    } else {
        0.0
    };
    let direction = if change_pct > TREND_THRESHOLD_PCT {
        TrendDirection::Up
    } else if change_pct < -TREND_THRESHOLD_PCT {
        TrendDirection::Down
    } else {
        TrendDirection::Flat
    };

    Some(TrendSummary {
        direction,
        change_pct,
        avg_traded_value,
        avg_daily_range_pct,
        latest_close: latest.close,
    })
}

/// Fetch the lookback window ending on `base` and render its summary.
pub fn trend_text(
    provider: &dyn PriceProvider,
    ticker: &str,
    base: NaiveDate,
) -> Result<String, DataError> {
    let from = base - Duration::days(TREND_LOOKBACK_DAYS);
    let mut bars = provider.daily_bars(ticker, from, base)?;
    bars.retain(|b| !b.is_void());
    Ok(summarize(&bars)
        .map(|s| s.render())
        .unwrap_or_else(|| INSUFFICIENT_TREND_DATA.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::InMemoryProvider;

    fn bars(closes: &[f64]) -> Vec<PriceBar> {
        let start = NaiveDate::from_ymd_opt(2025, 7, 1).unwrap();
        closes
            .iter()
            .enumerate()
            .map(|(i, &c)| PriceBar {
                ticker: "1234".into(),
                date: start + Duration::days(i as i64),
                open: c,
                high: c * 1.02,
                low: c * 0.98,
                close: c,
                volume: 1_000.0,
            })
            .collect()
    }

    #[test]
    fn fewer_than_five_bars_has_no_summary() {
        assert!(summarize(&bars(&[100.0, 101.0, 102.0, 103.0])).is_none());
    }

    #[test]
    fn rising_closes_are_uptrend() {
        let s = summarize(&bars(&[100.0, 101.0, 103.0, 105.0, 108.0])).unwrap();
        assert_eq!(s.direction, TrendDirection::Up);
        assert!((s.change_pct - 8.0).abs() < 1e-9);
        assert!((s.avg_daily_range_pct - 4.0).abs() < 1e-9);
        assert_eq!(s.latest_close, 108.0);
    }

    #[test]
    fn small_moves_are_flat() {
        let s = summarize(&bars(&[100.0, 99.0, 101.0, 100.5, 102.0])).unwrap();
        assert_eq!(s.direction, TrendDirection::Flat);
    }

    #[test]
    fn render_is_multi_line() {
        let s = summarize(&bars(&[100.0, 95.0, 93.0, 92.0, 90.0])).unwrap();
        let text = s.render();
        assert!(text.starts_with("Trend: DOWNTREND"));
        assert_eq!(text.lines().count(), 4);
    }

    #[test]
    fn trend_text_reports_insufficient_data() {
        let provider = InMemoryProvider::new();
        let text = trend_text(&provider, "1234", NaiveDate::from_ymd_opt(2025, 7, 10).unwrap())
            .unwrap();
        assert_eq!(text, INSUFFICIENT_TREND_DATA);
    }

    #[test]
    fn halted_sessions_are_left_out_of_the_window() {
        let mut window = bars(&[100.0, 101.0, 103.0, 105.0, 108.0]);
        let halted = PriceBar {
            date: window[4].date + Duration::days(1),
            open: f64::NAN,
            high: f64::NAN,
            low: f64::NAN,
            close: f64::NAN,
            volume: 0.0,
            ..window[0].clone()
        };
        window.push(halted);
        let provider = window
            .into_iter()
            .fold(InMemoryProvider::new(), |p, b| p.with_bar(b));

        let text = trend_text(&provider, "1234", NaiveDate::from_ymd_opt(2025, 7, 6).unwrap())
            .unwrap();
        assert!(text.starts_with("Trend: UPTREND (Change: 8.00%"));
        assert!(text.ends_with("Latest Close: 108"));
    }
}
