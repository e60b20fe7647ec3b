//! PriceBar — one trading day of OHLCV for one ticker.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Daily OHLCV bar for a single ticker on a single trading date.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceBar {
    pub ticker: String,
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl PriceBar {
    /// Returns true if any price field is NaN (provider sent a null).
    pub fn is_void(&self) -> bool {
        self.open.is_nan() || self.high.is_nan() || self.low.is_nan() || self.close.is_nan()
    }

    /// True when the open is usable as an entry price.
    pub fn has_valid_open(&self) -> bool {
        self.open.is_finite() && self.open > 0.0
    }

    /// True when the close is usable as a reference price.
    pub fn has_valid_close(&self) -> bool {
        self.close.is_finite() && self.close > 0.0
    }

    /// Traded value for the day (close × volume).
    pub fn traded_value(&self) -> f64 {
        self.close * self.volume
    }
}
