//! Statement — a disclosed financial summary for one ticker.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Sales / operating-profit pair for a forecast period.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Forecast {
    pub net_sales: Option<f64>,
    pub operating_profit: Option<f64>,
}

/// A disclosed financial statement.
///
/// `operating_profit` is `None` when the filing carries no current-period result
/// (forecast revisions, dividend notices). Such statements are non-events and are
/// never sent to an evaluator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Statement {
    pub ticker: String,
    pub disclosed_date: NaiveDate,
    pub operating_profit: Option<f64>,
    pub current_year: Forecast,
    pub next_year: Forecast,
}

impl Statement {
    /// True if the current-period operating profit has been disclosed.
    pub fn has_result(&self) -> bool {
        self.operating_profit.is_some()
    }

    /// Next-year operating profit growth over the current-year forecast, in percent.
    ///
    /// `None` when either side is missing or the current-year forecast is not positive.
    pub fn guidance_growth_pct(&self) -> Option<f64> {
        let current = self.current_year.operating_profit?;
        let next = self.next_year.operating_profit?;
        if current <= 0.0 {
            return None;
        }
        Some((next - current) / current * 100.0)
    }

    /// Operating margin implied by the current-year forecast, in percent.
    pub fn forecast_margin_pct(&self) -> Option<f64> {
        let sales = self.current_year.net_sales?;
        let profit = self.current_year.operating_profit?;
        if sales <= 0.0 {
            return None;
        }
        Some(profit / sales * 100.0)
    }
}

/// Parse a provider amount string. Blank means "not disclosed".
///
/// Non-numeric text is also treated as not disclosed, logged at debug level.
pub fn parse_amount(raw: &str) -> Option<f64> {
    match try_parse_amount(raw) {
        Ok(value) => value,
        Err(rejected) => {
            tracing::debug!(value = %rejected, "non-numeric amount treated as not disclosed");
            None
        }
    }
}

/// Like [`parse_amount`], but returns the trimmed input when it is neither
/// blank nor a finite number.
pub fn try_parse_amount(raw: &str) -> Result<Option<f64>, &str> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    match trimmed.parse::<f64>() {
        Ok(v) if v.is_finite() => Ok(Some(v)),
        _ => Err(trimmed),
    }
}

/// Render an optional amount for prompts and summaries.
pub fn format_amount(value: Option<f64>) -> String {
    match value {
        Some(v) => format!("{v:.0}"),
        None => "-".to_string(),
    }
}
