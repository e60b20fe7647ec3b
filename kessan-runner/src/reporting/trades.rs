//! Trade tape export (CSV/JSON).

use anyhow::{Context, Result};
use std::path::Path;

use crate::backtest::TradeOutcome;

pub fn write_trades_csv(path: &Path, trades: &[TradeOutcome]) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("Failed to create trades CSV {}", path.display()))?;
    if trades.is_empty() {
        writer.write_record([
            "ticker",
            "date",
            "company_name",
            "entry_date",
            "prev_close",
            "gap_pct",
            "entry_price",
            "target_price",
            "realized_high",
            "win",
            "max_return_pct",
            "basis",
        ])?;
    }
    for trade in trades {
        writer
            .serialize(trade)
            .with_context(|| format!("Failed to write trade {} {}", trade.ticker, trade.date))?;
    }
    writer.flush()?;
    Ok(())
}

pub fn write_trades_json(path: &Path, trades: &[TradeOutcome]) -> Result<()> {
    let json = serde_json::to_string_pretty(trades).context("Failed to serialize trades")?;
    std::fs::write(path, json)
        .with_context(|| format!("Failed to write trades JSON {}", path.display()))?;
    Ok(())
}
