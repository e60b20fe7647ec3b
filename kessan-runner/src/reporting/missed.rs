//! Missed-opportunity export.

use anyhow::{Context, Result};
use std::path::Path;

use crate::auditor::MissedOpportunity;

pub fn write_missed_csv(path: &Path, missed: &[MissedOpportunity]) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("Failed to create missed CSV {}", path.display()))?;
    if missed.is_empty() {
        writer.write_record([
            "ticker",
            "date",
            "company_name",
            "entry_date",
            "entry_open",
            "entry_high",
            "potential_gain_pct",
            "confidence",
            "reasoning",
        ])?;
    }
    for m in missed {
        writer
            .serialize(m)
            .with_context(|| format!("Failed to write missed row {} {}", m.ticker, m.date))?;
    }
    writer.flush()?;
    Ok(())
}
