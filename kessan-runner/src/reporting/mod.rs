//! Report export: trade tapes, missed-opportunity lists and JSON summaries.

mod missed;
mod trades;

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use crate::auditor::AuditReport;
use crate::backtest::BacktestReport;

pub use missed::write_missed_csv;
pub use trades::{write_trades_csv, write_trades_json};

/// Files written for a backtest.
#[derive(Debug, Clone)]
pub struct BacktestArtifacts {
    pub trades_csv: PathBuf,
    pub trades_json: PathBuf,
    pub summary_json: PathBuf,
}

/// Files written for an audit.
#[derive(Debug, Clone)]
pub struct AuditArtifacts {
    pub missed_csv: PathBuf,
    pub summary_json: PathBuf,
}

/// Writes report files under one output directory.
#[derive(Debug, Clone)]
pub struct ArtifactManager {
    output_dir: PathBuf,
}

impl ArtifactManager {
    pub fn new(output_dir: impl AsRef<Path>) -> Result<Self> {
        let output_dir = output_dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&output_dir).with_context(|| {
            format!("Failed to create output directory {}", output_dir.display())
        })?;
        Ok(Self { output_dir })
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn save_backtest(&self, report: &BacktestReport) -> Result<BacktestArtifacts> {
        let trades_csv = self.output_dir.join("trades.csv");
        let trades_json = self.output_dir.join("trades.json");
        let summary_json = self.output_dir.join("backtest_summary.json");

        write_trades_csv(&trades_csv, &report.trades)?;
        write_trades_json(&trades_json, &report.trades)?;
        write_json(&summary_json, &report.summary())?;

        Ok(BacktestArtifacts {
            trades_csv,
            trades_json,
            summary_json,
        })
    }

    pub fn save_audit(&self, report: &AuditReport) -> Result<AuditArtifacts> {
        let missed_csv = self.output_dir.join("missed.csv");
        let summary_json = self.output_dir.join("missed_summary.json");

        write_missed_csv(&missed_csv, &report.missed)?;
        write_json(&summary_json, report)?;

        Ok(AuditArtifacts {
            missed_csv,
            summary_json,
        })
    }
}

fn write_json<T: serde::Serialize>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value).context("Failed to serialize report")?;
    std::fs::write(path, json)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backtest::TradeOutcome;
    use chrono::NaiveDate;
    use kessan_core::AlignmentBasis;

    fn trade() -> TradeOutcome {
        TradeOutcome {
            ticker: "1234".into(),
            date: NaiveDate::from_ymd_opt(2025, 7, 10).unwrap(),
            company_name: Some("Example, Inc.".into()),
            entry_date: NaiveDate::from_ymd_opt(2025, 7, 11).unwrap(),
            prev_close: 1_000.0,
            gap_pct: 1.0,
            entry_price: 1_010.0,
            target_price: 1_020.1,
            realized_high: 1_025.0,
            win: true,
            max_return_pct: 1.485,
            basis: AlignmentBasis::Exact,
        }
    }

    #[test]
    fn save_backtest_writes_all_files() {
        let dir = tempfile::tempdir().unwrap();
        let manager = ArtifactManager::new(dir.path().join("out")).unwrap();
        let report = BacktestReport {
            trades: vec![trade()],
            buy_decisions: 1,
            trade_count: 1,
            win_count: 1,
            take_profit_pct: 1.0,
            ..BacktestReport::default()
        };

        let paths = manager.save_backtest(&report).unwrap();
        let csv_text = std::fs::read_to_string(&paths.trades_csv).unwrap();
        assert!(csv_text.starts_with("ticker,date,company_name,entry_date"));
        assert!(csv_text.contains("\"Example, Inc.\""));

        let summary: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&paths.summary_json).unwrap()).unwrap();
        assert_eq!(summary["trade_count"], 1);
        assert_eq!(summary["win_rate"], 1.0);
        assert!(paths.trades_json.exists());
    }

    #[test]
    fn save_audit_writes_header_even_when_empty() {
        let dir = tempfile::tempdir().unwrap();
        let manager = ArtifactManager::new(dir.path()).unwrap();
        let paths = manager.save_audit(&AuditReport::default()).unwrap();
        let csv_text = std::fs::read_to_string(&paths.missed_csv).unwrap();
        assert_eq!(csv_text.lines().count(), 1);
        assert!(csv_text.starts_with("ticker,date"));
    }
}
