//! Backtest simulator: replay BUY decisions under a gap-filtered take-profit rule.
//!
//! For each unique BUY row the entry is the next trading day's open. A trade
//! wins if that day's high reaches `entry × (1 + take_profit)`. Trades whose
//! opening gap exceeds the configured threshold are skipped, as are trades the
//! aligner cannot price. Every BUY decision lands in exactly one bucket:
//! traded, skipped for gap, or skipped for data.

use std::path::Path;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use kessan_core::domain::Action;
use kessan_core::{AlignError, AlignmentBasis, LedgerError, LedgerRow, QuoteAligner};

use crate::config::{BacktestConfig, ReplayConfig};
use crate::replay::{align_all, load_decisions};

/// Default take-profit distance above the entry open.
pub const DEFAULT_TAKE_PROFIT_PCT: f64 = 1.0;

/// One simulated trade.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeOutcome {
    pub ticker: String,
    pub date: NaiveDate,
    pub company_name: Option<String>,
    pub entry_date: NaiveDate,
    pub prev_close: f64,
    pub gap_pct: f64,
    pub entry_price: f64,
    pub target_price: f64,
    pub realized_high: f64,
    pub win: bool,
    pub max_return_pct: f64,
    pub basis: AlignmentBasis,
}

/// Aggregate result of one backtest.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BacktestReport {
    pub trades: Vec<TradeOutcome>,
    pub buy_decisions: usize,
    pub trade_count: usize,
    pub win_count: usize,
    pub skipped_for_gap: usize,
    /// Insufficient data, invalid prices, and fetch errors.
    pub skipped_for_data: usize,
    /// The fetch-error share of `skipped_for_data`.
    pub fetch_errors: usize,
    pub proxy_alignments: usize,
    pub duplicates_dropped: usize,
    pub malformed_rows: usize,
    pub take_profit_pct: f64,
    pub gap_threshold_pct: Option<f64>,
}

impl BacktestReport {
    /// `None` when no trade was taken.
    pub fn win_rate(&self) -> Option<f64> {
        (self.trade_count > 0).then(|| self.win_count as f64 / self.trade_count as f64)
    }

    pub fn summary(&self) -> BacktestSummary {
        BacktestSummary {
            buy_decisions: self.buy_decisions,
            trade_count: self.trade_count,
            win_count: self.win_count,
            win_rate: self.win_rate(),
            skipped_for_gap: self.skipped_for_gap,
            skipped_for_data: self.skipped_for_data,
            fetch_errors: self.fetch_errors,
            proxy_alignments: self.proxy_alignments,
            duplicates_dropped: self.duplicates_dropped,
            malformed_rows: self.malformed_rows,
            take_profit_pct: self.take_profit_pct,
            gap_threshold_pct: self.gap_threshold_pct,
        }
    }
}

/// Report without the trade tape, for JSON export.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestSummary {
    pub buy_decisions: usize,
    pub trade_count: usize,
    pub win_count: usize,
    pub win_rate: Option<f64>,
    pub skipped_for_gap: usize,
    pub skipped_for_data: usize,
    pub fetch_errors: usize,
    pub proxy_alignments: usize,
    pub duplicates_dropped: usize,
    pub malformed_rows: usize,
    pub take_profit_pct: f64,
    pub gap_threshold_pct: Option<f64>,
}

pub struct BacktestSimulator {
    aligner: QuoteAligner,
    take_profit_pct: f64,
    gap_threshold_pct: Option<f64>,
    workers: usize,
}

impl BacktestSimulator {
    pub fn new(aligner: QuoteAligner) -> Self {
        Self {
            aligner,
            take_profit_pct: DEFAULT_TAKE_PROFIT_PCT,
            gap_threshold_pct: None,
            workers: 1,
        }
    }

    /// Settings from the `[backtest]` section plus the replay worker count.
    pub fn from_config(
        aligner: QuoteAligner,
        config: &BacktestConfig,
        replay: &ReplayConfig,
    ) -> Self {
        Self {
            aligner: aligner.with_lookahead_days(replay.lookahead_days),
            take_profit_pct: config.take_profit_pct,
            gap_threshold_pct: config.gap_threshold_pct,
            workers: replay.workers.max(1),
        }
    }

    pub fn with_take_profit_pct(mut self, pct: f64) -> Self {
        self.take_profit_pct = pct;
        self
    }

    pub fn with_gap_threshold(mut self, pct: Option<f64>) -> Self {
        self.gap_threshold_pct = pct;
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// Replay the BUY decisions of a ledger file.
    pub fn run(&self, ledger: &Path) -> Result<BacktestReport, LedgerError> {
        let set = load_decisions(ledger, Action::Buy)?;
        let mut report = self.simulate(&set.rows);
        report.duplicates_dropped = set.duplicates_dropped;
        report.malformed_rows = set.malformed;
        Ok(report)
    }

    /// Score already de-duplicated BUY rows.
    pub fn simulate(&self, rows: &[LedgerRow]) -> BacktestReport {
        let mut report = BacktestReport {
            buy_decisions: rows.len(),
            take_profit_pct: self.take_profit_pct,
            gap_threshold_pct: self.gap_threshold_pct,
            ..BacktestReport::default()
        };
        let multiplier = 1.0 + self.take_profit_pct / 100.0;

        let alignments = align_all(&self.aligner, rows, self.workers);
        for (row, aligned) in rows.iter().zip(alignments) {
            let alignment = match aligned {
                Ok(alignment) => alignment,
                Err(e) => {
                    if matches!(e, AlignError::Fetch(_)) {
                        tracing::warn!(ticker = %row.ticker, date = %row.date, error = %e, "price fetch failed; skipping trade");
                        report.fetch_errors += 1;
                    } else {
                        tracing::info!(ticker = %row.ticker, date = %row.date, reason = %e, "cannot evaluate trade; skipping");
                    }
                    report.skipped_for_data += 1;
                    continue;
                }
            };

            let gap_pct = alignment.gap_pct();
            if let Some(threshold) = self.gap_threshold_pct {
                if gap_pct > threshold {
                    tracing::info!(
                        ticker = %row.ticker,
                        date = %row.date,
                        gap_pct,
                        threshold,
                        "gap above threshold; skipping trade"
                    );
                    report.skipped_for_gap += 1;
                    continue;
                }
            }

            let entry_price = alignment.entry.open;
            let target_price = entry_price * multiplier;
            let realized_high = alignment.entry.high;
            let win = realized_high >= target_price;

            report.trade_count += 1;
            if win {
                report.win_count += 1;
            }
            if alignment.basis == AlignmentBasis::Proxy {
                report.proxy_alignments += 1;
            }

            report.trades.push(TradeOutcome {
                ticker: row.ticker.clone(),
                date: row.date,
                company_name: row.company_name.clone(),
                entry_date: alignment.entry.date,
                prev_close: alignment.prev.close,
                gap_pct,
                entry_price,
                target_price,
                realized_high,
                win,
                max_return_pct: alignment.open_to_high_pct(),
                basis: alignment.basis,
            });
        }

        tracing::info!(
            buy_decisions = report.buy_decisions,
            trades = report.trade_count,
            wins = report.win_count,
            skipped_for_gap = report.skipped_for_gap,
            skipped_for_data = report.skipped_for_data,
            "backtest finished"
        );
        report
    }
}
