//! Opportunity auditor: find IGNORE decisions whose next session ran up anyway.

use std::path::Path;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use kessan_core::domain::Action;
use kessan_core::{AlignError, LedgerError, LedgerRow, QuoteAligner};

use crate::config::{AuditConfig, ReplayConfig};
use crate::replay::{align_all, load_decisions};

/// Default open-to-high gain (percent) that makes an IGNORE a miss.
pub const DEFAULT_MISSED_THRESHOLD_PCT: f64 = 3.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MissedOpportunity {
    pub ticker: String,
    pub date: NaiveDate,
    pub company_name: Option<String>,
    pub entry_date: NaiveDate,
    pub entry_open: f64,
    pub entry_high: f64,
    pub potential_gain_pct: f64,
    pub confidence: f64,
    pub reasoning: String,
}

impl MissedOpportunity {
    pub fn display_name(&self) -> &str {
        self.company_name.as_deref().unwrap_or(&self.ticker)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuditReport {
    pub missed: Vec<MissedOpportunity>,
    /// Unique IGNORE decisions in the ledger.
    pub ignore_decisions: usize,
    /// IGNORE decisions that could be priced.
    pub evaluated: usize,
    /// IGNORE decisions that could not be priced, fetch errors included.
    pub skipped: usize,
    pub fetch_errors: usize,
    pub duplicates_dropped: usize,
    pub malformed_rows: usize,
    pub threshold_pct: f64,
}

pub struct OpportunityAuditor {
    aligner: QuoteAligner,
    threshold_pct: f64,
    workers: usize,
}

impl OpportunityAuditor {
    pub fn new(aligner: QuoteAligner) -> Self {
        Self {
            aligner,
            threshold_pct: DEFAULT_MISSED_THRESHOLD_PCT,
            workers: 1,
        }
    }

    pub fn from_config(
        aligner: QuoteAligner,
        config: &AuditConfig,
        replay: &ReplayConfig,
    ) -> Self {
        Self {
            aligner: aligner.with_lookahead_days(replay.lookahead_days),
            threshold_pct: config.missed_threshold_pct,
            workers: replay.workers.max(1),
        }
    }

    pub fn with_threshold(mut self, pct: f64) -> Self {
        self.threshold_pct = pct;
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn run(&self, ledger: &Path) -> Result<AuditReport, LedgerError> {
        let set = load_decisions(ledger, Action::Ignore)?;
        let mut report = self.audit(&set.rows);
        report.duplicates_dropped = set.duplicates_dropped;
        report.malformed_rows = set.malformed;
        Ok(report)
    }

    /// Audit already de-duplicated IGNORE rows.
    pub fn audit(&self, rows: &[LedgerRow]) -> AuditReport {
        let mut report = AuditReport {
            ignore_decisions: rows.len(),
            threshold_pct: self.threshold_pct,
            ..AuditReport::default()
        };

        for (row, aligned) in rows.iter().zip(align_all(&self.aligner, rows, self.workers)) {
            let alignment = match aligned {
                Ok(alignment) => alignment,
                Err(e) => {
                    if matches!(e, AlignError::Fetch(_)) {
                        report.fetch_errors += 1;
                    }
                    tracing::debug!(ticker = %row.ticker, date = %row.date, reason = %e, "skipping ignore decision");
                    report.skipped += 1;
                    continue;
                }
            };
            report.evaluated += 1;

            let gain = alignment.open_to_high_pct();
            if gain > self.threshold_pct {
                tracing::info!(ticker = %row.ticker, date = %row.date, gain_pct = gain, "missed opportunity");
                report.missed.push(MissedOpportunity {
                    ticker: row.ticker.clone(),
                    date: row.date,
                    company_name: row.company_name.clone(),
                    entry_date: alignment.entry.date,
                    entry_open: alignment.entry.open,
                    entry_high: alignment.entry.high,
                    potential_gain_pct: gain,
                    confidence: row.confidence,
                    reasoning: row.reasoning.clone(),
                });
            }
        }

        report
    }
}
