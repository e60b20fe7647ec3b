//! Ledger replay helpers shared by the backtest and the auditor.
//!
//! Replay reads the ledger once, collapses duplicate keys to their first
//! occurrence, keeps one action, and aligns every remaining row. Alignment
//! can fan out over a rayon pool; results always come back in ledger order.

use std::path::Path;

use kessan_core::domain::Action;
use kessan_core::{
    dedup_first_occurrence, AlignError, Alignment, DecisionLedger, LedgerError, LedgerRow,
    QuoteAligner,
};

/// Ledger rows selected for replay.
#[derive(Debug, Clone, Default)]
pub struct ReplaySet {
    /// Unique rows with the requested action, in ledger order.
    pub rows: Vec<LedgerRow>,
    /// Later rows for an already-seen (date, ticker) key, across all actions.
    pub duplicates_dropped: usize,
    /// Rows that could not be parsed.
    pub malformed: usize,
}

/// Load `path`, de-duplicate by key, then keep rows with `action`.
///
/// De-duplication runs before the action filter, so a key decided as BUY and
/// later re-decided as IGNORE replays only as BUY.
pub fn load_decisions(path: &Path, action: Action) -> Result<ReplaySet, LedgerError> {
    let contents = DecisionLedger::read_all(path)?;
    let (unique, duplicates_dropped) = dedup_first_occurrence(contents.rows);
    let rows: Vec<LedgerRow> = unique.into_iter().filter(|r| r.action == action).collect();

    tracing::info!(
        ledger = %path.display(),
        %action,
        rows = rows.len(),
        duplicates_dropped,
        malformed = contents.malformed,
        "loaded ledger for replay"
    );

    Ok(ReplaySet {
        rows,
        duplicates_dropped,
        malformed: contents.malformed,
    })
}

/// Align every row to its next trading day, preserving input order.
///
/// `workers > 1` runs alignments on a dedicated rayon pool.
pub fn align_all(
    aligner: &QuoteAligner,
    rows: &[LedgerRow],
    workers: usize,
) -> Vec<Result<Alignment, AlignError>> {
    let align_row = |row: &LedgerRow| aligner.align(&row.ticker, row.date);

    if workers <= 1 || rows.len() <= 1 {
        return rows.iter().map(align_row).collect();
    }

    match rayon::ThreadPoolBuilder::new().num_threads(workers).build() {
        Ok(pool) => pool.install(|| {
            use rayon::prelude::*;
            rows.par_iter().map(align_row).collect()
        }),
        Err(e) => {
            tracing::warn!(error = %e, workers, "failed to build replay pool; aligning sequentially");
            rows.iter().map(align_row).collect()
        }
    }
}
