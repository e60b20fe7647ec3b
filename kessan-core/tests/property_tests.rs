//! Property tests for replay invariants.
//!
//! Uses proptest to verify:
//! 1. Alignment never picks an entry bar on or before the reference date
//! 2. De-duplication leaves unique (date, ticker) keys and keeps first occurrences
//! 3. Ledger round-trip preserves order and values (line breaks flattened)

use chrono::{Duration, NaiveDate};
use proptest::prelude::*;
use std::collections::HashSet;

use kessan_core::align::{align_bars, AlignError, AlignmentBasis};
use kessan_core::domain::{Action, Decision, PriceBar, Provenance};
use kessan_core::ledger::{dedup_first_occurrence, flatten_line_breaks, DecisionLedger, LedgerRow};

fn base_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 7, 10).unwrap()
}

// ── Strategies (proptest) ────────────────────────────────────────────

fn arb_price() -> impl Strategy<Value = f64> {
    (1.0..5000.0_f64).prop_map(|p| (p * 10.0).round() / 10.0)
}

/// Bars at random day offsets around the reference date, with gaps,
/// duplicates and arbitrary ordering.
fn arb_window() -> impl Strategy<Value = Vec<PriceBar>> {
    prop::collection::vec((-3i64..12, arb_price(), arb_price()), 0..12).prop_map(|items| {
        items
            .into_iter()
            .map(|(offset, open, close)| PriceBar {
                ticker: "1234".into(),
                date: base_date() + Duration::days(offset),
                open,
                high: open.max(close) * 1.01,
                low: open.min(close) * 0.99,
                close,
                volume: 1_000.0,
            })
            .collect()
    })
}

fn row(offset: i64, ticker: usize, action: Action, seq: usize) -> LedgerRow {
    LedgerRow {
        date: base_date() + Duration::days(offset),
        ticker: format!("{}", 1000 + ticker),
        company_name: None,
        action,
        confidence: 0.5,
        reasoning: format!("attempt {seq}"),
        financials: None,
        technicals: None,
        prompt_id: None,
    }
}

fn arb_rows() -> impl Strategy<Value = Vec<LedgerRow>> {
    prop::collection::vec((0i64..4, 0usize..4, any::<bool>()), 0..40).prop_map(|items| {
        items
            .into_iter()
            .enumerate()
            .map(|(seq, (offset, ticker, buy))| {
                let action = if buy { Action::Buy } else { Action::Ignore };
                row(offset, ticker, action, seq)
            })
            .collect()
    })
}

fn arb_decision() -> impl Strategy<Value = Decision> {
    (
        0i64..30,
        "[0-9]{4}",
        any::<bool>(),
        0u32..=100,
        "[a-zA-Z0-9 ,\"\n]{0,40}",
        prop::option::of("[a-zA-Z ]{1,12}"),
        prop::option::of("[a-zA-Z0-9 :%\n]{1,30}"),
    )
        .prop_map(|(offset, ticker, buy, conf, reasoning, name, technicals)| Decision {
            ticker,
            date: base_date() + Duration::days(offset),
            action: if buy { Action::Buy } else { Action::Ignore },
            confidence: f64::from(conf) / 100.0,
            reasoning,
            provenance: Provenance {
                company_name: name,
                financial_summary: None,
                technical_summary: technicals,
                prompt_id: Some("growth-hunter-v2".into()),
            },
        })
}

// ── 1. Alignment never looks backwards ───────────────────────────────

proptest! {
    #[test]
    fn entry_bar_is_strictly_after_reference(bars in arb_window()) {
        let reference = base_date();
        match align_bars("1234", &bars, reference) {
            Ok(alignment) => {
                prop_assert!(alignment.entry.date > reference);
                prop_assert!(alignment.entry.date > alignment.prev.date);
                let has_reference_bar = bars.iter().any(|b| b.date == reference);
                prop_assert_eq!(
                    alignment.basis == AlignmentBasis::Exact,
                    has_reference_bar
                );
            }
            Err(AlignError::InsufficientData { .. }) | Err(AlignError::InvalidPriceData { .. }) => {}
            Err(other) => prop_assert!(false, "unexpected error: {other}"),
        }
    }

    /// With an exact reference bar, the entry is the earliest later trading day.
    #[test]
    fn exact_alignment_picks_next_trading_day(bars in arb_window()) {
        let reference = base_date();
        if let Ok(alignment) = align_bars("1234", &bars, reference) {
            if alignment.basis == AlignmentBasis::Exact {
                let earliest_after = bars
                    .iter()
                    .filter(|b| b.date > reference)
                    .map(|b| b.date)
                    .min()
                    .unwrap();
                prop_assert_eq!(alignment.entry.date, earliest_after);
            }
        }
    }
}

// ── 2. De-duplication ────────────────────────────────────────────────

proptest! {
    #[test]
    fn dedup_yields_unique_keys(rows in arb_rows()) {
        let total = rows.len();
        let distinct: HashSet<_> = rows.iter().map(|r| r.key()).collect();
        let (unique, dropped) = dedup_first_occurrence(rows.clone());

        let keys: HashSet<_> = unique.iter().map(|r| r.key()).collect();
        prop_assert_eq!(keys.len(), unique.len());
        prop_assert_eq!(unique.len(), distinct.len());
        prop_assert_eq!(unique.len() + dropped, total);

        // The kept row is the first one in input order for its key.
        for kept in &unique {
            let first = rows.iter().find(|r| r.key() == kept.key()).unwrap();
            prop_assert_eq!(&first.reasoning, &kept.reasoning);
        }
    }
}

// ── 3. Ledger round-trip ─────────────────────────────────────────────

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn ledger_round_trip_preserves_rows(decisions in prop::collection::vec(arb_decision(), 1..20)) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("results.csv");

        let mut ledger = DecisionLedger::open(&path).unwrap();
        for d in &decisions {
            ledger.append(d).unwrap();
        }
        drop(ledger);

        let contents = DecisionLedger::read_all(&path).unwrap();
        prop_assert_eq!(contents.malformed, 0);
        prop_assert_eq!(contents.rows.len(), decisions.len());

        for (row, d) in contents.rows.iter().zip(&decisions) {
            prop_assert_eq!(row.date, d.date);
            prop_assert_eq!(&row.ticker, &d.ticker);
            prop_assert_eq!(row.action, d.action);
            prop_assert_eq!(row.confidence, d.confidence);
            prop_assert_eq!(&row.reasoning, &flatten_line_breaks(&d.reasoning));
            prop_assert_eq!(
                row.company_name.clone(),
                d.provenance.company_name.as_deref().map(flatten_line_breaks)
            );
            prop_assert_eq!(
                row.technicals.clone(),
                d.provenance.technical_summary.as_deref().map(flatten_line_breaks)
            );
            prop_assert_eq!(row.prompt_id.as_deref(), Some("growth-hunter-v2"));
        }
    }
}
