//! Integration tests for the evaluation orchestrator.
//!
//! Scripted evaluators and in-memory providers stand in for the network;
//! a recording sleeper captures the backoff schedule without waiting.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::NaiveDate;
use kessan_core::data::InMemoryProvider;
use kessan_core::domain::{Action, Forecast, Statement};
use kessan_core::DecisionLedger;
use kessan_runner::{
    CancelToken, EvalError, Evaluation, Evaluator, Orchestrator, Outcome, PipelineContext,
    RecordingSleeper,
};

fn d(s: &str) -> NaiveDate {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
}

fn statement(ticker: &str, date: &str, op: Option<f64>) -> Statement {
    Statement {
        ticker: ticker.into(),
        disclosed_date: d(date),
        operating_profit: op,
        current_year: Forecast {
            net_sales: Some(10_000.0),
            operating_profit: Some(1_000.0),
        },
        next_year: Forecast {
            net_sales: Some(11_000.0),
            operating_profit: Some(1_200.0),
        },
    }
}

fn buy() -> Evaluation {
    Evaluation {
        action: Action::Buy,
        confidence: 0.85,
        reasoning: "strong guidance".into(),
        financial_summary: Some("OP up".into()),
        technical_summary: Some("Trend: UPTREND\nLatest Close: 1000".into()),
        prompt_id: Some("test-v1".into()),
    }
}

/// Returns scripted results in order; repeats the last one when exhausted.
struct Scripted {
    script: Mutex<Vec<Result<Evaluation, EvalError>>>,
    calls: Arc<AtomicUsize>,
    cancel_after_call: Option<CancelToken>,
}

impl Scripted {
    fn new(script: Vec<Result<Evaluation, EvalError>>) -> (Self, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        (
            Self {
                script: Mutex::new(script),
                calls: Arc::clone(&calls),
                cancel_after_call: None,
            },
            calls,
        )
    }

    fn failing_then_buy(failures: usize) -> (Self, Arc<AtomicUsize>) {
        let mut script: Vec<Result<Evaluation, EvalError>> = (0..failures)
            .map(|_| Err(EvalError::Transport("connection reset".into())))
            .collect();
        script.push(Ok(buy()));
        Self::new(script)
    }

    fn always_failing() -> (Self, Arc<AtomicUsize>) {
        Self::new(vec![Err(EvalError::Overloaded { status: 503 })])
    }
}

fn clone_result(r: &Result<Evaluation, EvalError>) -> Result<Evaluation, EvalError> {
    match r {
        Ok(e) => Ok(e.clone()),
        Err(e) => Err(EvalError::Transport(e.to_string())),
    }
}

impl Evaluator for Scripted {
    fn name(&self) -> &str {
        "scripted"
    }

    fn evaluate(&self, _statement: &Statement) -> Result<Evaluation, EvalError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let result = {
            let mut script = self.script.lock().unwrap();
            if script.len() > 1 {
                script.remove(0)
            } else {
                clone_result(&script[0])
            }
        };
        if let Some(cancel) = &self.cancel_after_call {
            cancel.cancel();
        }
        result
    }
}

struct Harness {
    orchestrator: Orchestrator,
    sleeper: Arc<RecordingSleeper>,
    ledger_path: std::path::PathBuf,
    _dir: tempfile::TempDir,
}

fn harness(provider: InMemoryProvider, evaluator: Scripted, with_names: bool) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let ledger_path = dir.path().join("results.csv");
    let sleeper = Arc::new(RecordingSleeper::new());
    let provider = Arc::new(provider);

    let mut ctx = PipelineContext::new(
        provider.clone(),
        Box::new(evaluator),
        DecisionLedger::open(&ledger_path).unwrap(),
    )
    .with_sleeper(sleeper.clone());
    if with_names {
        ctx = ctx.with_names(provider);
    }

    Harness {
        orchestrator: Orchestrator::new(ctx),
        sleeper,
        ledger_path,
        _dir: dir,
    }
}

#[test]
fn always_failing_statement_uses_exact_retry_budget() {
    let (evaluator, calls) = Scripted::always_failing();
    let mut h = harness(InMemoryProvider::new(), evaluator, false);

    let outcome = h
        .orchestrator
        .process(&statement("1234", "2025-07-10", Some(900.0)))
        .unwrap();

    assert!(matches!(outcome, Outcome::Failed { attempts: 5, .. }));
    assert_eq!(calls.load(Ordering::SeqCst), 5);
    assert_eq!(
        h.sleeper.delays(),
        vec![
            Duration::from_secs(2),
            Duration::from_secs(4),
            Duration::from_secs(6),
            Duration::from_secs(8),
        ]
    );
    assert_eq!(h.orchestrator.stats().failed, 1);

    let contents = DecisionLedger::read_all(&h.ledger_path).unwrap();
    assert!(contents.rows.is_empty());
}

#[test]
fn success_on_attempt_k_uses_k_calls() {
    for k in 1..=5usize {
        let (evaluator, calls) = Scripted::failing_then_buy(k - 1);
        let mut h = harness(InMemoryProvider::new(), evaluator, false);

        let outcome = h
            .orchestrator
            .process(&statement("1234", "2025-07-10", Some(900.0)))
            .unwrap();

        assert!(matches!(outcome, Outcome::Decided(_)), "k = {k}");
        assert_eq!(calls.load(Ordering::SeqCst), k, "k = {k}");
        assert_eq!(h.sleeper.delays().len(), k - 1, "k = {k}");
        assert_eq!(h.orchestrator.stats().evaluator_calls, k);
    }
}

#[test]
fn malformed_confidence_is_a_failed_attempt() {
    let mut bad = buy();
    bad.confidence = 1.5;
    let (evaluator, calls) = Scripted::new(vec![Ok(bad), Ok(buy())]);
    let mut h = harness(InMemoryProvider::new(), evaluator, false);

    let outcome = h
        .orchestrator
        .process(&statement("1234", "2025-07-10", Some(900.0)))
        .unwrap();

    match outcome {
        Outcome::Decided(decision) => assert_eq!(decision.confidence, 0.85),
        other => panic!("unexpected outcome {other:?}"),
    }
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(h.sleeper.delays(), vec![Duration::from_secs(2)]);
}

#[test]
fn run_range_fills_ledger_and_skips_failed_dates() {
    let provider = InMemoryProvider::new()
        .with_statement(statement("1234", "2025-07-10", Some(900.0)))
        .with_statement(statement("2222", "2025-07-10", None))
        .with_statement(statement("5678", "2025-07-12", Some(50.0)))
        .with_statement(statement("9999", "2025-07-11", Some(10.0)))
        .failing_date(d("2025-07-11"))
        .with_name("1234", "Example Holdings");
    let (evaluator, calls) = Scripted::new(vec![Ok(buy())]);
    let mut h = harness(provider, evaluator, true);

    let stats = h
        .orchestrator
        .run_range(d("2025-07-10"), d("2025-07-12"))
        .unwrap();

    assert_eq!(stats.statements_seen, 3);
    assert_eq!(stats.filtered, 1);
    assert_eq!(stats.decided, 2);
    assert_eq!(stats.failed, 0);
    assert_eq!(stats.dates_processed, 2);
    assert_eq!(stats.dates_skipped, 1);
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    let rows = DecisionLedger::read_all(&h.ledger_path).unwrap().rows;
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].ticker, "1234");
    assert_eq!(rows[0].company_name.as_deref(), Some("Example Holdings"));
    assert_eq!(
        rows[0].technicals.as_deref(),
        Some("Trend: UPTREND | Latest Close: 1000")
    );
    assert_eq!(rows[1].ticker, "5678");
    assert_eq!(rows[1].company_name.as_deref(), Some("Unknown"));
    assert_eq!(rows[1].date, d("2025-07-12"));
}

#[test]
fn cancellation_finishes_the_in_flight_decision_and_stops() {
    let provider = InMemoryProvider::new()
        .with_statement(statement("1234", "2025-07-10", Some(900.0)))
        .with_statement(statement("5678", "2025-07-10", Some(900.0)))
        .with_statement(statement("9012", "2025-07-11", Some(900.0)));

    let cancel = CancelToken::new();
    let (mut evaluator, calls) = Scripted::new(vec![Ok(buy())]);
    evaluator.cancel_after_call = Some(cancel.clone());

    let dir = tempfile::tempdir().unwrap();
    let ledger_path = dir.path().join("results.csv");
    let ctx = PipelineContext::new(
        Arc::new(provider),
        Box::new(evaluator),
        DecisionLedger::open(&ledger_path).unwrap(),
    )
    .with_cancel(cancel)
    .with_sleeper(Arc::new(RecordingSleeper::new()));
    let mut orchestrator = Orchestrator::new(ctx);

    let stats = orchestrator
        .run_range(d("2025-07-10"), d("2025-07-11"))
        .unwrap();

    assert!(stats.cancelled);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(stats.decided, 1);

    let rows = DecisionLedger::read_all(&ledger_path).unwrap().rows;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].ticker, "1234");
}

#[test]
fn rerunning_a_date_appends_duplicates_for_replay_to_collapse() {
    let provider =
        InMemoryProvider::new().with_statement(statement("1234", "2025-07-10", Some(900.0)));
    let (evaluator, _) = Scripted::new(vec![Ok(buy())]);
    let mut h = harness(provider, evaluator, false);

    h.orchestrator.run_date(d("2025-07-10")).unwrap();
    h.orchestrator.run_date(d("2025-07-10")).unwrap();

    let rows = DecisionLedger::read_all(&h.ledger_path).unwrap().rows;
    assert_eq!(rows.len(), 2);
    let (unique, dropped) = kessan_core::dedup_first_occurrence(rows);
    assert_eq!(unique.len(), 1);
    assert_eq!(dropped, 1);
}

#[cfg(target_os = "linux")]
#[test]
fn ledger_write_failure_stops_the_run() {
    use kessan_core::LedgerError;
    use kessan_runner::RunError;

    let provider = Arc::new(
        InMemoryProvider::new()
            .with_statement(statement("1234", "2025-07-10", Some(900.0)))
            .with_statement(statement("5678", "2025-07-10", Some(900.0)))
            .with_statement(statement("9012", "2025-07-11", Some(900.0))),
    );
    let (evaluator, calls) = Scripted::new(vec![Ok(buy())]);
    let ctx = PipelineContext::new(
        provider,
        Box::new(evaluator),
        DecisionLedger::open("/dev/full").unwrap(),
    )
    .with_sleeper(Arc::new(RecordingSleeper::new()));
    let mut orchestrator = Orchestrator::new(ctx);

    let err = orchestrator
        .run_range(d("2025-07-10"), d("2025-07-11"))
        .unwrap_err();

    assert!(matches!(err, RunError::Ledger(LedgerError::Io { .. })));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(orchestrator.stats().decided, 0);
    assert_eq!(orchestrator.stats().statements_seen, 1);
}
