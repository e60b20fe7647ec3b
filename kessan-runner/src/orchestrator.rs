//! Evaluation orchestrator: statements in, ledger rows out.
//!
//! Sequential by construction. One statement at a time goes through the
//! evaluator with bounded retry, and every successful decision is appended to
//! the ledger before the next statement starts. Backoff is local to a single
//! [`Orchestrator::process`] call.

use std::collections::HashMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use kessan_core::domain::{Decision, Provenance, Statement, Ticker};
use kessan_core::LedgerError;

use crate::context::PipelineContext;
use crate::evaluator::{EvalError, Evaluation};
use crate::retry::Throttle;

/// Display name used when the listed-info lookup has no entry.
pub const UNKNOWN_COMPANY: &str = "Unknown";

/// Errors that abort a run.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("ledger write failed: {0}")]
    Ledger(#[from] LedgerError),

    #[error("invalid date range: {end} is before {start}")]
    InvalidRange { start: NaiveDate, end: NaiveDate },
}

/// What happened to one statement.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// Evaluated and appended to the ledger.
    Decided(Decision),
    /// Blank current-period profit; never sent to the evaluator.
    Filtered,
    /// Every attempt failed. Nothing was written.
    Failed { attempts: u32, last_error: String },
    /// The run was cancelled before a decision was obtained.
    Cancelled,
}

/// Counters for one run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunStats {
    pub statements_seen: usize,
    pub filtered: usize,
    pub decided: usize,
    pub failed: usize,
    pub evaluator_calls: usize,
    pub dates_processed: usize,
    pub dates_skipped: usize,
    pub cancelled: bool,
}

pub struct Orchestrator {
    ctx: PipelineContext,
    throttle: Throttle,
    names: Option<HashMap<Ticker, String>>,
    stats: RunStats,
}

impl Orchestrator {
    pub fn new(ctx: PipelineContext) -> Self {
        let throttle = Throttle::new(ctx.min_call_interval);
        Self {
            ctx,
            throttle,
            names: None,
            stats: RunStats::default(),
        }
    }

    pub fn stats(&self) -> &RunStats {
        &self.stats
    }

    pub fn context(&self) -> &PipelineContext {
        &self.ctx
    }

    /// Evaluate one statement with bounded retry and append the decision.
    ///
    /// Only a ledger failure is an error; evaluator exhaustion is an [`Outcome`].
    pub fn process(&mut self, statement: &Statement) -> Result<Outcome, RunError> {
        self.stats.statements_seen += 1;

        if !statement.has_result() {
            tracing::debug!(ticker = %statement.ticker, "no current-period result; skipping");
            self.stats.filtered += 1;
            return Ok(Outcome::Filtered);
        }

        let max_attempts = self.ctx.retry.max_attempts();
        let mut last_error = String::new();

        for attempt in 1..=max_attempts {
            if self.ctx.cancel.is_cancelled() {
                self.stats.cancelled = true;
                tracing::info!(ticker = %statement.ticker, "run cancelled; not evaluating");
                return Ok(Outcome::Cancelled);
            }

            self.throttle.acquire(self.ctx.sleeper.as_ref());
            self.stats.evaluator_calls += 1;

            match self.evaluate_once(statement) {
                Ok(evaluation) => {
                    let decision = self.to_decision(statement, evaluation);
                    self.ctx.ledger.append(&decision)?;
                    self.stats.decided += 1;
                    tracing::info!(
                        ticker = %decision.ticker,
                        date = %decision.date,
                        action = %decision.action,
                        confidence = decision.confidence,
                        attempt,
                        "decision recorded"
                    );
                    return Ok(Outcome::Decided(decision));
                }
                Err(e) => {
                    tracing::warn!(
                        ticker = %statement.ticker,
                        attempt,
                        max_attempts,
                        error = %e,
                        "evaluation attempt failed"
                    );
                    last_error = e.to_string();
                    if let Some(delay) = self.ctx.retry.delay_after(attempt) {
                        tracing::debug!(delay_ms = delay.as_millis() as u64, "backing off");
                        self.ctx.sleeper.sleep(delay);
                    }
                }
            }
        }

        tracing::error!(
            ticker = %statement.ticker,
            attempts = max_attempts,
            error = %last_error,
            "evaluation failed after all attempts"
        );
        self.stats.failed += 1;
        Ok(Outcome::Failed {
            attempts: max_attempts,
            last_error,
        })
    }

    /// Fetch and process every statement disclosed on `date`.
    ///
    /// A statement fetch error skips the whole date.
    pub fn run_date(&mut self, date: NaiveDate) -> Result<Vec<Outcome>, RunError> {
        if self.ctx.cancel.is_cancelled() {
            self.stats.cancelled = true;
            return Ok(Vec::new());
        }

        let statements = match self.ctx.statements.statements(date) {
            Ok(statements) => statements,
            Err(e) => {
                tracing::warn!(%date, error = %e, "failed to fetch statements; skipping date");
                self.stats.dates_skipped += 1;
                return Ok(Vec::new());
            }
        };
        self.stats.dates_processed += 1;

        if statements.is_empty() {
            tracing::info!(%date, "no disclosures");
            return Ok(Vec::new());
        }
        tracing::info!(%date, count = statements.len(), "processing disclosures");

        self.ensure_names();
        let mut outcomes = Vec::with_capacity(statements.len());
        for statement in &statements {
            let outcome = self.process(statement)?;
            let cancelled = outcome == Outcome::Cancelled;
            outcomes.push(outcome);
            if cancelled {
                break;
            }
        }
        Ok(outcomes)
    }

    /// Process every calendar day in `[start, end]`.
    pub fn run_range(&mut self, start: NaiveDate, end: NaiveDate) -> Result<RunStats, RunError> {
        if end < start {
            return Err(RunError::InvalidRange { start, end });
        }

        for date in start.iter_days().take_while(|d| *d <= end) {
            if self.ctx.cancel.is_cancelled() {
                self.stats.cancelled = true;
                tracing::info!(%date, "run cancelled; stopping");
                break;
            }
            self.run_date(date)?;
        }

        tracing::info!(
            decided = self.stats.decided,
            failed = self.stats.failed,
            filtered = self.stats.filtered,
            dates_skipped = self.stats.dates_skipped,
            ledger = %self.ctx.ledger.path().display(),
            "analysis run finished"
        );
        Ok(self.stats.clone())
    }

    fn evaluate_once(&self, statement: &Statement) -> Result<Evaluation, EvalError> {
        let evaluation = self.ctx.evaluator.evaluate(statement)?;
        evaluation.validate()?;
        Ok(evaluation)
    }

    fn to_decision(&self, statement: &Statement, evaluation: Evaluation) -> Decision {
        Decision {
            ticker: statement.ticker.clone(),
            date: statement.disclosed_date,
            action: evaluation.action,
            confidence: evaluation.confidence,
            reasoning: evaluation.reasoning,
            provenance: Provenance {
                company_name: self.company_name(&statement.ticker),
                financial_summary: evaluation.financial_summary,
                technical_summary: evaluation.technical_summary,
                prompt_id: evaluation.prompt_id,
            },
        }
    }

    fn company_name(&self, ticker: &str) -> Option<String> {
        let names = self.names.as_ref()?;
        Some(
            names
                .get(ticker)
                .filter(|n| !n.trim().is_empty())
                .cloned()
                .unwrap_or_else(|| UNKNOWN_COMPANY.to_string()),
        )
    }

    /// Load the name map once per run. A lookup failure leaves every name "Unknown".
    fn ensure_names(&mut self) {
        if self.names.is_some() {
            return;
        }
        let Some(provider) = self.ctx.names.as_ref() else {
            return;
        };
        let names = match provider.listed_names() {
            Ok(names) => {
                tracing::info!(companies = names.len(), "loaded listed company names");
                names
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to load company names");
                HashMap::new()
            }
        };
        self.names = Some(names);
    }
}
