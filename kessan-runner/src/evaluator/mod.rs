//! Evaluators: turn one statement into a BUY/IGNORE call.
//!
//! The orchestrator only sees the [`Evaluator`] trait. Implementations:
//! - [`GuidanceRuleEvaluator`]: deterministic forecast-growth rule, no network
//! - [`GeminiEvaluator`]: remote model call with a guidance-first prompt
//!
//! Every error an evaluator returns is treated as retryable.

pub mod gemini;
pub mod guidance;

pub use gemini::GeminiEvaluator;
pub use guidance::GuidanceRuleEvaluator;

use serde::Deserialize;
use thiserror::Error;

use kessan_core::data::PriceProvider;
use kessan_core::domain::{format_amount, Action, Statement};
use kessan_core::trend;

#[derive(Debug, Error)]
pub enum EvalError {
    #[error("evaluator transport error: {0}")]
    Transport(String),

    #[error("evaluator overloaded (HTTP {status})")]
    Overloaded { status: u16 },

    #[error("evaluator returned HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("malformed evaluator output: {0}")]
    Malformed(String),
}

/// The body of a decision as produced by an evaluator.
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    pub action: Action,
    pub confidence: f64,
    pub reasoning: String,
    pub financial_summary: Option<String>,
    pub technical_summary: Option<String>,
    pub prompt_id: Option<String>,
}

impl Evaluation {
    /// Confidence must be a finite number in `[0, 1]`.
    pub fn validate(&self) -> Result<(), EvalError> {
        if !self.confidence.is_finite() || !(0.0..=1.0).contains(&self.confidence) {
            return Err(EvalError::Malformed(format!(
                "confidence {} outside [0, 1]",
                self.confidence
            )));
        }
        Ok(())
    }
}

/// Maps a statement to a decision.
pub trait Evaluator: Send + Sync {
    /// Short identifier used in logs.
    fn name(&self) -> &str;

    fn evaluate(&self, statement: &Statement) -> Result<Evaluation, EvalError>;
}

/// Model output schema.
#[derive(Debug, Deserialize)]
struct ModelVerdict {
    action: String,
    confidence: f64,
    #[serde(default)]
    reasoning: String,
    #[serde(default)]
    financial_summary: Option<String>,
}

/// Parse a model's JSON verdict, tolerating code fences and leading prose.
pub fn parse_verdict(raw: &str) -> Result<(Action, f64, String, Option<String>), EvalError> {
    let mut text = raw.trim();
    text = text.strip_prefix("```json").unwrap_or(text);
    text = text.strip_prefix("```").unwrap_or(text);
    text = text.strip_suffix("```").unwrap_or(text);
    let start = text
        .find('{')
        .ok_or_else(|| EvalError::Malformed(format!("no JSON object in response: {raw}")))?;
    let end = text
        .rfind('}')
        .filter(|&end| end > start)
        .ok_or_else(|| EvalError::Malformed(format!("unterminated JSON in response: {raw}")))?;

    let verdict: ModelVerdict = serde_json::from_str(&text[start..=end])
        .map_err(|e| EvalError::Malformed(format!("json parse error: {e}")))?;
    let action = verdict
        .action
        .parse::<Action>()
        .map_err(|e| EvalError::Malformed(e.to_string()))?;

    Ok((
        action,
        verdict.confidence,
        verdict.reasoning,
        verdict.financial_summary.filter(|s| !s.trim().is_empty()),
    ))
}

/// One-line financial digest of a statement.
pub fn financial_digest(statement: &Statement) -> String {
    let mut digest = format!(
        "OP: {} | FY forecast: sales {} / OP {} | Next FY: sales {} / OP {}",
        format_amount(statement.operating_profit),
        format_amount(statement.current_year.net_sales),
        format_amount(statement.current_year.operating_profit),
        format_amount(statement.next_year.net_sales),
        format_amount(statement.next_year.operating_profit),
    );
    if let Some(growth) = statement.guidance_growth_pct() {
        digest.push_str(&format!(" | guidance growth {growth:+.1}%"));
    }
    digest
}

/// Price trend text for the disclosure date, or `None` if it could not be fetched.
pub(crate) fn technicals_for(
    provider: Option<&dyn PriceProvider>,
    statement: &Statement,
) -> Option<String> {
    let provider = provider?;
    match trend::trend_text(provider, &statement.ticker, statement.disclosed_date) {
        Ok(text) => Some(text),
        Err(e) => {
            tracing::warn!(ticker = %statement.ticker, error = %e, "price trend unavailable");
            None
        }
    }
}
