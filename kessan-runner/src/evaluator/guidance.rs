//! Deterministic guidance-growth evaluator.
//!
//! BUY only when next-year operating profit guidance beats the current-year
//! forecast by at least `growth_threshold_pct` and the current result is
//! profitable. Needs no network, so it doubles as the offline baseline.

use std::sync::Arc;

use kessan_core::data::PriceProvider;
use kessan_core::domain::{Action, Statement};

use super::{financial_digest, technicals_for, EvalError, Evaluation, Evaluator};

pub const GUIDANCE_RULE_PROMPT_ID: &str = "guidance-rule-v1";

pub struct GuidanceRuleEvaluator {
    growth_threshold_pct: f64,
    prices: Option<Arc<dyn PriceProvider>>,
}

impl GuidanceRuleEvaluator {
    pub fn new(growth_threshold_pct: f64) -> Self {
        Self {
            growth_threshold_pct,
            prices: None,
        }
    }

    /// Attach a price provider so decisions carry a trend summary.
    pub fn with_technicals(mut self, prices: Arc<dyn PriceProvider>) -> Self {
        self.prices = Some(prices);
        self
    }

    fn judge(&self, statement: &Statement) -> (Action, f64, String) {
        let Some(growth) = statement.guidance_growth_pct() else {
            return (
                Action::Ignore,
                0.6,
                "Next-year guidance missing or current forecast not positive".into(),
            );
        };

        if growth <= 0.0 {
            return (
                Action::Ignore,
                0.7,
                format!("Next FY op profit not above current FY forecast ({growth:+.1}%)"),
            );
        }

        let profitable = statement.operating_profit.is_some_and(|op| op > 0.0);
        if !profitable {
            return (
                Action::Ignore,
                0.6,
                format!("Guidance {growth:+.1}% but current result is not profitable"),
            );
        }

        if growth < self.growth_threshold_pct {
            return (
                Action::Ignore,
                0.55,
                format!(
                    "Guidance {growth:+.1}% below {:.1}% growth threshold",
                    self.growth_threshold_pct
                ),
            );
        }

        // 0.80 at the threshold, +0.01 per point above it, capped at 0.95.
        let excess = (growth - self.growth_threshold_pct).min(15.0);
        let confidence = ((0.80 + excess / 100.0) * 100.0).round() / 100.0;
        let mut reasoning = format!("Next FY op profit guidance {growth:+.1}% over current FY");
        if let Some(margin) = statement.forecast_margin_pct() {
            reasoning.push_str(&format!(", forecast margin {margin:.1}%"));
        }
        (Action::Buy, confidence, reasoning)
    }
}

impl Evaluator for GuidanceRuleEvaluator {
    fn name(&self) -> &str {
        "guidance_rule"
    }

    fn evaluate(&self, statement: &Statement) -> Result<Evaluation, EvalError> {
        let (action, confidence, reasoning) = self.judge(statement);
        Ok(Evaluation {
            action,
            confidence,
            reasoning,
            financial_summary: Some(financial_digest(statement)),
            technical_summary: technicals_for(self.prices.as_deref(), statement),
            prompt_id: Some(GUIDANCE_RULE_PROMPT_ID.to_string()),
        })
    }
}
