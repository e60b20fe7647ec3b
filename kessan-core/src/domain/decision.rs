//! The persisted outcome of evaluating one statement.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Trading action chosen by an evaluator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Action {
    Buy,
    Ignore,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Buy => "BUY",
            Action::Ignore => "IGNORE",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unknown action '{0}' (expected BUY or IGNORE)")]
pub struct ParseActionError(pub String);

impl FromStr for Action {
    type Err = ParseActionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "BUY" => Ok(Action::Buy),
            "IGNORE" => Ok(Action::Ignore),
            _ => Err(ParseActionError(s.to_string())),
        }
    }
}

/// Replay identity of a decision. At most one decision per key is ever scored.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DecisionKey {
    pub date: NaiveDate,
    pub ticker: String,
}

/// Where a decision came from and what it was based on.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Provenance {
    pub company_name: Option<String>,
    pub financial_summary: Option<String>,
    pub technical_summary: Option<String>,
    pub prompt_id: Option<String>,
}

/// A trading decision for one ticker on one date.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub ticker: String,
    pub date: NaiveDate,
    pub action: Action,
    pub confidence: f64,
    pub reasoning: String,
    #[serde(default)]
    pub provenance: Provenance,
}

impl Decision {
    pub fn key(&self) -> DecisionKey {
        DecisionKey {
            date: self.date,
            ticker: self.ticker.clone(),
        }
    }
}
