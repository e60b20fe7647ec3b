//! Domain types for Kessan

pub mod bar;
pub mod decision;
pub mod statement;

pub use bar::PriceBar;
pub use decision::{Action, Decision, DecisionKey, ParseActionError, Provenance};
pub use statement::{format_amount, parse_amount, try_parse_amount, Forecast, Statement};

/// Ticker type alias
pub type Ticker = String;
