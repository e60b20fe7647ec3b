//! Kessan Core — domain types, data providers, quote alignment and the decision ledger.
//!
//! This crate holds everything the pipeline stages share:
//! - Domain types (statements, decisions, price bars)
//! - Provider traits plus the J-Quants client and an in-memory provider
//! - Quote alignment of a decision date to the next trading day
//! - The append-only decision ledger and replay de-duplication
//! - A short-horizon price trend summary used as evaluator input

pub mod align;
pub mod data;
pub mod domain;
pub mod ledger;
pub mod trend;

pub use align::{align_bars, AlignError, Alignment, AlignmentBasis, QuoteAligner};
pub use ledger::{dedup_first_occurrence, DecisionLedger, LedgerContents, LedgerError, LedgerRow};
