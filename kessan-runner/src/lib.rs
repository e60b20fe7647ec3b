//! Kessan Runner — analysis runs, ledger replay, and report export.
//!
//! This crate builds on `kessan-core` to provide:
//! - TOML configuration and environment credentials
//! - Retry policy, sleepers and cancellation
//! - Evaluators (guidance rule, Gemini) behind one trait
//! - The evaluation orchestrator that fills the decision ledger
//! - Backtest simulation and missed-opportunity audit over the ledger
//! - CSV/JSON report export

pub mod auditor;
pub mod backtest;
pub mod cancel;
pub mod config;
pub mod context;
pub mod evaluator;
pub mod orchestrator;
pub mod replay;
pub mod reporting;
pub mod retry;

pub use auditor::{AuditReport, MissedOpportunity, OpportunityAuditor};
pub use backtest::{BacktestReport, BacktestSimulator, BacktestSummary, TradeOutcome};
pub use cancel::CancelToken;
pub use config::{
    AuditConfig, BacktestConfig, ConfigError, Credentials, EvaluatorKind, JQuantsConfig,
    KessanConfig, ReplayConfig,
};
pub use context::PipelineContext;
pub use evaluator::{EvalError, Evaluation, Evaluator, GeminiEvaluator, GuidanceRuleEvaluator};
pub use orchestrator::{Orchestrator, Outcome, RunError, RunStats};
pub use replay::{align_all, load_decisions, ReplaySet};
pub use reporting::ArtifactManager;
pub use retry::{Backoff, RecordingSleeper, RetryPolicy, Sleeper, ThreadSleeper, Throttle};
