//! Collaborators shared by one analysis run.
//!
//! Built once per run and handed to the [`Orchestrator`](crate::orchestrator::Orchestrator).
//! Everything is injected, so tests swap providers, the evaluator and the
//! sleeper without touching the network or the clock.

use std::sync::Arc;
use std::time::Duration;

use kessan_core::data::{ListedInfoProvider, StatementProvider};
use kessan_core::DecisionLedger;

use crate::cancel::CancelToken;
use crate::config::AnalysisConfig;
use crate::evaluator::Evaluator;
use crate::retry::{RetryPolicy, Sleeper, ThreadSleeper};

pub struct PipelineContext {
    pub statements: Arc<dyn StatementProvider>,
    /// Company-name lookup. Without it decisions carry no display name.
    pub names: Option<Arc<dyn ListedInfoProvider>>,
    pub evaluator: Box<dyn Evaluator>,
    pub ledger: DecisionLedger,
    pub retry: RetryPolicy,
    pub sleeper: Arc<dyn Sleeper>,
    pub min_call_interval: Duration,
    pub cancel: CancelToken,
}

impl PipelineContext {
    /// Context with default retry policy, real sleeps and no throttle.
    pub fn new(
        statements: Arc<dyn StatementProvider>,
        evaluator: Box<dyn Evaluator>,
        ledger: DecisionLedger,
    ) -> Self {
        let cancel = CancelToken::new();
        Self {
            statements,
            names: None,
            evaluator,
            ledger,
            retry: RetryPolicy::default(),
            sleeper: Arc::new(ThreadSleeper::new(cancel.clone())),
            min_call_interval: Duration::ZERO,
            cancel,
        }
    }

    pub fn with_names(mut self, names: Arc<dyn ListedInfoProvider>) -> Self {
        self.names = Some(names);
        self
    }

    /// Apply retry and throttle settings from the `[analysis]` section.
    pub fn with_analysis_config(mut self, config: &AnalysisConfig) -> Self {
        self.retry = config.retry_policy();
        self.min_call_interval = config.min_call_interval();
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    /// Replace the cancel token and reset the sleeper to a thread sleeper bound to it.
    /// Call before [`with_sleeper`](Self::with_sleeper) when injecting both.
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.sleeper = Arc::new(ThreadSleeper::new(cancel.clone()));
        self.cancel = cancel;
        self
    }
}
