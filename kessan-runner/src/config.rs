//! TOML configuration for analysis runs and ledger replay.
//!
//! Every section has defaults, so an empty file (or no file) is a valid
//! configuration. Credentials never live here; they come from the
//! environment (see [`Credentials`]).

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use kessan_core::data::BreakerPolicy;

use crate::retry::{Backoff, RetryPolicy};

pub const ENV_JQUANTS_REFRESH_TOKEN: &str = "JQUANTS_REFRESH_TOKEN";
pub const ENV_GOOGLE_API_KEY: &str = "GOOGLE_API_KEY";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid config: {0}")]
    Invalid(String),

    #[error("missing environment variable {0}")]
    MissingCredential(&'static str),
}

/// Top-level configuration file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KessanConfig {
    pub analysis: AnalysisConfig,
    pub ledger: LedgerConfig,
    pub backtest: BacktestConfig,
    pub audit: AuditConfig,
    pub replay: ReplayConfig,
    pub evaluator: EvaluatorConfig,
    pub jquants: JQuantsConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// First disclosure date to process (inclusive).
    pub start_date: Option<NaiveDate>,
    /// Last disclosure date to process (inclusive).
    pub end_date: Option<NaiveDate>,
    pub max_retries: u32,
    pub base_delay_ms: u64,
    /// Minimum spacing between evaluator calls.
    pub min_call_interval_ms: u64,
    /// Run deadline in seconds; 0 disables it.
    pub run_timeout_secs: u64,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            start_date: None,
            end_date: None,
            max_retries: 5,
            base_delay_ms: 2_000,
            min_call_interval_ms: 0,
            run_timeout_secs: 0,
        }
    }
}

impl AnalysisConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_retries,
            Backoff::Linear {
                base: Duration::from_millis(self.base_delay_ms),
            },
        )
    }

    pub fn min_call_interval(&self) -> Duration {
        Duration::from_millis(self.min_call_interval_ms)
    }

    pub fn run_timeout(&self) -> Option<Duration> {
        (self.run_timeout_secs > 0).then(|| Duration::from_secs(self.run_timeout_secs))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    pub path: PathBuf,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("results.csv"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BacktestConfig {
    /// Take-profit distance above the entry open, in percent.
    pub take_profit_pct: f64,
    /// Skip trades whose opening gap exceeds this percent. `None` disables the filter.
    pub gap_threshold_pct: Option<f64>,
}

impl Default for BacktestConfig {
    fn default() -> Self {
        Self {
            take_profit_pct: 1.0,
            gap_threshold_pct: None,
        }
    }
}

impl BacktestConfig {
    pub fn take_profit_fraction(&self) -> f64 {
        self.take_profit_pct / 100.0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    /// Open-to-high gain (percent) above which an IGNORE counts as missed.
    pub missed_threshold_pct: f64,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            missed_threshold_pct: 3.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplayConfig {
    /// Worker threads used for price alignment during replay.
    pub workers: usize,
    /// Calendar days fetched after the decision date.
    pub lookahead_days: u32,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            workers: 1,
            lookahead_days: kessan_core::align::DEFAULT_LOOKAHEAD_DAYS,
        }
    }
}

/// Circuit breaker settings for the J-Quants client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JQuantsConfig {
    /// Cooldown after HTTP 403 (access blocked).
    pub block_cooldown_secs: u64,
    /// Cooldown after repeated 429/5xx/connect failures.
    pub failure_cooldown_secs: u64,
    /// Consecutive failures that open the breaker.
    pub failure_threshold: u32,
    /// Upper bound on a server-sent `Retry-After`.
    pub max_retry_after_secs: u64,
}

impl Default for JQuantsConfig {
    fn default() -> Self {
        let policy = BreakerPolicy::default();
        Self {
            block_cooldown_secs: policy.block_cooldown.as_secs(),
            failure_cooldown_secs: policy.failure_cooldown.as_secs(),
            failure_threshold: policy.failure_threshold,
            max_retry_after_secs: policy.max_retry_after.as_secs(),
        }
    }
}

impl JQuantsConfig {
    pub fn breaker_policy(&self) -> BreakerPolicy {
        BreakerPolicy {
            block_cooldown: Duration::from_secs(self.block_cooldown_secs),
            failure_cooldown: Duration::from_secs(self.failure_cooldown_secs),
            failure_threshold: self.failure_threshold,
            max_retry_after: Duration::from_secs(self.max_retry_after_secs),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvaluatorKind {
    Gemini,
    GuidanceRule,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvaluatorConfig {
    pub kind: EvaluatorKind,
    pub model: String,
    /// Next-year profit growth (percent) the guidance rule requires for BUY.
    pub growth_threshold_pct: f64,
    /// Fetch a 20-day price trend for each statement as evaluator input.
    pub include_technicals: bool,
}

impl Default for EvaluatorConfig {
    fn default() -> Self {
        Self {
            kind: EvaluatorKind::Gemini,
            model: "gemini-2.5-pro".into(),
            growth_threshold_pct: 10.0,
            include_technicals: true,
        }
    }
}

impl KessanConfig {
    /// Load from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text).map_err(|e| match e {
            ConfigError::Parse { source, .. } => ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            },
            other => other,
        })
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: KessanConfig = toml::from_str(text).map_err(|source| ConfigError::Parse {
            path: PathBuf::from("<inline>"),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings that would make a run meaningless.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let (Some(start), Some(end)) = (self.analysis.start_date, self.analysis.end_date) {
            if end < start {
                return Err(ConfigError::Invalid(format!(
                    "analysis.end_date {end} is before start_date {start}"
                )));
            }
        }
        if self.analysis.max_retries == 0 {
            return Err(ConfigError::Invalid("analysis.max_retries must be >= 1".into()));
        }
        if !(self.backtest.take_profit_pct.is_finite() && self.backtest.take_profit_pct > 0.0) {
            return Err(ConfigError::Invalid(
                "backtest.take_profit_pct must be positive".into(),
            ));
        }
        if let Some(gap) = self.backtest.gap_threshold_pct {
            if !gap.is_finite() {
                return Err(ConfigError::Invalid(
                    "backtest.gap_threshold_pct must be finite".into(),
                ));
            }
        }
        if self.replay.lookahead_days == 0 {
            return Err(ConfigError::Invalid(
                "replay.lookahead_days must be >= 1".into(),
            ));
        }
        if self.jquants.failure_threshold == 0 {
            return Err(ConfigError::Invalid(
                "jquants.failure_threshold must be >= 1".into(),
            ));
        }
        if !(self.audit.missed_threshold_pct.is_finite() && self.audit.missed_threshold_pct >= 0.0)
        {
            return Err(ConfigError::Invalid(
                "audit.missed_threshold_pct must be non-negative".into(),
            ));
        }
        if self.replay.workers == 0 {
            return Err(ConfigError::Invalid("replay.workers must be >= 1".into()));
        }
        Ok(())
    }
}

/// API credentials read from the environment.
#[derive(Clone)]
pub struct Credentials {
    pub jquants_refresh_token: String,
    pub google_api_key: Option<String>,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("jquants_refresh_token", &"<redacted>")
            .field("google_api_key", &self.google_api_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl Credentials {
    /// Read credentials. The Google key is only required by the Gemini evaluator.
    pub fn from_env(require_google: bool) -> Result<Self, ConfigError> {
        let jquants_refresh_token = read_env(ENV_JQUANTS_REFRESH_TOKEN)
            .ok_or(ConfigError::MissingCredential(ENV_JQUANTS_REFRESH_TOKEN))?;
        let google_api_key = read_env(ENV_GOOGLE_API_KEY);
        if require_google && google_api_key.is_none() {
            return Err(ConfigError::MissingCredential(ENV_GOOGLE_API_KEY));
        }
        Ok(Self {
            jquants_refresh_token,
            google_api_key,
        })
    }
}

fn read_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}
