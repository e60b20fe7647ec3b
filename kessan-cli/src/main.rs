//! Kessan CLI — earnings analysis, backtest and missed-opportunity commands.
//!
//! Commands:
//! - `analyze` — evaluate disclosed statements over a date range and append to the ledger
//! - `backtest` — replay BUY decisions under the gap filter and take-profit rule
//! - `missed` — list IGNORE decisions whose next session ran past the threshold

mod logging;

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use kessan_core::data::{CircuitBreaker, InMemoryProvider, JQuantsClient, PriceProvider};
use kessan_core::{DecisionLedger, QuoteAligner};
use kessan_runner::config::EvaluatorConfig;
use kessan_runner::{
    ArtifactManager, AuditReport, BacktestReport, BacktestSimulator, CancelToken, Credentials,
    Evaluator, EvaluatorKind, GeminiEvaluator, GuidanceRuleEvaluator, KessanConfig,
    OpportunityAuditor, Orchestrator, PipelineContext, RunStats,
};

#[derive(Parser)]
#[command(
    name = "kessan",
    about = "Kessan — earnings-driven trade decisions and next-day replay"
)]
struct Cli {
    /// Emit logs as JSON.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum EvaluatorArg {
    Gemini,
    GuidanceRule,
}

impl From<EvaluatorArg> for EvaluatorKind {
    fn from(arg: EvaluatorArg) -> Self {
        match arg {
            EvaluatorArg::Gemini => EvaluatorKind::Gemini,
            EvaluatorArg::GuidanceRule => EvaluatorKind::GuidanceRule,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Evaluate statements disclosed in a date range and append decisions to the ledger.
    Analyze {
        /// Path to a TOML config file.
        #[arg(long)]
        config: Option<PathBuf>,

        /// First disclosure date (YYYY-MM-DD). Overrides the config.
        #[arg(long)]
        start: Option<NaiveDate>,

        /// Last disclosure date (YYYY-MM-DD). Defaults to the start date.
        #[arg(long)]
        end: Option<NaiveDate>,

        /// Ledger CSV path. Overrides the config.
        #[arg(long)]
        ledger: Option<PathBuf>,

        /// Evaluator to use. Overrides the config.
        #[arg(long, value_enum)]
        evaluator: Option<EvaluatorArg>,
    },
    /// Replay BUY decisions and report the take-profit win rate.
    Backtest {
        /// Path to a TOML config file.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Ledger CSV path. Overrides the config.
        #[arg(long)]
        ledger: Option<PathBuf>,

        /// Skip trades whose opening gap exceeds this percent.
        #[arg(long, conflicts_with = "no_gap_filter")]
        gap_threshold: Option<f64>,

        /// Disable the gap filter even if the config sets one.
        #[arg(long, default_value_t = false)]
        no_gap_filter: bool,

        /// Take-profit distance in percent. Overrides the config.
        #[arg(long)]
        take_profit: Option<f64>,

        /// Read bars from a CSV file instead of the J-Quants API.
        #[arg(long)]
        bars_csv: Option<PathBuf>,

        /// Write trades.csv, trades.json and backtest_summary.json here.
        #[arg(long)]
        output_dir: Option<PathBuf>,
    },
    /// List IGNORE decisions followed by a large open-to-high move.
    Missed {
        /// Path to a TOML config file.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Ledger CSV path. Overrides the config.
        #[arg(long)]
        ledger: Option<PathBuf>,

        /// Open-to-high gain (percent) that counts as missed. Overrides the config.
        #[arg(long)]
        threshold: Option<f64>,

        /// Read bars from a CSV file instead of the J-Quants API.
        #[arg(long)]
        bars_csv: Option<PathBuf>,

        /// Write missed.csv and missed_summary.json here.
        #[arg(long)]
        output_dir: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.json_logs {
        logging::init_json_logging();
    } else {
        logging::init_logging();
    }

    if let Ok(path) = dotenvy::dotenv() {
        tracing::debug!(path = %path.display(), "loaded .env");
    }

    match cli.command {
        Commands::Analyze {
            config,
            start,
            end,
            ledger,
            evaluator,
        } => run_analyze(config.as_deref(), start, end, ledger, evaluator),
        Commands::Backtest {
            config,
            ledger,
            gap_threshold,
            no_gap_filter,
            take_profit,
            bars_csv,
            output_dir,
        } => run_backtest(
            config.as_deref(),
            ledger,
            gap_threshold,
            no_gap_filter,
            take_profit,
            bars_csv.as_deref(),
            output_dir.as_deref(),
        ),
        Commands::Missed {
            config,
            ledger,
            threshold,
            bars_csv,
            output_dir,
        } => run_missed(
            config.as_deref(),
            ledger,
            threshold,
            bars_csv.as_deref(),
            output_dir.as_deref(),
        ),
    }
}

fn load_config(path: Option<&Path>) -> Result<KessanConfig> {
    match path {
        Some(path) => Ok(KessanConfig::from_file(path)?),
        None => Ok(KessanConfig::default()),
    }
}

fn jquants_client(config: &KessanConfig) -> Result<Arc<JQuantsClient>> {
    let credentials = Credentials::from_env(false)?;
    let breaker = Arc::new(CircuitBreaker::new(config.jquants.breaker_policy()));
    Ok(Arc::new(JQuantsClient::new(
        credentials.jquants_refresh_token,
        breaker,
    )?))
}

fn price_provider(
    config: &KessanConfig,
    bars_csv: Option<&Path>,
) -> Result<Arc<dyn PriceProvider>> {
    match bars_csv {
        Some(path) => {
            let provider = InMemoryProvider::from_bars_csv(path)
                .with_context(|| format!("Failed to load bars from {}", path.display()))?;
            Ok(Arc::new(provider))
        }
        None => Ok(jquants_client(config)?),
    }
}

fn build_evaluator(
    config: &EvaluatorConfig,
    kind: EvaluatorKind,
    credentials: &Credentials,
    prices: Arc<dyn PriceProvider>,
) -> Result<Box<dyn Evaluator>> {
    let evaluator: Box<dyn Evaluator> = match kind {
        EvaluatorKind::Gemini => {
            let Some(key) = credentials.google_api_key.as_deref() else {
                bail!("GOOGLE_API_KEY is required for the gemini evaluator");
            };
            let gemini = GeminiEvaluator::new(key, config.model.clone())?;
            tracing::info!(model = %config.model, prompt_id = %gemini.prompt_id(), "using gemini evaluator");
            if config.include_technicals {
                Box::new(gemini.with_technicals(prices))
            } else {
                Box::new(gemini)
            }
        }
        EvaluatorKind::GuidanceRule => {
            let rule = GuidanceRuleEvaluator::new(config.growth_threshold_pct);
            tracing::info!(
                growth_threshold_pct = config.growth_threshold_pct,
                "using guidance rule evaluator"
            );
            if config.include_technicals {
                Box::new(rule.with_technicals(prices))
            } else {
                Box::new(rule)
            }
        }
    };
    Ok(evaluator)
}

fn run_analyze(
    config_path: Option<&Path>,
    start: Option<NaiveDate>,
    end: Option<NaiveDate>,
    ledger: Option<PathBuf>,
    evaluator: Option<EvaluatorArg>,
) -> Result<()> {
    let mut config = load_config(config_path)?;
    if let Some(start) = start {
        config.analysis.start_date = Some(start);
    }
    if let Some(end) = end {
        config.analysis.end_date = Some(end);
    }
    if let Some(ledger) = ledger {
        config.ledger.path = ledger;
    }
    let kind = evaluator.map(EvaluatorKind::from).unwrap_or(config.evaluator.kind);

    let Some(start) = config.analysis.start_date else {
        bail!("no start date: pass --start or set analysis.start_date");
    };
    let end = config.analysis.end_date.unwrap_or(start);
    config.validate()?;

    let credentials = Credentials::from_env(kind == EvaluatorKind::Gemini)?;
    let client = Arc::new(JQuantsClient::new(
        credentials.jquants_refresh_token.clone(),
        Arc::new(CircuitBreaker::new(config.jquants.breaker_policy())),
    )?);
    let evaluator = build_evaluator(&config.evaluator, kind, &credentials, client.clone())?;

    let cancel = match config.analysis.run_timeout() {
        Some(timeout) => CancelToken::with_timeout(timeout),
        None => CancelToken::new(),
    };
    let handler_token = cancel.clone();
    ctrlc::set_handler(move || {
        eprintln!("\nReceived Ctrl-C, finishing the current statement...");
        handler_token.cancel();
    })
    .context("Failed to install Ctrl-C handler")?;

    let ledger = DecisionLedger::open(&config.ledger.path)?;
    let ctx = PipelineContext::new(client.clone(), evaluator, ledger)
        .with_names(client)
        .with_cancel(cancel)
        .with_analysis_config(&config.analysis);

    tracing::info!(%start, %end, ledger = %config.ledger.path.display(), "starting analysis");
    let mut orchestrator = Orchestrator::new(ctx);
    let stats = orchestrator.run_range(start, end)?;
    print_run_stats(&stats, &config.ledger.path);
    Ok(())
}

fn run_backtest(
    config_path: Option<&Path>,
    ledger: Option<PathBuf>,
    gap_threshold: Option<f64>,
    no_gap_filter: bool,
    take_profit: Option<f64>,
    bars_csv: Option<&Path>,
    output_dir: Option<&Path>,
) -> Result<()> {
    let mut config = load_config(config_path)?;
    if let Some(ledger) = ledger {
        config.ledger.path = ledger;
    }
    if no_gap_filter {
        config.backtest.gap_threshold_pct = None;
    } else if gap_threshold.is_some() {
        config.backtest.gap_threshold_pct = gap_threshold;
    }
    if let Some(take_profit) = take_profit {
        config.backtest.take_profit_pct = take_profit;
    }
    config.validate()?;

    let aligner = QuoteAligner::new(price_provider(&config, bars_csv)?);
    let simulator = BacktestSimulator::from_config(aligner, &config.backtest, &config.replay);
    let report = simulator.run(&config.ledger.path)?;
    print_backtest(&report);

    if let Some(dir) = output_dir {
        let paths = ArtifactManager::new(dir)?.save_backtest(&report)?;
        println!("Trades saved to: {}", paths.trades_csv.display());
        println!("Summary saved to: {}", paths.summary_json.display());
    }
    Ok(())
}

fn run_missed(
    config_path: Option<&Path>,
    ledger: Option<PathBuf>,
    threshold: Option<f64>,
    bars_csv: Option<&Path>,
    output_dir: Option<&Path>,
) -> Result<()> {
    let mut config = load_config(config_path)?;
    if let Some(ledger) = ledger {
        config.ledger.path = ledger;
    }
    if let Some(threshold) = threshold {
        config.audit.missed_threshold_pct = threshold;
    }
    config.validate()?;

    let aligner = QuoteAligner::new(price_provider(&config, bars_csv)?);
    let auditor = OpportunityAuditor::from_config(aligner, &config.audit, &config.replay);
    let report = auditor.run(&config.ledger.path)?;
    print_missed(&report);

    if let Some(dir) = output_dir {
        let paths = ArtifactManager::new(dir)?.save_audit(&report)?;
        println!("Missed list saved to: {}", paths.missed_csv.display());
    }
    Ok(())
}

fn print_run_stats(stats: &RunStats, ledger: &Path) {
    println!();
    println!("=== Analysis Run ===");
    println!("Dates processed: {}", stats.dates_processed);
    println!("Dates skipped:   {}", stats.dates_skipped);
    println!("Statements:      {}", stats.statements_seen);
    println!("Filtered:        {}", stats.filtered);
    println!("Decided:         {}", stats.decided);
    println!("Failed:          {}", stats.failed);
    println!("Evaluator calls: {}", stats.evaluator_calls);
    if stats.cancelled {
        println!("Run was cancelled before completion.");
    }
    println!("Ledger:          {}", ledger.display());
}

fn print_backtest(report: &BacktestReport) {
    for trade in &report.trades {
        let proxy = match trade.basis {
            kessan_core::AlignmentBasis::Exact => "",
            kessan_core::AlignmentBasis::Proxy => " (proxy prev close)",
        };
        println!(
            "[{}] {} Gap: {:+.2}% | Entry: {:.0} -> High: {:.0} (Max: {:+.2}%) | Result: {}{}",
            trade.ticker,
            trade.date,
            trade.gap_pct,
            trade.entry_price,
            trade.realized_high,
            trade.max_return_pct,
            if trade.win { "WIN" } else { "LOSS" },
            proxy,
        );
    }

    println!();
    println!("=== Backtest Summary ===");
    println!("BUY decisions:    {}", report.buy_decisions);
    println!("Total trades:     {}", report.trade_count);
    println!("Wins:             {}", report.win_count);
    match report.win_rate() {
        Some(rate) => println!("Win rate:         {:.1}%", rate * 100.0),
        None => println!("Win rate:         no trades"),
    }
    println!("Skipped (gap):    {}", report.skipped_for_gap);
    println!(
        "Skipped (data):   {} ({} fetch errors)",
        report.skipped_for_data, report.fetch_errors
    );
    if report.proxy_alignments > 0 {
        println!("Proxy alignments: {}", report.proxy_alignments);
    }
    if report.duplicates_dropped > 0 {
        println!("Duplicates:       {}", report.duplicates_dropped);
    }
}

fn print_missed(report: &AuditReport) {
    println!("--- Missed Opportunities (IGNORE, then > {:.1}%) ---", report.threshold_pct);
    for missed in &report.missed {
        println!("[MISSED] {} {} (Date: {})", missed.ticker, missed.display_name(), missed.date);
        println!("   Potential gain: {:+.2}%", missed.potential_gain_pct);
        println!("   Reason: {}", missed.reasoning);
    }
    println!();
    println!(
        "IGNORE decisions: {} | evaluated: {} | skipped: {} | missed: {}",
        report.ignore_decisions,
        report.evaluated,
        report.skipped,
        report.missed.len()
    );
}
