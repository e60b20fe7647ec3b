//! The shipped config files must parse and validate.

use std::path::PathBuf;

use kessan_runner::{EvaluatorKind, KessanConfig};

fn configs_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .parent()
        .unwrap()
        .join("configs")
}

#[test]
fn default_config_matches_builtin_defaults() {
    let config = KessanConfig::from_file(&configs_dir().join("default.toml")).unwrap();
    let defaults = KessanConfig::default();
    assert_eq!(config.ledger, defaults.ledger);
    assert_eq!(config.backtest, defaults.backtest);
    assert_eq!(config.audit, defaults.audit);
    assert_eq!(config.evaluator, defaults.evaluator);
    assert_eq!(config.replay, defaults.replay);
    assert_eq!(config.jquants, defaults.jquants);
    assert_eq!(config.analysis.max_retries, 5);
    assert!(config.analysis.start_date.is_some());
}

#[test]
fn offline_config_selects_guidance_rule() {
    let config = KessanConfig::from_file(&configs_dir().join("offline.toml")).unwrap();
    assert_eq!(config.evaluator.kind, EvaluatorKind::GuidanceRule);
    assert_eq!(config.backtest.gap_threshold_pct, Some(3.0));
    assert_eq!(config.replay.workers, 4);
    assert!(!config.evaluator.include_technicals);
}

#[test]
fn missing_file_is_a_read_error() {
    let err = KessanConfig::from_file(&configs_dir().join("nope.toml")).unwrap_err();
    assert!(err.to_string().contains("nope.toml"));
}
