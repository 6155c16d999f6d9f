//! Integration tests for provider construction and CLI/config resolution:
//! these exercise the seams a reader would actually poke at from outside the
//! crate, without needing network access.

use chembldb_query::{
    config::CliArgs, config::RunConfig, error::AppError,
    providers::{build_provider, AIProvider},
};
use clap::Parser;

fn base_args(question: &str) -> Vec<String> {
    vec!["chembldb-query".to_string(), question.to_string()]
}

fn parse(args: &[String]) -> CliArgs {
    CliArgs::parse_from(args)
}

#[test]
fn local_provider_never_requires_a_credential() {
    let args = parse(&base_args("how many molecules are there?"));
    let cfg = RunConfig::from_args(args).expect("config resolves");
    let provider = build_provider("local", None, &cfg).expect("local provider always constructs");
    assert!(provider.is_available());
}

#[test]
fn named_provider_without_credential_fails_fast() {
    let args = parse(&base_args("how many molecules are there?"));
    let cfg = RunConfig::from_args(args).expect("config resolves");
    std::env::remove_var("ANTHROPIC_API_KEY");
    let cfg_no_key = RunConfig {
        anthropic_api_key: None,
        ..cfg
    };
    let err = build_provider("anthropic", None, &cfg_no_key).unwrap_err();
    assert!(matches!(err, AppError::Config(_)));
}

#[test]
fn auto_provider_falls_back_to_local_when_nothing_else_is_configured() {
    let args = parse(&base_args("how many molecules are there?"));
    let cfg = RunConfig::from_args(args).expect("config resolves");
    let cfg = RunConfig {
        anthropic_api_key: None,
        openai_api_key: None,
        google_api_key: None,
        openrouter_api_key: None,
        cerebras_api_key: None,
        deepseek_api_key: None,
        zai_api_key: None,
        ..cfg
    };
    let provider = build_provider("auto", None, &cfg).expect("auto always finds local");
    assert_eq!(provider.name(), "Local (local-model)");
}

#[test]
fn cli_defaults_match_the_documented_defaults_table() {
    let args = parse(&base_args("list approved drugs"));
    let cfg = RunConfig::from_args(args).expect("config resolves");

    assert_eq!(cfg.provider, "auto");
    assert_eq!(cfg.db_path, std::path::PathBuf::from("chembl.sqlite"));
    assert_eq!(cfg.max_retries, 10);
    assert_eq!(cfg.query_timeout, std::time::Duration::from_secs(600));
    assert_eq!(cfg.history_window, 3);
    assert!((cfg.judge_score_threshold - 0.85).abs() < f64::EPSILON);
    assert_eq!(cfg.judge_call_retries, 3);
    assert_eq!(cfg.schema_sample_rows, 3);
    assert_eq!(cfg.schema_max_cell_len, 60);
    assert_eq!(cfg.filter_profile, "relaxed");
    assert_eq!(cfg.min_context, 8000);
    assert!(cfg.strip_unrequested_limit);
    assert_eq!(cfg.output_base, "query_results");
    assert!(!cfg.save_intermediate);
    assert!((cfg.temperature - 1.0).abs() < f32::EPSILON);
    assert!((cfg.judge_temperature - 0.1).abs() < f32::EPSILON);
    assert_eq!(cfg.format, "table");
    assert_eq!(cfg.http_timeout, std::time::Duration::from_secs(180));
}

#[test]
fn auto_flag_forces_csv_format_and_derives_a_run_label() {
    let mut args = base_args("list approved drugs");
    args.push("--auto".to_string());
    let parsed = parse(&args);
    let cfg = RunConfig::from_args(parsed).expect("config resolves");
    assert_eq!(cfg.format, "csv");
    assert!(cfg.run_label.is_some());
}

#[test]
fn explicit_run_label_is_sanitized() {
    let mut args = base_args("list approved drugs");
    args.push("--run-label".to_string());
    args.push("abc/def!".to_string());
    let parsed = parse(&args);
    let cfg = RunConfig::from_args(parsed).expect("config resolves");
    assert_eq!(cfg.run_label.as_deref(), Some("abc_def"));
}

#[test]
fn sql_model_and_sql_model_list_are_mutually_exclusive() {
    let mut args = base_args("list approved drugs");
    args.push("--sql-model".to_string());
    args.push("gpt-4o".to_string());
    args.push("--sql-model-list".to_string());
    args.push("gpt-4o,gpt-4o-mini".to_string());
    let result = CliArgs::try_parse_from(&args);
    assert!(result.is_err());
}

#[test]
fn verbosity_tiers_increase_with_repeated_flags() {
    let mut args = base_args("list approved drugs");
    args.push("-vvv".to_string());
    let cfg = RunConfig::from_args(parse(&args)).expect("config resolves");
    assert_eq!(cfg.verbosity, 3);
}
