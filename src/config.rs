//! Configuration management for the application.
//!
//! Unlike a long-running service, this is a single-shot CLI: configuration
//! is resolved once, at startup, from `clap`-derived flags layered over
//! environment variables (loaded from `.env` via `dotenvy` first). The
//! result, [`RunConfig`], is treated as frozen for the lifetime of a run —
//! nothing downstream mutates it.

use std::{
    io::{IsTerminal, Read},
    path::PathBuf,
    time::Duration,
};

use clap::Parser;

use crate::error::AppError;

/// Natural-language-to-SQL query runner against a ChEMBL SQLite database.
#[derive(Debug, Parser)]
#[command(name = "chembldb-query", version, about, long_about = None)]
pub struct CliArgs {
    /// The natural-language question to answer. Read from stdin (until EOF)
    /// when omitted and stdin is not a terminal.
    pub question: Option<String>,

    /// LLM back-end: `auto`, `openai`, `anthropic`, `google`, `openrouter`,
    /// `cerebras`, `deepseek`, `zai`, or `local`. Defaults to `auto`, or to
    /// `TEXT2SQL_PROVIDER` when that environment variable is set.
    #[arg(long)]
    pub provider: Option<String>,

    /// Explicit model id override, applied to the SQL-writer and
    /// judge/prompt-writer roles unless a role-specific `--*-model-list` is
    /// also given.
    #[arg(long)]
    pub model: Option<String>,

    /// Fixed model id for the SQL-writer role (no rotation).
    #[arg(long, conflicts_with = "sql_model_list")]
    pub sql_model: Option<String>,

    /// Comma-separated model rotation list for the SQL-writer role.
    #[arg(long, value_delimiter = ',', conflicts_with = "sql_model")]
    pub sql_model_list: Vec<String>,

    /// Model rotation policy for the SQL-writer role: `orderly`, `random`,
    /// or `cicada`.
    #[arg(long, default_value = "orderly")]
    pub sql_model_cycle: String,

    /// Fixed model id for the combined judge/prompt-writer role (no
    /// rotation).
    #[arg(long, conflicts_with = "judge_model_list")]
    pub judge_model: Option<String>,

    /// Comma-separated model rotation list for the combined judge/
    /// prompt-writer role.
    #[arg(long, value_delimiter = ',', conflicts_with = "judge_model")]
    pub judge_model_list: Vec<String>,

    /// Model rotation policy for the judge/prompt-writer role: `orderly`,
    /// `random`, or `cicada`.
    #[arg(long, default_value = "orderly")]
    pub judge_model_cycle: String,

    /// Path to the ChEMBL SQLite database file.
    #[arg(long, default_value = "chembl.sqlite")]
    pub db_path: PathBuf,

    /// Maximum number of prompt/SQL/execute/judge iterations.
    #[arg(long, default_value_t = 10)]
    pub max_retries: u32,

    /// Wall-clock timeout in seconds for a single SQL execution.
    #[arg(long, default_value_t = 600)]
    pub timeout: u64,

    /// Number of most recent iterations kept in the rendered history.
    #[arg(long, default_value_t = 3)]
    pub history_window: usize,

    /// Minimum judge score at which `decision` must be `YES`.
    #[arg(long, default_value_t = 0.85)]
    pub judge_score_threshold: f64,

    /// Malformed-judge-output retries before falling back to the last
    /// parseable attempt.
    #[arg(long, default_value_t = 3)]
    pub judge_call_retries: u32,

    /// Path to the generated/cached schema documentation file.
    #[arg(long, default_value = "schema_docs.md")]
    pub schema_docs_path: PathBuf,

    /// Number of sample rows shown per table in the schema docs.
    #[arg(long, default_value_t = 3)]
    pub schema_sample_rows: usize,

    /// Maximum characters shown per sample cell before truncation.
    #[arg(long, default_value_t = 60)]
    pub schema_max_cell_len: usize,

    /// Optional path to a free-text prompt-hints file, embedded in the
    /// system prompt's `<PROMPT_HINTS>` block when present.
    #[arg(long)]
    pub prompt_hints_path: Option<PathBuf>,

    /// Row/column filter profile: `strict` or `relaxed`.
    #[arg(long, default_value = "relaxed")]
    pub filter_profile: String,

    /// Minimum context length (tokens) required when filtering the
    /// OpenRouter model catalog.
    #[arg(long, default_value_t = 8000)]
    pub min_context: u32,

    /// Whether an unrequested `LIMIT` clause is stripped from generated SQL.
    #[arg(long, default_value_t = true)]
    pub strip_unrequested_limit: bool,

    /// Base filename (without extension) for the final output file.
    #[arg(long, default_value = "query_results")]
    pub output_base: String,

    /// Explicit output file path, overriding `{output-base}_{run-id}.csv`.
    #[arg(long)]
    pub output_file: Option<PathBuf>,

    /// Directory intermediate per-iteration CSVs are written to.
    #[arg(long, default_value = "intermediate")]
    pub intermediate_dir: PathBuf,

    /// Whether per-iteration intermediate CSVs are kept.
    #[arg(long, default_value_t = false)]
    pub save_intermediate: bool,

    /// Sampling temperature for prompt-writer/SQL-writer calls.
    #[arg(long, default_value_t = 1.0)]
    pub temperature: f32,

    /// Sampling temperature for judge calls.
    #[arg(long, default_value_t = 0.1)]
    pub judge_temperature: f32,

    /// Output format: `table`, `csv`, or `json`.
    #[arg(long, default_value = "table")]
    pub format: String,

    /// Optional run label; sanitized and used in output/log filenames.
    #[arg(long)]
    pub run_label: Option<String>,

    /// Equivalent to `--format csv`, deriving `run-label` from the current
    /// timestamp when `--run-label` is not separately given.
    #[arg(long, default_value_t = false)]
    pub auto: bool,

    /// Resolve configuration and print the assembled system prompt without
    /// contacting any provider or touching the database.
    #[arg(long, default_value_t = false)]
    pub dry_run: bool,

    /// Increase log verbosity; repeatable (`-v`, `-vv`, `-vvv`).
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Per-HTTP-call timeout in seconds, applied to every provider client.
    #[arg(long, default_value_t = 180)]
    pub http_timeout: u64,
}

/// Resolved, immutable configuration for a single run.
///
/// Combines parsed CLI flags with provider credentials and base-URL
/// overrides read from the environment (after `.env` has been loaded).
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// The natural-language question being answered.
    pub question: String,
    /// Requested provider name, or `"auto"`.
    pub provider: String,
    /// Shared model override applied when a role has no fixed model or
    /// rotation list of its own.
    pub model: Option<String>,
    /// Fixed SQL-writer model, when no rotation list is given.
    pub sql_model: Option<String>,
    /// SQL-writer model rotation list.
    pub sql_model_list: Vec<String>,
    /// SQL-writer rotation policy name.
    pub sql_model_cycle: String,
    /// Fixed judge/prompt-writer model, when no rotation list is given.
    pub judge_model: Option<String>,
    /// Judge/prompt-writer model rotation list.
    pub judge_model_list: Vec<String>,
    /// Judge/prompt-writer rotation policy name.
    pub judge_model_cycle: String,
    /// Path to the ChEMBL SQLite database.
    pub db_path: PathBuf,
    /// Maximum iterations.
    pub max_retries: u32,
    /// Per-query SQL execution timeout.
    pub query_timeout: Duration,
    /// History rendering window (iterations).
    pub history_window: usize,
    /// Judge pass/fail score threshold.
    pub judge_score_threshold: f64,
    /// Malformed-judge-output retry budget.
    pub judge_call_retries: u32,
    /// Schema docs cache path.
    pub schema_docs_path: PathBuf,
    /// Sample rows per table in schema docs.
    pub schema_sample_rows: usize,
    /// Max sample-cell length in schema docs.
    pub schema_max_cell_len: usize,
    /// Row/column filter profile.
    pub filter_profile: String,
    /// Minimum context length for OpenRouter catalog filtering.
    pub min_context: u32,
    /// Whether to strip an unrequested `LIMIT` clause.
    pub strip_unrequested_limit: bool,
    /// Output base filename.
    pub output_base: String,
    /// Explicit output file override.
    pub output_file: Option<PathBuf>,
    /// Intermediate CSV directory.
    pub intermediate_dir: PathBuf,
    /// Whether intermediate CSVs are retained.
    pub save_intermediate: bool,
    /// Prompt/SQL-writer sampling temperature.
    pub temperature: f32,
    /// Judge sampling temperature.
    pub judge_temperature: f32,
    /// Output format.
    pub format: String,
    /// Optional prompt-hints file contents, pre-read.
    pub prompt_hints: Option<String>,
    /// Sanitized run label, if any was given or derived from `--auto`.
    pub run_label: Option<String>,
    /// Dry-run flag.
    pub dry_run: bool,
    /// Verbosity tier (0, 1, 2, 3+).
    pub verbosity: u8,
    /// Per-HTTP-call timeout shared by all provider clients.
    pub http_timeout: Duration,

    /// Anthropic API key, if set.
    pub anthropic_api_key: Option<String>,
    /// Anthropic base URL override.
    pub anthropic_base_url: String,
    /// OpenAI API key, if set.
    pub openai_api_key: Option<String>,
    /// OpenAI base URL override.
    pub openai_base_url: String,
    /// Google API key, if set.
    pub google_api_key: Option<String>,
    /// Google base URL override.
    pub google_base_url: String,
    /// OpenRouter API key, if set.
    pub openrouter_api_key: Option<String>,
    /// OpenRouter base URL override.
    pub openrouter_base_url: String,
    /// Cerebras API key, if set.
    pub cerebras_api_key: Option<String>,
    /// Cerebras base URL override.
    pub cerebras_base_url: String,
    /// DeepSeek API key, if set.
    pub deepseek_api_key: Option<String>,
    /// DeepSeek base URL override.
    pub deepseek_base_url: String,
    /// Z.AI API key, if set.
    pub zai_api_key: Option<String>,
    /// Z.AI base URL override.
    pub zai_base_url: String,
    /// Local inference server base URL.
    pub local_base_url: String,
}

impl RunConfig {
    /// Loads `.env` (if present), parses CLI flags, and assembles the
    /// resolved [`RunConfig`].
    ///
    /// # Errors
    /// Returns `AppError::Config` if no question is given on the command
    /// line and stdin is a terminal (nothing to read), or if the hints file
    /// is named but cannot be read.
    pub fn load() -> Result<Self, AppError> {
        let _dotenv_path = dotenvy::dotenv();
        let args = CliArgs::parse();
        Self::from_args(args)
    }

    /// Assembles a [`RunConfig`] from already-parsed CLI arguments. Exposed
    /// separately from [`RunConfig::load`] so tests can construct one
    /// without going through `std::env::args`.
    ///
    /// # Errors
    /// Returns `AppError::Config` if no question is available (neither a
    /// positional argument nor piped stdin), or if the hints file is named
    /// but cannot be read.
    pub fn from_args(args: CliArgs) -> Result<Self, AppError> {
        let question = match args.question {
            Some(q) => q,
            None => read_question_from_stdin()?,
        };

        let prompt_hints = match &args.prompt_hints_path {
            Some(path) => Some(std::fs::read_to_string(path).map_err(|err| {
                AppError::Config(format!("failed to read hints file {}: {err}", path.display()))
            })?),
            None => None,
        };

        let provider = args
            .provider
            .or_else(|| env_nonempty("TEXT2SQL_PROVIDER"))
            .unwrap_or_else(|| "auto".to_string());

        let format = if args.auto {
            "csv".to_string()
        } else {
            args.format
        };

        let run_label = args
            .run_label
            .or_else(|| args.auto.then(timestamp_run_label))
            .map(|label| sanitize_run_label(&label));

        Ok(Self {
            question,
            provider,
            model: args.model,
            sql_model: args.sql_model,
            sql_model_list: args.sql_model_list,
            sql_model_cycle: args.sql_model_cycle,
            judge_model: args.judge_model,
            judge_model_list: args.judge_model_list,
            judge_model_cycle: args.judge_model_cycle,
            db_path: args.db_path,
            max_retries: args.max_retries,
            query_timeout: Duration::from_secs(args.timeout),
            history_window: args.history_window,
            judge_score_threshold: args.judge_score_threshold,
            judge_call_retries: args.judge_call_retries,
            schema_docs_path: args.schema_docs_path,
            schema_sample_rows: args.schema_sample_rows,
            schema_max_cell_len: args.schema_max_cell_len,
            filter_profile: args.filter_profile,
            min_context: args.min_context,
            strip_unrequested_limit: args.strip_unrequested_limit,
            output_base: args.output_base,
            output_file: args.output_file,
            intermediate_dir: args.intermediate_dir,
            save_intermediate: args.save_intermediate,
            temperature: args.temperature,
            judge_temperature: args.judge_temperature,
            format,
            prompt_hints,
            run_label,
            dry_run: args.dry_run,
            verbosity: args.verbose,
            http_timeout: Duration::from_secs(args.http_timeout),

            anthropic_api_key: env_nonempty("ANTHROPIC_API_KEY"),
            anthropic_base_url: env_or("ANTHROPIC_BASE_URL", "https://api.anthropic.com"),
            openai_api_key: env_nonempty("OPENAI_API_KEY"),
            openai_base_url: env_or("OPENAI_BASE_URL", "https://api.openai.com/v1"),
            google_api_key: env_nonempty("GEMINI_API_KEY"),
            google_base_url: env_or(
                "GEMINI_BASE_URL",
                "https://generativelanguage.googleapis.com/v1beta",
            ),
            openrouter_api_key: env_nonempty("OPENROUTER_API_KEY"),
            openrouter_base_url: env_or("OPENROUTER_BASE_URL", "https://openrouter.ai/api/v1"),
            cerebras_api_key: env_nonempty("CEREBRAS_API_KEY"),
            cerebras_base_url: env_or("CEREBRAS_BASE_URL", "https://api.cerebras.ai/v1"),
            deepseek_api_key: env_nonempty("DEEPSEEK_API_KEY"),
            deepseek_base_url: env_or("DEEPSEEK_BASE_URL", "https://api.deepseek.com"),
            zai_api_key: env_nonempty("ZAI_API_KEY"),
            zai_base_url: env_or("ZAI_BASE_URL", "https://api.z.ai/api/paas/v4"),
            local_base_url: env_or("LOCAL_LLM_BASE_URL", crate::providers::local::DEFAULT_BASE_URL),
        })
    }
}

fn read_question_from_stdin() -> Result<String, AppError> {
    let mut stdin = std::io::stdin();
    if stdin.is_terminal() {
        return Err(AppError::Config(
            "no question given and stdin is a terminal; pass it as an argument or pipe it in"
                .to_string(),
        ));
    }
    let mut buf = String::new();
    stdin
        .read_to_string(&mut buf)
        .map_err(|err| AppError::Config(format!("failed to read question from stdin: {err}")))?;
    let trimmed = buf.trim();
    if trimmed.is_empty() {
        return Err(AppError::Config("no question received on stdin".to_string()));
    }
    Ok(trimmed.to_string())
}

/// Replaces runs of characters outside `[A-Za-z0-9_-]` with a single `_`,
/// then trims leading/trailing `_`. E.g. `abc/def!` -> `abc_def`.
#[must_use]
pub fn sanitize_run_label(label: &str) -> String {
    let mut out = String::with_capacity(label.len());
    let mut last_was_separator = false;
    for ch in label.chars() {
        if ch.is_ascii_alphanumeric() || ch == '_' || ch == '-' {
            out.push(ch);
            last_was_separator = false;
        } else if !last_was_separator {
            out.push('_');
            last_was_separator = true;
        }
    }
    out.trim_matches('_').to_string()
}

fn timestamp_run_label() -> String {
    chrono::Local::now().format("%Y%m%d_%H%M%S").to_string()
}

fn env_nonempty(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_or(key: &str, default: &str) -> String {
    env_nonempty(key).unwrap_or_else(|| default.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitizes_disallowed_characters_to_single_underscore() {
        assert_eq!(sanitize_run_label("abc/def!"), "abc_def");
    }

    #[test]
    fn leaves_already_clean_labels_untouched() {
        assert_eq!(sanitize_run_label("my-run_1"), "my-run_1");
    }

    #[test]
    fn collapses_runs_of_separators() {
        assert_eq!(sanitize_run_label("a   b"), "a_b");
    }

    #[test]
    fn trims_leading_and_trailing_separators() {
        assert_eq!(sanitize_run_label("!!abc!!"), "abc");
    }
}
