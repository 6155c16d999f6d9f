//! `chembldb-query`: a natural-language-to-SQL query runner for a ChEMBL
//! SQLite database, driven by an iterative prompt-refinement loop across
//! three LLM roles (prompt-writer, SQL-writer, judge).

use std::process::ExitCode;

use chembldb_query::{
    config::RunConfig,
    controller,
    error::AppError,
    iteration::Iteration,
    providers::AIProvider,
    schema::{self, SystemPrompt},
    stage::StageGuard,
};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> ExitCode {
    let cfg = match RunConfig::load() {
        Ok(cfg) => cfg,
        Err(err) => {
            eprintln!("chembldb-query: {err}");
            return ExitCode::FAILURE;
        }
    };

    init_tracing(cfg.verbosity);

    let _stage = StageGuard::enter("INIT");

    match run(&cfg).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(stage = %crate::stage::current_stage(), error = %err, "run failed");
            eprintln!("chembldb-query: {err}");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(verbosity: u8) {
    let filter = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter));
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

async fn run(cfg: &RunConfig) -> Result<(), AppError> {
    let schema_docs = schema::load_or_regenerate(
        &cfg.db_path,
        &cfg.schema_docs_path,
        cfg.schema_sample_rows,
        cfg.schema_max_cell_len,
    )?;
    let sp = SystemPrompt::build(&schema_docs, cfg.prompt_hints.as_deref());
    info!(stage = %crate::stage::current_stage(), hash = sp.hash(), "system prompt assembled");

    let run_id = cfg
        .run_label
        .clone()
        .unwrap_or_else(|| std::process::id().to_string());

    if cfg.dry_run {
        return run_dry(cfg, &sp).await;
    }

    tokio::select! {
        outcome = controller::run(cfg, &sp, &run_id) => {
            match outcome? {
                Some(outcome) => present(cfg, &run_id, &outcome),
                None => {
                    println!("no iterations ran (max-retries=0)");
                    Ok(())
                }
            }
        }
        () = ctrl_c() => {
            warn!(stage = %crate::stage::current_stage(), "interrupted by user");
            std::process::exit(1);
        }
    }
}

async fn ctrl_c() {
    if tokio::signal::ctrl_c().await.is_err() {
        // If the signal handler itself fails to install, never return: the
        // sibling branch of the `select!` is the only way this run ends.
        std::future::pending::<()>().await;
    }
}

async fn run_dry(cfg: &RunConfig, sp: &SystemPrompt) -> Result<(), AppError> {
    println!("{}", sp.text());
    println!("--- dry run: generating UP_1 and SQL_1 only, no DB access or file writes ---");

    let sql_model = cfg.sql_model.clone().or_else(|| cfg.model.clone());
    let judge_model = cfg.judge_model.clone().or_else(|| cfg.model.clone());

    let judge_provider = chembldb_query::providers::build_provider(&cfg.provider, judge_model.as_deref(), cfg)?;
    let messages = vec![
        chembldb_query::models::ChatMessage::system(sp.text()),
        chembldb_query::models::ChatMessage::user(format!("<UQ>\n{}\n</UQ>", cfg.question)),
    ];
    let up = judge_provider
        .generate_text(&messages, cfg.judge_temperature, 2000)
        .await
        .unwrap_or_else(|| cfg.question.clone());
    println!("UP_1:\n{up}");

    let sql_provider = chembldb_query::providers::build_provider(&cfg.provider, sql_model.as_deref(), cfg)?;
    let sql_messages = vec![
        chembldb_query::models::ChatMessage::system(sp.text()),
        chembldb_query::models::ChatMessage::user(format!("<UQ>\n{}\n</UQ>\n<UP_1>\n{up}\n</UP_1>", cfg.question)),
    ];
    let sql = sql_provider
        .generate_sql(&cfg.question, "", Some(&sql_messages))
        .await
        .unwrap_or_default();
    println!("SQL_1:\n{sql}");

    Ok(())
}

fn present(cfg: &RunConfig, run_id: &str, outcome: &controller::RunOutcome) -> Result<(), AppError> {
    let Some(winner) = outcome.winning_iteration() else {
        println!("all {} retries exhausted without a satisfying result", cfg.max_retries);
        return Ok(());
    };

    println!(
        "stopped at iteration {} (judge score: {})",
        winner.n,
        winner
            .judge_score
            .map_or_else(|| "n/a".to_string(), |s| format!("{s:.2}"))
    );

    render_output(cfg, winner)?;

    if matches!(cfg.format.as_str(), "csv") || cfg.output_file.is_some() {
        write_output_file(cfg, run_id, winner)?;
    }

    Ok(())
}

fn render_output(cfg: &RunConfig, winner: &Iteration) -> Result<(), AppError> {
    match cfg.format.as_str() {
        "json" => {
            let rows: Vec<serde_json::Value> = winner
                .res_table
                .rows
                .iter()
                .map(|row| {
                    serde_json::Value::Object(
                        winner
                            .res_table
                            .columns
                            .iter()
                            .zip(row.iter())
                            .map(|(col, cell)| (col.clone(), serde_json::Value::String(cell.clone())))
                            .collect(),
                    )
                })
                .collect();
            let body = serde_json::to_string_pretty(&rows)
                .map_err(|err| AppError::Config(format!("failed to render JSON output: {err}")))?;
            println!("{body}");
        }
        "csv" => println!("{}", winner.res_table.to_csv()),
        _ => print_table(&winner.res_table),
    }
    Ok(())
}

fn print_table(table: &chembldb_query::executor::ResultTable) {
    println!("{}", table.columns.join(" | "));
    println!("{}", vec!["---"; table.columns.len()].join(" | "));
    for row in &table.rows {
        println!("{}", row.join(" | "));
    }
    println!("({} rows)", table.row_count());
}

fn write_output_file(cfg: &RunConfig, run_id: &str, winner: &Iteration) -> Result<(), AppError> {
    let path = cfg
        .output_file
        .clone()
        .unwrap_or_else(|| std::path::PathBuf::from(format!("{}_{run_id}.csv", cfg.output_base)));
    std::fs::write(&path, winner.res_table.to_csv())?;
    info!(stage = %crate::stage::current_stage(), path = %path.display(), "wrote result CSV");
    Ok(())
}
