//! The iteration controller: the prompt-writer → SQL-writer → executor →
//! summarizer → judge → stop-or-continue loop.
//!
//! Single-threaded and sequential by construction: each iteration depends
//! causally on the one before it. Owns the rolling history, per-role model
//! rotation, and the stop decision.

use std::{fs, path::Path};

use tracing::{info, warn};

use crate::{
    config::RunConfig,
    error::AppError,
    executor,
    iteration::{filter_profile_text, render_history, strip_unrequested_limit, Iteration},
    judge::parse_judge_output,
    models::ChatMessage,
    providers::build_provider,
    scheduler::{build_schedule, model_for_attempt, SchedulePolicy},
    schema::SystemPrompt,
    stage::StageGuard,
    summarizer::summarize,
};

const UP_TASK_PREAMBLE: &str = "You are restating the user's question as a precise, standalone, \
explicit prompt. Respond with plain text only: no markdown, no code fences, no preamble or \
sign-off, just the restated question.";

const SQL_TASK_PREAMBLE: &str = "Write a single read-only SQLite SELECT statement (CTEs are \
allowed) that answers the restated question below against the schema documented in the system \
prompt. Use explicit joins. Do not add a LIMIT clause unless the question explicitly asks for a \
capped or top-N number of rows. Respond with SQL only.";

/// A conservative default context window assumed for the judge/prompt-
/// writer role when the back-end does not advertise one (only OpenRouter's
/// catalog exposes per-model context lengths, and fetching it would require
/// an extra network round trip the controller does not make mid-loop).
const ASSUMED_JUDGE_CONTEXT_WINDOW: usize = 128_000;

/// Estimated fixed token cost of the scaffolding (SP + task + UQ + history +
/// UP + SQL) surrounding the result summary in a judge prompt.
const ASSUMED_SCAFFOLD_TOKENS: usize = 4_000;

/// The outcome of a completed run: the full iteration history plus the
/// iteration whose judge verdict stopped the loop, if any.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    /// Every iteration attempted, in order.
    pub history: Vec<Iteration>,
    /// The iteration that satisfied the stop criteria, if the loop stopped
    /// rather than exhausting `max_retries`.
    pub stopped_at: Option<usize>,
}

impl RunOutcome {
    /// The iteration that stopped the loop, if any.
    #[must_use]
    pub fn winning_iteration(&self) -> Option<&Iteration> {
        let n = self.stopped_at?;
        self.history.iter().find(|it| it.n == n)
    }
}

/// Runs the full iteration loop to completion (stop or exhaustion).
///
/// Returns `Ok(None)` when `max_retries == 0` (a valid boundary input: the
/// controller returns immediately without any provider or DB call).
///
/// # Errors
/// Propagates `AppError::InvariantViolation` on SP drift (fatal), and
/// `AppError::Provider` when prompt-writer generation exhausts every retry
/// with no prior `UP` to fall back to (fatal per §4.6 step 2).
pub async fn run(cfg: &RunConfig, sp: &SystemPrompt, run_id: &str) -> Result<Option<RunOutcome>, AppError> {
    let _stage = StageGuard::enter("INIT");

    if cfg.max_retries == 0 {
        info!(stage = %crate::stage::current_stage(), "max_retries is 0; returning without any provider or database call");
        return Ok(None);
    }

    let (sql_models, judge_models) = filter_model_lists_for_context(cfg).await?;
    let sql_fixed_model = cfg.sql_model.clone().or_else(|| cfg.model.clone());
    let judge_fixed_model = cfg.judge_model.clone().or_else(|| cfg.model.clone());

    let sql_schedule = build_schedule(
        &sql_models,
        SchedulePolicy::from_name(&cfg.sql_model_cycle),
        cfg.max_retries as usize,
    );
    let judge_schedule = build_schedule(
        &judge_models,
        SchedulePolicy::from_name(&cfg.judge_model_cycle),
        cfg.max_retries as usize,
    );

    let mut history: Vec<Iteration> = Vec::new();
    let mut previous_up: Option<String> = None;
    let mut stopped_at: Option<usize> = None;

    for n in 1..=cfg.max_retries as usize {
        let _iter_stage = StageGuard::enter(format!("ITER_{n}"));
        sp.assert_unchanged()?;

        let sql_model = if sql_schedule.is_empty() {
            sql_fixed_model.clone().unwrap_or_default()
        } else {
            model_for_attempt(&sql_schedule, n, 0, "").to_string()
        };

        let up = generate_up(cfg, sp, &history, n, &judge_schedule, judge_fixed_model.as_deref(), previous_up.as_deref()).await?;
        previous_up = Some(up.clone());

        sp.assert_unchanged()?;

        let sql_model_opt = if sql_model.is_empty() { None } else { Some(sql_model.as_str()) };
        let sql_provider = build_provider(&cfg.provider, sql_model_opt, cfg)?;
        let raw_sql = {
            let _stage = StageGuard::enter(format!("SQL_{n}"));
            let conversation = build_sql_conversation(sp, cfg, &history, &up);
            sql_provider.generate_sql(&cfg.question, "", Some(&conversation)).await
        };
        let sql = match raw_sql {
            Some(text) => {
                let context = format!("{}\n{up}", cfg.question);
                if cfg.strip_unrequested_limit {
                    strip_unrequested_limit(&text, &context)
                } else {
                    text
                }
            }
            None => {
                warn!(stage = %crate::stage::current_stage(), iteration = n, "SQL-writer returned no response; skipping iteration");
                continue;
            }
        };

        let (table, res_error) = {
            let _stage = StageGuard::enter(format!("RES_{n}"));
            let db_path = cfg.db_path.clone();
            let sql_owned = sql.clone();
            let timeout = cfg.query_timeout;
            // rusqlite is blocking; run it off the async worker thread so a slow
            // query doesn't stall other runtime work.
            match tokio::task::spawn_blocking(move || executor::run_query(&db_path, &sql_owned, timeout)).await {
                Ok(Ok(table)) => (table, None),
                Ok(Err(err)) => (executor::ResultTable::default(), Some(err.to_string())),
                Err(join_err) => (executor::ResultTable::default(), Some(format!("query task panicked: {join_err}"))),
            }
        };

        let summary = summarize(&table, ASSUMED_JUDGE_CONTEXT_WINDOW, ASSUMED_SCAFFOLD_TOKENS);

        if cfg.save_intermediate {
            persist_intermediate(cfg, run_id, n, &table)?;
        }

        sp.assert_unchanged()?;
        let (judge_text, judge_model, verdict) = run_judge(
            cfg,
            sp,
            &history,
            n,
            &up,
            &sql,
            res_error.as_deref(),
            &summary,
            &judge_schedule,
            judge_fixed_model.as_deref(),
            run_id,
        )
        .await;

        let iteration = Iteration {
            n,
            up,
            sql,
            sql_model,
            res_row_count: table.row_count(),
            res_columns: table.columns.clone(),
            res_table: table,
            res_summary: summary,
            res_error,
            judge_text,
            judge_model,
            judge_score: verdict.map(|v| v.score),
            judge_decision: verdict.map(|v| v.decision),
        };

        let satisfied = iteration.satisfies(cfg.judge_score_threshold);
        history.push(iteration);

        if satisfied {
            stopped_at = Some(n);
            break;
        }
    }

    Ok(Some(RunOutcome { history, stopped_at }))
}

/// Resolves the SQL-writer and judge/prompt-writer model candidate lists,
/// applying the OpenRouter context-length filter (§4.3) when `cfg.provider`
/// is `openrouter` and a role's list is non-empty.
///
/// OpenRouter is the only back-end whose catalog exposes per-model context
/// lengths; every other provider's model identifiers are opaque strings, so
/// their lists pass through unfiltered. A filter that would empty an
/// originally non-empty list is a configuration error (taxonomy 1): no
/// candidate model meets `--min-context`, so the run cannot proceed.
async fn filter_model_lists_for_context(cfg: &RunConfig) -> Result<(Vec<String>, Vec<String>), AppError> {
    if !cfg.provider.eq_ignore_ascii_case("openrouter") {
        return Ok((cfg.sql_model_list.clone(), cfg.judge_model_list.clone()));
    }
    let Some(api_key) = cfg.openrouter_api_key.clone() else {
        return Ok((cfg.sql_model_list.clone(), cfg.judge_model_list.clone()));
    };

    let client = crate::providers::openrouter::OpenRouterClient::new(
        api_key,
        cfg.openrouter_base_url.clone(),
        crate::providers::openrouter::DEFAULT_MODEL.to_string(),
        cfg.http_timeout,
    )
    .map_err(AppError::Config)?;

    let allowed = client
        .models_with_min_context(cfg.min_context)
        .await
        .map_err(|err| AppError::Config(format!("failed to fetch OpenRouter model catalog: {err}")))?;

    let sql_models = filter_candidates(&cfg.sql_model_list, &allowed, "sql-model-list")?;
    let judge_models = filter_candidates(&cfg.judge_model_list, &allowed, "judge-model-list")?;
    Ok((sql_models, judge_models))
}

fn filter_candidates(candidates: &[String], allowed: &[String], flag_name: &str) -> Result<Vec<String>, AppError> {
    if candidates.is_empty() {
        return Ok(Vec::new());
    }
    let filtered: Vec<String> = candidates
        .iter()
        .filter(|model| allowed.iter().any(|id| id == *model))
        .cloned()
        .collect();
    if filtered.is_empty() {
        return Err(AppError::Config(format!(
            "no model in --{flag_name} meets the configured --min-context; all candidates were filtered out"
        )));
    }
    Ok(filtered)
}

async fn generate_up(
    cfg: &RunConfig,
    sp: &SystemPrompt,
    history: &[Iteration],
    n: usize,
    judge_schedule: &[String],
    judge_fixed_model: Option<&str>,
    previous_up: Option<&str>,
) -> Result<String, AppError> {
    let _stage = StageGuard::enter(format!("UP_{n}"));

    let filter_block = format!("<FILTER_PROFILE>\n{}\n</FILTER_PROFILE>", filter_profile_text(&cfg.filter_profile));
    let history_block = render_history(history, cfg.history_window);
    let user_content = format!(
        "<TASK>\n{UP_TASK_PREAMBLE}\n</TASK>\n<UQ>\n{}\n</UQ>\n{filter_block}\n{history_block}",
        cfg.question
    );
    let messages = vec![ChatMessage::system(sp.text()), ChatMessage::user(user_content)];

    for attempt in 0..cfg.judge_call_retries as usize {
        let model = model_for_attempt(judge_schedule, n, attempt, judge_fixed_model.unwrap_or_default());
        let model_opt = if model.is_empty() { None } else { Some(model) };
        let provider = build_provider(&cfg.provider, model_opt, cfg)?;
        if let Some(response) = provider.generate_text(&messages, cfg.judge_temperature, 2000).await {
            let trimmed = response.trim();
            if !trimmed.is_empty() {
                return Ok(trimmed.to_string());
            }
        }
        warn!(stage = %crate::stage::current_stage(), iteration = n, attempt, "prompt-writer call returned no usable response");
    }

    if let Some(up) = previous_up {
        warn!(stage = %crate::stage::current_stage(), iteration = n, "reusing previous UP after exhausting prompt-writer retries");
        return Ok(up.to_string());
    }

    Err(AppError::Provider(
        "prompt-writer exhausted all retries with no prior UP to fall back to".to_string(),
    ))
}

fn build_sql_conversation(sp: &SystemPrompt, cfg: &RunConfig, history: &[Iteration], up: &str) -> Vec<ChatMessage> {
    let history_block = render_history(history, cfg.history_window);
    let user_content = format!(
        "<TASK>\n{SQL_TASK_PREAMBLE}\n</TASK>\n<UQ>\n{}\n</UQ>\n{history_block}\n<UP_{}>\n{up}\n</UP_{}>",
        cfg.question,
        history.len() + 1,
        history.len() + 1,
    );
    vec![ChatMessage::system(sp.text()), ChatMessage::user(user_content)]
}

#[allow(clippy::too_many_arguments)]
async fn run_judge(
    cfg: &RunConfig,
    sp: &SystemPrompt,
    history: &[Iteration],
    n: usize,
    up: &str,
    sql: &str,
    res_error: Option<&str>,
    summary: &crate::summarizer::ResultSummary,
    judge_schedule: &[String],
    judge_fixed_model: Option<&str>,
    run_id: &str,
) -> (String, String, Option<crate::judge::JudgeVerdict>) {
    let _stage = StageGuard::enter(format!("J_{n}"));

    let history_block = render_history(history, cfg.history_window);
    let res_block = render_res_for_judge(n, res_error, summary);
    let user_content = format!(
        "<TASK>\nEvaluate whether the SQL result answers the user's question. Respond with a \
single JSON object: {{\"analysis\": string, \"score\": number in [0,1], \"decision\": \"YES\"|\"NO\"}}.\n\
</TASK>\n<UQ>\n{}\n</UQ>\n{history_block}\n<UP_{n}>\n{up}\n</UP_{n}>\n<SQL_{n}>\n{sql}\n</SQL_{n}>\n{res_block}",
        cfg.question,
    );
    let messages = vec![ChatMessage::system(sp.text()), ChatMessage::user(user_content)];

    let mut last_text = String::new();
    let mut last_model = String::new();

    for attempt in 0..cfg.judge_call_retries as usize {
        let model = model_for_attempt(judge_schedule, n, attempt, judge_fixed_model.unwrap_or_default());
        let model_opt = if model.is_empty() { None } else { Some(model) };
        let Ok(provider) = build_provider(&cfg.provider, model_opt, cfg) else {
            continue;
        };
        let Some(response) = provider.generate_text(&messages, cfg.judge_temperature, 1000).await else {
            warn!(stage = %crate::stage::current_stage(), iteration = n, attempt, "judge call returned no response");
            continue;
        };

        last_text = response.clone();
        last_model = model.to_string();

        if let Some(verdict) = parse_judge_output(&response, cfg.judge_score_threshold) {
            return (response, last_model, Some(verdict));
        }

        dump_malformed_judge_output(run_id, n, attempt, &response);
    }

    let verdict = if last_text.is_empty() {
        None
    } else {
        parse_judge_output(&last_text, cfg.judge_score_threshold)
    };
    (last_text, last_model, verdict)
}

fn render_res_for_judge(n: usize, res_error: Option<&str>, summary: &crate::summarizer::ResultSummary) -> String {
    if let Some(err) = res_error {
        return format!("<RES_{n}>\nerror: {err}\n</RES_{n}>");
    }
    let mut body = format!(
        "<RES_{n}>\nres_mode: {}\nrow_count: {}\ncolumns: {}\n",
        match summary.mode {
            crate::summarizer::ResMode::Full => "full",
            crate::summarizer::ResMode::Sample => "sample",
        },
        summary.row_count,
        summary.columns.join(", "),
    );
    if let Some(csv) = &summary.full_csv {
        body.push_str(csv);
    } else {
        for row in &summary.samples {
            body.push_str(&format!("[{}] {}\n", row.label, row.cells.join(", ")));
        }
        if let Some(notes) = &summary.notes {
            body.push_str(notes);
            body.push('\n');
        }
    }
    body.push_str(&format!("</RES_{n}>"));
    body
}

fn dump_malformed_judge_output(run_id: &str, n: usize, attempt: usize, text: &str) {
    let dir = Path::new("logs/judge_malformed");
    if let Err(err) = fs::create_dir_all(dir) {
        warn!(stage = %crate::stage::current_stage(), error = %err, "failed to create judge_malformed log directory");
        return;
    }
    let path = dir.join(format!("{run_id}_iter{n}_attempt{attempt}.txt"));
    if let Err(err) = fs::write(&path, text) {
        warn!(stage = %crate::stage::current_stage(), error = %err, path = %path.display(), "failed to persist malformed judge output");
    }
}

fn persist_intermediate(cfg: &RunConfig, run_id: &str, n: usize, table: &executor::ResultTable) -> Result<(), AppError> {
    fs::create_dir_all(&cfg.intermediate_dir)?;
    let path = cfg
        .intermediate_dir
        .join(format!("{}_{run_id}_iter{n}.csv", cfg.output_base));
    fs::write(path, table.to_csv())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::filter_candidates;

    #[test]
    fn empty_candidate_list_passes_through_unfiltered() {
        let result = filter_candidates(&[], &["model-a".to_string()], "sql-model-list").unwrap();
        assert!(result.is_empty());
    }

    #[test]
    fn keeps_only_candidates_present_in_the_allowed_catalog() {
        let candidates = vec!["model-a".to_string(), "model-b".to_string()];
        let allowed = vec!["model-b".to_string()];
        let result = filter_candidates(&candidates, &allowed, "sql-model-list").unwrap();
        assert_eq!(result, vec!["model-b".to_string()]);
    }

    #[test]
    fn fails_fast_when_every_candidate_is_filtered_out() {
        let candidates = vec!["model-a".to_string()];
        let allowed = vec!["model-b".to_string()];
        let err = filter_candidates(&candidates, &allowed, "sql-model-list").unwrap_err();
        assert!(matches!(err, crate::error::AppError::Config(_)));
    }
}
