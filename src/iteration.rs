//! Iteration records, history rendering, filter-profile text, and the
//! unrequested-`LIMIT` stripper.

use regex::Regex;
use std::sync::LazyLock;

use crate::{
    executor::ResultTable,
    summarizer::{ResMode, ResultSummary},
};

/// One completed iteration of the prompt-refinement loop.
///
/// Immutable once constructed; the controller only ever appends new
/// `Iteration`s to its history, never mutates an existing one.
#[derive(Debug, Clone)]
pub struct Iteration {
    /// 1-based iteration number.
    pub n: usize,
    /// The refined user prompt for this iteration.
    pub up: String,
    /// The generated (and cleaned/stripped) SQL for this iteration.
    pub sql: String,
    /// The model id that produced `sql`.
    pub sql_model: String,
    /// Row count of the executed result, or 0 on execution failure.
    pub res_row_count: usize,
    /// Column names of the executed result.
    pub res_columns: Vec<String>,
    /// The raw materialized result (empty on execution failure). Kept
    /// separately from `res_summary`, which is what the judge actually sees
    /// and may be truncated or sampled.
    pub res_table: ResultTable,
    /// The rendered result summary (full CSV or sample rows).
    pub res_summary: ResultSummary,
    /// The execution error message, if the query failed or timed out.
    pub res_error: Option<String>,
    /// The judge's raw response text.
    pub judge_text: String,
    /// The model id that produced `judge_text`.
    pub judge_model: String,
    /// Parsed judge score, when parsing succeeded.
    pub judge_score: Option<f64>,
    /// Parsed judge decision, when parsing succeeded.
    pub judge_decision: Option<bool>,
}

impl Iteration {
    /// Whether this iteration's judge verdict should stop the loop:
    /// `score >= threshold`, or `decision == YES` with no score to
    /// contradict it.
    #[must_use]
    pub fn satisfies(&self, threshold: f64) -> bool {
        match (self.judge_decision, self.judge_score) {
            (_, Some(score)) if score >= threshold => true,
            (Some(true), None) => true,
            _ => false,
        }
    }

    fn render(&self) -> String {
        let res_block = render_res_block(self);
        format!(
            "<ITERATION {n}>\n<UP_{n}>\n{up}\n</UP_{n}>\n<SQL_{n}>\n{sql}\n</SQL_{n}>\n{res_block}<J_{n}>\n{judge}\n</J_{n}>\n</ITERATION {n}>",
            n = self.n,
            up = self.up,
            sql = self.sql,
            judge = self.judge_text,
        )
    }
}

fn render_res_block(iteration: &Iteration) -> String {
    let mut body = String::new();
    body.push_str(&format!("<RES_{}>\n", iteration.n));
    if let Some(err) = &iteration.res_error {
        body.push_str(&format!("error: {err}\n"));
    } else {
        body.push_str(&format!(
            "res_mode: {}\nrow_count: {}\ncolumns: {}\n",
            match iteration.res_summary.mode {
                ResMode::Full => "full",
                ResMode::Sample => "sample",
            },
            iteration.res_row_count,
            iteration.res_columns.join(", "),
        ));
        if let Some(csv) = &iteration.res_summary.full_csv {
            body.push_str(csv);
        } else {
            for row in &iteration.res_summary.samples {
                body.push_str(&format!("[{}] {}\n", row.label, row.cells.join(", ")));
            }
            if let Some(notes) = &iteration.res_summary.notes {
                body.push_str(notes);
                body.push('\n');
            }
        }
    }
    body.push_str(&format!("</RES_{}>\n", iteration.n));
    body
}

/// Renders the last `window` entries of `history` as a `<HISTORY>` block, or
/// `<HISTORY/>` when `history` is empty or `window` is 0.
#[must_use]
pub fn render_history(history: &[Iteration], window: usize) -> String {
    if history.is_empty() || window == 0 {
        return "<HISTORY/>".to_string();
    }
    let start_idx = history.len().saturating_sub(window);
    let slice = &history[start_idx..];
    let from = slice.first().map_or(0, |it| it.n);
    let to = slice.last().map_or(0, |it| it.n);
    let body: String = slice.iter().map(Iteration::render).collect::<Vec<_>>().join("\n");
    format!("<HISTORY from=\"{from}\" to=\"{to}\">\n{body}\n</HISTORY>")
}

/// Fixed guidance text for the `strict` filter profile: the prompt-writer
/// should add explicit domain filters for common ambiguity points.
pub const FILTER_PROFILE_STRICT: &str = "Apply strict filtering: when the question implies a \
status or approval concept (e.g. \"approved drugs\"), add an explicit WHERE filter for it (such \
as a max_phase or approval-status column) rather than leaving it to the SQL-writer's judgment. \
Prefer being explicit about ambiguous filters over being permissive.";

/// Fixed guidance text for the `relaxed` filter profile: ambiguous filters
/// are left to the SQL-writer.
pub const FILTER_PROFILE_RELAXED: &str = "Apply relaxed filtering: leave ambiguous domain filters \
(such as approval status or phase) to the SQL-writer's judgment rather than imposing them in the \
restated prompt.";

/// Returns the fixed filter-profile text block for `profile` (`"strict"` or
/// anything else, which is treated as `relaxed`).
#[must_use]
pub fn filter_profile_text(profile: &str) -> &'static str {
    if profile.eq_ignore_ascii_case("strict") {
        FILTER_PROFILE_STRICT
    } else {
        FILTER_PROFILE_RELAXED
    }
}

static CAP_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?i)\blimit\s+\d+\b",
        r"(?i)\btop\s+\d+\b",
        r"(?i)\bfirst\s+\d+\b",
        r"(?i)\blast\s+\d+\b",
        r"(?i)\bat\s+most\s+\d+\b",
        r"(?i)\bno\s+more\s+than\s+\d+\b",
        r"(?i)\bmaximum\s+\d+\b",
        r"(?i)\bminimum\s+\d+\b",
        r"(?i)\bonly\s+\d+\b",
        r"(?i)\breturn\s+\d+\b",
        r"(?i)\bshow\s+\d+\b",
        r"(?i)\brows?\s+\d+\b",
        r"(?i)\bsample\s+\d+\b",
    ]
    .iter()
    .map(|pattern| Regex::new(pattern).expect("fixed cap-pattern regex is valid"))
    .collect()
});

static TRAILING_LIMIT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)\s+LIMIT\s+\d+(\s+OFFSET\s+\d+)?\s*;?\s*$").expect("fixed trailing-LIMIT regex is valid")
});

/// Whether `text` (typically `UQ \n UP_n`) explicitly asks for a row cap via
/// any of the fixed phrasing patterns (`limit N`, `top N`, `first N`, ...).
#[must_use]
pub fn mentions_explicit_cap(text: &str) -> bool {
    CAP_PATTERNS.iter().any(|re| re.is_match(text))
}

/// Removes a trailing `LIMIT n [OFFSET m]` clause from `sql` when `context`
/// (typically `UQ \n UP_n`) does not explicitly ask for a row cap. Returns
/// `sql` unmodified otherwise — this is the LIMIT-stripper safety property.
#[must_use]
pub fn strip_unrequested_limit(sql: &str, context: &str) -> String {
    if mentions_explicit_cap(context) {
        return sql.to_string();
    }
    TRAILING_LIMIT.replace(sql, "").trim_end().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::summarizer::ResultSummary;

    fn summary() -> ResultSummary {
        ResultSummary {
            row_count: 0,
            columns: Vec::new(),
            mode: ResMode::Sample,
            full_csv: None,
            samples: Vec::new(),
            notes: None,
        }
    }

    fn sample_iteration(n: usize) -> Iteration {
        Iteration {
            n,
            up: format!("up-{n}"),
            sql: format!("SELECT {n}"),
            sql_model: "model-a".to_string(),
            res_row_count: 0,
            res_columns: Vec::new(),
            res_table: ResultTable::default(),
            res_summary: summary(),
            res_error: None,
            judge_text: format!("judge-{n}"),
            judge_model: "model-b".to_string(),
            judge_score: Some(0.5),
            judge_decision: Some(false),
        }
    }

    #[test]
    fn empty_history_renders_self_closing_tag() {
        assert_eq!(render_history(&[], 3), "<HISTORY/>");
    }

    #[test]
    fn history_window_limits_rendered_entries() {
        let history: Vec<Iteration> = (1..=5).map(sample_iteration).collect();
        let rendered = render_history(&history, 2);
        assert!(rendered.contains("from=\"4\" to=\"5\""));
        assert!(!rendered.contains("<ITERATION 3>"));
        assert!(rendered.contains("<ITERATION 4>"));
        assert!(rendered.contains("<ITERATION 5>"));
    }

    #[test]
    fn satisfies_when_score_meets_threshold() {
        let mut it = sample_iteration(1);
        it.judge_score = Some(0.9);
        it.judge_decision = Some(false);
        assert!(it.satisfies(0.85));
    }

    #[test]
    fn satisfies_when_yes_with_no_score() {
        let mut it = sample_iteration(1);
        it.judge_score = None;
        it.judge_decision = Some(true);
        assert!(it.satisfies(0.85));
    }

    #[test]
    fn does_not_satisfy_on_low_score_no_decision() {
        let mut it = sample_iteration(1);
        it.judge_score = Some(0.2);
        it.judge_decision = None;
        assert!(!it.satisfies(0.85));
    }

    #[test]
    fn limit_stripper_leaves_sql_untouched_when_cap_requested() {
        let sql = "SELECT * FROM t LIMIT 100";
        let context = "show me the top 5 results";
        assert_eq!(strip_unrequested_limit(sql, context), sql);
    }

    #[test]
    fn limit_stripper_removes_trailing_limit_when_unrequested() {
        let sql = "SELECT * FROM t LIMIT 100";
        let context = "drugs for cancer";
        assert_eq!(strip_unrequested_limit(sql, context), "SELECT * FROM t");
    }

    #[test]
    fn limit_stripper_is_noop_without_trailing_limit() {
        let sql = "SELECT * FROM t WHERE x = 1";
        let context = "drugs for cancer";
        assert_eq!(strip_unrequested_limit(sql, context), sql);
    }

    #[test]
    fn mentions_explicit_cap_matches_each_fixed_pattern() {
        for phrase in [
            "limit 5", "top 10", "first 3", "last 2", "at most 4", "no more than 9",
            "maximum 6", "minimum 1", "only 7", "return 8", "show 2", "rows 3", "sample 20",
        ] {
            assert!(mentions_explicit_cap(phrase), "expected match for {phrase:?}");
        }
    }
}
