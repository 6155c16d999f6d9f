//! Result summarization: decides whether the judge sees the full query
//! result or a stratified sample, based on a rough token budget.
//!
//! Full results are embedded verbatim when they plausibly fit the model's
//! context window; otherwise a sample is chosen with a preference for
//! spreading across publication-year-like and target-class-like columns,
//! falling back to evenly-spaced positional sampling with head/middle/tail
//! labels.

use crate::executor::ResultTable;

/// Rough characters-per-token ratio used for all token estimates here. Not
/// tokenizer-accurate; a deliberately crude heuristic, matching the
/// original's `len(text) // 4`.
const CHARS_PER_TOKEN: usize = 4;

/// Fraction of the model's context window considered usable at all, leaving
/// headroom for the system prompt, history, and the judge's own output.
const CONTEXT_SAFETY_FACTOR: f64 = 0.9;

/// Of the tokens left after accounting for fixed scaffolding, the share
/// reserved for sampled row data.
const SAMPLE_SHARE: f64 = 0.6;

/// Minimum number of sampled rows the summarizer tries to hit by backing off
/// cell truncation before accepting a smaller sample.
const MIN_SAMPLE_ROWS: usize = 200;

/// Hard ceiling on sampled rows regardless of how much token budget is
/// available, matching the original's `max_samples`.
const MAX_SAMPLE_ROWS: usize = 1000;

const CELL_TRUNCATION_LADDER: &[usize] = &[60, 50, 40, 30];

/// Whether the judge sees the whole table or a sample of it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResMode {
    /// The full result set, rendered as CSV.
    Full,
    /// A stratified or evenly-spaced sample, with positional labels.
    Sample,
}

/// One sampled row plus the label describing where it came from.
#[derive(Debug, Clone)]
pub struct SampledRow {
    /// e.g. `"head (row 2)"`, `"middle (row 41)"`, `"tail (row 998)"`.
    pub label: String,
    /// The row's cells, in `ResultTable::columns` order, truncated per the
    /// chosen cell-length ladder step.
    pub cells: Vec<String>,
}

/// The rendered summary handed to the judge.
#[derive(Debug, Clone)]
pub struct ResultSummary {
    /// Total rows in the underlying result, before any sampling.
    pub row_count: usize,
    /// Column names, aligned with each row's cells.
    pub columns: Vec<String>,
    /// `Full` or `Sample`.
    pub mode: ResMode,
    /// The full table rendered as CSV, when `mode == Full`.
    pub full_csv: Option<String>,
    /// The chosen sample rows, when `mode == Sample`.
    pub samples: Vec<SampledRow>,
    /// Fixed advisory text appended when `mode == Sample`, telling the judge
    /// not to penalize truncation or missing strata it cannot see.
    pub notes: Option<String>,
}

const SAMPLE_NOTES: &str = "This is a sample of the full result set, not the complete output. \
Rows are labeled by their position (head, middle, or tail) in the original ordering. \
Do not penalize the query for apparent gaps, truncated cells, or strata absent from this \
sample: they may simply be unsampled, not missing from the true result.";

/// Summarizes `table` for a judge whose provider context window is
/// `context_window` tokens and whose fixed per-call scaffolding (system
/// prompt, history, instructions) is estimated at `scaffold_tokens`.
#[must_use]
pub fn summarize(table: &ResultTable, context_window: usize, scaffold_tokens: usize) -> ResultSummary {
    if table.row_count() == 0 {
        return ResultSummary {
            row_count: 0,
            columns: table.columns.clone(),
            mode: ResMode::Sample,
            full_csv: None,
            samples: Vec::new(),
            notes: Some(SAMPLE_NOTES.to_string()),
        };
    }

    let full_csv = table.to_csv();
    let full_tokens = full_csv.len() / CHARS_PER_TOKEN;
    let usable_tokens = (context_window as f64 * CONTEXT_SAFETY_FACTOR) as usize;
    let available_tokens = usable_tokens.saturating_sub(scaffold_tokens);

    if full_tokens <= available_tokens {
        return ResultSummary {
            row_count: table.row_count(),
            columns: table.columns.clone(),
            mode: ResMode::Full,
            full_csv: Some(full_csv),
            samples: Vec::new(),
            notes: None,
        };
    }

    let row_token_budget = (available_tokens as f64 * SAMPLE_SHARE) as usize;
    let samples = build_sample(table, row_token_budget);

    ResultSummary {
        row_count: table.row_count(),
        columns: table.columns.clone(),
        mode: ResMode::Sample,
        full_csv: None,
        samples,
        notes: Some(SAMPLE_NOTES.to_string()),
    }
}

fn build_sample(table: &ResultTable, row_token_budget: usize) -> Vec<SampledRow> {
    for &max_cell_len in CELL_TRUNCATION_LADDER {
        let row_token_cost = estimate_row_tokens(table, max_cell_len);
        if row_token_cost == 0 {
            continue;
        }
        let affordable_rows = (row_token_budget / row_token_cost).max(1).min(MAX_SAMPLE_ROWS);
        if affordable_rows >= MIN_SAMPLE_ROWS.min(table.row_count()) || max_cell_len == *CELL_TRUNCATION_LADDER.last().unwrap() {
            return sample_rows(table, affordable_rows.min(table.row_count()), max_cell_len);
        }
    }
    sample_rows(table, 1, *CELL_TRUNCATION_LADDER.last().unwrap())
}

fn estimate_row_tokens(table: &ResultTable, max_cell_len: usize) -> usize {
    let Some(row) = table.rows.first() else {
        return 0;
    };
    let rendered: usize = row.iter().map(|c| c.len().min(max_cell_len) + 1).sum();
    (rendered / CHARS_PER_TOKEN).max(1)
}

/// Groups rows by the stratification column pair (when present) and picks a
/// proportional share from each group; otherwise falls back to evenly-spaced
/// positional sampling with head/middle/tail augmentation.
fn sample_rows(table: &ResultTable, sample_size: usize, max_cell_len: usize) -> Vec<SampledRow> {
    let n = table.row_count();
    if sample_size >= n {
        return table
            .rows
            .iter()
            .enumerate()
            .map(|(i, row)| labeled_row(i, n, row, max_cell_len))
            .collect();
    }

    let strat_col = find_strat_column(&table.columns);
    let mut indices = if let Some(col_idx) = strat_col {
        stratified_indices(table, col_idx, sample_size)
    } else {
        evenly_spaced_indices(n, sample_size)
    };

    if sample_size <= 9 {
        for edge in [0, 1, 2, n.saturating_sub(3), n.saturating_sub(2), n.saturating_sub(1)] {
            if edge < n {
                indices.push(edge);
            }
        }
    }

    indices.sort_unstable();
    indices.dedup();

    indices
        .into_iter()
        .map(|i| labeled_row(i, n, &table.rows[i], max_cell_len))
        .collect()
}

fn find_strat_column(columns: &[String]) -> Option<usize> {
    columns.iter().position(|c| {
        let lower = c.to_lowercase();
        lower.contains("publication_year") || lower.contains("target_class")
    })
}

fn stratified_indices(table: &ResultTable, col_idx: usize, sample_size: usize) -> Vec<usize> {
    use std::collections::BTreeMap;

    let mut groups: BTreeMap<String, Vec<usize>> = BTreeMap::new();
    for (i, row) in table.rows.iter().enumerate() {
        let key = row.get(col_idx).cloned().unwrap_or_default();
        groups.entry(key).or_default().push(i);
    }

    let group_count = groups.len().max(1);
    let per_group = (sample_size / group_count).max(1);
    let mut indices = Vec::with_capacity(sample_size);

    for members in groups.values() {
        let take = per_group.min(members.len());
        indices.extend(evenly_spaced_subset(members, take));
    }

    if indices.len() > sample_size {
        indices.truncate(sample_size);
    } else if indices.len() < sample_size {
        let remaining: Vec<usize> = (0..table.row_count())
            .filter(|i| !indices.contains(i))
            .collect();
        let deficit = sample_size - indices.len();
        indices.extend(evenly_spaced_subset(&remaining, deficit.min(remaining.len())));
    }

    indices
}

fn evenly_spaced_subset(members: &[usize], take: usize) -> Vec<usize> {
    if take == 0 || members.is_empty() {
        return Vec::new();
    }
    if take >= members.len() {
        return members.to_vec();
    }
    let step = members.len() as f64 / take as f64;
    (0..take)
        .map(|i| members[((i as f64 * step) as usize).min(members.len() - 1)])
        .collect()
}

fn evenly_spaced_indices(n: usize, sample_size: usize) -> Vec<usize> {
    if sample_size == 0 || n == 0 {
        return Vec::new();
    }
    if sample_size >= n {
        return (0..n).collect();
    }
    let step = n as f64 / sample_size as f64;
    (0..sample_size)
        .map(|i| ((i as f64 * step) as usize).min(n - 1))
        .collect()
}

fn labeled_row(index: usize, row_count: usize, row: &[String], max_cell_len: usize) -> SampledRow {
    let position = if index < 3 {
        "head"
    } else if index >= row_count.saturating_sub(3) {
        "tail"
    } else {
        "middle"
    };
    SampledRow {
        label: format!("{position} (row {index})"),
        cells: row.iter().map(|c| truncate_cell(c, max_cell_len)).collect(),
    }
}

fn truncate_cell(value: &str, max_len: usize) -> String {
    if value.chars().count() <= max_len {
        value.to_string()
    } else {
        let truncated: String = value.chars().take(max_len.saturating_sub(3)).collect();
        format!("{truncated}...")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table_of(rows: usize) -> ResultTable {
        ResultTable {
            columns: vec!["id".to_string(), "value".to_string()],
            rows: (0..rows)
                .map(|i| vec![i.to_string(), format!("value-{i}")])
                .collect(),
        }
    }

    #[test]
    fn empty_result_defaults_to_sample_mode_with_no_rows() {
        let table = table_of(0);
        let summary = summarize(&table, 100_000, 1000);
        assert_eq!(summary.row_count, 0);
        assert_eq!(summary.mode, ResMode::Sample);
        assert!(summary.samples.is_empty());
    }

    #[test]
    fn small_result_is_kept_in_full_mode() {
        let table = table_of(10);
        let summary = summarize(&table, 100_000, 1000);
        assert_eq!(summary.mode, ResMode::Full);
        assert!(summary.full_csv.is_some());
    }

    #[test]
    fn huge_result_falls_back_to_sample_mode() {
        let table = table_of(500_000);
        let summary = summarize(&table, 8_000, 2_000);
        assert_eq!(summary.mode, ResMode::Sample);
        assert!(!summary.samples.is_empty());
        assert!(summary.samples.len() < table.row_count());
    }

    #[test]
    fn sample_labels_mark_head_and_tail_rows() {
        let table = table_of(500_000);
        let summary = summarize(&table, 8_000, 2_000);
        assert!(summary.samples.iter().any(|r| r.label.starts_with("head")));
        assert!(summary.samples.iter().any(|r| r.label.starts_with("tail")));
    }

    #[test]
    fn stratified_sampling_prefers_target_class_column() {
        let mut table = ResultTable {
            columns: vec!["target_class".to_string(), "value".to_string()],
            rows: Vec::new(),
        };
        for i in 0..100_000 {
            let class = if i % 2 == 0 { "kinase" } else { "gpcr" };
            table.rows.push(vec![class.to_string(), i.to_string()]);
        }
        let summary = summarize(&table, 8_000, 2_000);
        assert_eq!(summary.mode, ResMode::Sample);
        let kinase_present = summary.samples.iter().any(|r| r.cells[0] == "kinase");
        let gpcr_present = summary.samples.iter().any(|r| r.cells[0] == "gpcr");
        assert!(kinase_present && gpcr_present);
    }
}
