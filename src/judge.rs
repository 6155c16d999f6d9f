//! Judge-output parsing: extracts a `{"decision": "YES"|"NO", "score": f64,
//! "analysis": "..."}` object from a judge model's free-form text response.
//!
//! Models routinely wrap their JSON in a markdown fence or pad it with
//! commentary, so parsing strips an optional fence and then locates the
//! outermost `{...}` substring before decoding. The final fallback path (see
//! the controller's retry-exhausted branch) parses the last response text
//! exactly once and reuses the result for both the decision and score
//! fields, rather than parsing it twice and risking two divergent verdicts.

use serde::Deserialize;
use tracing::warn;

/// A parsed judge verdict.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct JudgeVerdict {
    /// Whether the judge decided the result satisfies the question.
    pub decision: bool,
    /// The judge's confidence score, in `[0.0, 1.0]`.
    pub score: f64,
}

#[derive(Debug, Deserialize)]
struct RawVerdict {
    decision: String,
    score: f64,
    analysis: String,
}

/// Parses `text` into a [`JudgeVerdict`], enforcing the `decision`/`score`
/// consistency invariant against `threshold`.
///
/// Returns `None` (with a `tracing::warn!` describing why) when:
/// - no JSON object can be located in `text`,
/// - the object doesn't deserialize into `{decision, score, analysis}`,
/// - `analysis` is present but empty or all-whitespace,
/// - `decision` isn't (case-insensitively) `"YES"` or `"NO"`,
/// - `score` falls outside `[0.0, 1.0]`, or
/// - `decision` and `score` disagree about `threshold` (e.g. `YES` with a
///   score below it): a malformed-contract response is treated as parse
///   failure rather than silently corrected.
#[must_use]
pub fn parse_judge_output(text: &str, threshold: f64) -> Option<JudgeVerdict> {
    let candidate = extract_json_object(text)?;

    let raw: RawVerdict = match serde_json::from_str(&candidate) {
        Ok(raw) => raw,
        Err(err) => {
            warn!(stage = %crate::stage::current_stage(), error = %err, "judge output did not deserialize into the expected shape");
            return None;
        }
    };

    if raw.analysis.trim().is_empty() {
        warn!(stage = %crate::stage::current_stage(), "judge output had an empty analysis field");
        return None;
    }

    let decision = match raw.decision.to_uppercase().as_str() {
        "YES" => true,
        "NO" => false,
        other => {
            warn!(stage = %crate::stage::current_stage(), decision = other, "judge decision was neither YES nor NO");
            return None;
        }
    };

    if !(0.0..=1.0).contains(&raw.score) {
        warn!(stage = %crate::stage::current_stage(), score = raw.score, "judge score fell outside [0, 1]");
        return None;
    }

    if decision && raw.score < threshold {
        warn!(
            stage = %crate::stage::current_stage(),
            score = raw.score,
            threshold,
            "judge said YES but score is below the acceptance threshold"
        );
        return None;
    }
    if !decision && raw.score >= threshold {
        warn!(
            stage = %crate::stage::current_stage(),
            score = raw.score,
            threshold,
            "judge said NO but score meets the acceptance threshold"
        );
        return None;
    }

    Some(JudgeVerdict {
        decision,
        score: raw.score,
    })
}

/// Strips an optional leading/trailing ` ```json ` or ` ``` ` fence, then
/// returns the substring spanning the first `{` to the last `}` in what
/// remains, if both exist in that order.
fn extract_json_object(text: &str) -> Option<String> {
    let stripped = strip_code_fence(text.trim());
    let start = stripped.find('{')?;
    let end = stripped.rfind('}')?;
    if end < start {
        return None;
    }
    Some(stripped[start..=end].to_string())
}

fn strip_code_fence(text: &str) -> &str {
    let text = text.trim();
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    let rest = rest.trim_start_matches(['\n', '\r']);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_json() {
        let verdict =
            parse_judge_output(r#"{"decision": "YES", "score": 0.9, "analysis": "matches the question"}"#, 0.85)
                .unwrap();
        assert!(verdict.decision);
        assert!((verdict.score - 0.9).abs() < f64::EPSILON);
    }

    #[test]
    fn strips_markdown_fence() {
        let text = "```json\n{\"decision\": \"NO\", \"score\": 0.2, \"analysis\": \"missing filter\"}\n```";
        let verdict = parse_judge_output(text, 0.85).unwrap();
        assert!(!verdict.decision);
    }

    #[test]
    fn locates_outermost_braces_amid_commentary() {
        let text = "Here is my verdict: {\"decision\": \"YES\", \"score\": 0.95, \"analysis\": \"looks right\"} \
            hope that helps!";
        let verdict = parse_judge_output(text, 0.85).unwrap();
        assert!(verdict.decision);
    }

    #[test]
    fn rejects_yes_below_threshold() {
        assert!(
            parse_judge_output(r#"{"decision": "YES", "score": 0.5, "analysis": "weak match"}"#, 0.85).is_none()
        );
    }

    #[test]
    fn rejects_no_at_or_above_threshold() {
        assert!(
            parse_judge_output(r#"{"decision": "NO", "score": 0.9, "analysis": "strong match"}"#, 0.85).is_none()
        );
    }

    #[test]
    fn rejects_score_out_of_range() {
        assert!(
            parse_judge_output(r#"{"decision": "YES", "score": 1.4, "analysis": "great"}"#, 0.85).is_none()
        );
    }

    #[test]
    fn rejects_text_with_no_braces() {
        assert!(parse_judge_output("no json here", 0.85).is_none());
    }

    #[test]
    fn rejects_empty_analysis() {
        assert!(
            parse_judge_output(r#"{"decision": "YES", "score": 0.9, "analysis": "   "}"#, 0.85).is_none()
        );
    }

    #[test]
    fn rejects_unrecognized_decision_value() {
        assert!(parse_judge_output(r#"{"decision": "MAYBE", "score": 0.9}"#, 0.85).is_none());
    }
}
