//! SQL response cleaning shared by every provider back-end: strip
//! reasoning/thinking tags, strip markdown code fences, keep only the first
//! SELECT-family paragraph, and truncate at the first semicolon.

/// Cleans a raw SQL response from a provider into a single statement.
#[must_use]
pub fn clean_sql(raw: &str) -> String {
    let mut sql = strip_tag_block(raw, "think");
    sql = strip_tag_block(&sql, "reasoning");

    sql = sql.replace("```sql\n", "").replace("```sql", "");
    sql = sql.replace("```\n", "").replace("```", "");

    sql = sql.trim().to_string();

    if let Some(idx) = sql.find("\n\n") {
        let first = sql[..idx].to_string();
        let first_upper = first.trim().to_uppercase();
        if starts_with_select_family(&first_upper) {
            sql = first;
        }
    }

    if let Some(idx) = sql.find(';') {
        sql = format!("{};", &sql[..idx]);
    }

    sql.trim().to_string()
}

fn starts_with_select_family(upper: &str) -> bool {
    ["SELECT", "WITH", "INSERT", "UPDATE", "DELETE", "CREATE"]
        .iter()
        .any(|kw| upper.starts_with(kw))
}

/// Removes a `<tag>...</tag>` block (case-insensitive, across newlines) by
/// scanning for the lowercase-normalized open/close markers.
fn strip_tag_block(text: &str, tag: &str) -> String {
    let lower = text.to_lowercase();
    let open = format!("<{tag}>");
    let close = format!("</{tag}>");

    let Some(start) = lower.find(&open) else {
        return text.to_string();
    };
    let Some(close_rel) = lower[start..].find(&close) else {
        return text.to_string();
    };
    let end = start + close_rel + close.len();

    let mut out = String::with_capacity(text.len());
    out.push_str(&text[..start]);
    out.push_str(&text[end..]);
    out
}

#[cfg(test)]
mod tests {
    use super::clean_sql;

    #[test]
    fn strips_code_fences() {
        let raw = "```sql\nSELECT 1;\n```";
        assert_eq!(clean_sql(raw), "SELECT 1;");
    }

    #[test]
    fn strips_reasoning_tags() {
        let raw = "<reasoning>thinking about it</reasoning>SELECT 1;";
        assert_eq!(clean_sql(raw), "SELECT 1;");
    }

    #[test]
    fn truncates_at_first_semicolon() {
        let raw = "SELECT 1; SELECT 2;";
        assert_eq!(clean_sql(raw), "SELECT 1;");
    }

    #[test]
    fn drops_trailing_prose_paragraph() {
        let raw = "SELECT 1\n\nThis query returns one row.";
        assert_eq!(clean_sql(raw), "SELECT 1");
    }

    #[test]
    fn drops_trailing_paragraph_even_with_noise_word_inside_sql() {
        let raw = "SELECT * FROM compounds WHERE name NOT LIKE 'placebo%'\n\nThis excludes placebo rows.";
        assert_eq!(clean_sql(raw), "SELECT * FROM compounds WHERE name NOT LIKE 'placebo%'");
    }

    #[test]
    fn leaves_leading_prose_without_a_blank_line_intact() {
        let raw = "Please filter WITHOUT duplicates.\n\nSELECT * FROM compounds;";
        assert_eq!(
            clean_sql(raw),
            "Please filter WITHOUT duplicates.\n\nSELECT * FROM compounds;"
        );
    }
}
