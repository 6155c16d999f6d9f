//! Minimal legacy prompt synthesis used by a provider's `generate_sql` when
//! no prior conversation is supplied by the controller.
//!
//! The controller always supplies a conversation (§4.1), so this path only
//! matters for direct/manual provider use (e.g. in tests).

use crate::models::ChatMessage;

const SYSTEM_PROMPT: &str = "You are a SQL expert for a chemistry database called ChEMBLdb.\n\
Generate ONLY valid SQLITE SQL queries. Do not include explanations or markdown.\n\n\
CRITICAL RULES:\n\
1. Return ONLY the SQL query - no explanations, no markdown, no ```sql``` blocks\n\
2. Only generate SELECT queries (no INSERT/UPDATE/DELETE/DROP)\n\
3. Prefer explicit joins and CTEs over nested subqueries where it aids clarity";

/// Builds a minimal two-message conversation for a one-off SQL generation
/// call that was not routed through the iteration controller.
#[must_use]
pub fn legacy_sql_messages(question: &str, schema_docs: &str) -> Vec<ChatMessage> {
    let user_prompt = format!(
        "DATABASE SCHEMA:\n{schema_docs}\n\nUSER QUESTION: {question}\n\nGenerate the SQL query:"
    );
    vec![
        ChatMessage::system(SYSTEM_PROMPT),
        ChatMessage::user(user_prompt),
    ]
}
