//! Schema-doc generation and system-prompt assembly.
//!
//! Table/column/sample-row introspection runs via `sqlite_master` and
//! `PRAGMA table_info`; the assembled system prompt wraps the result in the
//! `<SP>` tag format and hashes it to detect drift.

use std::{fs, path::Path};

use rusqlite::{Connection, OpenFlags};
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use crate::error::AppError;

const ABOUT_TEXT: &str = "This database is ChEMBL, a manually curated database of bioactive \
molecules with drug-like properties: compounds, targets, assays, and the bioactivity \
measurements linking them. You will be used in different roles across this run. First, as a \
prompt-writer, restating the user's question precisely as a standalone, explicit prompt. Later, \
as a SQL-writer, producing a single read-only SQLite SELECT statement against the schema \
documented below. Follow the task instructions given in the user message under <TASK>.";

/// The immutable system prompt (SP): schema docs plus optional hints,
/// wrapped in the `<SP>` tag format and hashed at construction.
#[derive(Debug, Clone)]
pub struct SystemPrompt {
    text: String,
    hash: String,
}

impl SystemPrompt {
    /// Assembles the `<SP>` block from `schema_docs` and an optional
    /// `prompt_hints` file body, and records its SHA-256 hash.
    #[must_use]
    pub fn build(schema_docs: &str, prompt_hints: Option<&str>) -> Self {
        let hints_block = match prompt_hints {
            Some(hints) if !hints.trim().is_empty() => {
                format!("\n<PROMPT_HINTS>\n{hints}\n</PROMPT_HINTS>\n")
            }
            _ => String::new(),
        };
        let text = format!(
            "<SP>\n<ABOUT>\n{ABOUT_TEXT}\n</ABOUT>\n\n<DATABASE_SCHEMA_DOCS>\n{schema_docs}\n</DATABASE_SCHEMA_DOCS>\n{hints_block}</SP>"
        );
        let hash = sha256_hex(&text);
        Self { text, hash }
    }

    /// The assembled `<SP>` text, sent verbatim as the system message.
    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    /// The SHA-256 hex digest recorded at construction.
    #[must_use]
    pub fn hash(&self) -> &str {
        &self.hash
    }

    /// Recomputes the hash of `text()` and compares it with the hash
    /// recorded at construction. Any mismatch is a fatal invariant
    /// violation (the SP is assumed immutable for the run).
    ///
    /// # Errors
    /// Returns `AppError::InvariantViolation` on a hash mismatch.
    pub fn assert_unchanged(&self) -> Result<(), AppError> {
        let current = sha256_hex(&self.text);
        if current == self.hash {
            Ok(())
        } else {
            Err(AppError::InvariantViolation(format!(
                "system prompt changed during run: expected {}, got {current}",
                self.hash
            )))
        }
    }
}

fn sha256_hex(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Loads schema docs from `schema_docs_path`, regenerating them from
/// `db_path` first if the doc is missing or older than the database file.
///
/// # Errors
/// Returns `AppError::Config` if neither the DB nor an existing schema doc
/// can be found, and propagates I/O/SQLite errors from generation/reads.
pub fn load_or_regenerate(
    db_path: &Path,
    schema_docs_path: &Path,
    sample_rows: usize,
    max_cell_len: usize,
) -> Result<String, AppError> {
    if !db_path.exists() {
        return if schema_docs_path.exists() {
            warn!(
                stage = %crate::stage::current_stage(),
                db_path = %db_path.display(),
                "database file missing; using existing schema docs"
            );
            Ok(fs::read_to_string(schema_docs_path)?)
        } else {
            Err(AppError::Config(format!(
                "ChEMBL SQLite DB not found: {}",
                db_path.display()
            )))
        };
    }

    let should_regenerate = !schema_docs_path.exists() || is_stale(schema_docs_path, db_path);

    if should_regenerate {
        info!(stage = %crate::stage::current_stage(), "schema docs missing or stale; regenerating");
        generate_and_write(db_path, schema_docs_path, sample_rows, max_cell_len)
    } else {
        Ok(fs::read_to_string(schema_docs_path)?)
    }
}

fn is_stale(schema_docs_path: &Path, db_path: &Path) -> bool {
    let doc_mtime = fs::metadata(schema_docs_path).and_then(|m| m.modified());
    let db_mtime = fs::metadata(db_path).and_then(|m| m.modified());
    match (doc_mtime, db_mtime) {
        (Ok(doc), Ok(db)) => doc < db,
        _ => {
            warn!(stage = %crate::stage::current_stage(), "could not compare schema docs mtime to DB mtime");
            false
        }
    }
}

/// Regenerates the schema document from `db_path` and writes it to
/// `output_path`, returning the generated text.
///
/// # Errors
/// Propagates SQLite and I/O failures.
pub fn generate_and_write(
    db_path: &Path,
    output_path: &Path,
    sample_rows: usize,
    max_cell_len: usize,
) -> Result<String, AppError> {
    let docs = generate_schema_docs(db_path, sample_rows, max_cell_len)?;
    if let Some(parent) = output_path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    fs::write(output_path, &docs)?;
    Ok(docs)
}

/// Enumerates `db_path`'s user tables (excluding `sqlite_%` internal
/// tables), their columns (name/type/nullability/PK flag via `PRAGMA
/// table_info`), and up to `sample_rows` sample rows per table (cells
/// truncated to `max_cell_len`), rendered as a markdown document.
///
/// # Errors
/// Propagates any SQLite failure opening the connection or querying tables.
pub fn generate_schema_docs(
    db_path: &Path,
    sample_rows: usize,
    max_cell_len: usize,
) -> Result<String, AppError> {
    let conn = Connection::open_with_flags(db_path, OpenFlags::SQLITE_OPEN_READ_ONLY)?;
    let tables = list_tables(&conn)?;

    let mut lines = Vec::new();
    lines.push("# ChEMBL SQLite schema (auto-generated)".to_string());
    lines.push(format!("Database: {}", db_path.display()));
    lines.push(format!("Tables: {}", tables.len()));
    lines.push(String::new());

    for table in &tables {
        lines.push(format!("## Table: {table}"));
        match describe_columns(&conn, table) {
            Ok(columns) if !columns.is_empty() => {
                lines.push("Columns:".to_string());
                for col in columns {
                    lines.push(format!("- {col}"));
                }
            }
            Ok(_) => lines.push("Columns: (none)".to_string()),
            Err(err) => {
                lines.push(format!("ERROR: failed to read columns: {err}"));
                lines.push(String::new());
                continue;
            }
        }

        if sample_rows > 0 {
            match sample_table_rows(&conn, table, sample_rows, max_cell_len) {
                Ok(Some((cols, rows))) => {
                    lines.push(String::new());
                    lines.push("Sample rows:".to_string());
                    lines.push(format!("| {} |", cols.join(" | ")));
                    lines.push(format!("|{}|", vec!["---"; cols.len()].join("|")));
                    for row in rows {
                        lines.push(format!("| {} |", row.join(" | ")));
                    }
                }
                Ok(None) => {
                    lines.push(String::new());
                    lines.push("Sample rows: (none)".to_string());
                }
                Err(err) => {
                    lines.push(String::new());
                    lines.push(format!("Sample rows ERROR: {err}"));
                }
            }
        }
        lines.push(String::new());
    }

    Ok(lines.join("\n"))
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn list_tables(conn: &Connection) -> Result<Vec<String>, AppError> {
    let mut stmt = conn.prepare(
        "SELECT name FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
    )?;
    let rows = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn describe_columns(conn: &Connection, table: &str) -> Result<Vec<String>, AppError> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", quote_ident(table)))?;
    let rows = stmt
        .query_map([], |row| {
            let name: String = row.get(1)?;
            let col_type: String = row.get(2)?;
            let notnull: i64 = row.get(3)?;
            let pk: i64 = row.get(5)?;
            let mut extras = Vec::new();
            extras.push(if notnull != 0 { "NOT NULL" } else { "NULL" });
            if pk != 0 {
                extras.push("PK");
            }
            Ok(format!("{name} {col_type} {}", extras.join(" ")).trim().to_string())
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

type SampleRows = (Vec<String>, Vec<Vec<String>>);

fn sample_table_rows(
    conn: &Connection,
    table: &str,
    sample_rows: usize,
    max_cell_len: usize,
) -> Result<Option<SampleRows>, AppError> {
    let query = format!("SELECT * FROM {} LIMIT {sample_rows}", quote_ident(table));
    let mut stmt = conn.prepare(&query)?;
    let column_count = stmt.column_count();
    let columns: Vec<String> = (0..column_count)
        .map(|i| stmt.column_name(i).unwrap_or("?").to_string())
        .collect();

    let rows = stmt
        .query_map([], |row| {
            let mut cells = Vec::with_capacity(column_count);
            for i in 0..column_count {
                let value: rusqlite::types::Value = row.get(i)?;
                cells.push(truncate_cell(&value, max_cell_len));
            }
            Ok(cells)
        })?
        .collect::<Result<Vec<_>, _>>()?;

    if rows.is_empty() {
        Ok(None)
    } else {
        Ok(Some((columns, rows)))
    }
}

/// Renders a SQLite value as a truncated, newline-escaped display string,
/// matching `_truncate_cell` in the original.
#[must_use]
pub fn truncate_cell(value: &rusqlite::types::Value, max_len: usize) -> String {
    let raw = match value {
        rusqlite::types::Value::Null => "NULL".to_string(),
        rusqlite::types::Value::Integer(i) => i.to_string(),
        rusqlite::types::Value::Real(f) => f.to_string(),
        rusqlite::types::Value::Text(s) => s.clone(),
        rusqlite::types::Value::Blob(b) => format!("<{} bytes>", b.len()),
    };
    let escaped = raw.replace('\n', "\\n");
    if escaped.len() > max_len {
        let keep = max_len.saturating_sub(3);
        format!("{}...", &escaped[..keep.min(escaped.len())])
    } else {
        escaped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn hash_is_stable_across_rebuilds() {
        let a = SystemPrompt::build("tables go here", None);
        let b = SystemPrompt::build("tables go here", None);
        assert_eq!(a.hash(), b.hash());
    }

    #[test]
    fn assert_unchanged_passes_when_untouched() {
        let sp = SystemPrompt::build("schema", Some("hint"));
        assert!(sp.assert_unchanged().is_ok());
    }

    #[test]
    fn hints_block_omitted_when_absent() {
        let sp = SystemPrompt::build("schema", None);
        assert!(!sp.text().contains("<PROMPT_HINTS>"));
    }

    #[test]
    fn hints_block_present_when_given() {
        let sp = SystemPrompt::build("schema", Some("prefer joins"));
        assert!(sp.text().contains("<PROMPT_HINTS>\nprefer joins\n</PROMPT_HINTS>"));
    }

    #[test]
    fn generates_schema_docs_for_fresh_db() {
        let dir = tempdir().expect("tempdir");
        let db_path = dir.path().join("test.sqlite");
        let conn = Connection::open(&db_path).expect("open");
        conn.execute_batch(
            "CREATE TABLE molecule (id INTEGER PRIMARY KEY, name TEXT NOT NULL);
             INSERT INTO molecule (name) VALUES ('aspirin'), ('ibuprofen');",
        )
        .expect("seed");
        drop(conn);

        let docs = generate_schema_docs(&db_path, 3, 60).expect("generate");
        assert!(docs.contains("## Table: molecule"));
        assert!(docs.contains("aspirin"));
        assert!(docs.contains("PK"));
    }

    #[test]
    fn load_or_regenerate_creates_doc_when_missing() {
        let dir = tempdir().expect("tempdir");
        let db_path = dir.path().join("test.sqlite");
        let conn = Connection::open(&db_path).expect("open");
        conn.execute_batch("CREATE TABLE t (id INTEGER PRIMARY KEY);").expect("seed");
        drop(conn);

        let doc_path = dir.path().join("schema_docs.md");
        assert!(!doc_path.exists());
        let docs = load_or_regenerate(&db_path, &doc_path, 3, 60).expect("load");
        assert!(doc_path.exists());
        assert!(docs.contains("## Table: t"));
    }

    #[test]
    fn load_or_regenerate_leaves_fresh_doc_untouched() {
        let dir = tempdir().expect("tempdir");
        let db_path = dir.path().join("test.sqlite");
        let conn = Connection::open(&db_path).expect("open");
        conn.execute_batch("CREATE TABLE t (id INTEGER PRIMARY KEY);").expect("seed");
        drop(conn);

        let doc_path = dir.path().join("schema_docs.md");
        let first = load_or_regenerate(&db_path, &doc_path, 3, 60).expect("load");
        fs::write(&doc_path, format!("{first}\nmanually appended")).expect("write");
        let second = load_or_regenerate(&db_path, &doc_path, 3, 60).expect("load");
        assert!(second.contains("manually appended"));
    }
}
