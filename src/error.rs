//! Custom error types exposed across the application.
//!
//! The variants mirror the error taxonomy of the iteration controller: most
//! failures are per-call and are absorbed into `Option::None` or an
//! `Iteration`'s `res_error` field rather than propagated, so `AppError`
//! itself is reserved for init-time configuration failures and the two
//! fatal conditions (SP-hash drift, uncaught I/O/SQLite errors).

use thiserror::Error;

/// The primary error type for the application.
#[derive(Debug, Error)]
pub enum AppError {
    /// Error related to configuration loading, flag validation, or credential
    /// resolution. Fatal at init (taxonomy 1 in the error handling design).
    #[error("configuration error: {0}")]
    Config(String),

    /// Error from an external AI provider's API (HTTP failure, malformed
    /// response body, non-success status). Callers generally convert this
    /// into `None` rather than propagate it (taxonomy 2).
    #[error("provider error: {0}")]
    Provider(String),

    /// Network-level failure (timeout, connection refused) talking to a
    /// provider's API. Also generally absorbed into `None` by callers.
    #[error("network error: {0}")]
    Network(String),

    /// SQL execution failure (invalid SQL, runtime error, or a timeout
    /// surfaced by the executor). Recorded as `res_error`, not propagated
    /// (taxonomy 3).
    #[error("execution error: {0}")]
    Execution(String),

    /// Judge output failed to parse or violated the decision/score
    /// invariant. Internal signal consumed by the iteration controller's
    /// retry loop; never escapes to `main` except as "retries exhausted"
    /// (taxonomy 4).
    #[error("judge output malformed: {0}")]
    JudgeMalformed(String),

    /// The immutable system prompt's content hash no longer matches the hash
    /// recorded at construction. Always fatal (taxonomy 5).
    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    /// Wraps filesystem failures (schema doc writes, intermediate CSVs,
    /// malformed-judge dumps, `.env`/hints file reads).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Wraps SQLite driver failures not already classified as execution
    /// errors (e.g. failing to open the database file at all).
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}
