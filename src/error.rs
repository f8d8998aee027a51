// ABOUTME: Typed errors raised at the transport seam
// ABOUTME: Lets callers tell a missing table apart from every other query failure

use thiserror::Error;

/// Errors produced by a [`Transport`](crate::transport::Transport).
///
/// Engine code wraps these in `anyhow` with context; the typed variant stays
/// reachable through `anyhow::Error::downcast_ref`.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The connection URL could not be understood.
    #[error("Unsupported connection URL '{0}': expected mysql://, sqlite:// or sqlite::memory:")]
    UnsupportedUrl(String),

    /// Connecting to the store failed.
    #[error("Connection failed: {0}")]
    Connect(String),

    /// The statement referenced a table that does not exist.
    #[error("Table does not exist: {message}")]
    MissingTable { sql: String, message: String },

    /// Any other statement failure (syntax, constraint, unknown column...).
    #[error("Query failed: {message}\n  SQL: {sql}")]
    Query { sql: String, message: String },

    /// A value returned by the store could not be decoded.
    #[error("Cannot decode column '{column}': {message}")]
    Decode { column: String, message: String },
}

impl StoreError {
    /// Build a query error, keeping the statement for diagnostics.
    pub fn query(sql: impl Into<String>, message: impl Into<String>) -> Self {
        StoreError::Query {
            sql: sql.into(),
            message: message.into(),
        }
    }

    pub fn missing_table(sql: impl Into<String>, message: impl Into<String>) -> Self {
        StoreError::MissingTable {
            sql: sql.into(),
            message: message.into(),
        }
    }

    /// True when the failure means the referenced table is absent.
    pub fn is_missing_table(&self) -> bool {
        matches!(self, StoreError::MissingTable { .. })
    }
}

/// Walk an `anyhow` chain looking for a missing-table failure.
pub fn is_missing_table(err: &anyhow::Error) -> bool {
    err.chain()
        .filter_map(|cause| cause.downcast_ref::<StoreError>())
        .any(StoreError::is_missing_table)
}
