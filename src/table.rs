// ABOUTME: Table references, replication plans and the destination watermark
// ABOUTME: Parses db.table strings and carries the matcher/primary-key defaults

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::value::Value;

/// Column used as the replication watermark when none is given.
pub const DEFAULT_MATCHER: &str = "updated_at";
/// Primary-key column assumed when none is given.
pub const DEFAULT_PRIMARY_KEY: &str = "id";
/// Lower bound used when the destination holds no matcher values yet.
pub const EPOCH_FLOOR: &str = "1970-01-01 00:00";

/// A `(database, table)` pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TableRef {
    database: String,
    table: String,
}

impl TableRef {
    pub fn new(database: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            table: table.into(),
        }
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    pub fn table(&self) -> &str {
        &self.table
    }
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.database, self.table)
    }
}

impl FromStr for TableRef {
    type Err = anyhow::Error;

    /// Parse `database.table`. The table part may not contain further dots.
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let Some((database, table)) = s.split_once('.') else {
            bail!("Table reference '{}' must be qualified as database.table", s);
        };
        if database.is_empty() || table.is_empty() || table.contains('.') {
            bail!("Table reference '{}' must be qualified as database.table", s);
        }
        Ok(Self::new(database, table))
    }
}

impl TryFrom<String> for TableRef {
    type Error = anyhow::Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<TableRef> for String {
    fn from(value: TableRef) -> Self {
        value.to_string()
    }
}

/// Parameters of one replication invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncPlan {
    pub from: TableRef,
    pub to: TableRef,
    pub matcher: String,
    pub primary_key: String,
}

impl SyncPlan {
    /// Plan with the default matcher (`updated_at`) and primary key (`id`).
    pub fn new(from: TableRef, to: TableRef) -> Self {
        Self {
            from,
            to,
            matcher: DEFAULT_MATCHER.to_string(),
            primary_key: DEFAULT_PRIMARY_KEY.to_string(),
        }
    }

    pub fn with_matcher(mut self, matcher: impl Into<String>) -> Self {
        self.matcher = matcher.into();
        self
    }

    pub fn with_primary_key(mut self, primary_key: impl Into<String>) -> Self {
        self.primary_key = primary_key.into();
        self
    }
}

/// Highest matcher value already present in a destination table.
///
/// Always re-derived from the destination; never cached between runs.
#[derive(Debug, Clone, PartialEq)]
pub enum Watermark {
    /// Destination empty or matcher column entirely NULL.
    Floor,
    At(Value),
}

impl Watermark {
    /// Watermark from the result of `max(matcher)`.
    pub fn from_max(value: Option<Value>) -> Self {
        match value {
            None | Some(Value::Null) => Watermark::Floor,
            Some(v) => Watermark::At(v),
        }
    }

    /// Value used as the exclusive lower bound in comparisons.
    pub fn bound(&self) -> Value {
        match self {
            Watermark::Floor => Value::Text(EPOCH_FLOOR.to_string()),
            Watermark::At(v) => v.clone(),
        }
    }

    pub fn is_floor(&self) -> bool {
        matches!(self, Watermark::Floor)
    }
}

impl fmt::Display for Watermark {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Watermark::Floor => write!(f, "{}", EPOCH_FLOOR),
            Watermark::At(v) => write!(f, "{}", v),
        }
    }
}
