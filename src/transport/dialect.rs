// ABOUTME: SQL dialects (strategy pattern) for identifier quoting and literal rendering
// ABOUTME: MySQL is the production dialect; SQLite backs local pipelines and tests

use crate::table::TableRef;
use crate::utils::{quote_mysql_ident, quote_sqlite_literal};
use crate::value::{format_timestamp, Value, DATE_FORMAT};

/// SQL syntax that differs between stores.
pub trait Dialect: Send + Sync {
    fn name(&self) -> &str;

    fn quote_ident(&self, name: &str) -> String {
        quote_mysql_ident(name)
    }

    /// `database`.`table`
    fn qualify(&self, table: &TableRef) -> String {
        format!(
            "{}.{}",
            self.quote_ident(table.database()),
            self.quote_ident(table.table())
        )
    }

    /// Quote a string for interpolation into SQL text.
    fn quote_text(&self, value: &str) -> String;

    /// Render a value as a SQL literal.
    fn literal(&self, value: &Value) -> String {
        match value {
            Value::Null => "NULL".to_string(),
            Value::Integer(i) => i.to_string(),
            Value::Float(f) if f.is_finite() => format!("{:?}", f),
            Value::Float(_) => "NULL".to_string(),
            Value::Boolean(b) => if *b { "1" } else { "0" }.to_string(),
            Value::Text(s) | Value::Symbol(s) => self.quote_text(s),
            Value::Date(d) => self.quote_text(&d.format(DATE_FORMAT).to_string()),
            Value::Timestamp(ts) => self.quote_text(&format_timestamp(ts)),
        }
    }

    /// Append a page window to a query.
    fn paginate(&self, query: &str, limit: usize, offset: usize) -> String {
        format!("{} LIMIT {}, {}", query.trim_end(), offset, limit)
    }

    /// Create `to` with the structure of `from`, without copying rows.
    fn create_like(&self, from: &TableRef, to: &TableRef, if_not_exists: bool) -> String;

    /// Remove every row from `table`.
    fn truncate(&self, table: &TableRef) -> String;

    /// Column definition of a synthesized auto-incrementing primary key.
    fn surrogate_key_type(&self) -> &str;

    /// Statement opening an explicit transaction.
    fn begin(&self) -> &str {
        "START TRANSACTION"
    }
}

/// MySQL / MariaDB.
#[derive(Debug, Clone, Copy, Default)]
pub struct MysqlDialect;

impl Dialect for MysqlDialect {
    fn name(&self) -> &str {
        "mysql"
    }

    /// Double-quoted string with backslashes and double quotes escaped.
    fn quote_text(&self, value: &str) -> String {
        let mut quoted = String::with_capacity(value.len() + 2);
        quoted.push('"');
        for ch in value.chars() {
            match ch {
                '\\' => quoted.push_str("\\\\"),
                '"' => quoted.push_str("\\\""),
                _ => quoted.push(ch),
            }
        }
        quoted.push('"');
        quoted
    }

    fn create_like(&self, from: &TableRef, to: &TableRef, if_not_exists: bool) -> String {
        format!(
            "CREATE TABLE {}{} LIKE {}",
            if if_not_exists { "IF NOT EXISTS " } else { "" },
            self.qualify(to),
            self.qualify(from)
        )
    }

    fn truncate(&self, table: &TableRef) -> String {
        format!("TRUNCATE TABLE {}", self.qualify(table))
    }

    fn surrogate_key_type(&self) -> &str {
        "int(11) NOT NULL AUTO_INCREMENT"
    }
}

/// SQLite. Accepts backtick identifiers and MySQL-style `LIMIT offset, count`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteDialect;

impl Dialect for SqliteDialect {
    fn name(&self) -> &str {
        "sqlite"
    }

    fn quote_text(&self, value: &str) -> String {
        quote_sqlite_literal(value)
    }

    // SQLite has no LIKE clause; an empty CTAS keeps column names and affinities.
    fn create_like(&self, from: &TableRef, to: &TableRef, if_not_exists: bool) -> String {
        format!(
            "CREATE TABLE {}{} AS SELECT * FROM {} WHERE 0",
            if if_not_exists { "IF NOT EXISTS " } else { "" },
            self.qualify(to),
            self.qualify(from)
        )
    }

    fn truncate(&self, table: &TableRef) -> String {
        format!("DELETE FROM {}", self.qualify(table))
    }

    // An INTEGER primary key aliases the rowid and is assigned on NULL insert.
    fn surrogate_key_type(&self) -> &str {
        "INTEGER NOT NULL"
    }

    fn begin(&self) -> &str {
        "BEGIN"
    }
}
