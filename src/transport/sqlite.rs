// ABOUTME: SQLite transport backed by rusqlite
// ABOUTME: Extra "databases" are attached schemas, so db.table references work as in MySQL

use async_trait::async_trait;
use rusqlite::types::ValueRef;
use rusqlite::Connection;

use super::dialect::{Dialect, SqliteDialect};
use super::{StoreResult, Transport};
use crate::error::StoreError;
use crate::table::TableRef;
use crate::utils::{quote_mysql_ident, quote_sqlite_literal};
use crate::value::{Row, Value};

/// A rusqlite connection exposed through [`Transport`].
///
/// The connection's own schema is called `main`; use [`SqliteTransport::attach`]
/// to add more databases (files or in-memory).
pub struct SqliteTransport {
    conn: Connection,
    dialect: SqliteDialect,
}

impl SqliteTransport {
    pub fn open(path: &str) -> StoreResult<Self> {
        let conn = Connection::open(path)
            .map_err(|e| StoreError::Connect(format!("Failed to open SQLite file '{}': {}", path, e)))?;
        tracing::debug!("Opened SQLite database {}", path);
        Ok(Self::from_connection(conn))
    }

    pub fn open_in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| StoreError::Connect(format!("Failed to open in-memory SQLite: {}", e)))?;
        Ok(Self::from_connection(conn))
    }

    pub fn from_connection(conn: Connection) -> Self {
        Self {
            conn,
            dialect: SqliteDialect,
        }
    }

    /// Attach another database under `name`. Pass `":memory:"` for a scratch one.
    pub fn attach(&mut self, name: &str, path: &str) -> StoreResult<()> {
        let sql = format!(
            "ATTACH DATABASE {} AS {}",
            quote_sqlite_literal(path),
            quote_mysql_ident(name)
        );
        tracing::debug!("    SQL: {}", sql);
        self.conn
            .execute_batch(&sql)
            .map_err(|e| classify(&sql, e))
    }

    fn run_query(&self, sql: &str) -> rusqlite::Result<Vec<Row>> {
        let mut stmt = self.conn.prepare(sql)?;
        let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();

        let mut rows = stmt.query([])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let mut record = Row::with_capacity(columns.len());
            for (idx, name) in columns.iter().enumerate() {
                record.insert(name.clone(), from_sqlite(row.get_ref(idx)?));
            }
            out.push(record);
        }
        Ok(out)
    }
}

/// Map a SQLite value onto the closed value set.
///
/// SQLite stores dates as text, so they come back as `Text`.
fn from_sqlite(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::Integer(i),
        ValueRef::Real(f) => Value::Float(f),
        ValueRef::Text(bytes) | ValueRef::Blob(bytes) => {
            Value::Text(String::from_utf8_lossy(bytes).into_owned())
        }
    }
}

fn classify(sql: &str, err: rusqlite::Error) -> StoreError {
    let message = err.to_string();
    if message.contains("no such table") {
        StoreError::missing_table(sql, message)
    } else {
        StoreError::query(sql, message)
    }
}

#[async_trait]
impl Transport for SqliteTransport {
    fn dialect(&self) -> &dyn Dialect {
        &self.dialect
    }

    async fn query(&mut self, sql: &str) -> StoreResult<Vec<Row>> {
        tracing::debug!("    SQL: {}", sql);
        self.run_query(sql).map_err(|e| classify(sql, e))
    }

    async fn execute(&mut self, sql: &str) -> StoreResult<u64> {
        tracing::debug!("    SQL: {}", sql);
        self.conn
            .execute(sql, [])
            .map(|n| n as u64)
            .map_err(|e| classify(sql, e))
    }

    async fn use_database(&mut self, database: &str) -> StoreResult<()> {
        // SQLite resolves unqualified names across main, temp and attached schemas
        tracing::debug!("SQLite ignores USE {}", database);
        Ok(())
    }

    async fn current_database(&mut self) -> StoreResult<String> {
        Ok("main".to_string())
    }

    async fn list_tables(&mut self, database: &str) -> StoreResult<Vec<String>> {
        let sql = format!(
            "SELECT name FROM {}.sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
            quote_mysql_ident(database)
        );
        let rows = self.query(&sql).await?;
        Ok(rows
            .iter()
            .filter_map(|row| row.get("name").map(|v| v.to_string()))
            .collect())
    }

    async fn list_columns(&mut self, table: &TableRef) -> StoreResult<Vec<String>> {
        let sql = format!(
            "PRAGMA {}.table_info({})",
            quote_mysql_ident(table.database()),
            quote_sqlite_literal(table.table())
        );
        let rows = self.query(&sql).await?;
        if rows.is_empty() {
            // table_info is silent about missing tables
            return Err(StoreError::missing_table(
                sql,
                format!("no such table: {}", table),
            ));
        }
        Ok(rows
            .iter()
            .filter_map(|row| row.get("name").map(|v| v.to_string()))
            .collect())
    }

    async fn close(self: Box<Self>) -> StoreResult<()> {
        self.conn
            .close()
            .map_err(|(_, e)| StoreError::Connect(format!("Failed to close SQLite connection: {}", e)))
    }
}
