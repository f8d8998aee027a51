// ABOUTME: Row writer with delete-then-insert upserts and lazy table creation
// ABOUTME: Clips rows to the destination's columns unless strict mode is requested

use anyhow::{Context, Result};

use crate::schema::lazy_create_table;
use crate::table::{TableRef, DEFAULT_PRIMARY_KEY};
use crate::transport::{Dialect, Transport};
use crate::value::Row;

/// Options controlling a write.
#[derive(Debug, Clone)]
pub struct WriteOptions {
    /// Delete any existing row with the same primary key before inserting.
    pub upsert: bool,
    pub primary_key: String,
    /// Create a missing destination table from the rows being written.
    pub lazy_create: bool,
    /// Keep columns unknown to the destination, so the insert fails on them.
    pub strict: bool,
    /// Wrap each delete/insert pair in a transaction.
    pub transactional: bool,
}

impl Default for WriteOptions {
    fn default() -> Self {
        Self {
            upsert: true,
            primary_key: DEFAULT_PRIMARY_KEY.to_string(),
            lazy_create: true,
            strict: false,
            transactional: false,
        }
    }
}

impl WriteOptions {
    pub fn primary_key(mut self, primary_key: impl Into<String>) -> Self {
        self.primary_key = primary_key.into();
        self
    }

    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    pub fn upsert(mut self, upsert: bool) -> Self {
        self.upsert = upsert;
        self
    }

    pub fn lazy_create(mut self, lazy_create: bool) -> Self {
        self.lazy_create = lazy_create;
        self
    }

    pub fn transactional(mut self, transactional: bool) -> Self {
        self.transactional = transactional;
        self
    }
}

/// Build `INSERT INTO table (cols) VALUES (literals)` for one row.
pub fn build_insert(dialect: &dyn Dialect, table: &TableRef, row: &Row) -> String {
    let columns: Vec<String> = row.columns().map(|c| dialect.quote_ident(c)).collect();
    let values: Vec<String> = row.values().map(|v| dialect.literal(v)).collect();
    format!(
        "INSERT INTO {} ({}) VALUES ({})",
        dialect.qualify(table),
        columns.join(", "),
        values.join(", ")
    )
}

/// Build `DELETE FROM table WHERE pk IN (...)` for literal key values.
pub fn build_delete_in(
    dialect: &dyn Dialect,
    table: &TableRef,
    primary_key: &str,
    keys: &[String],
) -> String {
    format!(
        "DELETE FROM {} WHERE {} IN ({})",
        dialect.qualify(table),
        dialect.quote_ident(primary_key),
        keys.join(", ")
    )
}

/// Write `rows` to `table`, one statement per row.
///
/// Returns the number of rows inserted. Outside strict mode a row left with
/// no column known to the destination is skipped. Any statement failure
/// aborts the write; rows already written stay written.
pub async fn write_rows(
    transport: &mut dyn Transport,
    rows: Vec<Row>,
    table: &TableRef,
    options: &WriteOptions,
) -> Result<usize> {
    if rows.is_empty() {
        return Ok(0);
    }

    let tables = transport
        .list_tables(table.database())
        .await
        .with_context(|| format!("Failed to list tables in {}", table.database()))?;

    if !tables.iter().any(|t| t == table.table()) && options.lazy_create {
        lazy_create_table(transport, table, &rows, &options.primary_key).await?;
    }

    let known_columns = transport
        .list_columns(table)
        .await
        .with_context(|| format!("Failed to read columns of {}", table))?;

    let mut count = 0usize;
    for mut row in rows {
        if !options.strict {
            let dropped = row.retain_columns(&known_columns);
            if !dropped.is_empty() {
                tracing::debug!("Dropping columns {:?} unknown to {}", dropped, table);
            }
            if row.is_empty() {
                tracing::debug!("Skipping row with no column known to {}", table);
                continue;
            }
        }
        write_row(transport, &row, table, options).await?;
        count += 1;
    }

    tracing::info!("wrote {} rows to {}", count, table);
    Ok(count)
}

async fn write_row(
    transport: &mut dyn Transport,
    row: &Row,
    table: &TableRef,
    options: &WriteOptions,
) -> Result<()> {
    let delete = match row.get(&options.primary_key) {
        Some(key) if options.upsert && !key.is_null() => {
            let literal = transport.dialect().literal(key);
            Some(build_delete_in(
                transport.dialect(),
                table,
                &options.primary_key,
                &[literal],
            ))
        }
        _ => None,
    };
    let insert = build_insert(transport.dialect(), table, row);

    if !options.transactional {
        if let Some(sql) = &delete {
            transport.execute(sql).await.with_context(|| {
                format!("Failed to delete existing row from {}", table)
            })?;
        }
        transport
            .execute(&insert)
            .await
            .with_context(|| format!("Failed to insert row into {}", table))?;
        return Ok(());
    }

    let begin = transport.dialect().begin().to_string();
    transport.execute(&begin).await.context("Failed to open transaction")?;

    let mut outcome = Ok(());
    if let Some(sql) = &delete {
        outcome = transport.execute(sql).await.map(|_| ());
    }
    if outcome.is_ok() {
        outcome = transport.execute(&insert).await.map(|_| ());
    }

    match outcome {
        Ok(()) => {
            transport.execute("COMMIT").await.context("Failed to commit row")?;
            Ok(())
        }
        Err(e) => {
            if let Err(rollback) = transport.execute("ROLLBACK").await {
                tracing::warn!("Rollback failed after write error: {}", rollback);
            }
            Err(e).with_context(|| format!("Failed to upsert row into {}", table))
        }
    }
}
