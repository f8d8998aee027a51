// ABOUTME: Type inference and lazy table creation from sampled rows
// ABOUTME: The first non-null sample of a column decides its type; later samples are ignored

use anyhow::{Context, Result};
use std::fmt;

use crate::table::TableRef;
use crate::transport::{Dialect, Transport};
use crate::value::{Row, Value};

/// Destination column types a lazily-created table can use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColumnType {
    /// Integers that fit 32 bits.
    Int,
    BigInt,
    Double,
    Date,
    DateTime,
    /// Short fixed-width text for enum-like values.
    VarChar,
    Boolean,
    /// Catch-all for text, NULL-only and unrecognized samples.
    Text,
}

impl ColumnType {
    /// DDL spelling, understood by MySQL and SQLite alike.
    pub fn sql(&self) -> &'static str {
        match self {
            ColumnType::Int => "int(11)",
            ColumnType::BigInt => "bigint(20)",
            ColumnType::Double => "double",
            ColumnType::Date => "date",
            ColumnType::DateTime => "datetime",
            ColumnType::VarChar => "varchar(255)",
            ColumnType::Boolean => "tinyint(1)",
            ColumnType::Text => "text",
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.sql())
    }
}

/// Map a sampled value to a destination column type.
///
/// Never fails: anything without a better mapping becomes `text`.
pub fn infer_type(sample: &Value) -> ColumnType {
    match sample {
        Value::Integer(i) if i32::try_from(*i).is_ok() => ColumnType::Int,
        Value::Integer(_) => ColumnType::BigInt,
        Value::Float(_) => ColumnType::Double,
        Value::Date(_) => ColumnType::Date,
        Value::Timestamp(_) => ColumnType::DateTime,
        Value::Symbol(_) => ColumnType::VarChar,
        Value::Boolean(_) => ColumnType::Boolean,
        Value::Text(_) | Value::Null => ColumnType::Text,
    }
}

/// A column of a synthesized table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnSpec {
    pub name: String,
    pub column_type: ColumnType,
}

/// Primary key of a synthesized table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrimaryKey {
    /// One of the collected columns.
    Column(String),
    /// Auto-incrementing integer added because the rows do not carry the key.
    Surrogate(String),
}

impl PrimaryKey {
    pub fn name(&self) -> &str {
        match self {
            PrimaryKey::Column(name) | PrimaryKey::Surrogate(name) => name,
        }
    }
}

/// Schema inferred from a batch of rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSchema {
    pub columns: Vec<ColumnSpec>,
    pub primary_key: PrimaryKey,
}

impl TableSchema {
    /// Infer a schema from `rows`.
    ///
    /// Columns appear in first-seen order across the batch. Each column takes
    /// the type of its first non-null sample; a column that is NULL
    /// everywhere becomes `text`. Conflicting later samples are not
    /// reconciled.
    ///
    /// A surrogate key is used when no row carries `primary_key` or the
    /// first row's value for it is NULL.
    pub fn from_rows(rows: &[Row], primary_key: &str) -> Self {
        let mut columns: Vec<(String, Option<ColumnType>)> = Vec::new();

        for row in rows {
            for (name, value) in row.iter() {
                let pos = match columns.iter().position(|(n, _)| n == name) {
                    Some(pos) => pos,
                    None => {
                        columns.push((name.to_string(), None));
                        columns.len() - 1
                    }
                };
                let slot = &mut columns[pos].1;
                if slot.is_none() && !value.is_null() {
                    *slot = Some(infer_type(value));
                }
            }
        }

        let key_present = columns.iter().any(|(n, _)| n == primary_key);
        let first_is_null = rows
            .first()
            .map(|row| row.get(primary_key).map(Value::is_null).unwrap_or(true))
            .unwrap_or(true);

        let primary_key = if !key_present || first_is_null {
            // The surrogate replaces any sampled column of the same name
            columns.retain(|(n, _)| n != primary_key);
            PrimaryKey::Surrogate(primary_key.to_string())
        } else {
            PrimaryKey::Column(primary_key.to_string())
        };

        Self {
            columns: columns
                .into_iter()
                .map(|(name, column_type)| ColumnSpec {
                    name,
                    column_type: column_type.unwrap_or(ColumnType::Text),
                })
                .collect(),
            primary_key,
        }
    }

    pub fn column(&self, name: &str) -> Option<&ColumnSpec> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// CREATE TABLE statement for `table`.
    ///
    /// Every collected column is nullable except a sampled primary key,
    /// which the key constraint forces to NOT NULL.
    pub fn create_table_sql(&self, table: &TableRef, dialect: &dyn Dialect) -> String {
        let mut defs = Vec::with_capacity(self.columns.len() + 2);

        if let PrimaryKey::Surrogate(name) = &self.primary_key {
            defs.push(format!(
                "{} {}",
                dialect.quote_ident(name),
                dialect.surrogate_key_type()
            ));
        }
        for column in &self.columns {
            let null_clause = match &self.primary_key {
                PrimaryKey::Column(pk) if *pk == column.name => "NOT NULL",
                _ => "DEFAULT NULL",
            };
            defs.push(format!(
                "{} {} {}",
                dialect.quote_ident(&column.name),
                column.column_type,
                null_clause
            ));
        }
        defs.push(format!(
            "PRIMARY KEY ({})",
            dialect.quote_ident(self.primary_key.name())
        ));

        format!("CREATE TABLE {} ( {} )", dialect.qualify(table), defs.join(", "))
    }
}

/// Infer a schema from `rows` and create `table` with it.
pub async fn lazy_create_table(
    transport: &mut dyn Transport,
    table: &TableRef,
    rows: &[Row],
    primary_key: &str,
) -> Result<TableSchema> {
    let schema = TableSchema::from_rows(rows, primary_key);
    let sql = schema.create_table_sql(table, transport.dialect());

    transport
        .execute(&sql)
        .await
        .with_context(|| format!("Failed to lazy-create table {}", table))?;

    tracing::info!("lazy-created table {}", table);
    Ok(schema)
}
