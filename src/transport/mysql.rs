// ABOUTME: MySQL transport backed by a single mysql_async connection
// ABOUTME: Decodes text-protocol rows into the closed value set using column metadata

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use mysql_async::consts::ColumnType;
use mysql_async::prelude::*;
use mysql_async::{Conn, Opts};

use super::dialect::{Dialect, MysqlDialect};
use super::{StoreResult, Transport};
use crate::error::StoreError;
use crate::table::TableRef;
use crate::utils::{quote_mysql_ident, strip_password};
use crate::value::{Row, Value};

/// Server error: table does not exist.
const ER_NO_SUCH_TABLE: u16 = 1146;
/// Server error: unknown table (DROP/TRUNCATE).
const ER_BAD_TABLE_ERROR: u16 = 1051;

/// One MySQL connection. Statements run strictly one after another.
pub struct MysqlTransport {
    conn: Conn,
    dialect: MysqlDialect,
}

impl MysqlTransport {
    pub async fn connect(url: &str) -> StoreResult<Self> {
        let opts = Opts::from_url(url).map_err(|e| {
            StoreError::Connect(format!("Invalid MySQL URL '{}': {}", strip_password(url), e))
        })?;
        let conn = Conn::new(opts).await.map_err(|e| {
            StoreError::Connect(format!(
                "Failed to connect to '{}': {}",
                strip_password(url),
                e
            ))
        })?;

        tracing::info!("Connected to MySQL {}", strip_password(url));

        Ok(Self {
            conn,
            dialect: MysqlDialect,
        })
    }
}

fn classify(sql: &str, err: mysql_async::Error) -> StoreError {
    match &err {
        mysql_async::Error::Server(server)
            if server.code == ER_NO_SUCH_TABLE || server.code == ER_BAD_TABLE_ERROR =>
        {
            StoreError::missing_table(sql, server.message.clone())
        }
        _ => StoreError::query(sql, err.to_string()),
    }
}

/// Decode one column using its declared type.
///
/// The text protocol returns most values as bytes; the column type decides
/// how they are parsed.
fn decode(column: &str, column_type: ColumnType, value: mysql_async::Value) -> StoreResult<Value> {
    use mysql_async::Value as My;

    let decode_err = |message: String| StoreError::Decode {
        column: column.to_string(),
        message,
    };

    let bytes = match value {
        My::NULL => return Ok(Value::Null),
        My::Int(i) => return Ok(Value::Integer(i)),
        My::UInt(u) => {
            return i64::try_from(u)
                .map(Value::Integer)
                .map_err(|_| decode_err(format!("unsigned value {} exceeds i64", u)))
        }
        My::Float(f) => return Ok(Value::Float(f64::from(f))),
        My::Double(f) => return Ok(Value::Float(f)),
        My::Date(y, m, d, h, mi, s, us) => {
            let date = NaiveDate::from_ymd_opt(i32::from(y), u32::from(m), u32::from(d))
                .ok_or_else(|| decode_err(format!("invalid date {}-{}-{}", y, m, d)))?;
            return match column_type {
                ColumnType::MYSQL_TYPE_DATE | ColumnType::MYSQL_TYPE_NEWDATE => {
                    Ok(Value::Date(date))
                }
                _ => date
                    .and_hms_micro_opt(u32::from(h), u32::from(mi), u32::from(s), us)
                    .map(Value::Timestamp)
                    .ok_or_else(|| decode_err("invalid time of day".to_string())),
            };
        }
        My::Time(negative, days, h, mi, s, _us) => {
            let hours = days * 24 + u32::from(h);
            return Ok(Value::Text(format!(
                "{}{:02}:{:02}:{:02}",
                if negative { "-" } else { "" },
                hours,
                mi,
                s
            )));
        }
        My::Bytes(bytes) => bytes,
    };

    let text = String::from_utf8_lossy(&bytes).into_owned();
    let parsed = match column_type {
        ColumnType::MYSQL_TYPE_TINY
        | ColumnType::MYSQL_TYPE_SHORT
        | ColumnType::MYSQL_TYPE_INT24
        | ColumnType::MYSQL_TYPE_LONG
        | ColumnType::MYSQL_TYPE_LONGLONG
        | ColumnType::MYSQL_TYPE_YEAR => text
            .parse::<i64>()
            .map(Value::Integer)
            .map_err(|e| decode_err(format!("'{}': {}", text, e)))?,
        ColumnType::MYSQL_TYPE_FLOAT | ColumnType::MYSQL_TYPE_DOUBLE => text
            .parse::<f64>()
            .map(Value::Float)
            .map_err(|e| decode_err(format!("'{}': {}", text, e)))?,
        ColumnType::MYSQL_TYPE_DATE | ColumnType::MYSQL_TYPE_NEWDATE => {
            match NaiveDate::parse_from_str(&text, "%Y-%m-%d") {
                Ok(d) => Value::Date(d),
                // Zero dates and other oddities stay textual
                Err(_) => Value::Text(text),
            }
        }
        ColumnType::MYSQL_TYPE_DATETIME | ColumnType::MYSQL_TYPE_TIMESTAMP => {
            match NaiveDateTime::parse_from_str(&text, "%Y-%m-%d %H:%M:%S%.f") {
                Ok(ts) => Value::Timestamp(ts),
                Err(_) => Value::Text(text),
            }
        }
        _ => Value::Text(text),
    };
    Ok(parsed)
}

#[async_trait]
impl Transport for MysqlTransport {
    fn dialect(&self) -> &dyn Dialect {
        &self.dialect
    }

    async fn query(&mut self, sql: &str) -> StoreResult<Vec<Row>> {
        tracing::debug!("    SQL: {}", sql);
        let rows: Vec<mysql_async::Row> = self
            .conn
            .query(sql)
            .await
            .map_err(|e| classify(sql, e))?;

        let mut out = Vec::with_capacity(rows.len());
        for mut row in rows {
            let columns = row.columns();
            let mut record = Row::with_capacity(columns.len());
            for (idx, column) in columns.iter().enumerate() {
                let name = column.name_str().into_owned();
                let raw: mysql_async::Value = row.take(idx).unwrap_or(mysql_async::Value::NULL);
                let value = decode(&name, column.column_type(), raw)?;
                record.insert(name, value);
            }
            out.push(record);
        }
        Ok(out)
    }

    async fn execute(&mut self, sql: &str) -> StoreResult<u64> {
        tracing::debug!("    SQL: {}", sql);
        self.conn
            .query_drop(sql)
            .await
            .map_err(|e| classify(sql, e))?;
        Ok(self.conn.affected_rows())
    }

    async fn use_database(&mut self, database: &str) -> StoreResult<()> {
        let sql = format!("USE {}", quote_mysql_ident(database));
        self.execute(&sql).await.map(|_| ())
    }

    async fn current_database(&mut self) -> StoreResult<String> {
        let rows = self.query("SELECT DATABASE() AS `db`").await?;
        Ok(rows
            .first()
            .and_then(|row| row.get("db"))
            .filter(|v| !v.is_null())
            .map(|v| v.to_string())
            .unwrap_or_default())
    }

    async fn list_tables(&mut self, database: &str) -> StoreResult<Vec<String>> {
        let sql = format!("SHOW TABLES FROM {}", quote_mysql_ident(database));
        let rows = self.query(&sql).await?;
        let mut tables: Vec<String> = rows
            .iter()
            .filter_map(|row| row.values().next().map(|v| v.to_string()))
            .collect();
        tables.sort();
        Ok(tables)
    }

    async fn list_columns(&mut self, table: &TableRef) -> StoreResult<Vec<String>> {
        let sql = format!("DESCRIBE {}", self.dialect.qualify(table));
        let rows = self.query(&sql).await?;
        Ok(rows
            .iter()
            .filter_map(|row| row.get("Field").map(|v| v.to_string()))
            .collect())
    }

    async fn close(self: Box<Self>) -> StoreResult<()> {
        self.conn
            .disconnect()
            .await
            .map_err(|e| StoreError::Connect(format!("Failed to disconnect: {}", e)))
    }
}
