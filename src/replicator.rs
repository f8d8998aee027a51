// ABOUTME: Replication engine - full copy, incremental copy and the choice between them
// ABOUTME: Incremental runs re-derive the watermark from the destination and purge stale rows first

use anyhow::{Context, Result};
use serde::{Serialize, Serializer};
use std::path::Path;
use std::time::{Duration, Instant};

use crate::config::{EngineConfig, Strategy};
use crate::error::is_missing_table;
use crate::reader::{read_batches, read_rows, ReadOptions, RowCursor};
use crate::table::{SyncPlan, TableRef, Watermark};
use crate::transport::Transport;
use crate::value::{Row, Value};
use crate::writer::{build_delete_in, write_rows, WriteOptions};

/// Where an engine is in its current invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    DecidingStrategy,
    FullCopying,
    IncrementalCopying,
    Done,
}

/// Strategy actually used by a pipe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CopyKind {
    Full,
    Incremental,
}

/// Outcome of one pipe.
#[derive(Debug, Clone, Serialize)]
pub struct PipeReport {
    pub kind: CopyKind,
    #[serde(serialize_with = "display")]
    pub from: TableRef,
    #[serde(serialize_with = "display")]
    pub to: TableRef,
    /// Full copy: rows in the destination afterwards. Incremental: net new rows.
    pub rows: i64,
    /// Source keys newer than the watermark, deleted from the destination first.
    pub stale_candidates: usize,
    /// Exclusive lower bound used by an incremental copy.
    #[serde(serialize_with = "display_opt")]
    pub since: Option<Watermark>,
    /// Destination watermark after the copy.
    #[serde(serialize_with = "display_opt")]
    pub watermark: Option<Watermark>,
    #[serde(rename = "elapsed_secs", serialize_with = "secs")]
    pub elapsed: Duration,
}

fn display<T: std::fmt::Display, S: Serializer>(value: &T, s: S) -> Result<S::Ok, S::Error> {
    s.collect_str(value)
}

fn display_opt<T: std::fmt::Display, S: Serializer>(
    value: &Option<T>,
    s: S,
) -> Result<S::Ok, S::Error> {
    match value {
        Some(v) => s.collect_str(v),
        None => s.serialize_none(),
    }
}

fn secs<S: Serializer>(value: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_f64(value.as_secs_f64())
}

/// Replication engine bound to one connection.
///
/// Every statement runs to completion before the next is issued. The
/// connection is released only through [`Replicator::close`].
pub struct Replicator {
    transport: Box<dyn Transport>,
    config: EngineConfig,
    phase: Phase,
}

impl Replicator {
    pub fn new(transport: Box<dyn Transport>, config: EngineConfig) -> Self {
        Self {
            transport,
            config,
            phase: Phase::Idle,
        }
    }

    /// Open a connection from a URL and wrap it in an engine.
    pub async fn connect(url: &str, config: EngineConfig) -> Result<Self> {
        let transport = crate::transport::connect(url)
            .await
            .context("Failed to open connection")?;
        Ok(Self::new(transport, config))
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn transport_mut(&mut self) -> &mut dyn Transport {
        self.transport.as_mut()
    }

    /// Release the connection.
    pub async fn close(self) -> Result<()> {
        self.transport.close().await.context("Failed to close connection")
    }

    fn read_options(&self) -> ReadOptions {
        ReadOptions::default().page_size(self.config.page_size)
    }

    /// Run a statement that returns rows, without pagination.
    pub async fn query(&mut self, sql: &str) -> Result<Vec<Row>> {
        Ok(self.transport.query(sql).await?)
    }

    pub async fn execute(&mut self, sql: &str) -> Result<u64> {
        Ok(self.transport.execute(sql).await?)
    }

    /// Paginated read collected into one result.
    pub async fn read(&mut self, query: &str, options: ReadOptions) -> Result<Vec<Row>> {
        read_rows(self.transport.as_mut(), query, options).await
    }

    /// Paginated read handed to `consumer` one page at a time.
    pub async fn read_batches<F>(
        &mut self,
        query: &str,
        options: ReadOptions,
        consumer: F,
    ) -> Result<usize>
    where
        F: FnMut(Vec<Row>) -> Result<()> + Send,
    {
        read_batches(self.transport.as_mut(), query, options, consumer).await
    }

    pub async fn write(
        &mut self,
        rows: Vec<Row>,
        table: &TableRef,
        options: &WriteOptions,
    ) -> Result<usize> {
        let options = if self.config.transactional_writes {
            options.clone().transactional(true)
        } else {
            options.clone()
        };
        write_rows(self.transport.as_mut(), rows, table, &options).await
    }

    pub async fn tables(&mut self, database: &str) -> Result<Vec<String>> {
        self.transport
            .list_tables(database)
            .await
            .with_context(|| format!("Failed to list tables in {}", database))
    }

    pub async fn table_exists(&mut self, table: &TableRef) -> Result<bool> {
        Ok(self
            .tables(table.database())
            .await?
            .iter()
            .any(|t| t == table.table()))
    }

    pub async fn columns(&mut self, table: &TableRef) -> Result<Vec<String>> {
        self.transport
            .list_columns(table)
            .await
            .with_context(|| format!("Failed to read columns of {}", table))
    }

    pub async fn count(&mut self, table: &TableRef) -> Result<i64> {
        let sql = format!(
            "SELECT count(1) AS `count` FROM {}",
            self.transport.dialect().qualify(table)
        );
        let rows = self.read(&sql, self.read_options().single_page()).await?;
        rows.first()
            .and_then(|row| row.get("count"))
            .and_then(Value::as_i64)
            .with_context(|| format!("Count of {} returned no value", table))
    }

    /// Highest matcher value in `table`, or the epoch floor.
    pub async fn max_timestamp(&mut self, table: &TableRef, matcher: &str) -> Result<Watermark> {
        let dialect = self.transport.dialect();
        let sql = format!(
            "SELECT max({}) AS {} FROM {}",
            dialect.quote_ident(matcher),
            dialect.quote_ident(matcher),
            dialect.qualify(table)
        );
        let rows = self.read(&sql, self.read_options().single_page()).await?;
        Ok(Watermark::from_max(
            rows.into_iter().next().and_then(|row| row.get(matcher).cloned()),
        ))
    }

    /// Rows of `table` whose matcher is at or after `since`, oldest first.
    pub async fn read_since(
        &mut self,
        table: &TableRef,
        since: &Value,
        matcher: &str,
    ) -> Result<Vec<Row>> {
        let dialect = self.transport.dialect();
        let sql = format!(
            "SELECT * FROM {} WHERE {} >= {} ORDER BY {} ASC",
            dialect.qualify(table),
            dialect.quote_ident(matcher),
            dialect.literal(since),
            dialect.quote_ident(matcher)
        );
        self.read(&sql, self.read_options()).await
    }

    pub async fn drop_table(&mut self, table: &TableRef) -> Result<()> {
        let sql = format!("DROP TABLE {}", self.transport.dialect().qualify(table));
        self.transport
            .execute(&sql)
            .await
            .with_context(|| format!("Failed to drop {}", table))?;
        Ok(())
    }

    /// Remove every row of `table`. Fails if the table does not exist.
    pub async fn truncate_strict(&mut self, table: &TableRef) -> Result<()> {
        let sql = self.transport.dialect().truncate(table);
        self.transport
            .execute(&sql)
            .await
            .with_context(|| format!("Failed to truncate {}", table))?;
        Ok(())
    }

    /// Like [`Replicator::truncate_strict`], but a missing table is not an error.
    ///
    /// Returns whether the table was truncated. Only the missing-table
    /// failure is swallowed; anything else still propagates.
    pub async fn truncate(&mut self, table: &TableRef) -> Result<bool> {
        match self.truncate_strict(table).await {
            Ok(()) => Ok(true),
            Err(e) if is_missing_table(&e) => {
                tracing::debug!("Skipping truncate: {:#}", e);
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    /// Execute the `;`-separated statements of a SQL file in order.
    pub async fn exec_script(&mut self, path: &Path) -> Result<usize> {
        let body = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read script {:?}", path))?;
        let statements = crate::utils::split_sql_script(&body);
        for (idx, statement) in statements.iter().enumerate() {
            self.transport.execute(statement).await.with_context(|| {
                format!("Statement {} of {:?} failed", idx + 1, path)
            })?;
        }
        tracing::info!("Executed {} statements from {:?}", statements.len(), path);
        Ok(statements.len())
    }

    /// True when the source table carries the matcher column.
    pub async fn can_incremental_pipe(&mut self, from: &TableRef, matcher: &str) -> Result<bool> {
        Ok(self.columns(from).await?.iter().any(|c| c == matcher))
    }

    /// Replace `to` wholesale with a copy of `from`.
    pub async fn pipe(&mut self, from: &TableRef, to: &TableRef) -> Result<PipeReport> {
        self.phase = Phase::FullCopying;
        let start = Instant::now();
        tracing::info!("pipe: {} => {}", from, to);

        let dialect = self.transport.dialect();
        let drop = format!("DROP TABLE IF EXISTS {}", dialect.qualify(to));
        let create = dialect.create_like(from, to, false);
        let copy = format!(
            "INSERT INTO {} SELECT * FROM {}",
            dialect.qualify(to),
            dialect.qualify(from)
        );

        for sql in [&drop, &create, &copy] {
            self.transport
                .execute(sql)
                .await
                .with_context(|| format!("Full copy {} => {} failed", from, to))?;
        }

        let rows = self.count(to).await?;
        let elapsed = start.elapsed();
        tracing::info!("  ^ moved {} rows in {:.2}s", rows, elapsed.as_secs_f64());

        self.phase = Phase::Done;
        Ok(PipeReport {
            kind: CopyKind::Full,
            from: from.clone(),
            to: to.clone(),
            rows,
            stale_candidates: 0,
            since: None,
            watermark: None,
            elapsed,
        })
    }

    /// Copy rows of `plan.from` newer than the destination watermark.
    ///
    /// Source rows whose matcher is strictly greater than the watermark are
    /// first deleted from the destination by primary key, then copied.
    /// Rows whose matcher equals the watermark are never re-examined.
    pub async fn incremental_pipe(&mut self, plan: &SyncPlan) -> Result<PipeReport> {
        self.phase = Phase::IncrementalCopying;
        let start = Instant::now();
        let SyncPlan {
            from,
            to,
            matcher,
            primary_key,
        } = plan;
        tracing::info!("incremental_pipe: {} => {}", from, to);

        let create = self.transport.dialect().create_like(from, to, true);
        self.transport
            .execute(&create)
            .await
            .with_context(|| format!("Failed to create {} like {}", to, from))?;

        let original_count = self.count(to).await?;
        let since = self.max_timestamp(to, matcher).await?;
        let bound = self.transport.dialect().literal(&since.bound());
        tracing::debug!("Watermark for {}.{}: {}", to, matcher, since);

        let mut stale_candidates = 0usize;
        if original_count > 0 {
            stale_candidates = self
                .purge_stale_rows(from, to, matcher, primary_key, &bound)
                .await?;
        }

        let dialect = self.transport.dialect();
        let copy = format!(
            "INSERT INTO {} SELECT * FROM {} WHERE {} > {} ORDER BY {}",
            dialect.qualify(to),
            dialect.qualify(from),
            dialect.quote_ident(matcher),
            bound,
            dialect.quote_ident(matcher)
        );
        self.transport
            .execute(&copy)
            .await
            .with_context(|| format!("Incremental copy {} => {} failed", from, to))?;

        let new_rows = self.count(to).await? - original_count;
        let watermark = self.max_timestamp(to, matcher).await?;
        let elapsed = start.elapsed();
        tracing::info!(
            "  ^ created {} new rows in {:.2}s",
            new_rows,
            elapsed.as_secs_f64()
        );

        self.phase = Phase::Done;
        Ok(PipeReport {
            kind: CopyKind::Incremental,
            from: from.clone(),
            to: to.clone(),
            rows: new_rows,
            stale_candidates,
            since: Some(since),
            watermark: Some(watermark),
            elapsed,
        })
    }

    /// Delete from `to` every key that `from` has beyond the watermark.
    ///
    /// Keys that were never copied simply match nothing.
    async fn purge_stale_rows(
        &mut self,
        from: &TableRef,
        to: &TableRef,
        matcher: &str,
        primary_key: &str,
        bound: &str,
    ) -> Result<usize> {
        let dialect = self.transport.dialect();
        let query = format!(
            "SELECT {} FROM {} WHERE {} > {} ORDER BY {}",
            dialect.quote_ident(primary_key),
            dialect.qualify(from),
            dialect.quote_ident(matcher),
            bound,
            dialect.quote_ident(matcher)
        );

        let mut cursor = RowCursor::new(query, self.read_options());
        let mut total = 0usize;
        while let Some(batch) = cursor.fetch_batch(self.transport.as_mut()).await? {
            let dialect = self.transport.dialect();
            let keys: Vec<String> = batch
                .iter()
                .filter_map(|row| row.get(primary_key))
                .filter(|key| !key.is_null())
                .map(|key| dialect.literal(key))
                .collect();
            if keys.is_empty() {
                continue;
            }

            let delete = build_delete_in(dialect, to, primary_key, &keys);
            self.transport
                .execute(&delete)
                .await
                .with_context(|| format!("Failed to delete stale rows from {}", to))?;
            tracing::info!("  ^ deleted up to {} stale rows from {}", keys.len(), to);
            total += keys.len();
        }
        Ok(total)
    }

    /// Incremental copy when the source has the matcher column, full copy otherwise.
    pub async fn optimistic_pipe(&mut self, plan: &SyncPlan) -> Result<PipeReport> {
        self.phase = Phase::DecidingStrategy;
        if self.can_incremental_pipe(&plan.from, &plan.matcher).await? {
            self.incremental_pipe(plan).await
        } else {
            tracing::info!(
                "{} has no {} column, falling back to full copy",
                plan.from,
                plan.matcher
            );
            self.pipe(&plan.from, &plan.to).await
        }
    }

    /// Run `plan` with an explicit strategy.
    pub async fn run(&mut self, strategy: Strategy, plan: &SyncPlan) -> Result<PipeReport> {
        self.phase = Phase::Idle;
        match strategy {
            Strategy::Full => self.pipe(&plan.from, &plan.to).await,
            Strategy::Incremental => self.incremental_pipe(plan).await,
            Strategy::Optimistic => self.optimistic_pipe(plan).await,
        }
    }

    /// Plan using the engine's default matcher and primary key.
    pub fn plan(&self, from: TableRef, to: TableRef) -> SyncPlan {
        SyncPlan::new(from, to)
            .with_matcher(self.config.matcher.clone())
            .with_primary_key(self.config.primary_key.clone())
    }
}
