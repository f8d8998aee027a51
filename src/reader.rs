// ABOUTME: Paginated row reader with a restartable-by-reissue cursor
// ABOUTME: Appends LIMIT/OFFSET to bare SELECTs and stops on the first empty page

use anyhow::{Context, Result};

use crate::transport::Transport;
use crate::value::Row;

/// Rows fetched per page when the caller does not say otherwise.
pub const DEFAULT_PAGE_SIZE: usize = 1000;

/// Options controlling a read.
#[derive(Debug, Clone)]
pub struct ReadOptions {
    /// Database to switch to before reading (`USE`).
    pub database: Option<String>,
    pub page_size: usize,
    /// Starting offset of the first page.
    pub offset: usize,
    /// When false only the first page is fetched.
    pub looping: bool,
}

impl Default for ReadOptions {
    fn default() -> Self {
        Self {
            database: None,
            page_size: DEFAULT_PAGE_SIZE,
            offset: 0,
            looping: true,
        }
    }
}

impl ReadOptions {
    pub fn in_database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    pub fn page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    pub fn single_page(mut self) -> Self {
        self.looping = false;
        self
    }
}

/// True when the reader should add its own LIMIT clause to `query`.
///
/// Only bare SELECTs qualify; a query that already has a LIMIT is left alone.
pub fn needs_pagination(query: &str) -> bool {
    let mut tokens = query.split_whitespace();
    let is_select = tokens
        .next()
        .map(|first| first.eq_ignore_ascii_case("select"))
        .unwrap_or(false);
    is_select
        && !query
            .split(|c: char| c.is_whitespace() || c == '(' || c == ')')
            .any(|token| token.eq_ignore_ascii_case("limit"))
}

/// Cursor state for one read.
///
/// Holds no connection; each [`RowCursor::fetch_batch`] borrows the
/// transport for a single round-trip, so the caller may write between pages.
#[derive(Debug, Clone)]
pub struct RowCursor {
    query: String,
    options: ReadOptions,
    paginate: bool,
    offset: usize,
    batches: usize,
    exhausted: bool,
}

impl RowCursor {
    pub fn new(query: impl Into<String>, options: ReadOptions) -> Self {
        let query = query.into();
        let paginate = needs_pagination(&query);
        let offset = options.offset;
        Self {
            query,
            options,
            paginate,
            offset,
            batches: 0,
            exhausted: false,
        }
    }

    /// Number of pages fetched so far.
    pub fn batches(&self) -> usize {
        self.batches
    }

    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    /// Fetch the next page, or `None` once the read is finished.
    ///
    /// An empty page is returned once (so streaming consumers see it) and
    /// then ends the read. A query that carried its own LIMIT runs once.
    pub async fn fetch_batch(&mut self, transport: &mut dyn Transport) -> Result<Option<Vec<Row>>> {
        if self.exhausted {
            return Ok(None);
        }

        if self.batches == 0 {
            if let Some(database) = &self.options.database {
                transport
                    .use_database(database)
                    .await
                    .with_context(|| format!("Failed to switch to database {}", database))?;
            }
        }

        let sql = if self.paginate {
            transport
                .dialect()
                .paginate(&self.query, self.options.page_size, self.offset)
        } else {
            self.query.clone()
        };

        let rows = transport
            .query(&sql)
            .await
            .with_context(|| format!("Failed to read rows: {}", sql))?;

        self.batches += 1;
        self.offset += self.options.page_size;

        if rows.is_empty() || !self.options.looping || !self.paginate {
            self.exhausted = true;
        }

        Ok(Some(rows))
    }
}

/// Read every page of `query` into one result.
pub async fn read_rows(
    transport: &mut dyn Transport,
    query: &str,
    options: ReadOptions,
) -> Result<Vec<Row>> {
    let mut cursor = RowCursor::new(query, options);
    let mut out = Vec::new();
    while let Some(batch) = cursor.fetch_batch(transport).await? {
        out.extend(batch);
    }
    Ok(out)
}

/// Stream pages of `query` to `consumer`. Returns the total row count.
///
/// The consumer's error aborts the read and is returned as-is.
pub async fn read_batches<F>(
    transport: &mut dyn Transport,
    query: &str,
    options: ReadOptions,
    mut consumer: F,
) -> Result<usize>
where
    F: FnMut(Vec<Row>) -> Result<()> + Send,
{
    let mut cursor = RowCursor::new(query, options);
    let mut total = 0usize;
    while let Some(batch) = cursor.fetch_batch(transport).await? {
        total += batch.len();
        consumer(batch)?;
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::SqliteTransport;

    async fn numbers(n: usize) -> SqliteTransport {
        let mut t = SqliteTransport::open_in_memory().unwrap();
        t.execute("CREATE TABLE nums (id INTEGER PRIMARY KEY, v TEXT)")
            .await
            .unwrap();
        for i in 1..=n {
            t.execute(&format!("INSERT INTO nums (id, v) VALUES ({}, 'n{}')", i, i))
                .await
                .unwrap();
        }
        t
    }

    #[test]
    fn test_needs_pagination() {
        assert!(needs_pagination("select * from t"));
        assert!(needs_pagination("  SELECT id FROM t WHERE a > 1 ORDER BY a"));
        assert!(!needs_pagination("select * from t limit 5"));
        assert!(!needs_pagination("SELECT * FROM t LIMIT 0, 10"));
        assert!(!needs_pagination("describe t"));
        assert!(!needs_pagination("show tables"));
        // A column merely containing the word is not a limit clause
        assert!(needs_pagination("select credit_limit from accounts"));
    }

    #[tokio::test]
    async fn test_read_rows_accumulates_all_pages() {
        let mut t = numbers(7).await;
        let rows = read_rows(
            &mut t,
            "SELECT id FROM nums ORDER BY id",
            ReadOptions::default().page_size(3),
        )
        .await
        .unwrap();
        assert_eq!(rows.len(), 7);
    }

    #[tokio::test]
    async fn test_cursor_pages_until_empty() {
        let mut t = numbers(5).await;
        let mut cursor = RowCursor::new(
            "SELECT id FROM nums ORDER BY id",
            ReadOptions::default().page_size(2),
        );
        let mut sizes = Vec::new();
        while let Some(batch) = cursor.fetch_batch(&mut t).await.unwrap() {
            sizes.push(batch.len());
        }
        assert_eq!(sizes, vec![2, 2, 1, 0]);
        assert_eq!(cursor.batches(), 4);
    }

    #[tokio::test]
    async fn test_single_page_mode() {
        let mut t = numbers(5).await;
        let rows = read_rows(
            &mut t,
            "SELECT id FROM nums ORDER BY id",
            ReadOptions::default().page_size(2).single_page(),
        )
        .await
        .unwrap();
        assert_eq!(rows.len(), 2);
    }

    #[tokio::test]
    async fn test_offset_starts_later() {
        let mut t = numbers(5).await;
        let rows = read_rows(
            &mut t,
            "SELECT id FROM nums ORDER BY id",
            ReadOptions::default().offset(3),
        )
        .await
        .unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].get("id").and_then(|v| v.as_i64()), Some(4));
    }

    #[tokio::test]
    async fn test_explicit_limit_runs_once() {
        let mut t = numbers(5).await;
        let rows = read_rows(
            &mut t,
            "SELECT id FROM nums ORDER BY id LIMIT 3",
            ReadOptions::default().page_size(1),
        )
        .await
        .unwrap();
        assert_eq!(rows.len(), 3);
    }

    #[tokio::test]
    async fn test_read_batches_streams_to_consumer() {
        let mut t = numbers(4).await;
        let mut seen = Vec::new();
        let total = read_batches(
            &mut t,
            "SELECT id FROM nums ORDER BY id",
            ReadOptions::default().page_size(3),
            |batch| {
                seen.push(batch.len());
                Ok(())
            },
        )
        .await
        .unwrap();
        assert_eq!(total, 4);
        assert_eq!(seen, vec![3, 1, 0]);
    }

    #[tokio::test]
    async fn test_query_error_surfaces() {
        let mut t = numbers(1).await;
        let err = read_rows(&mut t, "SELECT * FROM missing", ReadOptions::default())
            .await
            .unwrap_err();
        assert!(crate::error::is_missing_table(&err));
    }
}
