//! Result shaping
//!
//! Driver results come back as a [`QueryResult`]; the query methods on
//! [`Database`](super::database::Database) reduce it to a row count, a scalar, a
//! row or all rows. Streamed results are exposed through [`RowIter`].

use super::database::PooledClient;
use super::error::{DatabaseError, DriverError, Result};
use super::value::{Row, SqlValue};
use futures_util::stream::{BoxStream, Stream};
use std::pin::Pin;
use std::task::{Context, Poll};

/// Rows streamed from a connection
pub type RowStream = BoxStream<'static, std::result::Result<Row, DriverError>>;

/// Rows and affected-row count returned by one statement
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryResult {
    rows: Vec<Row>,
    row_count: u64,
}

impl QueryResult {
    /// Create a result
    pub fn new(rows: Vec<Row>, row_count: u64) -> Self {
        Self { rows, row_count }
    }

    /// Number of rows affected (or returned) by the statement
    pub fn row_count(&self) -> u64 {
        self.row_count
    }

    /// First column of the first row
    ///
    /// `None` when there are no rows; a present but null column is `Some(SqlValue::Null)`.
    pub fn into_value(self) -> Option<SqlValue> {
        self.rows
            .into_iter()
            .next()
            .and_then(|row| row.into_values().into_iter().next())
    }

    /// First row
    pub fn into_row(self) -> Option<Row> {
        self.rows.into_iter().next()
    }

    /// All rows
    pub fn into_rows(self) -> Vec<Row> {
        self.rows
    }
}

/// Lazy, finite sequence of rows backed by a streaming query
///
/// When the sequence was started outside a transaction it owns the connection
/// it runs on, and hands it back to the pool once the rows run out, an error
/// is yielded, or the iterator is dropped. After the first error the sequence
/// ends.
pub struct RowIter<C: PooledClient> {
    stream: RowStream,
    client: Option<C>,
    sql: String,
    binds: Vec<SqlValue>,
    done: bool,
}

impl<C: PooledClient> RowIter<C> {
    pub(crate) fn new(stream: RowStream, client: Option<C>, sql: String, binds: Vec<SqlValue>) -> Self {
        Self {
            stream,
            client,
            sql,
            binds,
            done: false,
        }
    }

    /// Check whether the iterator still holds a dedicated connection
    pub fn holds_connection(&self) -> bool {
        self.client.is_some()
    }

    fn finish(&mut self) {
        self.done = true;
        if let Some(client) = self.client.take() {
            client.release(false);
        }
    }
}

impl<C: PooledClient> Stream for RowIter<C> {
    type Item = Result<Row>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.done {
            return Poll::Ready(None);
        }

        match this.stream.as_mut().poll_next(cx) {
            Poll::Ready(Some(Ok(row))) => Poll::Ready(Some(Ok(row))),
            Poll::Ready(Some(Err(err))) => {
                this.finish();
                let err = err.augment(&this.sql, &this.binds);
                Poll::Ready(Some(Err(DatabaseError::Driver(err))))
            }
            Poll::Ready(None) => {
                this.finish();
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<C: PooledClient> Drop for RowIter<C> {
    fn drop(&mut self) {
        if let Some(client) = self.client.take() {
            tracing::debug!(sql = %self.sql, "row iterator dropped early, releasing connection");
            client.release(false);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn row(values: Vec<SqlValue>) -> Row {
        let columns: Arc<[String]> = (0..values.len()).map(|i| format!("c{i}")).collect();
        Row::new(columns, values)
    }

    #[test]
    fn test_value_of_first_row() {
        let result = QueryResult::new(
            vec![row(vec![SqlValue::Long(1), SqlValue::Long(2)]), row(vec![SqlValue::Long(3)])],
            2,
        );
        assert_eq!(result.into_value(), Some(SqlValue::Long(1)));
    }

    #[test]
    fn test_empty_result_shapes() {
        assert_eq!(QueryResult::default().into_value(), None);
        assert_eq!(QueryResult::default().into_row(), None);
        assert!(QueryResult::default().into_rows().is_empty());
    }

    #[test]
    fn test_null_scalar_is_present() {
        let result = QueryResult::new(vec![row(vec![SqlValue::Null])], 1);
        assert_eq!(result.into_value(), Some(SqlValue::Null));
    }
}
