//! Connection traits and the query handle
//!
//! This module defines the minimal interface consumed from a pooled driver and
//! the [`Database`] handle that runs compiled queries against it.

use super::error::{DatabaseError, DriverError, Result};
use super::query_builder::CompiledQuery;
use super::result::{QueryResult, RowIter, RowStream};
use super::transaction::{RetryPolicy, TransactionContext};
use super::value::{Row, SqlValue};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Something that can run a parameterized statement
#[async_trait]
pub trait Connection: Send + Sync {
    /// Run a statement with `$N` placeholders and return its rows and row count
    async fn query(
        &self,
        sql: &str,
        binds: &[SqlValue],
    ) -> std::result::Result<QueryResult, DriverError>;
}

/// A connection checked out of a pool for exclusive use
#[async_trait]
pub trait PooledClient: Connection + Unpin + Sized + 'static {
    /// Run a statement and stream its rows as they arrive
    async fn stream(
        &self,
        sql: &str,
        binds: &[SqlValue],
    ) -> std::result::Result<RowStream, DriverError>;

    /// Hand the connection back to its pool
    ///
    /// With `discard` set the connection is closed instead of being reused.
    fn release(self, discard: bool);
}

/// Connection factory: runs one-off statements and hands out dedicated clients
///
/// # Example
/// ```ignore
/// let pool = MyPool::new(config);
/// let client = pool.connect().await?;
/// client.query("SELECT 1", &[]).await?;
/// client.release(false);
/// pool.end().await;
/// ```
#[async_trait]
pub trait ConnectionPool: Connection + 'static {
    /// Client type handed out by [`connect`](ConnectionPool::connect)
    type Client: PooledClient;

    /// Check out a dedicated connection
    ///
    /// Waits for a connection when the pool is exhausted.
    async fn connect(&self) -> std::result::Result<Self::Client, DriverError>;

    /// Close the pool
    async fn end(&self);
}

pub(crate) enum Target<P: ConnectionPool> {
    Pool(Arc<P>),
    Client(P::Client),
    Released,
}

/// Query handle over a pool, or over the dedicated connection of a transaction
///
/// The handle given to a transaction's unit of work has the same query surface
/// as the pool-level handle, but refuses to start a nested transaction.
///
/// # Example
/// ```ignore
/// let db = Database::new(pool);
/// let count = db.run(sql!("DELETE FROM sessions WHERE ", SqlValue::where_group([("user_id", 7)]), "")?).await?;
/// let name = db.value("SELECT name FROM users LIMIT 1").await?;
/// ```
pub struct Database<P: ConnectionPool> {
    pub(crate) target: Target<P>,
    pub(crate) in_txn: AtomicBool,
    pub(crate) retry: RetryPolicy,
    pub(crate) context: Option<TransactionContext>,
}

impl<P: ConnectionPool> Database<P> {
    /// Create a handle over a pool
    pub fn new(pool: P) -> Self {
        Self::from_shared(Arc::new(pool))
    }

    /// Create a handle over a shared pool
    pub fn from_shared(pool: Arc<P>) -> Self {
        Self {
            target: Target::Pool(pool),
            in_txn: AtomicBool::new(false),
            retry: RetryPolicy::default(),
            context: None,
        }
    }

    pub(crate) fn for_client(client: P::Client, retry: RetryPolicy, context: TransactionContext) -> Self {
        Self {
            target: Target::Client(client),
            in_txn: AtomicBool::new(false),
            retry,
            context: Some(context),
        }
    }

    /// Take the dedicated connection out of a transaction handle
    pub(crate) fn take_client(&mut self) -> Option<P::Client> {
        match std::mem::replace(&mut self.target, Target::Released) {
            Target::Client(client) => Some(client),
            other => {
                self.target = other;
                None
            }
        }
    }

    /// Use a different retry policy for transactions started from this handle
    #[must_use]
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Retry policy used for transactions
    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// The pool behind this handle, if it is not bound to a transaction
    pub fn pool(&self) -> Option<&Arc<P>> {
        match &self.target {
            Target::Pool(pool) => Some(pool),
            _ => None,
        }
    }

    /// Isolation level and attempt number of the transaction this handle runs in
    pub fn transaction_context(&self) -> Option<TransactionContext> {
        self.context.map(|context| TransactionContext {
            active: self.in_transaction(),
            ..context
        })
    }

    /// Check if this handle is inside an active transaction
    pub fn in_transaction(&self) -> bool {
        self.in_txn.load(Ordering::Acquire)
    }

    /// Close the underlying pool
    ///
    /// Does nothing on a transaction handle.
    pub async fn end(&self) {
        if let Target::Pool(pool) = &self.target {
            pool.end().await;
        }
    }

    pub(crate) async fn execute(&self, query: &CompiledQuery) -> Result<QueryResult> {
        let (sql, binds) = (query.sql(), query.binds());
        tracing::debug!(sql, binds = binds.len(), "executing statement");

        let outcome = match &self.target {
            Target::Pool(pool) => pool.query(sql, binds).await,
            Target::Client(client) => client.query(sql, binds).await,
            Target::Released => Err(released()),
        };
        outcome.map_err(|err| DatabaseError::Driver(err.augment(sql, binds)))
    }

    /// Run a statement and return the number of affected rows
    ///
    /// # Errors
    ///
    /// Returns the driver error, augmented with the SQL and binds
    pub async fn run(&self, query: impl Into<CompiledQuery>) -> Result<u64> {
        Ok(self.execute(&query.into()).await?.row_count())
    }

    /// Run a query and return the first column of the first row
    ///
    /// Returns `None` when the query produced no rows.
    ///
    /// # Errors
    ///
    /// Returns the driver error, augmented with the SQL and binds
    pub async fn value(&self, query: impl Into<CompiledQuery>) -> Result<Option<SqlValue>> {
        Ok(self.execute(&query.into()).await?.into_value())
    }

    /// Run a query and return its first row
    ///
    /// # Errors
    ///
    /// Returns the driver error, augmented with the SQL and binds
    pub async fn get(&self, query: impl Into<CompiledQuery>) -> Result<Option<Row>> {
        Ok(self.execute(&query.into()).await?.into_row())
    }

    /// Run a query and return all rows
    ///
    /// # Errors
    ///
    /// Returns the driver error, augmented with the SQL and binds
    pub async fn all(&self, query: impl Into<CompiledQuery>) -> Result<Vec<Row>> {
        Ok(self.execute(&query.into()).await?.into_rows())
    }

    /// Run a query and stream its rows
    ///
    /// Inside a transaction the rows stream over the transaction's connection.
    /// Otherwise a dedicated connection is checked out for the lifetime of the
    /// returned iterator.
    ///
    /// Rows are decoded as they are polled, but the statement runs as a single
    /// extended-protocol query rather than through a server-side cursor: the
    /// server sends the whole result without waiting for the consumer, and the
    /// connection runs nothing else until the iterator is drained or dropped.
    /// An iterator created inside a transaction must therefore be consumed or
    /// dropped before the unit of work returns, otherwise COMMIT queues behind it.
    ///
    /// # Errors
    ///
    /// Returns the driver error, augmented with the SQL and binds, if the
    /// connection cannot be acquired or the query cannot be started
    pub async fn iterate(&self, query: impl Into<CompiledQuery>) -> Result<RowIter<P::Client>> {
        let (sql, binds) = query.into().into_parts();
        tracing::debug!(sql = %sql, binds = binds.len(), "streaming statement");

        match &self.target {
            Target::Client(client) => {
                let stream = client
                    .stream(&sql, &binds)
                    .await
                    .map_err(|err| DatabaseError::Driver(err.augment(&sql, &binds)))?;
                Ok(RowIter::new(stream, None, sql, binds))
            }
            Target::Released => Err(DatabaseError::Driver(released().augment(&sql, &binds))),
            Target::Pool(pool) => {
                let client = pool
                    .connect()
                    .await
                    .map_err(|err| DatabaseError::Driver(err.augment(&sql, &binds)))?;
                match client.stream(&sql, &binds).await {
                    Ok(stream) => Ok(RowIter::new(stream, Some(client), sql, binds)),
                    Err(err) => {
                        client.release(false);
                        Err(DatabaseError::Driver(err.augment(&sql, &binds)))
                    }
                }
            }
        }
    }
}

impl<P: ConnectionPool> Drop for Database<P> {
    fn drop(&mut self) {
        if self.in_transaction() {
            if let Some(client) = self.take_client() {
                tracing::warn!("transaction handle dropped mid-transaction, discarding connection");
                client.release(true);
            }
        }
    }
}

fn released() -> DriverError {
    DriverError::new("Connection already released")
}
