//! Transactions with isolation levels and bounded retry
//!
//! A transaction checks a dedicated connection out of the pool, runs BEGIN,
//! hands a transaction-bound [`Database`] to a unit of work and then commits, or
//! rolls back on failure. Failures whose SQLSTATE is in [`RETRIABLE_SQLSTATES`]
//! rerun the whole unit of work on a fresh connection after a random delay.
//!
//! ```ignore
//! let total = db
//!     .serial(|tx| {
//!         Box::pin(async move {
//!             tx.run(sql!("UPDATE accounts SET balance = balance - ", 100, " WHERE id = ", 1, "")?).await?;
//!             tx.run(sql!("UPDATE accounts SET balance = balance + ", 100, " WHERE id = ", 2, "")?).await?;
//!             tx.value("SELECT sum(balance) FROM accounts").await
//!         })
//!     })
//!     .await?;
//! ```

use super::database::{ConnectionPool, Database, PooledClient, Target};
use super::error::{DatabaseError, Result};
use futures_util::future::BoxFuture;
use rand::{thread_rng, Rng};
use std::fmt;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

/// SQLSTATE codes that cause a failed transaction to be rerun
///
/// Integrity violations are listed alongside serialization failures and
/// deadlocks. Retrying a unique violation only helps when a concurrent writer
/// caused it.
pub const RETRIABLE_SQLSTATES: [&str; 9] = [
    "23000", // integrity_constraint_violation
    "23001", // restrict_violation
    "23503", // foreign_key_violation
    "23505", // unique_violation
    "23514", // check_violation
    "23P01", // exclusion_violation
    "40001", // serialization_failure
    "40002", // transaction_integrity_constraint_violation
    "40P01", // deadlock_detected
];

/// Check whether a SQLSTATE code is in [`RETRIABLE_SQLSTATES`]
pub fn is_retriable_code(code: &str) -> bool {
    RETRIABLE_SQLSTATES.contains(&code)
}

/// Transaction isolation level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IsolationLevel {
    /// SERIALIZABLE
    Serializable,
    /// READ COMMITTED
    ReadCommitted,
    /// REPEATABLE READ
    RepeatableRead,
    /// REPEATABLE READ, READ ONLY
    ReadOnly,
}

impl IsolationLevel {
    /// Text following `SET TRANSACTION ISOLATION LEVEL`
    pub fn as_sql(&self) -> &'static str {
        match self {
            IsolationLevel::Serializable => "SERIALIZABLE",
            IsolationLevel::ReadCommitted => "READ COMMITTED",
            IsolationLevel::RepeatableRead => "REPEATABLE READ",
            IsolationLevel::ReadOnly => "REPEATABLE READ, READ ONLY",
        }
    }
}

impl fmt::Display for IsolationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_sql())
    }
}

/// How often and how patiently failed transactions are rerun
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Reruns allowed after the first execution
    pub max_attempts: u32,
    /// Upper bound (exclusive) of the random delay before each rerun
    pub max_jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            max_jitter: Duration::from_millis(1000),
        }
    }
}

impl RetryPolicy {
    /// Policy that never reruns a transaction
    pub fn never() -> Self {
        Self {
            max_attempts: 0,
            max_jitter: Duration::ZERO,
        }
    }

    /// Set the number of reruns
    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Set the jitter bound
    #[must_use]
    pub fn with_max_jitter(mut self, max_jitter: Duration) -> Self {
        self.max_jitter = max_jitter;
        self
    }

    /// Pick a random delay in `[0, max_jitter)`
    pub fn jitter(&self) -> Duration {
        let bound = u64::try_from(self.max_jitter.as_millis()).unwrap_or(u64::MAX);
        if bound == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(thread_rng().gen_range(0..bound))
    }
}

/// State of the transaction a handle is bound to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransactionContext {
    /// Isolation level requested at BEGIN, `None` for the server default
    pub level: Option<IsolationLevel>,
    /// Whether BEGIN has run and neither COMMIT nor ROLLBACK has yet
    pub active: bool,
    /// Zero for the first execution, incremented on every rerun
    pub attempt: u32,
}

/// Callback run after a transaction resolves
pub type TransactionHook = Box<dyn FnMut() -> BoxFuture<'static, Result<()>> + Send>;

/// Optional callbacks run once a transaction has committed or rolled back
///
/// Both run after the connection has gone back to the pool. An error from the
/// commit hook is returned to the caller. An error from the rollback hook is
/// merged into the failure that caused the rollback.
#[derive(Default)]
pub struct TransactionHooks {
    on_commit: Option<TransactionHook>,
    on_rollback: Option<TransactionHook>,
}

impl TransactionHooks {
    /// No hooks
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `hook` after each successful commit
    #[must_use]
    pub fn on_commit<F>(mut self, hook: F) -> Self
    where
        F: FnMut() -> BoxFuture<'static, Result<()>> + Send + 'static,
    {
        self.on_commit = Some(Box::new(hook));
        self
    }

    /// Run `hook` after each rollback, including rollbacks that are retried
    #[must_use]
    pub fn on_rollback<F>(mut self, hook: F) -> Self
    where
        F: FnMut() -> BoxFuture<'static, Result<()>> + Send + 'static,
    {
        self.on_rollback = Some(Box::new(hook));
        self
    }
}

impl fmt::Debug for TransactionHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionHooks")
            .field("on_commit", &self.on_commit.is_some())
            .field("on_rollback", &self.on_rollback.is_some())
            .finish()
    }
}

impl<P: ConnectionPool> Database<P> {
    pub(crate) async fn begin(&self, level: Option<IsolationLevel>) -> Result<()> {
        if self.in_transaction() {
            return Err(DatabaseError::misuse("Can't nest transactions"));
        }
        tracing::debug!(level = ?level, "BEGIN");
        self.execute(&"BEGIN".into()).await?;
        self.in_txn.store(true, Ordering::Release);
        if let Some(level) = level {
            self.execute(&format!("SET TRANSACTION ISOLATION LEVEL {level}").into())
                .await?;
        }
        Ok(())
    }

    pub(crate) async fn commit(&self) -> Result<()> {
        if !self.in_transaction() {
            return Err(DatabaseError::misuse("Can't COMMIT outside transaction"));
        }
        tracing::debug!("COMMIT");
        self.execute(&"COMMIT".into()).await?;
        // a failed COMMIT stays open so ROLLBACK still runs on this connection
        self.in_txn.store(false, Ordering::Release);
        Ok(())
    }

    pub(crate) async fn rollback(&self) -> Result<()> {
        if !self.in_transaction() {
            return Err(DatabaseError::misuse("Can't ROLLBACK outside transaction"));
        }
        tracing::debug!("ROLLBACK");
        let outcome = self.execute(&"ROLLBACK".into()).await;
        self.in_txn.store(false, Ordering::Release);
        outcome.map(drop)
    }

    fn release(&mut self, discard: bool) {
        if let Some(client) = self.take_client() {
            client.release(discard);
        }
    }

    /// Run a unit of work in a SERIALIZABLE transaction
    ///
    /// # Errors
    ///
    /// See [`transaction`](Database::transaction)
    pub async fn serial<T, F>(&self, todo: F) -> Result<T>
    where
        F: for<'a> FnMut(&'a Database<P>) -> BoxFuture<'a, Result<T>> + Send,
        T: Send,
    {
        self.transaction(Some(IsolationLevel::Serializable), TransactionHooks::default(), todo)
            .await
    }

    /// Run a unit of work in a READ COMMITTED transaction
    ///
    /// # Errors
    ///
    /// See [`transaction`](Database::transaction)
    pub async fn committed<T, F>(&self, todo: F) -> Result<T>
    where
        F: for<'a> FnMut(&'a Database<P>) -> BoxFuture<'a, Result<T>> + Send,
        T: Send,
    {
        self.transaction(Some(IsolationLevel::ReadCommitted), TransactionHooks::default(), todo)
            .await
    }

    /// Run a unit of work in a REPEATABLE READ transaction
    ///
    /// # Errors
    ///
    /// See [`transaction`](Database::transaction)
    pub async fn repeatable<T, F>(&self, todo: F) -> Result<T>
    where
        F: for<'a> FnMut(&'a Database<P>) -> BoxFuture<'a, Result<T>> + Send,
        T: Send,
    {
        self.transaction(Some(IsolationLevel::RepeatableRead), TransactionHooks::default(), todo)
            .await
    }

    /// Run a unit of work in a REPEATABLE READ, READ ONLY transaction
    ///
    /// # Errors
    ///
    /// See [`transaction`](Database::transaction)
    pub async fn readonly<T, F>(&self, todo: F) -> Result<T>
    where
        F: for<'a> FnMut(&'a Database<P>) -> BoxFuture<'a, Result<T>> + Send,
        T: Send,
    {
        self.transaction(Some(IsolationLevel::ReadOnly), TransactionHooks::default(), todo)
            .await
    }

    /// Run a unit of work in a transaction on a dedicated connection
    ///
    /// The unit of work may run more than once: when it (or BEGIN/COMMIT) fails
    /// with a retriable SQLSTATE, the transaction is rolled back and rerun on a
    /// fresh connection, up to [`RetryPolicy::max_attempts`] times.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - This handle is already bound to a transaction (never retried)
    /// - A connection cannot be acquired
    /// - The unit of work or COMMIT fails and retries are exhausted or not allowed;
    ///   if ROLLBACK failed as well the result is a [`DatabaseError::Composite`]
    /// - The commit hook fails
    pub async fn transaction<T, F>(
        &self,
        level: Option<IsolationLevel>,
        mut hooks: TransactionHooks,
        mut todo: F,
    ) -> Result<T>
    where
        F: for<'a> FnMut(&'a Database<P>) -> BoxFuture<'a, Result<T>> + Send,
        T: Send,
    {
        let pool = match &self.target {
            Target::Pool(pool) if !self.in_transaction() => Arc::clone(pool),
            _ => return Err(DatabaseError::misuse("Can't nest transactions")),
        };

        let mut attempt = 0u32;
        loop {
            let client = pool.connect().await?;
            let context = TransactionContext {
                level,
                active: false,
                attempt,
            };
            let mut txn = Database::for_client(client, self.retry, context);

            let outcome = match txn.begin(level).await {
                Ok(()) => match todo(&txn).await {
                    Ok(value) => txn.commit().await.map(|()| value),
                    Err(err) => Err(err),
                },
                Err(err) => Err(err),
            };

            let err = match outcome {
                Ok(value) => {
                    txn.release(false);
                    if let Some(hook) = hooks.on_commit.as_mut() {
                        hook().await?;
                    }
                    return Ok(value);
                }
                Err(err) => err,
            };

            let err = match txn.rollback().await {
                Ok(()) => {
                    txn.release(false);
                    err
                }
                Err(rollback_err) => {
                    tracing::error!(
                        error = %rollback_err,
                        "rollback failed, discarding connection"
                    );
                    txn.release(true);
                    err.merge(rollback_err)
                }
            };
            drop(txn);

            let err = match hooks.on_rollback.as_mut() {
                Some(hook) => match hook().await {
                    Ok(()) => err,
                    Err(hook_err) => err.merge(hook_err),
                },
                None => err,
            };

            if !err.is_retriable() || attempt >= self.retry.max_attempts {
                return Err(err);
            }

            let delay = self.retry.jitter();
            attempt += 1;
            tracing::warn!(
                attempt,
                code = err.code().unwrap_or_default(),
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                "retrying transaction"
            );
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_isolation_level_sql() {
        assert_eq!(IsolationLevel::Serializable.as_sql(), "SERIALIZABLE");
        assert_eq!(IsolationLevel::ReadCommitted.as_sql(), "READ COMMITTED");
        assert_eq!(IsolationLevel::RepeatableRead.as_sql(), "REPEATABLE READ");
        assert_eq!(
            IsolationLevel::ReadOnly.to_string(),
            "REPEATABLE READ, READ ONLY"
        );
    }

    #[test]
    fn test_retriable_codes() {
        for code in RETRIABLE_SQLSTATES {
            assert!(is_retriable_code(code));
        }
        assert!(!is_retriable_code("42P01"));
        assert!(!is_retriable_code("08006"));
    }

    #[test]
    fn test_default_retry_policy() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 10);
        assert_eq!(policy.max_jitter, Duration::from_millis(1000));
        for _ in 0..100 {
            assert!(policy.jitter() < Duration::from_millis(1000));
        }
    }

    #[test]
    fn test_zero_jitter() {
        let policy = RetryPolicy::default().with_max_jitter(Duration::ZERO);
        assert_eq!(policy.jitter(), Duration::ZERO);
        assert_eq!(RetryPolicy::never().max_attempts, 0);
    }

    #[test]
    fn test_hooks_debug() {
        let hooks = TransactionHooks::new().on_commit(|| Box::pin(async { Ok(()) }));
        assert_eq!(
            format!("{hooks:?}"),
            "TransactionHooks { on_commit: true, on_rollback: false }"
        );
    }
}
