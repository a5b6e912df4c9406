//! Scripted in-memory pool shared by the integration tests
//!
//! Every statement is answered by a responder closure and recorded, together
//! with connection checkouts and releases, so tests can assert on the exact
//! sequence of events.

#![allow(dead_code)]

use async_trait::async_trait;
use futures_util::stream::{self, StreamExt};
use parking_lot::Mutex;
use rust_pg_access::core::{Connection, ConnectionPool, PooledClient, QueryResult, RowStream};
use rust_pg_access::{Database, DriverError, RetryPolicy, Row, SqlValue};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

pub type Responder =
    dyn Fn(&str, &[SqlValue]) -> Result<QueryResult, DriverError> + Send + Sync + 'static;

/// Something that happened on the pool
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// Statement run on the pool (`None`) or on a checked out connection
    Query { conn: Option<usize>, sql: String },
    /// Connection checked out
    Connect(usize),
    /// Connection handed back
    Release { conn: usize, discard: bool },
}

struct Inner {
    responder: Box<Responder>,
    log: Mutex<Vec<Event>>,
    next_id: AtomicUsize,
    closed: AtomicBool,
}

#[derive(Clone)]
pub struct MockPool {
    inner: Arc<Inner>,
}

impl MockPool {
    /// Pool where every statement succeeds with no rows
    pub fn new() -> Self {
        Self::with_responder(|_, _| Ok(QueryResult::default()))
    }

    pub fn with_responder<F>(responder: F) -> Self
    where
        F: Fn(&str, &[SqlValue]) -> Result<QueryResult, DriverError> + Send + Sync + 'static,
    {
        Self {
            inner: Arc::new(Inner {
                responder: Box::new(responder),
                log: Mutex::new(Vec::new()),
                next_id: AtomicUsize::new(1),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Handle over this pool with an instant retry policy
    pub fn database(&self) -> Database<MockPool> {
        Database::new(self.clone()).with_retry_policy(RetryPolicy::default().with_max_jitter(
            std::time::Duration::ZERO,
        ))
    }

    pub fn events(&self) -> Vec<Event> {
        self.inner.log.lock().clone()
    }

    /// Statements in the order they ran, regardless of connection
    pub fn statements(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                Event::Query { sql, .. } => Some(sql),
                _ => None,
            })
            .collect()
    }

    pub fn count(&self, sql: &str) -> usize {
        self.statements().iter().filter(|s| *s == sql).count()
    }

    pub fn connects(&self) -> usize {
        self.events()
            .iter()
            .filter(|event| matches!(event, Event::Connect(_)))
            .count()
    }

    /// `(connection, discard)` for every release, in order
    pub fn releases(&self) -> Vec<(usize, bool)> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                Event::Release { conn, discard } => Some((conn, discard)),
                _ => None,
            })
            .collect()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    fn respond(&self, conn: Option<usize>, sql: &str, binds: &[SqlValue]) -> Result<QueryResult, DriverError> {
        self.inner.log.lock().push(Event::Query {
            conn,
            sql: sql.to_string(),
        });
        (self.inner.responder)(sql, binds)
    }
}

#[async_trait]
impl Connection for MockPool {
    async fn query(&self, sql: &str, binds: &[SqlValue]) -> Result<QueryResult, DriverError> {
        self.respond(None, sql, binds)
    }
}

#[async_trait]
impl ConnectionPool for MockPool {
    type Client = MockClient;

    async fn connect(&self) -> Result<MockClient, DriverError> {
        if self.is_closed() {
            return Err(DriverError::new("pool is closed"));
        }
        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        self.inner.log.lock().push(Event::Connect(id));
        Ok(MockClient {
            id,
            pool: self.clone(),
        })
    }

    async fn end(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
    }
}

pub struct MockClient {
    id: usize,
    pool: MockPool,
}

#[async_trait]
impl Connection for MockClient {
    async fn query(&self, sql: &str, binds: &[SqlValue]) -> Result<QueryResult, DriverError> {
        self.pool.respond(Some(self.id), sql, binds)
    }
}

#[async_trait]
impl PooledClient for MockClient {
    async fn stream(&self, sql: &str, binds: &[SqlValue]) -> Result<RowStream, DriverError> {
        let rows = self.pool.respond(Some(self.id), sql, binds)?.into_rows();
        Ok(stream::iter(rows.into_iter().map(Ok)).boxed())
    }

    fn release(self, discard: bool) {
        self.pool.inner.log.lock().push(Event::Release {
            conn: self.id,
            discard,
        });
    }
}

/// Result with the given columns and rows
pub fn rows(columns: &[&str], values: Vec<Vec<SqlValue>>) -> QueryResult {
    let columns: Arc<[String]> = columns.iter().map(|c| c.to_string()).collect();
    let count = values.len() as u64;
    let rows = values
        .into_iter()
        .map(|row| Row::new(Arc::clone(&columns), row))
        .collect();
    QueryResult::new(rows, count)
}

/// Error the server reports with the given SQLSTATE
pub fn server_error(message: &str, code: &str) -> DriverError {
    DriverError::new(message).with_code(code)
}

pub fn serialization_failure() -> DriverError {
    server_error("could not serialize access due to concurrent update", "40001")
}
