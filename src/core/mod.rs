//! Backend-independent types and traits
//!
//! This module provides the query compiler, the value model, error types, the
//! connection seam, result shaping and the transaction runner.

pub mod database;
pub mod error;
pub mod query_builder;
pub mod result;
pub mod transaction;
pub mod value;

// Re-export commonly used types
pub use database::{Connection, ConnectionPool, Database, PooledClient};
pub use error::{CompositeError, DatabaseError, DriverError, QueryBuildError, Result};
pub use query_builder::{compile, CompiledQuery, Query};
pub use result::{QueryResult, RowIter, RowStream};
pub use transaction::{
    is_retriable_code, IsolationLevel, RetryPolicy, TransactionContext, TransactionHook,
    TransactionHooks, RETRIABLE_SQLSTATES,
};
pub use value::{Row, SqlValue, ValueKind};
