//! # Rust PG Access
//!
//! A PostgreSQL access layer built around two pieces: a parameterized query
//! compiler that keeps every interpolated value out of the SQL text, and a
//! transaction runner that picks the isolation level, refuses nested
//! transactions, rolls back on failure and reruns transactions that failed on a
//! transient server error.
//!
//! ## Features
//!
//! - **Safe interpolation**: `$N` placeholders and an ordered bind list, with
//!   implicit and explicit casts, `IN (...)` tuples, WHERE groups and assignment lists
//! - **Transactions**: `serial`, `committed`, `repeatable` and `readonly` entry points
//! - **Bounded retry**: serialization failures, deadlocks and integrity violations
//!   rerun the transaction on a fresh connection after a random delay
//! - **Error context**: driver errors carry the failing SQL and binds
//! - **Async Support**: Tokio, `tokio-postgres` and `deadpool-postgres`
//! - **Streaming**: `iterate` yields rows as the server sends them
//!
//! ## Quick Start
//!
//! Add this to your `Cargo.toml`:
//!
//! ```toml
//! [dependencies]
//! rust_pg_access = "0.1"
//! tokio = { version = "1", features = ["full"] }
//! ```
//!
//! ### Basic Usage
//!
//! ```rust,no_run
//! use rust_pg_access::prelude::*;
//! use rust_pg_access::sql;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let db = PgDatabase::postgres(&PgConfig::from_env())?;
//!
//!     db.run("CREATE TABLE IF NOT EXISTS users (id SERIAL PRIMARY KEY, name TEXT, tags TEXT[])")
//!         .await?;
//!
//!     let user = SqlValue::object([
//!         ("name", SqlValue::from("Alice")),
//!         ("tags", SqlValue::cast("text", vec![SqlValue::from("admin")])),
//!     ]);
//!     db.run(sql!("UPDATE users SET ", user, " WHERE id = ", 1, "")?).await?;
//!
//!     let rows = db
//!         .all(sql!("SELECT * FROM users WHERE ", SqlValue::where_group([("name", "Alice")]), "")?)
//!         .await?;
//!     for row in rows {
//!         println!("{:?}", row.get("name"));
//!     }
//!
//!     db.end().await;
//!     Ok(())
//! }
//! ```
//!
//! ### Working with Transactions
//!
//! ```rust,no_run
//! use rust_pg_access::prelude::*;
//! use rust_pg_access::sql;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let db = PgDatabase::postgres(&PgConfig::from_env())?;
//!
//!     let balance = db
//!         .serial(|tx| {
//!             Box::pin(async move {
//!                 tx.run(sql!("UPDATE accounts SET balance = balance - ", 100, " WHERE id = ", 1, "")?)
//!                     .await?;
//!                 tx.run(sql!("UPDATE accounts SET balance = balance + ", 100, " WHERE id = ", 2, "")?)
//!                     .await?;
//!                 tx.value(sql!("SELECT balance FROM accounts WHERE id = ", 2, "")?).await
//!             })
//!         })
//!         .await?;
//!
//!     println!("new balance: {balance:?}");
//!     Ok(())
//! }
//! ```
//!
//! ## Project Structure
//!
//! ```text
//! rust_pg_access/
//! ├── src/
//! │   ├── core/                # Backend-independent pieces
//! │   │   ├── database.rs      # Connection traits and the query handle
//! │   │   ├── error.rs         # Error types, augment and merge
//! │   │   ├── query_builder.rs # Query compiler
//! │   │   ├── result.rs        # Result shaping and row streams
//! │   │   ├── transaction.rs   # Transaction runner
//! │   │   ├── value.rs         # Value model
//! │   │   └── mod.rs
//! │   ├── backends/
//! │   │   ├── postgres.rs      # deadpool-postgres connection factory
//! │   │   └── mod.rs
//! │   └── lib.rs
//! ├── demos/                   # Example programs
//! ├── tests/                   # Integration tests
//! └── benches/
//! ```

/// Backend-independent types and traits
pub mod core;

/// Database backend implementations
pub mod backends;

/// Prelude for convenient imports
///
/// ```rust
/// use rust_pg_access::prelude::*;
///
/// let query = Query::new("SELECT * FROM users WHERE id = ").bind(7).sql("").compile();
/// assert!(query.is_ok());
/// ```
pub mod prelude {
    pub use crate::core::{
        CompiledQuery, Database, DatabaseError, IsolationLevel, Query, Result, RetryPolicy, Row,
        SqlValue, TransactionHooks,
    };

    #[cfg(feature = "postgres")]
    pub use crate::backends::{PgConfig, PgDatabase, PgPool};
}

// Re-export at root level for convenience
pub use crate::core::{
    compile, CompiledQuery, CompositeError, Database, DatabaseError, DriverError, IsolationLevel,
    Query, QueryBuildError, Result, RetryPolicy, Row, RowIter, SqlValue, TransactionHooks,
};

#[cfg(feature = "postgres")]
pub use crate::backends::{PgClient, PgConfig, PgDatabase, PgPool};
