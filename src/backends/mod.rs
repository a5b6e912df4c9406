//! Database backend implementations
//!
//! This module contains the connection factories behind the
//! [`ConnectionPool`](crate::core::ConnectionPool) trait.

#[cfg(feature = "postgres")]
pub mod postgres;

#[cfg(feature = "postgres")]
pub use postgres::{PgClient, PgConfig, PgDatabase, PgPool};
