//! Error types for the database system
//!
//! This module defines all error types that can occur while compiling queries,
//! executing statements and running transactions, along with the augmentation of
//! driver errors with the failing SQL and the merging of a failure with a
//! subsequent rollback failure.

use super::transaction::is_retriable_code;
use super::value::SqlValue;
use std::fmt;
use std::panic::Location;
use std::time::Duration;

/// Result type alias for database operations
pub type Result<T> = std::result::Result<T, DatabaseError>;

/// Error types for database operations
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    /// Transaction API used out of order (nested BEGIN, COMMIT outside a transaction)
    #[error("Transaction error: {0}")]
    TransactionMisuse(String),

    /// Query could not be compiled
    #[error(transparent)]
    QueryBuild(#[from] QueryBuildError),

    /// Failure reported by the connection or the server
    #[error(transparent)]
    Driver(#[from] DriverError),

    /// A failure followed by a second failure while cleaning up
    #[error(transparent)]
    Composite(#[from] CompositeError),

    /// Connection pool could not be created
    #[error("Connection error: {0}")]
    Connection(String),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl DatabaseError {
    /// Create a transaction misuse error
    pub fn misuse<S: Into<String>>(msg: S) -> Self {
        DatabaseError::TransactionMisuse(msg.into())
    }

    /// Create a connection error
    pub fn connection<S: Into<String>>(msg: S) -> Self {
        DatabaseError::Connection(msg.into())
    }

    /// Create a configuration error
    pub fn config<S: Into<String>>(msg: S) -> Self {
        DatabaseError::Config(msg.into())
    }

    /// Create a generic error
    pub fn other<S: Into<String>>(msg: S) -> Self {
        DatabaseError::Other(msg.into())
    }

    /// SQLSTATE code reported by the server, if any
    pub fn code(&self) -> Option<&str> {
        match self {
            DatabaseError::Driver(e) => e.code(),
            DatabaseError::Composite(e) => e.code(),
            _ => None,
        }
    }

    /// SQL text of the failing statement, if known
    pub fn sql(&self) -> Option<&str> {
        match self {
            DatabaseError::Driver(e) => e.sql(),
            DatabaseError::Composite(e) => e.sql(),
            _ => None,
        }
    }

    /// Bind values of the failing statement, if known
    pub fn binds(&self) -> Option<&[SqlValue]> {
        match self {
            DatabaseError::Driver(e) => e.binds(),
            DatabaseError::Composite(e) => e.binds(),
            _ => None,
        }
    }

    /// Check whether the SQLSTATE code allows rerunning the transaction
    pub fn is_retriable(&self) -> bool {
        self.code().is_some_and(is_retriable_code)
    }

    /// Merge this error with one raised while cleaning up after it
    pub fn merge(self, secondary: DatabaseError) -> Self {
        DatabaseError::Composite(CompositeError::merge(self, secondary))
    }
}

/// Errors raised while compiling a query, before anything reaches a connection
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueryBuildError {
    /// Array type could not be inferred because every element is null
    #[error("Can't determine array type when all values are null, set it explicitly")]
    AmbiguousArrayType,

    /// Empty array without an explicit type
    #[error("Can't determine the type of an empty array, set it explicitly")]
    EmptyArray,

    /// Element that cannot be rendered into a query
    #[error("Can't include {kind}s in queries")]
    UnsupportedElementKind {
        /// Kind of the offending value
        kind: String,
    },

    /// `array` cast wrapped around something that is not an array
    #[error("Can't infer an array type for a {kind}")]
    ArrayCastOnScalar {
        /// Kind of the wrapped value
        kind: String,
    },

    /// `_` key whose value is not an object
    #[error("WHERE group must be an object, got a {kind}")]
    WhereGroupNotObject {
        /// Kind of the group value
        kind: String,
    },

    /// Fragment and value counts do not line up
    #[error("Expected {expected} SQL fragments for {values} values, got {actual}")]
    FragmentCountMismatch {
        /// Number of values
        values: usize,
        /// `values + 1`
        expected: usize,
        /// Number of fragments supplied
        actual: usize,
    },
}

impl QueryBuildError {
    /// Create an unsupported element error
    pub fn unsupported(kind: impl Into<String>) -> Self {
        QueryBuildError::UnsupportedElementKind { kind: kind.into() }
    }
}

/// Failure returned by a connection or the server
///
/// Driver errors are augmented with the SQL and binds of the statement that
/// failed before they reach the caller.
#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct DriverError {
    message: String,
    code: Option<String>,
    detail: Option<String>,
    constraint: Option<String>,
    sql: Option<String>,
    binds: Option<Vec<SqlValue>>,
    location: Option<&'static Location<'static>>,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl DriverError {
    /// Create a driver error with a message
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: None,
            detail: None,
            constraint: None,
            sql: None,
            binds: None,
            location: None,
            source: None,
        }
    }

    /// Create a statement timeout error
    pub fn timeout(after: Duration) -> Self {
        Self::new(format!("Query timeout after {}ms", after.as_millis()))
    }

    /// Set the SQLSTATE code
    #[must_use]
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    /// Set the server-provided detail
    #[must_use]
    pub fn with_detail(mut self, detail: Option<impl Into<String>>) -> Self {
        self.detail = detail.map(Into::into);
        self
    }

    /// Set the violated constraint name
    #[must_use]
    pub fn with_constraint(mut self, constraint: Option<impl Into<String>>) -> Self {
        self.constraint = constraint.map(Into::into);
        self
    }

    /// Attach the underlying error
    #[must_use]
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// Attach the failing statement, recording the caller as the error's origin
    ///
    /// Every other field of the original error is carried over unchanged.
    #[track_caller]
    #[must_use]
    pub fn augment(self, sql: &str, binds: &[SqlValue]) -> Self {
        Self {
            sql: Some(sql.to_string()),
            binds: Some(binds.to_vec()),
            location: Some(Location::caller()),
            ..self
        }
    }

    /// Error message as reported by the server
    pub fn message(&self) -> &str {
        &self.message
    }

    /// SQLSTATE code
    pub fn code(&self) -> Option<&str> {
        self.code.as_deref()
    }

    /// Server-provided detail
    pub fn detail(&self) -> Option<&str> {
        self.detail.as_deref()
    }

    /// Violated constraint name
    pub fn constraint(&self) -> Option<&str> {
        self.constraint.as_deref()
    }

    /// SQL text of the failing statement
    pub fn sql(&self) -> Option<&str> {
        self.sql.as_deref()
    }

    /// Bind values of the failing statement
    pub fn binds(&self) -> Option<&[SqlValue]> {
        self.binds.as_deref()
    }

    /// Source location where the error was augmented
    pub fn location(&self) -> Option<&'static Location<'static>> {
        self.location
    }
}

/// Two or more failures folded into one error
///
/// The message joins the constituent messages with newlines and the code is
/// the first code found among them.
#[derive(Debug)]
pub struct CompositeError {
    message: String,
    code: Option<String>,
    sql: Option<String>,
    binds: Option<Vec<SqlValue>>,
    errors: Vec<DatabaseError>,
}

impl CompositeError {
    /// Merge a primary failure with a secondary one
    ///
    /// A primary that is already composite has its constituent list extended
    /// rather than nested.
    pub fn merge(primary: DatabaseError, secondary: DatabaseError) -> Self {
        let message = format!("{}\n{}", primary, secondary);
        let code = primary.code().or(secondary.code()).map(str::to_string);
        let sql = primary.sql().map(str::to_string);
        let binds = primary.binds().map(<[SqlValue]>::to_vec);

        let mut errors = match primary {
            DatabaseError::Composite(existing) => existing.errors,
            other => vec![other],
        };
        errors.push(secondary);

        Self {
            message,
            code,
            sql,
            binds,
            errors,
        }
    }

    /// Joined message
    pub fn message(&self) -> &str {
        &self.message
    }

    /// First SQLSTATE code among the constituents
    pub fn code(&self) -> Option<&str> {
        self.code.as_deref()
    }

    /// SQL text carried over from the primary failure
    pub fn sql(&self) -> Option<&str> {
        self.sql.as_deref()
    }

    /// Bind values carried over from the primary failure
    pub fn binds(&self) -> Option<&[SqlValue]> {
        self.binds.as_deref()
    }

    /// Constituent errors in the order they occurred
    pub fn errors(&self) -> &[DatabaseError] {
        &self.errors
    }
}

impl fmt::Display for CompositeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for CompositeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.errors
            .first()
            .map(|e| e as &(dyn std::error::Error + 'static))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_augment_keeps_fields() {
        let err = DriverError::new("duplicate key value")
            .with_code("23505")
            .with_constraint(Some("users_pkey"))
            .augment("INSERT INTO users (id) VALUES ($1)", &[SqlValue::Int(1)]);

        assert_eq!(err.to_string(), "duplicate key value");
        assert_eq!(err.code(), Some("23505"));
        assert_eq!(err.constraint(), Some("users_pkey"));
        assert_eq!(err.sql(), Some("INSERT INTO users (id) VALUES ($1)"));
        assert_eq!(err.binds(), Some(&[SqlValue::Int(1)][..]));
        assert_eq!(err.location().map(|l| l.file()), Some(file!()));
    }

    #[test]
    fn test_augment_keeps_source() {
        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "socket closed");
        let err = DriverError::new("connection lost")
            .with_source(io)
            .augment("SELECT 1", &[]);
        assert_eq!(
            err.source().map(|s| s.to_string()),
            Some("socket closed".to_string())
        );
    }

    #[test]
    fn test_merge_joins_messages_and_keeps_primary_code() {
        let primary: DatabaseError = DriverError::new("could not serialize access")
            .with_code("40001")
            .augment("UPDATE t SET a = $1", &[SqlValue::Int(1)])
            .into();
        let secondary: DatabaseError = DriverError::new("connection reset")
            .with_code("08006")
            .into();

        let merged = CompositeError::merge(primary, secondary);
        assert_eq!(
            merged.to_string(),
            "could not serialize access\nconnection reset"
        );
        assert_eq!(merged.code(), Some("40001"));
        assert_eq!(merged.sql(), Some("UPDATE t SET a = $1"));
        assert_eq!(merged.errors().len(), 2);
        assert!(merged.source().is_some());
    }

    #[test]
    fn test_merge_falls_back_to_secondary_code() {
        let primary = DatabaseError::other("callback failed");
        let secondary: DatabaseError = DriverError::new("deadlock").with_code("40P01").into();

        let merged = primary.merge(secondary);
        assert_eq!(merged.code(), Some("40P01"));
    }

    #[test]
    fn test_merge_extends_existing_composite() {
        let merged = DatabaseError::other("first")
            .merge(DatabaseError::other("second"))
            .merge(DatabaseError::other("third"));

        match merged {
            DatabaseError::Composite(composite) => {
                assert_eq!(composite.errors().len(), 3);
                assert_eq!(composite.message(), "first\nsecond\nthird");
            }
            other => panic!("expected composite, got {other:?}"),
        }
    }

    #[test]
    fn test_retriable_follows_code() {
        let err: DatabaseError = DriverError::new("deadlock detected").with_code("40P01").into();
        assert!(err.is_retriable());

        let err: DatabaseError = DriverError::new("syntax error").with_code("42601").into();
        assert!(!err.is_retriable());
        assert!(!DatabaseError::misuse("Can't nest transactions").is_retriable());

        let merged = DatabaseError::from(DriverError::new("unique").with_code("23505"))
            .merge(DatabaseError::other("rollback failed"));
        assert!(merged.is_retriable());
    }

    #[test]
    fn test_error_display() {
        let err = DatabaseError::misuse("Can't nest transactions");
        assert_eq!(err.to_string(), "Transaction error: Can't nest transactions");

        let err: DatabaseError = QueryBuildError::EmptyArray.into();
        assert_eq!(
            err.to_string(),
            "Can't determine the type of an empty array, set it explicitly"
        );
    }
}
