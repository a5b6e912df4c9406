//! Parameterized query compiler
//!
//! Turns alternating literal SQL fragments and interpolated values into SQL text
//! with `$N` placeholders and an ordered bind list, so values never end up
//! spliced into the SQL itself.
//!
//! How a value is rendered depends on its shape:
//!
//! | Value | Rendered as |
//! |-------|-------------|
//! | null / undefined | `NULL`, no bind |
//! | scalar | `$N` |
//! | `{"::type": v}` or `{"$$type": v}` | `$N::type` (`$N::type[]` for arrays) |
//! | array | `($1, $2, ...)` tuple |
//! | `{_: {col: v, ...}}` | `(col = $1 AND ...)` |
//! | any other object | `col=$1, ...` assignment list |
//!
//! ```
//! use rust_pg_access::sql;
//!
//! let query = sql!("SELECT * FROM example WHERE id=", 23, "").unwrap();
//! assert_eq!(query.sql(), "SELECT * FROM example WHERE id=$1");
//! ```

use super::error::{QueryBuildError, Result};
use super::value::{SqlValue, ValueKind, WHERE_GROUP_KEY};

/// Cast name that asks for the array element type to be inferred
const INFERRED_ARRAY_CAST: &str = "array";

/// Compiled SQL text and its ordered bind values
///
/// The Nth `$N` placeholder in the text binds the Nth value.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CompiledQuery {
    sql: String,
    binds: Vec<SqlValue>,
}

impl CompiledQuery {
    /// Create a compiled query from SQL text and binds
    pub fn new(sql: impl Into<String>, binds: Vec<SqlValue>) -> Self {
        Self {
            sql: sql.into(),
            binds,
        }
    }

    /// SQL text
    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// Bind values in placeholder order
    pub fn binds(&self) -> &[SqlValue] {
        &self.binds
    }

    /// Split into SQL text and binds
    pub fn into_parts(self) -> (String, Vec<SqlValue>) {
        (self.sql, self.binds)
    }
}

impl From<&str> for CompiledQuery {
    fn from(sql: &str) -> Self {
        Self::new(sql, Vec::new())
    }
}

impl From<String> for CompiledQuery {
    fn from(sql: String) -> Self {
        Self::new(sql, Vec::new())
    }
}

impl<S: Into<String>> From<(S, Vec<SqlValue>)> for CompiledQuery {
    fn from((sql, binds): (S, Vec<SqlValue>)) -> Self {
        Self::new(sql, binds)
    }
}

/// Query under construction: literal fragments interleaved with values
///
/// There is always one more fragment than there are values.
///
/// ```
/// use rust_pg_access::core::query_builder::Query;
/// use rust_pg_access::SqlValue;
///
/// let query = Query::new("UPDATE users SET ")
///     .bind(SqlValue::object([("name", "Alice")]))
///     .sql(" WHERE ")
///     .bind(SqlValue::where_group([("id", 7)]))
///     .compile()
///     .unwrap();
/// assert_eq!(query.sql(), "UPDATE users SET name=$1 WHERE (id = $2)");
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    fragments: Vec<String>,
    values: Vec<SqlValue>,
}

impl Query {
    /// Start a query with leading SQL text
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            fragments: vec![sql.into()],
            values: Vec::new(),
        }
    }

    /// Build a query from fragments and values
    ///
    /// # Errors
    ///
    /// Returns an error unless there is exactly one more fragment than values
    pub fn from_parts(fragments: Vec<String>, values: Vec<SqlValue>) -> Result<Self> {
        check_counts(fragments.len(), values.len())?;
        Ok(Self { fragments, values })
    }

    /// Append literal SQL text
    #[must_use]
    pub fn sql(mut self, text: &str) -> Self {
        if let Some(last) = self.fragments.last_mut() {
            last.push_str(text);
        }
        self
    }

    /// Interpolate a value
    #[must_use]
    pub fn bind(mut self, value: impl Into<SqlValue>) -> Self {
        self.values.push(value.into());
        self.fragments.push(String::new());
        self
    }

    /// Compile into SQL text and binds
    ///
    /// # Errors
    ///
    /// Returns a [`QueryBuildError`] if a value cannot be rendered
    pub fn compile(&self) -> Result<CompiledQuery> {
        compile(&self.fragments, &self.values)
    }
}

/// Compile literal fragments and interpolated values
///
/// # Errors
///
/// Returns a [`QueryBuildError`] if the fragment count is not one more than the
/// value count, or if a value cannot be rendered
pub fn compile<S: AsRef<str>>(fragments: &[S], values: &[SqlValue]) -> Result<CompiledQuery> {
    check_counts(fragments.len(), values.len())?;

    let mut writer = SqlWriter::default();
    writer.sql.push_str(fragments[0].as_ref());
    for (value, fragment) in values.iter().zip(&fragments[1..]) {
        writer.translate(value)?;
        writer.sql.push_str(fragment.as_ref());
    }

    Ok(CompiledQuery::new(writer.sql, writer.binds))
}

fn check_counts(fragments: usize, values: usize) -> std::result::Result<(), QueryBuildError> {
    if fragments == values + 1 {
        Ok(())
    } else {
        Err(QueryBuildError::FragmentCountMismatch {
            values,
            expected: values + 1,
            actual: fragments,
        })
    }
}

/// Build a [`CompiledQuery`] from alternating SQL literals and values
///
/// The argument list starts and ends with a literal: `sql!("text", value, "text")`.
///
/// ```
/// use rust_pg_access::{sql, SqlValue};
///
/// let query = sql!("SELECT * FROM t WHERE ", SqlValue::where_group([("a", 1)]), "").unwrap();
/// assert_eq!(query.sql(), "SELECT * FROM t WHERE (a = $1)");
/// assert_eq!(query.binds(), &[SqlValue::Int(1)]);
/// ```
#[macro_export]
macro_rules! sql {
    ($first:literal $(, $value:expr, $fragment:literal)* $(,)?) => {
        $crate::core::query_builder::compile(
            &[$first $(, $fragment)*],
            &[$($crate::SqlValue::from($value)),*],
        )
    };
}

#[derive(Default)]
struct SqlWriter {
    sql: String,
    binds: Vec<SqlValue>,
}

type BuildResult = std::result::Result<(), QueryBuildError>;

impl SqlWriter {
    /// Render a top-level interpolated value
    fn translate(&mut self, value: &SqlValue) -> BuildResult {
        match value.classify() {
            ValueKind::Array(items) => self.tuple(items),
            ValueKind::PlainObject([(key, group)]) if key.eq_ignore_ascii_case(WHERE_GROUP_KEY) => {
                self.where_group(group)
            }
            ValueKind::PlainObject(entries) => self.assignments(entries),
            _ => self.bind_value(value),
        }
    }

    fn placeholder(&mut self, value: SqlValue, cast: Option<&str>) {
        self.binds.push(value);
        self.sql.push('$');
        self.sql.push_str(&self.binds.len().to_string());
        if let Some(ty) = cast {
            self.sql.push_str("::");
            self.sql.push_str(ty);
        }
    }

    /// Render a single value as one placeholder (or `NULL`)
    fn bind_value(&mut self, value: &SqlValue) -> BuildResult {
        let (cast, value) = match value.classify() {
            ValueKind::CastAnnotated { ty, inner } => (Some(ty), inner),
            _ => (None, value),
        };

        match (value.classify(), cast) {
            (ValueKind::Null | ValueKind::Undefined, _) => self.sql.push_str("NULL"),
            (ValueKind::Opaque(kind), _) => return Err(QueryBuildError::unsupported(kind)),
            (ValueKind::Array(items), Some(INFERRED_ARRAY_CAST)) | (ValueKind::Array(items), None) => {
                let element = array_type(items)?;
                let bound = strip_nulls(items)?;
                self.placeholder(bound, Some(format!("{element}[]").as_str()));
            }
            (kind, Some(INFERRED_ARRAY_CAST)) => {
                return Err(QueryBuildError::ArrayCastOnScalar {
                    kind: kind.name().to_string(),
                })
            }
            (ValueKind::Array(items), Some(ty)) => {
                let bound = strip_nulls(items)?;
                self.placeholder(bound, Some(format!("{ty}[]").as_str()));
            }
            (_, Some(ty)) => self.placeholder(value.clone(), Some(ty)),
            (ValueKind::PlainObject(_) | ValueKind::CastAnnotated { .. }, None) => {
                self.placeholder(value.clone(), Some("jsonb"))
            }
            (
                ValueKind::Binary
                | ValueKind::DateTime
                | ValueKind::Numeric
                | ValueKind::Boolean
                | ValueKind::String,
                None,
            ) => self.placeholder(value.clone(), None),
        }
        Ok(())
    }

    /// `($1, $2, ...)` with each element bound on its own
    fn tuple(&mut self, items: &[SqlValue]) -> BuildResult {
        if items.is_empty() {
            return Err(QueryBuildError::EmptyArray);
        }
        self.sql.push('(');
        for (idx, item) in items.iter().enumerate() {
            if idx > 0 {
                self.sql.push_str(", ");
            }
            self.bind_value(item)?;
        }
        self.sql.push(')');
        Ok(())
    }

    /// `col=$1, col2=NULL` with undefined entries dropped
    fn assignments(&mut self, entries: &[(String, SqlValue)]) -> BuildResult {
        let mut first = true;
        for (column, value) in entries.iter().filter(|(_, v)| !is_absent(v)) {
            if !first {
                self.sql.push_str(", ");
            }
            first = false;
            self.sql.push_str(column);
            self.sql.push('=');
            self.bind_value(value)?;
        }
        Ok(())
    }

    /// `(col = $1 AND col2 IS NULL AND ...)` with undefined entries dropped
    fn where_group(&mut self, group: &SqlValue) -> BuildResult {
        let entries = match group {
            SqlValue::Object(entries) => entries,
            other => {
                return Err(QueryBuildError::WhereGroupNotObject {
                    kind: other.classify().name().to_string(),
                })
            }
        };

        self.sql.push('(');
        let mut first = true;
        for (column, value) in entries.iter().filter(|(_, v)| !is_absent(v)) {
            if !first {
                self.sql.push_str(" AND ");
            }
            first = false;
            self.sql.push_str(column);
            match value.classify() {
                ValueKind::Array(items) => {
                    self.sql.push_str(" IN ");
                    self.tuple(items)?;
                }
                ValueKind::CastAnnotated {
                    inner: SqlValue::Array(_),
                    ..
                }
                | ValueKind::PlainObject(_) => {
                    self.sql.push_str(" @> ");
                    self.bind_value(value)?;
                }
                ValueKind::Null => self.sql.push_str(" IS NULL"),
                _ => {
                    self.sql.push_str(" = ");
                    self.bind_value(value)?;
                }
            }
        }
        self.sql.push(')');
        Ok(())
    }
}

/// Undefined, or a cast wrapped around undefined
fn is_absent(value: &SqlValue) -> bool {
    match value.classify() {
        ValueKind::Undefined => true,
        ValueKind::CastAnnotated { inner, .. } => inner.is_undefined(),
        _ => false,
    }
}

/// Copy of an array without its null entries, bound as a single parameter
fn strip_nulls(items: &[SqlValue]) -> std::result::Result<SqlValue, QueryBuildError> {
    let mut kept = Vec::with_capacity(items.len());
    for item in items.iter().filter(|item| !item.is_null()) {
        if let ValueKind::Opaque(kind) = item.classify() {
            return Err(QueryBuildError::unsupported(kind));
        }
        kept.push(item.clone());
    }
    Ok(SqlValue::Array(kept))
}

/// Infer the element type of an array from its first non-null element
///
/// Nulls take part in the scan but never decide the type.
fn array_type(items: &[SqlValue]) -> std::result::Result<&'static str, QueryBuildError> {
    if items.is_empty() {
        return Err(QueryBuildError::EmptyArray);
    }
    for item in items {
        if let Some(ty) = element_type(item)? {
            return Ok(ty);
        }
    }
    Err(QueryBuildError::AmbiguousArrayType)
}

fn element_type(value: &SqlValue) -> std::result::Result<Option<&'static str>, QueryBuildError> {
    let ty = match value.classify() {
        ValueKind::Array(items) => array_type(items)?,
        ValueKind::PlainObject(_) | ValueKind::CastAnnotated { .. } => "jsonb",
        ValueKind::Numeric => "numeric",
        ValueKind::Boolean => "boolean",
        ValueKind::Binary => "bytea",
        ValueKind::DateTime => "timestamptz",
        ValueKind::String => "text",
        ValueKind::Null | ValueKind::Undefined => return Ok(None),
        ValueKind::Opaque(kind) => return Err(QueryBuildError::unsupported(kind)),
    };
    Ok(Some(ty))
}
