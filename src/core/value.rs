//! Interpolated value model
//!
//! This module defines the values that can be interpolated into a query, the
//! classification used by the query compiler, and the rows returned by queries.

use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Key marking a WHERE group object (`{_: {...}}`)
pub const WHERE_GROUP_KEY: &str = "_";

/// Prefixes marking a cast annotation key (`{"::int": 23}` or `{"$$int": 23}`)
pub const CAST_MARKERS: [&str; 2] = ["::", "$$"];

/// A value interpolated into a query or read back from a row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SqlValue {
    /// Absent value; dropped from assignment lists and WHERE groups
    Undefined,
    /// Null value
    Null,
    /// Boolean value
    Bool(bool),
    /// 32-bit integer
    Int(i32),
    /// 64-bit integer
    Long(i64),
    /// 64-bit floating point
    Double(f64),
    /// Exact numeric within `rust_decimal` range
    Decimal(Decimal),
    /// Arbitrary precision numeric in decimal text form (`-12.5`, `NaN`)
    Numeric(String),
    /// String value
    Text(String),
    /// Binary data
    Bytes(Vec<u8>),
    /// Point in time
    Timestamp(DateTime<Utc>),
    /// Ordered list of values
    Array(Vec<SqlValue>),
    /// Insertion-ordered mapping of keys to values
    Object(Vec<(String, SqlValue)>),
    /// A handle that cannot be sent to the server, named by its kind
    Opaque(String),
}

/// Classification of a [`SqlValue`], decided once and matched exhaustively
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ValueKind<'a> {
    /// `SqlValue::Undefined`
    Undefined,
    /// `SqlValue::Null`
    Null,
    /// An array of values
    Array(&'a [SqlValue]),
    /// Binary blob
    Binary,
    /// Date/time
    DateTime,
    /// Any numeric variant
    Numeric,
    /// Boolean
    Boolean,
    /// String
    String,
    /// Object that is not a cast annotation
    PlainObject(&'a [(String, SqlValue)]),
    /// One-key object whose key carries a cast marker
    CastAnnotated {
        /// Type name with the marker stripped
        ty: &'a str,
        /// The wrapped value
        inner: &'a SqlValue,
    },
    /// Value the compiler cannot render
    Opaque(&'a str),
}

impl ValueKind<'_> {
    /// Human readable name of the kind, used in error messages
    pub fn name(&self) -> &str {
        match self {
            ValueKind::Undefined => "undefined",
            ValueKind::Null => "null",
            ValueKind::Array(_) => "array",
            ValueKind::Binary => "binary",
            ValueKind::DateTime => "date",
            ValueKind::Numeric => "number",
            ValueKind::Boolean => "boolean",
            ValueKind::String => "string",
            ValueKind::PlainObject(_) => "object",
            ValueKind::CastAnnotated { .. } => "cast",
            ValueKind::Opaque(kind) => *kind,
        }
    }
}

/// Strip a cast marker from an object key, returning the type name
fn cast_type(key: &str) -> Option<&str> {
    CAST_MARKERS
        .iter()
        .find_map(|marker| key.strip_prefix(marker))
        .filter(|ty| !ty.is_empty())
}

impl SqlValue {
    /// Classify the value
    pub fn classify(&self) -> ValueKind<'_> {
        match self {
            SqlValue::Undefined => ValueKind::Undefined,
            SqlValue::Null => ValueKind::Null,
            SqlValue::Bool(_) => ValueKind::Boolean,
            SqlValue::Int(_)
            | SqlValue::Long(_)
            | SqlValue::Double(_)
            | SqlValue::Decimal(_)
            | SqlValue::Numeric(_) => ValueKind::Numeric,
            SqlValue::Text(_) => ValueKind::String,
            SqlValue::Bytes(_) => ValueKind::Binary,
            SqlValue::Timestamp(_) => ValueKind::DateTime,
            SqlValue::Array(items) => ValueKind::Array(items),
            SqlValue::Object(entries) => match entries.as_slice() {
                [(key, inner)] => match cast_type(key) {
                    Some(ty) => ValueKind::CastAnnotated { ty, inner },
                    None => ValueKind::PlainObject(entries),
                },
                _ => ValueKind::PlainObject(entries),
            },
            SqlValue::Opaque(kind) => ValueKind::Opaque(kind),
        }
    }

    /// Wrap a value in a cast annotation (`{"::ty": value}`)
    pub fn cast(ty: impl AsRef<str>, value: impl Into<SqlValue>) -> Self {
        SqlValue::Object(vec![(format!("::{}", ty.as_ref()), value.into())])
    }

    /// Build an object from key/value pairs, preserving their order
    pub fn object<K, V>(entries: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<SqlValue>,
    {
        SqlValue::Object(
            entries
                .into_iter()
                .map(|(key, value)| (key.into(), value.into()))
                .collect(),
        )
    }

    /// Build a WHERE group (`{_: {...}}`) from column/value pairs
    pub fn where_group<K, V>(entries: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<SqlValue>,
    {
        SqlValue::Object(vec![(WHERE_GROUP_KEY.to_string(), Self::object(entries))])
    }

    /// Build an array from values
    pub fn array<V: Into<SqlValue>>(items: impl IntoIterator<Item = V>) -> Self {
        SqlValue::Array(items.into_iter().map(Into::into).collect())
    }

    /// Check if the value is null or undefined
    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null | SqlValue::Undefined)
    }

    /// Check if the value is undefined
    pub fn is_undefined(&self) -> bool {
        matches!(self, SqlValue::Undefined)
    }

    /// Get the value as a boolean
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            SqlValue::Bool(v) => Some(*v),
            _ => None,
        }
    }

    /// Get the value as an i64
    pub fn as_long(&self) -> Option<i64> {
        match self {
            SqlValue::Int(v) => Some(i64::from(*v)),
            SqlValue::Long(v) => Some(*v),
            SqlValue::Decimal(v) => v.to_i64(),
            SqlValue::Numeric(v) => v.parse().ok(),
            _ => None,
        }
    }

    /// Get the value as an f64
    pub fn as_double(&self) -> Option<f64> {
        match self {
            SqlValue::Double(v) => Some(*v),
            SqlValue::Int(v) => Some(f64::from(*v)),
            SqlValue::Long(v) => Some(*v as f64),
            SqlValue::Decimal(v) => v.to_f64(),
            SqlValue::Numeric(v) => v.parse().ok(),
            _ => None,
        }
    }

    /// Get the value as a string slice (zero-copy for Text values)
    pub fn as_str(&self) -> Option<&str> {
        match self {
            SqlValue::Text(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Get the value as bytes (zero-copy)
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            SqlValue::Bytes(b) => Some(b),
            _ => None,
        }
    }

    /// Get the value as a slice of array items
    pub fn as_array(&self) -> Option<&[SqlValue]> {
        match self {
            SqlValue::Array(items) => Some(items),
            _ => None,
        }
    }

    /// Look up a key in an object value
    pub fn field(&self, key: &str) -> Option<&SqlValue> {
        match self {
            SqlValue::Object(entries) => entries.iter().find(|(k, _)| k == key).map(|(_, v)| v),
            _ => None,
        }
    }

    /// Get the type name of this value
    pub fn type_name(&self) -> &'static str {
        match self {
            SqlValue::Undefined => "undefined",
            SqlValue::Null => "null",
            SqlValue::Bool(_) => "bool",
            SqlValue::Int(_) => "int",
            SqlValue::Long(_) => "long",
            SqlValue::Double(_) => "double",
            SqlValue::Decimal(_) => "decimal",
            SqlValue::Numeric(_) => "numeric",
            SqlValue::Text(_) => "text",
            SqlValue::Bytes(_) => "bytes",
            SqlValue::Timestamp(_) => "timestamp",
            SqlValue::Array(_) => "array",
            SqlValue::Object(_) => "object",
            SqlValue::Opaque(_) => "opaque",
        }
    }

    /// Render the value as JSON, as bound to a `jsonb` parameter
    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::Value;

        match self {
            SqlValue::Undefined | SqlValue::Null | SqlValue::Opaque(_) => Value::Null,
            SqlValue::Bool(v) => Value::Bool(*v),
            SqlValue::Int(v) => Value::from(*v),
            SqlValue::Long(v) => Value::from(*v),
            SqlValue::Double(v) => Value::from(*v),
            SqlValue::Decimal(v) => v
                .to_string()
                .parse::<serde_json::Number>()
                .map(Value::Number)
                .unwrap_or_else(|_| Value::String(v.to_string())),
            // kept as a string, JSON numbers would round it through f64
            SqlValue::Numeric(v) => Value::String(v.clone()),
            SqlValue::Text(v) => Value::String(v.clone()),
            SqlValue::Bytes(v) => Value::Array(v.iter().map(|b| Value::from(*b)).collect()),
            SqlValue::Timestamp(v) => Value::String(v.to_rfc3339()),
            SqlValue::Array(items) => Value::Array(items.iter().map(SqlValue::to_json).collect()),
            SqlValue::Object(entries) => Value::Object(
                entries
                    .iter()
                    .filter(|(_, v)| !v.is_undefined())
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
        }
    }
}

impl From<bool> for SqlValue {
    fn from(v: bool) -> Self {
        SqlValue::Bool(v)
    }
}

impl From<i32> for SqlValue {
    fn from(v: i32) -> Self {
        SqlValue::Int(v)
    }
}

impl From<i64> for SqlValue {
    fn from(v: i64) -> Self {
        SqlValue::Long(v)
    }
}

impl From<i128> for SqlValue {
    fn from(v: i128) -> Self {
        match i64::try_from(v) {
            Ok(small) => SqlValue::Long(small),
            Err(_) => Decimal::try_from_i128_with_scale(v, 0)
                .map(SqlValue::Decimal)
                .unwrap_or_else(|_| SqlValue::Numeric(v.to_string())),
        }
    }
}

impl From<u64> for SqlValue {
    fn from(v: u64) -> Self {
        match i64::try_from(v) {
            Ok(small) => SqlValue::Long(small),
            Err(_) => SqlValue::Decimal(Decimal::from(v)),
        }
    }
}

impl From<u128> for SqlValue {
    fn from(v: u128) -> Self {
        match i128::try_from(v) {
            Ok(signed) => SqlValue::from(signed),
            Err(_) => SqlValue::Numeric(v.to_string()),
        }
    }
}

impl From<f32> for SqlValue {
    fn from(v: f32) -> Self {
        SqlValue::Double(f64::from(v))
    }
}

impl From<f64> for SqlValue {
    fn from(v: f64) -> Self {
        SqlValue::Double(v)
    }
}

impl From<Decimal> for SqlValue {
    fn from(v: Decimal) -> Self {
        SqlValue::Decimal(v)
    }
}

impl From<String> for SqlValue {
    fn from(v: String) -> Self {
        SqlValue::Text(v)
    }
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        SqlValue::Text(v.to_string())
    }
}

impl From<Vec<u8>> for SqlValue {
    fn from(v: Vec<u8>) -> Self {
        SqlValue::Bytes(v)
    }
}

impl From<&[u8]> for SqlValue {
    fn from(v: &[u8]) -> Self {
        SqlValue::Bytes(v.to_vec())
    }
}

impl From<DateTime<Utc>> for SqlValue {
    fn from(v: DateTime<Utc>) -> Self {
        SqlValue::Timestamp(v)
    }
}

impl From<Vec<SqlValue>> for SqlValue {
    fn from(v: Vec<SqlValue>) -> Self {
        SqlValue::Array(v)
    }
}

impl<T: Into<SqlValue>> From<Option<T>> for SqlValue {
    fn from(v: Option<T>) -> Self {
        match v {
            Some(val) => val.into(),
            None => SqlValue::Null,
        }
    }
}

impl From<serde_json::Value> for SqlValue {
    fn from(v: serde_json::Value) -> Self {
        use serde_json::Value;

        match v {
            Value::Null => SqlValue::Null,
            Value::Bool(b) => SqlValue::Bool(b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => SqlValue::Long(i),
                None => n
                    .to_string()
                    .parse::<Decimal>()
                    .map(SqlValue::Decimal)
                    .unwrap_or_else(|_| SqlValue::Double(n.as_f64().unwrap_or(f64::NAN))),
            },
            Value::String(s) => SqlValue::Text(s),
            Value::Array(items) => SqlValue::Array(items.into_iter().map(Into::into).collect()),
            Value::Object(map) => {
                SqlValue::Object(map.into_iter().map(|(k, v)| (k, v.into())).collect())
            }
        }
    }
}

/// A result row: ordered column names paired with their values
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    columns: Arc<[String]>,
    values: Vec<SqlValue>,
}

impl Row {
    /// Create a row; `values` lines up with `columns` by position
    pub fn new(columns: Arc<[String]>, values: Vec<SqlValue>) -> Self {
        Self { columns, values }
    }

    /// Get a column value by name
    pub fn get(&self, column: &str) -> Option<&SqlValue> {
        self.columns
            .iter()
            .position(|c| c == column)
            .and_then(|idx| self.values.get(idx))
    }

    /// Get a column value by position
    pub fn value_at(&self, idx: usize) -> Option<&SqlValue> {
        self.values.get(idx)
    }

    /// Column names in result order
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Values in column order
    pub fn values(&self) -> &[SqlValue] {
        &self.values
    }

    /// Consume the row, returning its values
    pub fn into_values(self) -> Vec<SqlValue> {
        self.values
    }

    /// Number of columns
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Check if the row has no columns
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_classify_scalars() {
        assert_eq!(SqlValue::Null.classify(), ValueKind::Null);
        assert_eq!(SqlValue::Undefined.classify(), ValueKind::Undefined);
        assert_eq!(SqlValue::from(23).classify(), ValueKind::Numeric);
        assert_eq!(SqlValue::from(i128::MAX).classify(), ValueKind::Numeric);
        assert_eq!(SqlValue::from(1.5).classify(), ValueKind::Numeric);
        assert_eq!(SqlValue::from("abc").classify(), ValueKind::String);
        assert_eq!(SqlValue::from(true).classify(), ValueKind::Boolean);
        assert_eq!(SqlValue::from(vec![1u8, 2]).classify(), ValueKind::Binary);
        assert_eq!(SqlValue::from(Utc::now()).classify(), ValueKind::DateTime);
    }

    #[test]
    fn test_big_integers_stay_numeric() {
        assert_eq!(
            SqlValue::from(i128::MAX),
            SqlValue::Numeric("170141183460469231731687303715884105727".to_string())
        );
        assert_eq!(
            SqlValue::from(i128::MIN).classify(),
            ValueKind::Numeric
        );
        assert_eq!(
            SqlValue::from(u128::MAX).classify(),
            ValueKind::Numeric
        );
        assert!(matches!(SqlValue::from(u64::MAX), SqlValue::Decimal(_)));
        assert!(matches!(
            SqlValue::from(i128::from(i64::MAX) + 1),
            SqlValue::Decimal(_)
        ));
        assert_eq!(SqlValue::from(i128::MAX).type_name(), "numeric");
    }

    #[test]
    fn test_numeric_text_accessors() {
        let big = SqlValue::Numeric("12345678901234567890123456789012345".to_string());
        assert_eq!(big.as_long(), None);
        assert!(big.as_double().is_some_and(|v| v > 1e34));
        assert_eq!(SqlValue::Numeric("42".to_string()).as_long(), Some(42));
        assert_eq!(
            big.to_json(),
            json!("12345678901234567890123456789012345")
        );
    }

    #[test]
    fn test_from_json_keeps_key_order() {
        let value = SqlValue::from(json!({"name": "x", "age": 3}));
        match value {
            SqlValue::Object(entries) => {
                let keys: Vec<&str> = entries.iter().map(|(k, _)| k.as_str()).collect();
                assert_eq!(keys, vec!["name", "age"]);
            }
            other => panic!("expected object, got {other:?}"),
        }
    }

    #[test]
    fn test_classify_cast_markers() {
        for key in ["::int", "$$int"] {
            let value = SqlValue::object([(key, 23)]);
            match value.classify() {
                ValueKind::CastAnnotated { ty, inner } => {
                    assert_eq!(ty, "int");
                    assert_eq!(inner, &SqlValue::Int(23));
                }
                other => panic!("expected cast, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_classify_objects_without_cast() {
        let bare_marker = SqlValue::object([("::", 1)]);
        assert!(matches!(bare_marker.classify(), ValueKind::PlainObject(_)));

        let two_keys = SqlValue::object([("::int", 1), ("::text", 2)]);
        assert!(matches!(two_keys.classify(), ValueKind::PlainObject(_)));

        let empty = SqlValue::Object(Vec::new());
        assert!(matches!(empty.classify(), ValueKind::PlainObject(entries) if entries.is_empty()));
    }

    #[test]
    fn test_from_json_preserves_shape() {
        let value = SqlValue::from(json!({"a": [1, null, "x"], "b": {"c": true}}));
        assert_eq!(
            value.field("a"),
            Some(&SqlValue::Array(vec![
                SqlValue::Long(1),
                SqlValue::Null,
                SqlValue::Text("x".into())
            ]))
        );
        assert_eq!(
            value.field("b").and_then(|b| b.field("c")),
            Some(&SqlValue::Bool(true))
        );
    }

    #[test]
    fn test_to_json_drops_undefined() {
        let value = SqlValue::object([("a", SqlValue::Long(1)), ("b", SqlValue::Undefined)]);
        assert_eq!(value.to_json(), json!({"a": 1}));
    }

    #[test]
    fn test_row_lookup() {
        let columns: Arc<[String]> = vec!["id".to_string(), "name".to_string()].into();
        let row = Row::new(columns, vec![SqlValue::Long(7), SqlValue::from("Alice")]);
        assert_eq!(row.get("name").and_then(SqlValue::as_str), Some("Alice"));
        assert_eq!(row.value_at(0).and_then(SqlValue::as_long), Some(7));
        assert_eq!(row.get("missing"), None);
        assert_eq!(row.len(), 2);
    }
}
