//! PostgreSQL backend
//!
//! This module provides the connection factory over `deadpool-postgres`, the
//! binding of [`SqlValue`] to server-inferred parameter types and the decoding of
//! result rows.

use crate::core::database::{Connection, ConnectionPool, Database, PooledClient};
use crate::core::error::{DatabaseError, DriverError, Result};
use crate::core::result::{QueryResult, RowStream};
use crate::core::value::{Row, SqlValue};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use futures_util::{pin_mut, StreamExt, TryStreamExt};
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::error::Error;
use std::sync::Arc;
use std::time::Duration;
use tokio_postgres::types::{to_sql_checked, FromSql, IsNull, Kind, ToSql, Type};
use tokio_postgres::{Client, NoTls};
use tokio_util::bytes::{BufMut, BytesMut};
use uuid::Uuid;

/// Default timeout for database operations (30 seconds)
const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(30);

/// Default number of pooled connections
const DEFAULT_MAX_SIZE: usize = 10;

/// NUMERIC sign words
const NUMERIC_POS: u16 = 0x0000;
const NUMERIC_NEG: u16 = 0x4000;
const NUMERIC_NAN: u16 = 0xC000;
const NUMERIC_PINF: u16 = 0xD000;
const NUMERIC_NINF: u16 = 0xF000;

type BoxError = Box<dyn Error + Sync + Send>;

/// Connection settings for a [`PgPool`]
///
/// Unset fields fall back to the driver defaults. When `url` is set it is parsed
/// first and the individual fields override it.
#[derive(Debug, Clone)]
pub struct PgConfig {
    /// Server host name or socket directory
    pub host: Option<String>,
    /// Server port
    pub port: Option<u16>,
    /// Database name
    pub dbname: Option<String>,
    /// Role to connect as
    pub user: Option<String>,
    /// Password for `user`
    pub password: Option<String>,
    /// Reported as `application_name`
    pub application_name: Option<String>,
    /// Connection string (`postgres://...` or `key=value` form)
    pub url: Option<String>,
    /// Server settings sent at connect time as `-c key=value`
    pub options: BTreeMap<String, String>,
    /// Maximum number of pooled connections
    pub max_size: usize,
    /// How long to wait for a free connection; `None` waits indefinitely
    pub wait_timeout: Option<Duration>,
    /// Upper bound on each statement
    pub operation_timeout: Duration,
}

impl Default for PgConfig {
    fn default() -> Self {
        Self {
            host: None,
            port: None,
            dbname: None,
            user: None,
            password: None,
            application_name: None,
            url: None,
            options: BTreeMap::new(),
            max_size: DEFAULT_MAX_SIZE,
            wait_timeout: None,
            operation_timeout: DEFAULT_OPERATION_TIMEOUT,
        }
    }
}

impl PgConfig {
    /// Create an empty configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a configuration from a connection string
    pub fn from_url(url: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            ..Self::default()
        }
    }

    /// Read `PGHOST`, `PGPORT`, `PGDATABASE`, `PGUSER`, `PGPASSWORD` and `PGAPPNAME`
    ///
    /// The host defaults to `localhost`. An unparsable `PGPORT` is ignored.
    pub fn from_env() -> Self {
        let var = |name: &str| std::env::var(name).ok().filter(|v| !v.is_empty());
        Self {
            host: var("PGHOST").or_else(|| Some("localhost".to_string())),
            port: var("PGPORT").and_then(|p| p.parse().ok()),
            dbname: var("PGDATABASE"),
            user: var("PGUSER"),
            password: var("PGPASSWORD"),
            application_name: var("PGAPPNAME"),
            ..Self::default()
        }
    }

    /// Add a server setting
    #[must_use]
    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }

    /// Set the pool size
    #[must_use]
    pub fn with_max_size(mut self, max_size: usize) -> Self {
        self.max_size = max_size;
        self
    }

    /// Set the per-statement timeout
    #[must_use]
    pub fn with_operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = timeout;
        self
    }

    /// Translate into a `deadpool-postgres` configuration
    pub fn to_deadpool(&self) -> deadpool_postgres::Config {
        let mut cfg = deadpool_postgres::Config::new();
        cfg.url = self.url.clone();
        cfg.host = self.host.clone();
        cfg.port = self.port;
        cfg.dbname = self.dbname.clone();
        cfg.user = self.user.clone();
        cfg.password = self.password.clone();
        cfg.application_name = self.application_name.clone();
        if !self.options.is_empty() {
            let options: Vec<String> = self
                .options
                .iter()
                .map(|(key, value)| format!("-c {key}={value}"))
                .collect();
            cfg.options = Some(options.join(" "));
        }

        let mut pool = deadpool_postgres::PoolConfig::new(self.max_size);
        pool.timeouts.wait = self.wait_timeout;
        cfg.pool = Some(pool);
        cfg
    }
}

/// Pool of PostgreSQL connections
pub struct PgPool {
    pool: deadpool_postgres::Pool,
    operation_timeout: Duration,
}

impl PgPool {
    /// Create a pool
    ///
    /// Connections are opened lazily on first use.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration cannot be turned into a pool
    pub fn new(config: &PgConfig) -> Result<Self> {
        Self::from_deadpool(config.to_deadpool(), config.operation_timeout)
    }

    /// Create a pool from a raw `deadpool-postgres` configuration
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid
    pub fn from_deadpool(config: deadpool_postgres::Config, operation_timeout: Duration) -> Result<Self> {
        let pool = config
            .create_pool(Some(deadpool_postgres::Runtime::Tokio1), NoTls)
            .map_err(|e| DatabaseError::config(format!("Failed to create Postgres pool: {e}")))?;
        Ok(Self {
            pool,
            operation_timeout,
        })
    }

    /// Current pool size and idle connection count
    pub fn status(&self) -> deadpool_postgres::Status {
        self.pool.status()
    }

    async fn checkout(&self) -> std::result::Result<deadpool_postgres::Object, DriverError> {
        self.pool.get().await.map_err(pool_error)
    }
}

#[async_trait]
impl Connection for PgPool {
    async fn query(
        &self,
        sql: &str,
        binds: &[SqlValue],
    ) -> std::result::Result<QueryResult, DriverError> {
        let object = self.checkout().await?;
        collect_rows(&object, sql, binds, self.operation_timeout).await
    }
}

#[async_trait]
impl ConnectionPool for PgPool {
    type Client = PgClient;

    async fn connect(&self) -> std::result::Result<PgClient, DriverError> {
        let object = self.checkout().await?;
        Ok(PgClient {
            object,
            operation_timeout: self.operation_timeout,
        })
    }

    async fn end(&self) {
        tracing::debug!("closing Postgres pool");
        self.pool.close();
    }
}

/// Connection checked out of a [`PgPool`]
pub struct PgClient {
    object: deadpool_postgres::Object,
    operation_timeout: Duration,
}

#[async_trait]
impl Connection for PgClient {
    async fn query(
        &self,
        sql: &str,
        binds: &[SqlValue],
    ) -> std::result::Result<QueryResult, DriverError> {
        collect_rows(&self.object, sql, binds, self.operation_timeout).await
    }
}

#[async_trait]
impl PooledClient for PgClient {
    async fn stream(
        &self,
        sql: &str,
        binds: &[SqlValue],
    ) -> std::result::Result<RowStream, DriverError> {
        let started = self.object.query_raw(sql, params(binds));
        let stream = tokio::time::timeout(self.operation_timeout, started)
            .await
            .map_err(|_| DriverError::timeout(self.operation_timeout))??;

        let mut decoder = RowDecoder::default();
        Ok(stream.map(move |row| decoder.decode(&row?)).boxed())
    }

    fn release(self, discard: bool) {
        if discard {
            tracing::debug!("discarding Postgres connection");
            drop(deadpool_postgres::Object::take(self.object));
        }
    }
}

impl Database<PgPool> {
    /// Create a handle over a new PostgreSQL pool
    ///
    /// # Errors
    ///
    /// Returns an error if the pool cannot be created
    pub fn postgres(config: &PgConfig) -> Result<Self> {
        Ok(Self::new(PgPool::new(config)?))
    }
}

/// Query handle over a PostgreSQL pool
pub type PgDatabase = Database<PgPool>;

fn params(binds: &[SqlValue]) -> impl ExactSizeIterator<Item = &(dyn ToSql + Sync)> {
    binds.iter().map(|b| b as &(dyn ToSql + Sync))
}

async fn collect_rows(
    client: &Client,
    sql: &str,
    binds: &[SqlValue],
    timeout: Duration,
) -> std::result::Result<QueryResult, DriverError> {
    let fetch = async {
        let stream = client.query_raw(sql, params(binds)).await?;
        pin_mut!(stream);

        let mut decoder = RowDecoder::default();
        let mut rows = Vec::new();
        while let Some(row) = stream.try_next().await? {
            rows.push(decoder.decode(&row)?);
        }
        let count = stream.rows_affected().unwrap_or(rows.len() as u64);
        Ok::<_, DriverError>(QueryResult::new(rows, count))
    };

    tokio::time::timeout(timeout, fetch)
        .await
        .map_err(|_| DriverError::timeout(timeout))?
}

impl From<tokio_postgres::Error> for DriverError {
    fn from(err: tokio_postgres::Error) -> Self {
        let (message, code, detail, constraint) = match err.as_db_error() {
            Some(db) => (
                db.message().to_string(),
                Some(db.code().code().to_string()),
                db.detail().map(str::to_string),
                db.constraint().map(str::to_string),
            ),
            None => (err.to_string(), None, None, None),
        };

        let mut driver = DriverError::new(message)
            .with_detail(detail)
            .with_constraint(constraint);
        if let Some(code) = code {
            driver = driver.with_code(code);
        }
        driver.with_source(err)
    }
}

fn pool_error(err: deadpool_postgres::PoolError) -> DriverError {
    match err {
        deadpool_postgres::PoolError::Backend(e) => DriverError::from(e),
        other => DriverError::new(format!("Connection pool error: {other}")).with_source(other),
    }
}

#[derive(Default)]
struct RowDecoder {
    columns: Option<Arc<[String]>>,
}

impl RowDecoder {
    fn decode(&mut self, row: &tokio_postgres::Row) -> std::result::Result<Row, DriverError> {
        let columns = self
            .columns
            .get_or_insert_with(|| row.columns().iter().map(|c| c.name().to_string()).collect())
            .clone();
        let values = row
            .columns()
            .iter()
            .enumerate()
            .map(|(idx, column)| decode_column(row, idx, column.type_()))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(Row::new(columns, values))
    }
}

fn column<'a, T: FromSql<'a>>(
    row: &'a tokio_postgres::Row,
    idx: usize,
) -> std::result::Result<Option<T>, DriverError> {
    Ok(row.try_get::<_, Option<T>>(idx)?)
}

fn decode_column(
    row: &tokio_postgres::Row,
    idx: usize,
    ty: &Type,
) -> std::result::Result<SqlValue, DriverError> {
    let value = match *ty {
        Type::BOOL => column::<bool>(row, idx)?.map(SqlValue::Bool),
        Type::INT2 => column::<i16>(row, idx)?.map(|v| SqlValue::Int(v.into())),
        Type::INT4 => column::<i32>(row, idx)?.map(SqlValue::Int),
        Type::INT8 => column::<i64>(row, idx)?.map(SqlValue::Long),
        Type::OID => column::<u32>(row, idx)?.map(|v| SqlValue::Long(v.into())),
        Type::FLOAT4 => column::<f32>(row, idx)?.map(|v| SqlValue::Double(v.into())),
        Type::FLOAT8 => column::<f64>(row, idx)?.map(SqlValue::Double),
        Type::NUMERIC => column::<PgNumeric>(row, idx)?.map(SqlValue::from),
        Type::BYTEA => column::<Vec<u8>>(row, idx)?.map(SqlValue::Bytes),
        Type::TIMESTAMPTZ => column::<DateTime<Utc>>(row, idx)?.map(SqlValue::Timestamp),
        Type::TIMESTAMP => {
            column::<NaiveDateTime>(row, idx)?.map(|v| SqlValue::Timestamp(v.and_utc()))
        }
        Type::DATE => column::<NaiveDate>(row, idx)?
            .and_then(|v| v.and_hms_opt(0, 0, 0))
            .map(|v| SqlValue::Timestamp(v.and_utc())),
        Type::TIME => column::<NaiveTime>(row, idx)?.map(|v| SqlValue::Text(v.to_string())),
        Type::UUID => column::<Uuid>(row, idx)?.map(|v| SqlValue::Text(v.to_string())),
        Type::JSON | Type::JSONB => column::<serde_json::Value>(row, idx)?.map(SqlValue::from),
        Type::BOOL_ARRAY => column::<Vec<Option<bool>>>(row, idx)?.map(SqlValue::array),
        Type::INT2_ARRAY => column::<Vec<Option<i16>>>(row, idx)?
            .map(|v| SqlValue::array(v.into_iter().map(|i| i.map(i32::from)))),
        Type::INT4_ARRAY => column::<Vec<Option<i32>>>(row, idx)?.map(SqlValue::array),
        Type::INT8_ARRAY => column::<Vec<Option<i64>>>(row, idx)?.map(SqlValue::array),
        Type::FLOAT8_ARRAY => column::<Vec<Option<f64>>>(row, idx)?.map(SqlValue::array),
        Type::NUMERIC_ARRAY => column::<Vec<Option<PgNumeric>>>(row, idx)?.map(SqlValue::array),
        Type::TEXT_ARRAY | Type::VARCHAR_ARRAY => {
            column::<Vec<Option<String>>>(row, idx)?.map(SqlValue::array)
        }
        Type::UUID_ARRAY => column::<Vec<Option<Uuid>>>(row, idx)?
            .map(|v| SqlValue::array(v.into_iter().map(|u| u.map(|u| u.to_string())))),
        Type::TIMESTAMPTZ_ARRAY => {
            column::<Vec<Option<DateTime<Utc>>>>(row, idx)?.map(SqlValue::array)
        }
        Type::JSON_ARRAY | Type::JSONB_ARRAY => {
            column::<Vec<Option<serde_json::Value>>>(row, idx)?.map(SqlValue::array)
        }
        _ => column::<TextOrBytes>(row, idx)?.map(SqlValue::from),
    };
    Ok(value.unwrap_or(SqlValue::Null))
}

/// NUMERIC column: `Decimal` when it fits, decimal text otherwise
struct PgNumeric(SqlValue);

impl<'a> FromSql<'a> for PgNumeric {
    fn from_sql(ty: &Type, raw: &'a [u8]) -> std::result::Result<Self, BoxError> {
        match <Decimal as FromSql>::from_sql(ty, raw) {
            Ok(v) => Ok(Self(SqlValue::Decimal(v))),
            Err(_) => Ok(Self(SqlValue::Numeric(numeric_to_text(raw)?))),
        }
    }

    fn accepts(ty: &Type) -> bool {
        *ty == Type::NUMERIC
    }
}

impl From<PgNumeric> for SqlValue {
    fn from(v: PgNumeric) -> Self {
        v.0
    }
}

/// Any other column: text when the type has a text form, raw wire bytes otherwise
struct TextOrBytes(SqlValue);

impl<'a> FromSql<'a> for TextOrBytes {
    fn from_sql(ty: &Type, raw: &'a [u8]) -> std::result::Result<Self, BoxError> {
        if <&'a str as FromSql<'a>>::accepts(ty) {
            let text = <&'a str as FromSql<'a>>::from_sql(ty, raw)?;
            Ok(Self(SqlValue::Text(text.to_string())))
        } else {
            Ok(Self(SqlValue::Bytes(raw.to_vec())))
        }
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }
}

impl From<TextOrBytes> for SqlValue {
    fn from(v: TextOrBytes) -> Self {
        v.0
    }
}

/// Render a binary NUMERIC as decimal text
///
/// Layout: digit count, weight, sign, display scale, then base-10000 digits,
/// all big-endian 16-bit words.
fn numeric_to_text(raw: &[u8]) -> std::result::Result<String, BoxError> {
    let word = |idx: usize| -> std::result::Result<u16, BoxError> {
        raw.get(idx * 2..idx * 2 + 2)
            .map(|b| u16::from_be_bytes([b[0], b[1]]))
            .ok_or_else(|| "truncated numeric value".into())
    };

    let ndigits = usize::from(word(0)?);
    let weight = i32::from(word(1)? as i16);
    let sign = word(2)?;
    let dscale = usize::from(word(3)?);
    match sign {
        NUMERIC_NAN => return Ok("NaN".to_string()),
        NUMERIC_PINF => return Ok("Infinity".to_string()),
        NUMERIC_NINF => return Ok("-Infinity".to_string()),
        _ => {}
    }

    let digits = (0..ndigits)
        .map(|i| word(4 + i))
        .collect::<std::result::Result<Vec<_>, _>>()?;
    let digit = |idx: i32| {
        usize::try_from(idx)
            .ok()
            .and_then(|i| digits.get(i))
            .copied()
            .unwrap_or(0)
    };

    let mut text = String::new();
    if sign == NUMERIC_NEG {
        text.push('-');
    }
    if weight < 0 {
        text.push('0');
    } else {
        text.push_str(&digit(0).to_string());
        for idx in 1..=weight {
            text.push_str(&format!("{:04}", digit(idx)));
        }
    }
    if dscale > 0 {
        let mut fraction = String::with_capacity(dscale + 4);
        let mut idx = weight + 1;
        while fraction.len() < dscale {
            fraction.push_str(&format!("{:04}", digit(idx)));
            idx += 1;
        }
        fraction.truncate(dscale);
        text.push('.');
        text.push_str(&fraction);
    }
    Ok(text)
}

/// Write decimal text (`-12.5`, `NaN`, `Infinity`) as a binary NUMERIC
fn encode_numeric(text: &str, out: &mut BytesMut) -> std::result::Result<IsNull, BoxError> {
    let special = match text.to_ascii_lowercase().as_str() {
        "nan" => Some(NUMERIC_NAN),
        "infinity" | "+infinity" => Some(NUMERIC_PINF),
        "-infinity" => Some(NUMERIC_NINF),
        _ => None,
    };
    if let Some(sign) = special {
        put_numeric(out, &[], 0, sign, 0)?;
        return Ok(IsNull::No);
    }

    let (negative, unsigned) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text.strip_prefix('+').unwrap_or(text)),
    };
    let (whole, fraction) = unsigned.split_once('.').unwrap_or((unsigned, ""));
    let valid = !(whole.is_empty() && fraction.is_empty())
        && whole.bytes().chain(fraction.bytes()).all(|b| b.is_ascii_digit());
    if !valid {
        return Err(format!("invalid numeric: {text}").into());
    }

    let lead = (4 - whole.len() % 4) % 4;
    let trail = (4 - fraction.len() % 4) % 4;
    let padded: Vec<u8> = std::iter::repeat(b'0')
        .take(lead)
        .chain(whole.bytes())
        .chain(fraction.bytes())
        .chain(std::iter::repeat(b'0').take(trail))
        .collect();
    let mut groups: Vec<i16> = padded
        .chunks(4)
        .map(|chunk| chunk.iter().fold(0i16, |acc, d| acc * 10 + i16::from(*d - b'0')))
        .collect();

    let mut weight = i32::try_from((lead + whole.len()) / 4)? - 1;
    let leading_zeros = groups.iter().take_while(|g| **g == 0).count();
    groups.drain(..leading_zeros);
    weight -= i32::try_from(leading_zeros)?;
    while groups.last() == Some(&0) {
        groups.pop();
    }
    if groups.is_empty() {
        weight = 0;
    }

    let sign = if negative && !groups.is_empty() {
        NUMERIC_NEG
    } else {
        NUMERIC_POS
    };
    put_numeric(
        out,
        &groups,
        i16::try_from(weight)?,
        sign,
        u16::try_from(fraction.len())?,
    )?;
    Ok(IsNull::No)
}

fn put_numeric(
    out: &mut BytesMut,
    digits: &[i16],
    weight: i16,
    sign: u16,
    dscale: u16,
) -> std::result::Result<(), BoxError> {
    out.put_i16(i16::try_from(digits.len())?);
    out.put_i16(weight);
    out.put_u16(sign);
    out.put_u16(dscale);
    for digit in digits {
        out.put_i16(*digit);
    }
    Ok(())
}

impl ToSql for SqlValue {
    fn to_sql(&self, ty: &Type, out: &mut BytesMut) -> std::result::Result<IsNull, BoxError> {
        if let Kind::Array(_) = ty.kind() {
            return match self {
                SqlValue::Array(items) => items.as_slice().to_sql(ty, out),
                SqlValue::Undefined | SqlValue::Null => Ok(IsNull::Yes),
                other => Err(mismatch(other, ty)),
            };
        }

        match self {
            SqlValue::Undefined | SqlValue::Null => Ok(IsNull::Yes),
            SqlValue::Opaque(kind) => Err(format!("can't bind a {kind}").into()),
            SqlValue::Text(text) => bind_text(text, ty, out),
            _ if matches!(*ty, Type::JSON | Type::JSONB) => self.to_json().to_sql(ty, out),
            SqlValue::Bool(v) => match *ty {
                Type::BOOL => v.to_sql(ty, out),
                Type::INT2 | Type::INT4 | Type::INT8 => bind_integer(i64::from(*v), ty, out),
                _ => bind_text(&v.to_string(), ty, out),
            },
            SqlValue::Int(v) => bind_integer(i64::from(*v), ty, out),
            SqlValue::Long(v) => bind_integer(*v, ty, out),
            SqlValue::Double(v) => bind_double(*v, ty, out),
            SqlValue::Decimal(v) => bind_decimal(v, ty, out),
            SqlValue::Numeric(v) => bind_text(v, ty, out),
            SqlValue::Bytes(v) => v.as_slice().to_sql(ty, out),
            SqlValue::Timestamp(v) => match *ty {
                Type::TIMESTAMPTZ => v.to_sql(ty, out),
                Type::TIMESTAMP => v.naive_utc().to_sql(ty, out),
                Type::DATE => v.date_naive().to_sql(ty, out),
                _ => bind_text(&v.to_rfc3339(), ty, out),
            },
            SqlValue::Array(_) | SqlValue::Object(_) => Err(mismatch(self, ty)),
        }
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }

    to_sql_checked!();
}

fn mismatch(value: &SqlValue, ty: &Type) -> BoxError {
    format!("can't bind a {} to a {} parameter", value.type_name(), ty).into()
}

fn bind_integer(v: i64, ty: &Type, out: &mut BytesMut) -> std::result::Result<IsNull, BoxError> {
    match *ty {
        Type::INT2 => i16::try_from(v)?.to_sql(ty, out),
        Type::INT4 => i32::try_from(v)?.to_sql(ty, out),
        Type::INT8 => v.to_sql(ty, out),
        Type::OID => u32::try_from(v)?.to_sql(ty, out),
        Type::FLOAT4 => (v as f32).to_sql(ty, out),
        Type::FLOAT8 => (v as f64).to_sql(ty, out),
        Type::NUMERIC => Decimal::from(v).to_sql(ty, out),
        Type::BOOL => (v != 0).to_sql(ty, out),
        _ => bind_text(&v.to_string(), ty, out),
    }
}

fn bind_double(v: f64, ty: &Type, out: &mut BytesMut) -> std::result::Result<IsNull, BoxError> {
    match *ty {
        Type::FLOAT4 => (v as f32).to_sql(ty, out),
        Type::FLOAT8 => v.to_sql(ty, out),
        Type::NUMERIC => Decimal::from_f64(v)
            .ok_or_else(|| format!("{v} is not representable as numeric"))?
            .to_sql(ty, out),
        Type::INT2 | Type::INT4 | Type::INT8 if v.fract() == 0.0 => {
            let whole = v
                .to_i64()
                .ok_or_else(|| format!("{v} is out of range for {ty}"))?;
            bind_integer(whole, ty, out)
        }
        Type::INT2 | Type::INT4 | Type::INT8 => Err(format!("{v} is not an integer").into()),
        _ => bind_text(&v.to_string(), ty, out),
    }
}

fn bind_decimal(v: &Decimal, ty: &Type, out: &mut BytesMut) -> std::result::Result<IsNull, BoxError> {
    match *ty {
        Type::NUMERIC => v.to_sql(ty, out),
        Type::INT2 | Type::INT4 | Type::INT8 | Type::OID => {
            let whole = v
                .to_i64()
                .filter(|_| v.fract().is_zero())
                .ok_or_else(|| format!("{v} is not an integer in range for {ty}"))?;
            bind_integer(whole, ty, out)
        }
        Type::FLOAT4 | Type::FLOAT8 => {
            let float = v
                .to_f64()
                .ok_or_else(|| format!("{v} is out of range for {ty}"))?;
            bind_double(float, ty, out)
        }
        _ => bind_text(&v.to_string(), ty, out),
    }
}

/// Bind text, parsing it when the server expects another type
fn bind_text(text: &str, ty: &Type, out: &mut BytesMut) -> std::result::Result<IsNull, BoxError> {
    match *ty {
        Type::INT2 | Type::INT4 | Type::INT8 | Type::OID => {
            bind_integer(text.trim().parse::<i64>()?, ty, out)
        }
        Type::FLOAT4 | Type::FLOAT8 => bind_double(text.trim().parse::<f64>()?, ty, out),
        Type::NUMERIC => encode_numeric(text.trim(), out),
        Type::BOOL => match text.trim().to_ascii_lowercase().as_str() {
            "t" | "true" | "y" | "yes" | "on" | "1" => true.to_sql(ty, out),
            "f" | "false" | "n" | "no" | "off" | "0" => false.to_sql(ty, out),
            _ => Err(format!("invalid boolean: {text}").into()),
        },
        Type::JSON | Type::JSONB => serde_json::from_str::<serde_json::Value>(text)?.to_sql(ty, out),
        Type::TIMESTAMPTZ => DateTime::parse_from_rfc3339(text.trim())?
            .with_timezone(&Utc)
            .to_sql(ty, out),
        Type::TIMESTAMP => parse_naive(text.trim())?.to_sql(ty, out),
        Type::DATE => NaiveDate::parse_from_str(text.trim(), "%Y-%m-%d")?.to_sql(ty, out),
        Type::TIME => NaiveTime::parse_from_str(text.trim(), "%H:%M:%S%.f")?.to_sql(ty, out),
        Type::UUID => Uuid::parse_str(text.trim())?.to_sql(ty, out),
        Type::BYTEA => text.as_bytes().to_sql(ty, out),
        _ => text.to_sql(ty, out),
    }
}

fn parse_naive(text: &str) -> std::result::Result<NaiveDateTime, chrono::ParseError> {
    NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f"))
}
