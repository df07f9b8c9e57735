//! Queryable (SQL) sources

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use lakehouse_common::{LakeError, Result, Watermark};
use serde::{Serialize, Serializer};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{Column, Row as _, TypeInfo, ValueRef};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, instrument, warn};

/// A single column value, already detached from the driver
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Timestamp(DateTime<Utc>),
    /// `json`/`jsonb` documents, kept nested so refinement can reach into them
    Json(serde_json::Value),
}

impl SqlValue {
    /// Change-column values usable as a watermark
    pub fn as_watermark(&self) -> Option<Watermark> {
        match self {
            SqlValue::Int(v) => Some(Watermark::Version(*v)),
            SqlValue::Timestamp(ts) => Some(Watermark::Timestamp(*ts)),
            _ => None,
        }
    }
}

impl Serialize for SqlValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            SqlValue::Null => serializer.serialize_none(),
            SqlValue::Bool(v) => serializer.serialize_bool(*v),
            SqlValue::Int(v) => serializer.serialize_i64(*v),
            SqlValue::Float(v) => serializer.serialize_f64(*v),
            SqlValue::Text(v) => serializer.serialize_str(v),
            SqlValue::Timestamp(ts) => {
                serializer.serialize_str(&ts.to_rfc3339_opts(SecondsFormat::AutoSi, true))
            }
            SqlValue::Json(v) => v.serialize(serializer),
        }
    }
}

/// Column name to value. Ordered so the serialized record is stable.
pub type Row = BTreeMap<String, SqlValue>;

/// Restricts a query to rows changed after a watermark
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeFilter {
    pub column: String,
    pub after: Watermark,
}

#[async_trait]
pub trait RelationalSource: Send + Sync {
    /// All rows of `table`, or only those whose change column is strictly
    /// greater than the filter's watermark, ordered by that column.
    async fn query(&self, table: &str, filter: Option<&ChangeFilter>) -> Result<Vec<Row>>;
}

/// PostgreSQL source
#[derive(Clone)]
pub struct PgSource {
    name: String,
    pool: PgPool,
}

impl PgSource {
    pub async fn connect(name: impl Into<String>, database_url: &str, max_connections: u32) -> Result<Self> {
        let name = name.into();
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(30))
            .connect(database_url)
            .await
            .map_err(|e| LakeError::source_unavailable(&name, e))?;
        Ok(Self { name, pool })
    }

    pub fn from_pool(name: impl Into<String>, pool: PgPool) -> Self {
        Self {
            name: name.into(),
            pool,
        }
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl RelationalSource for PgSource {
    #[instrument(skip(self), fields(source = %self.name))]
    async fn query(&self, table: &str, filter: Option<&ChangeFilter>) -> Result<Vec<Row>> {
        let sql = build_query(table, filter.map(|f| f.column.as_str()))?;
        debug!("Executing: {}", sql);

        let mut query = sqlx::query(&sql);
        if let Some(filter) = filter {
            query = match &filter.after {
                Watermark::Version(v) => query.bind(*v),
                Watermark::Timestamp(ts) => query.bind(*ts),
            };
        }

        let unavailable = |e: sqlx::Error| LakeError::source_unavailable(format!("{}/{}", self.name, table), e);

        // `timestamp` columns are decoded as UTC, so they must also be
        // compared against the bound watermark in UTC, whatever the server's
        // TimeZone setting.
        let mut tx = self.pool.begin().await.map_err(unavailable)?;
        sqlx::query("SET LOCAL TIME ZONE 'UTC'")
            .execute(&mut *tx)
            .await
            .map_err(unavailable)?;
        let rows = query.fetch_all(&mut *tx).await.map_err(unavailable)?;
        tx.commit().await.map_err(unavailable)?;

        rows.iter()
            .map(decode_row)
            .collect::<std::result::Result<Vec<_>, sqlx::Error>>()
            .map_err(unavailable)
    }
}

/// Quote a possibly schema-qualified identifier
fn quote_ident(name: &str) -> Result<String> {
    let parts: Vec<&str> = name.split('.').collect();
    if parts.iter().any(|p| p.is_empty()) || parts.len() > 2 {
        return Err(LakeError::config(format!("invalid SQL identifier '{name}'")));
    }
    Ok(parts
        .iter()
        .map(|p| format!("\"{}\"", p.replace('"', "\"\"")))
        .collect::<Vec<_>>()
        .join("."))
}

fn build_query(table: &str, change_column: Option<&str>) -> Result<String> {
    let table = quote_ident(table)?;
    Ok(match change_column {
        None => format!("SELECT * FROM {table}"),
        Some(column) => {
            let column = quote_ident(column)?;
            format!("SELECT * FROM {table} WHERE {column} > $1 ORDER BY {column}")
        }
    })
}

fn decode_row(row: &PgRow) -> std::result::Result<Row, sqlx::Error> {
    let mut out = Row::new();
    for (idx, column) in row.columns().iter().enumerate() {
        let value = decode_value(row, idx, column.type_info().name())?;
        out.insert(column.name().to_string(), value);
    }
    Ok(out)
}

fn decode_value(row: &PgRow, idx: usize, type_name: &str) -> std::result::Result<SqlValue, sqlx::Error> {
    if row.try_get_raw(idx)?.is_null() {
        return Ok(SqlValue::Null);
    }

    let value = match type_name {
        "BOOL" => SqlValue::Bool(row.try_get(idx)?),
        "INT2" => SqlValue::Int(row.try_get::<i16, _>(idx)?.into()),
        "INT4" => SqlValue::Int(row.try_get::<i32, _>(idx)?.into()),
        "INT8" => SqlValue::Int(row.try_get(idx)?),
        "FLOAT4" => SqlValue::Float(row.try_get::<f32, _>(idx)?.into()),
        "FLOAT8" => SqlValue::Float(row.try_get(idx)?),
        // Kept as text so no precision is lost before the refined layer.
        "NUMERIC" => SqlValue::Text(row.try_get::<sqlx::types::BigDecimal, _>(idx)?.to_string()),
        "TEXT" | "VARCHAR" | "CHAR" | "BPCHAR" | "NAME" => SqlValue::Text(row.try_get(idx)?),
        "TIMESTAMPTZ" => SqlValue::Timestamp(row.try_get(idx)?),
        "TIMESTAMP" => {
            SqlValue::Timestamp(row.try_get::<chrono::NaiveDateTime, _>(idx)?.and_utc())
        }
        "DATE" => SqlValue::Text(row.try_get::<chrono::NaiveDate, _>(idx)?.to_string()),
        "JSON" | "JSONB" => SqlValue::Json(row.try_get(idx)?),
        other => match row.try_get::<String, _>(idx) {
            Ok(text) => SqlValue::Text(text),
            Err(_) => {
                warn!("Column {} has unsupported type {}; captured as null", idx, other);
                SqlValue::Null
            }
        },
    };

    Ok(value)
}
