//! Core Database Backend Traits
//!
//! Backends work on JSON rows (`Row`) and untyped `QueryBuilder`s, so models
//! only need to be `serde`-serializable to be persisted by any backend.

use async_trait::async_trait;
use serde_json::Value as JsonValue;

use crate::error::ModelResult;
use crate::query::QueryBuilder;

/// A database row as a column name to JSON value map
pub type Row = serde_json::Map<String, JsonValue>;

/// Abstract database transaction trait
///
/// Dropping a transaction without calling `commit` discards its changes.
#[async_trait]
pub trait DatabaseTransaction: Send {
    /// Run a SELECT within the transaction
    async fn fetch_all(&mut self, query: &QueryBuilder) -> ModelResult<Vec<Row>>;

    /// Insert a row and return it as stored (including generated keys)
    async fn insert(&mut self, table: &str, fields: Row) -> ModelResult<Row>;

    /// Update the row identified by `key_column = key`, returning affected rows
    async fn update(
        &mut self,
        table: &str,
        key_column: &str,
        key: &JsonValue,
        fields: Row,
    ) -> ModelResult<u64>;

    /// Commit the transaction
    async fn commit(self: Box<Self>) -> ModelResult<()>;

    /// Rollback the transaction
    async fn rollback(self: Box<Self>) -> ModelResult<()>;
}

/// Abstract database connection pool trait
#[async_trait]
pub trait DatabasePool: Send + Sync {
    /// Begin a transaction from the pool
    async fn begin_transaction(&self) -> ModelResult<Box<dyn DatabaseTransaction>>;

    /// Run a SELECT directly on the pool
    async fn fetch_all(&self, query: &QueryBuilder) -> ModelResult<Vec<Row>>;

    /// Count the rows a SELECT would return, ignoring its limit and offset
    async fn count(&self, query: &QueryBuilder) -> ModelResult<i64>;

    /// Short backend name used in logs
    fn backend_name(&self) -> &'static str;
}

/// Database value enumeration for type-safe parameter binding
#[derive(Debug, Clone, PartialEq)]
pub enum DatabaseValue {
    Null,
    Bool(bool),
    Int32(i32),
    Int64(i64),
    Float64(f64),
    String(String),
    Uuid(uuid::Uuid),
    DateTime(chrono::DateTime<chrono::Utc>),
    Json(JsonValue),
}

impl DatabaseValue {
    /// Check if the value is null
    pub fn is_null(&self) -> bool {
        matches!(self, DatabaseValue::Null)
    }

    /// Convert to JSON value
    pub fn to_json(&self) -> JsonValue {
        match self {
            DatabaseValue::Null => JsonValue::Null,
            DatabaseValue::Bool(b) => JsonValue::Bool(*b),
            DatabaseValue::Int32(i) => JsonValue::from(*i),
            DatabaseValue::Int64(i) => JsonValue::from(*i),
            DatabaseValue::Float64(f) => serde_json::Number::from_f64(*f)
                .map(JsonValue::Number)
                .unwrap_or(JsonValue::Null),
            DatabaseValue::String(s) => JsonValue::String(s.clone()),
            DatabaseValue::Uuid(u) => JsonValue::String(u.to_string()),
            DatabaseValue::DateTime(dt) => JsonValue::String(dt.to_rfc3339()),
            DatabaseValue::Json(j) => j.clone(),
        }
    }

    /// Create DatabaseValue from JSON value
    ///
    /// Strings that parse as UUIDs or RFC 3339 timestamps are typed as such so
    /// they bind against `uuid` / `timestamptz` columns. When the target
    /// column's type is known, use `from_json_for_column` instead: a text
    /// value that happens to look like a UUID or timestamp is otherwise bound
    /// with the wrong type.
    pub fn from_json(json: JsonValue) -> Self {
        match json {
            JsonValue::Null => DatabaseValue::Null,
            JsonValue::Bool(b) => DatabaseValue::Bool(b),
            JsonValue::Number(n) => {
                if let Some(i) = n.as_i64() {
                    match i32::try_from(i) {
                        Ok(small) => DatabaseValue::Int32(small),
                        Err(_) => DatabaseValue::Int64(i),
                    }
                } else if let Some(f) = n.as_f64() {
                    DatabaseValue::Float64(f)
                } else {
                    DatabaseValue::Null
                }
            }
            JsonValue::String(s) => {
                if let Ok(uuid) = uuid::Uuid::parse_str(&s) {
                    DatabaseValue::Uuid(uuid)
                } else if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(&s) {
                    DatabaseValue::DateTime(dt.with_timezone(&chrono::Utc))
                } else {
                    DatabaseValue::String(s)
                }
            }
            other => DatabaseValue::Json(other),
        }
    }

    /// Create DatabaseValue for a column whose SQL type (`information_schema`
    /// `data_type`) may be known
    ///
    /// Strings follow the column type; everything else, and columns of
    /// unknown type, go through `from_json`.
    pub fn from_json_for_column(json: JsonValue, sql_type: Option<&str>) -> Self {
        match (json, sql_type) {
            (JsonValue::String(s), Some(sql_type)) => Self::from_string_for_type(s, sql_type),
            (json, _) => Self::from_json(json),
        }
    }

    fn from_string_for_type(s: String, sql_type: &str) -> Self {
        match sql_type {
            "text" | "character varying" | "character" | "name" => DatabaseValue::String(s),
            "uuid" => match uuid::Uuid::parse_str(&s) {
                Ok(uuid) => DatabaseValue::Uuid(uuid),
                Err(_) => DatabaseValue::String(s),
            },
            "timestamp with time zone" | "timestamp without time zone" => {
                match chrono::DateTime::parse_from_rfc3339(&s) {
                    Ok(dt) => DatabaseValue::DateTime(dt.with_timezone(&chrono::Utc)),
                    Err(_) => DatabaseValue::String(s),
                }
            }
            "json" | "jsonb" => DatabaseValue::Json(JsonValue::String(s)),
            _ => Self::from_json(JsonValue::String(s)),
        }
    }
}
