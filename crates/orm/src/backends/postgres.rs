//! PostgreSQL Backend Implementation
//!
//! Rows travel as `jsonb` (`to_jsonb(table)`), which keeps the backend
//! independent of each model's column types. Parameters are bound with the
//! type of the column they target, looked up once per table from
//! `information_schema.columns`.

use std::collections::HashMap;
use std::env;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use sqlx::postgres::{PgArguments, PgPoolOptions};
use sqlx::query::Query;
use sqlx::{Pool, Postgres, Row as SqlxRow};
use tracing::debug;

use super::core::{DatabasePool, DatabaseTransaction, DatabaseValue, Row};
use crate::error::{ModelError, ModelResult};
use crate::query::{BoundParam, QueryBuilder};
use crate::security::escape_identifier;

/// Connection pool configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabasePoolConfig {
    pub database_url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout_seconds: u64,
    pub idle_timeout_seconds: Option<u64>,
    pub max_lifetime_seconds: Option<u64>,
    pub test_before_acquire: bool,
}

impl Default for DatabasePoolConfig {
    fn default() -> Self {
        Self {
            database_url: String::new(),
            max_connections: 10,
            min_connections: 1,
            acquire_timeout_seconds: 30,
            idle_timeout_seconds: Some(600), // 10 minutes
            max_lifetime_seconds: Some(1800), // 30 minutes
            test_before_acquire: true,
        }
    }
}

impl DatabasePoolConfig {
    pub fn new(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            ..Default::default()
        }
    }

    /// Load from `DATABASE_URL` plus optional `DATABASE_MAX_CONNECTIONS`,
    /// `DATABASE_MIN_CONNECTIONS` and `DATABASE_ACQUIRE_TIMEOUT` (seconds)
    pub fn from_env() -> ModelResult<Self> {
        let database_url = env::var("DATABASE_URL").map_err(|_| {
            ModelError::Configuration("Missing required environment variable: DATABASE_URL".to_string())
        })?;

        let mut config = Self::new(database_url);
        if let Some(max) = env_number("DATABASE_MAX_CONNECTIONS")? {
            config.max_connections = max;
        }
        if let Some(min) = env_number("DATABASE_MIN_CONNECTIONS")? {
            config.min_connections = min;
        }
        if let Some(timeout) = env_number("DATABASE_ACQUIRE_TIMEOUT")? {
            config.acquire_timeout_seconds = timeout;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> ModelResult<()> {
        let parsed = url::Url::parse(&self.database_url)
            .map_err(|e| ModelError::Configuration(format!("Invalid database URL: {}", e)))?;

        if !matches!(parsed.scheme(), "postgres" | "postgresql") {
            return Err(ModelError::Configuration(format!(
                "Invalid PostgreSQL URL scheme '{}'",
                parsed.scheme()
            )));
        }

        if self.max_connections == 0 || self.min_connections > self.max_connections {
            return Err(ModelError::Configuration(format!(
                "Invalid pool size: min {} / max {}",
                self.min_connections, self.max_connections
            )));
        }

        Ok(())
    }
}

fn env_number<T: std::str::FromStr>(key: &str) -> ModelResult<Option<T>> {
    match env::var(key) {
        Ok(raw) => raw
            .parse()
            .map(Some)
            .map_err(|_| ModelError::Configuration(format!("{} must be a number, got '{}'", key, raw))),
        Err(_) => Ok(None),
    }
}

const COLUMN_TYPES_SQL: &str = "SELECT column_name::text, data_type::text \
     FROM information_schema.columns \
     WHERE table_schema = current_schema() AND table_name = $1";

/// Column name to `data_type` per table
type ColumnTypes = Arc<HashMap<String, String>>;

/// Column types per table, loaded on first use and shared by a pool and its
/// transactions
#[derive(Debug, Clone, Default)]
struct ColumnTypeCache {
    tables: Arc<DashMap<String, ColumnTypes>>,
}

impl ColumnTypeCache {
    async fn get(&self, pool: &Pool<Postgres>, table: &str) -> ModelResult<ColumnTypes> {
        if let Some(types) = self.tables.get(table) {
            return Ok(Arc::clone(types.value()));
        }

        debug!("postgres: loading column types of {}", table);
        let rows: Vec<(String, String)> = sqlx::query_as(COLUMN_TYPES_SQL)
            .bind(table)
            .fetch_all(pool)
            .await?;
        let types: ColumnTypes = Arc::new(rows.into_iter().collect());
        self.tables.insert(table.to_string(), Arc::clone(&types));
        Ok(types)
    }
}

/// PostgreSQL connection pool implementation
#[derive(Debug, Clone)]
pub struct PostgresPool {
    pool: Pool<Postgres>,
    column_types: ColumnTypeCache,
}

impl PostgresPool {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self {
            pool,
            column_types: ColumnTypeCache::default(),
        }
    }

    /// Connect a new pool using the given configuration
    pub async fn connect(config: &DatabasePoolConfig) -> ModelResult<Self> {
        config.validate()?;

        let mut options = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.acquire_timeout_seconds))
            .test_before_acquire(config.test_before_acquire);

        if let Some(idle_timeout) = config.idle_timeout_seconds {
            options = options.idle_timeout(Duration::from_secs(idle_timeout));
        }

        if let Some(max_lifetime) = config.max_lifetime_seconds {
            options = options.max_lifetime(Duration::from_secs(max_lifetime));
        }

        let pool = options
            .connect(&config.database_url)
            .await
            .map_err(|e| ModelError::Connection(format!("Failed to create PostgreSQL pool: {}", e)))?;

        Ok(Self::new(pool))
    }

    pub fn inner(&self) -> &Pool<Postgres> {
        &self.pool
    }
}

#[async_trait]
impl DatabasePool for PostgresPool {
    async fn begin_transaction(&self) -> ModelResult<Box<dyn DatabaseTransaction>> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|e| ModelError::Transaction(format!("Failed to begin transaction: {}", e)))?;
        Ok(Box::new(PostgresTransaction {
            tx,
            pool: self.pool.clone(),
            column_types: self.column_types.clone(),
        }))
    }

    async fn fetch_all(&self, query: &QueryBuilder) -> ModelResult<Vec<Row>> {
        let (table, sql, params) = select_rows_sql(query)?;
        let types = self.column_types.get(&self.pool, table).await?;
        let rows = bind_params(sqlx::query(&sql), &params, &types)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(decode_record).collect()
    }

    async fn count(&self, query: &QueryBuilder) -> ModelResult<i64> {
        let (sql, params) = count_sql(query);
        let types = match query.table() {
            Some(table) => self.column_types.get(&self.pool, table).await?,
            None => ColumnTypes::default(),
        };
        let row = bind_params(sqlx::query(&sql), &params, &types)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get(0)?)
    }

    fn backend_name(&self) -> &'static str {
        "postgres"
    }
}

/// PostgreSQL transaction implementation
///
/// The wrapped sqlx transaction rolls back on drop if not committed.
pub struct PostgresTransaction {
    tx: sqlx::Transaction<'static, Postgres>,
    pool: Pool<Postgres>,
    column_types: ColumnTypeCache,
}

#[async_trait]
impl DatabaseTransaction for PostgresTransaction {
    async fn fetch_all(&mut self, query: &QueryBuilder) -> ModelResult<Vec<Row>> {
        let (table, sql, params) = select_rows_sql(query)?;
        let types = self.column_types.get(&self.pool, table).await?;
        let rows = bind_params(sqlx::query(&sql), &params, &types)
            .fetch_all(&mut *self.tx)
            .await?;
        rows.iter().map(decode_record).collect()
    }

    async fn insert(&mut self, table: &str, fields: Row) -> ModelResult<Row> {
        let (sql, params) = insert_sql(table, fields);
        let types = self.column_types.get(&self.pool, table).await?;
        debug!("postgres: {}", sql);
        let row = bind_params(sqlx::query(&sql), &params, &types)
            .fetch_one(&mut *self.tx)
            .await?;
        decode_record(&row)
    }

    async fn update(
        &mut self,
        table: &str,
        key_column: &str,
        key: &JsonValue,
        fields: Row,
    ) -> ModelResult<u64> {
        let types = self.column_types.get(&self.pool, table).await?;
        match update_sql(table, key_column, key, fields) {
            Some((sql, params)) => {
                debug!("postgres: {}", sql);
                let result = bind_params(sqlx::query(&sql), &params, &types)
                    .execute(&mut *self.tx)
                    .await?;
                Ok(result.rows_affected())
            }
            // Nothing to write; the row still counts as affected if it exists
            None => {
                let (sql, params) = key_count_sql(table, key_column, key);
                let row = bind_params(sqlx::query(&sql), &params, &types)
                    .fetch_one(&mut *self.tx)
                    .await?;
                let count: i64 = row.try_get(0)?;
                Ok(u64::try_from(count).unwrap_or(0))
            }
        }
    }

    async fn commit(self: Box<Self>) -> ModelResult<()> {
        self.tx
            .commit()
            .await
            .map_err(|e| ModelError::Transaction(format!("Failed to commit transaction: {}", e)))
    }

    async fn rollback(self: Box<Self>) -> ModelResult<()> {
        self.tx
            .rollback()
            .await
            .map_err(|e| ModelError::Transaction(format!("Failed to rollback transaction: {}", e)))
    }
}

fn record_expression(table: &str) -> String {
    format!("to_jsonb({})", escape_identifier(table))
}

fn select_rows_sql(query: &QueryBuilder) -> ModelResult<(&str, String, Vec<BoundParam>)> {
    let table = query
        .table()
        .ok_or_else(|| ModelError::Database("SELECT without a table".to_string()))?;
    let expression = format!("{} AS record", record_expression(table));
    let (sql, params) = query.clone().select(&[expression.as_str()]).to_sql_with_bound_params();
    Ok((table, sql, params))
}

fn count_sql(query: &QueryBuilder) -> (String, Vec<BoundParam>) {
    let mut count = query.clone().select(&["COUNT(*)"]);
    count.order_by.clear();
    count.limit_count = None;
    count.offset_value = None;
    count.to_sql_with_bound_params()
}

fn key_count_sql(table: &str, key_column: &str, key: &JsonValue) -> (String, Vec<BoundParam>) {
    let query: QueryBuilder = QueryBuilder::new().from(table).where_eq(key_column, key.clone());
    count_sql(&query)
}

/// NULL fields are left out so column defaults apply
fn insert_sql(table: &str, fields: Row) -> (String, Vec<BoundParam>) {
    let mut query: QueryBuilder = QueryBuilder::new().insert_into(table);
    for (column, value) in fields.into_iter().filter(|(_, value)| !value.is_null()) {
        query = query.set(&column, value);
    }
    query.returning(&record_expression(table)).to_sql_with_bound_params()
}

/// `None` when there is no column besides the key to write
fn update_sql(
    table: &str,
    key_column: &str,
    key: &JsonValue,
    fields: Row,
) -> Option<(String, Vec<BoundParam>)> {
    let mut query: QueryBuilder = QueryBuilder::new().update(table);
    let mut assigned = false;
    for (column, value) in fields.into_iter().filter(|(column, _)| column != key_column) {
        query = query.set(&column, value);
        assigned = true;
    }
    assigned.then(|| query.where_eq(key_column, key.clone()).to_sql_with_bound_params())
}

fn bind_params<'q>(
    mut query: Query<'q, Postgres, PgArguments>,
    params: &[BoundParam],
    types: &HashMap<String, String>,
) -> Query<'q, Postgres, PgArguments> {
    for param in params {
        let sql_type = types.get(&param.column).map(String::as_str);
        query = match DatabaseValue::from_json_for_column(param.value.clone(), sql_type) {
            DatabaseValue::Null => query.bind(Option::<String>::None),
            DatabaseValue::Bool(b) => query.bind(b),
            DatabaseValue::Int32(i) => query.bind(i),
            DatabaseValue::Int64(i) => query.bind(i),
            DatabaseValue::Float64(f) => query.bind(f),
            DatabaseValue::String(s) => query.bind(s),
            DatabaseValue::Uuid(u) => query.bind(u),
            DatabaseValue::DateTime(dt) => query.bind(dt),
            DatabaseValue::Json(j) => query.bind(sqlx::types::Json(j)),
        };
    }
    query
}

fn decode_record(row: &sqlx::postgres::PgRow) -> ModelResult<Row> {
    match row.try_get::<JsonValue, _>(0)? {
        JsonValue::Object(map) => Ok(map),
        other => Err(ModelError::Serialization(format!(
            "Expected a JSON object row, got {}",
            other
        ))),
    }
}
