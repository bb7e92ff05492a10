//! In-memory backend
//!
//! Schema-checked tables held in process memory. Transactions read and write
//! a snapshot of the database and record each insert and update; commit
//! replays those writes on the current state, so concurrent transactions only
//! overwrite each other's changes to the same row. A rolled back (or dropped)
//! transaction leaves stored rows untouched. Keys come from a per-table
//! sequence shared by all transactions and never handed out twice.
//! Used by the test suites and for local experiments.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use tracing::debug;

use super::core::{DatabasePool, DatabaseTransaction, Row};
use crate::error::{ModelError, ModelResult};
use crate::query::{OrderDirection, QueryBuilder, QueryOperator, WhereCondition};

const PRIMARY_KEY: &str = "id";

#[derive(Debug, Clone)]
struct MemoryTable {
    columns: Vec<String>,
    rows: Vec<Row>,
    next_id: i64,
}

impl MemoryTable {
    fn new(columns: &[&str]) -> Self {
        let mut all = vec![PRIMARY_KEY.to_string()];
        all.extend(
            columns
                .iter()
                .filter(|column| **column != PRIMARY_KEY)
                .map(|column| column.to_string()),
        );
        Self {
            columns: all,
            rows: Vec::new(),
            next_id: 1,
        }
    }

    fn has_column(&self, column: &str) -> bool {
        self.columns.iter().any(|c| c == column)
    }

    fn next_key(&mut self) -> i64 {
        let id = self.next_id;
        self.next_id = self.next_id.saturating_add(1);
        id
    }
}

#[derive(Debug, Clone, Default)]
struct MemoryDatabase {
    tables: HashMap<String, MemoryTable>,
}

impl MemoryDatabase {
    fn table(&self, name: &str) -> ModelResult<&MemoryTable> {
        self.tables
            .get(name)
            .ok_or_else(|| ModelError::Database(format!("relation \"{}\" does not exist", name)))
    }

    fn table_mut(&mut self, name: &str) -> ModelResult<&mut MemoryTable> {
        self.tables
            .get_mut(name)
            .ok_or_else(|| ModelError::Database(format!("relation \"{}\" does not exist", name)))
    }

    fn check_columns<'a>(
        table_name: &str,
        table: &MemoryTable,
        mut columns: impl Iterator<Item = &'a String>,
    ) -> ModelResult<()> {
        match columns.find(|column| !table.has_column(column)) {
            Some(column) => Err(ModelError::ColumnNotFound {
                table: table_name.to_string(),
                column: column.clone(),
            }),
            None => Ok(()),
        }
    }

    fn select(&self, query: &QueryBuilder, paginate: bool) -> ModelResult<Vec<Row>> {
        let table_name = query
            .table()
            .ok_or_else(|| ModelError::Database("SELECT without a table".to_string()))?;
        let table = self.table(table_name)?;

        Self::check_columns(
            table_name,
            table,
            query
                .conditions()
                .iter()
                .map(|c| &c.column)
                .chain(query.orders().iter().map(|(column, _)| column)),
        )?;

        let mut rows: Vec<Row> = table
            .rows
            .iter()
            .filter(|row| query.conditions().iter().all(|c| matches(c, row)))
            .cloned()
            .collect();

        for (column, direction) in query.orders().iter().rev() {
            rows.sort_by(|a, b| {
                let ordering = order_values(
                    a.get(column).unwrap_or(&JsonValue::Null),
                    b.get(column).unwrap_or(&JsonValue::Null),
                );
                match direction {
                    OrderDirection::Asc => ordering,
                    OrderDirection::Desc => ordering.reverse(),
                }
            });
        }

        if paginate {
            let offset = query.offset_value().unwrap_or(0).max(0) as usize;
            let limit = query.limit_value().map(|l| l.max(0) as usize).unwrap_or(usize::MAX);
            rows = rows.into_iter().skip(offset).take(limit).collect();
        }

        Ok(rows)
    }

    fn insert(&mut self, table_name: &str, fields: Row) -> ModelResult<Row> {
        let table = self.table_mut(table_name)?;
        Self::check_columns(table_name, table, fields.keys())?;

        let mut row: Row = table
            .columns
            .iter()
            .map(|column| (column.clone(), JsonValue::Null))
            .collect();
        row.extend(fields);

        match row.get(PRIMARY_KEY).and_then(JsonValue::as_i64) {
            Some(id) => {
                let duplicate = table
                    .rows
                    .iter()
                    .any(|existing| existing.get(PRIMARY_KEY).and_then(JsonValue::as_i64) == Some(id));
                if duplicate {
                    return Err(ModelError::Database(format!(
                        "duplicate key value violates unique constraint \"{}_pkey\"",
                        table_name
                    )));
                }
                table.next_id = table.next_id.max(id.saturating_add(1));
            }
            None => {
                row.insert(PRIMARY_KEY.to_string(), JsonValue::from(table.next_key()));
            }
        }

        table.rows.push(row.clone());
        Ok(row)
    }

    fn update(
        &mut self,
        table_name: &str,
        key_column: &str,
        key: &JsonValue,
        fields: Row,
    ) -> ModelResult<u64> {
        let table = self.table_mut(table_name)?;
        Self::check_columns(
            table_name,
            table,
            fields.keys().chain(std::iter::once(&key_column.to_string())),
        )?;

        let mut affected = 0;
        for row in table
            .rows
            .iter_mut()
            .filter(|row| row.get(key_column).map_or(false, |value| values_equal(value, key)))
        {
            for (column, value) in &fields {
                row.insert(column.clone(), value.clone());
            }
            affected += 1;
        }
        Ok(affected)
    }
}

/// In-memory connection pool
#[derive(Debug, Clone, Default)]
pub struct MemoryPool {
    state: Arc<Mutex<MemoryDatabase>>,
}

impl MemoryPool {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryDatabase> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Create (or recreate) a table with an auto-incrementing `id` plus `columns`
    pub fn create_table(&self, name: &str, columns: &[&str]) {
        debug!("memory: creating table {} with columns {:?}", name, columns);
        self.lock()
            .tables
            .insert(name.to_string(), MemoryTable::new(columns));
    }

    /// Remove every row from a table, keeping its schema
    pub fn truncate(&self, name: &str) -> ModelResult<()> {
        let mut db = self.lock();
        let table = db.table_mut(name)?;
        table.rows.clear();
        table.next_id = 1;
        Ok(())
    }

    /// Raw stored rows of a table, bypassing any query
    pub fn rows(&self, name: &str) -> ModelResult<Vec<Row>> {
        Ok(self.lock().table(name)?.rows.clone())
    }
}

#[async_trait]
impl DatabasePool for MemoryPool {
    async fn begin_transaction(&self) -> ModelResult<Box<dyn DatabaseTransaction>> {
        let snapshot = self.lock().clone();
        Ok(Box::new(MemoryTransaction {
            state: Arc::clone(&self.state),
            snapshot,
            writes: Vec::new(),
        }))
    }

    async fn fetch_all(&self, query: &QueryBuilder) -> ModelResult<Vec<Row>> {
        self.lock().select(query, true)
    }

    async fn count(&self, query: &QueryBuilder) -> ModelResult<i64> {
        Ok(self.lock().select(query, false)?.len() as i64)
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

/// Write recorded by a transaction, replayed on commit
#[derive(Debug)]
enum PendingWrite {
    Insert {
        table: String,
        row: Row,
    },
    Update {
        table: String,
        key_column: String,
        key: JsonValue,
        fields: Row,
    },
}

impl PendingWrite {
    fn apply(self, db: &mut MemoryDatabase) -> ModelResult<()> {
        match self {
            PendingWrite::Insert { table, row } => db.insert(&table, row).map(|_| ()),
            PendingWrite::Update {
                table,
                key_column,
                key,
                fields,
            } => db.update(&table, &key_column, &key, fields).map(|_| ()),
        }
    }
}

/// Snapshot transaction over a `MemoryPool`
#[derive(Debug)]
pub struct MemoryTransaction {
    state: Arc<Mutex<MemoryDatabase>>,
    snapshot: MemoryDatabase,
    writes: Vec<PendingWrite>,
}

impl MemoryTransaction {
    fn lock_state(&self) -> MutexGuard<'_, MemoryDatabase> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl DatabaseTransaction for MemoryTransaction {
    async fn fetch_all(&mut self, query: &QueryBuilder) -> ModelResult<Vec<Row>> {
        self.snapshot.select(query, true)
    }

    async fn insert(&mut self, table: &str, mut fields: Row) -> ModelResult<Row> {
        if fields.get(PRIMARY_KEY).map_or(true, JsonValue::is_null) {
            let id = self.lock_state().table_mut(table)?.next_key();
            fields.insert(PRIMARY_KEY.to_string(), JsonValue::from(id));
        }
        let row = self.snapshot.insert(table, fields)?;
        self.writes.push(PendingWrite::Insert {
            table: table.to_string(),
            row: row.clone(),
        });
        Ok(row)
    }

    async fn update(
        &mut self,
        table: &str,
        key_column: &str,
        key: &JsonValue,
        fields: Row,
    ) -> ModelResult<u64> {
        let affected = self.snapshot.update(table, key_column, key, fields.clone())?;
        if affected > 0 {
            self.writes.push(PendingWrite::Update {
                table: table.to_string(),
                key_column: key_column.to_string(),
                key: key.clone(),
                fields,
            });
        }
        Ok(affected)
    }

    async fn commit(self: Box<Self>) -> ModelResult<()> {
        let MemoryTransaction { state, writes, .. } = *self;
        let mut db = state.lock().unwrap_or_else(PoisonError::into_inner);
        // Replayed on a copy so a failing write leaves the state unchanged
        let mut next = db.clone();
        for write in writes {
            write.apply(&mut next)?;
        }
        *db = next;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> ModelResult<()> {
        Ok(())
    }
}

fn parse_timestamp(value: &JsonValue) -> Option<DateTime<Utc>> {
    value
        .as_str()
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

/// SQL-style comparison of two non-null values; `None` when incomparable
fn compare_values(a: &JsonValue, b: &JsonValue) -> Option<Ordering> {
    match (a, b) {
        (JsonValue::Number(x), JsonValue::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (JsonValue::Bool(x), JsonValue::Bool(y)) => Some(x.cmp(y)),
        (JsonValue::String(x), JsonValue::String(y)) => match (parse_timestamp(a), parse_timestamp(b)) {
            (Some(dx), Some(dy)) => Some(dx.cmp(&dy)),
            _ => Some(x.cmp(y)),
        },
        _ => None,
    }
}

fn values_equal(a: &JsonValue, b: &JsonValue) -> bool {
    if a.is_null() || b.is_null() {
        return false;
    }
    compare_values(a, b).map_or(a == b, |ordering| ordering == Ordering::Equal)
}

/// Ordering for ORDER BY: NULL sorts as the largest value
fn order_values(a: &JsonValue, b: &JsonValue) -> Ordering {
    match (a.is_null(), b.is_null()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => compare_values(a, b).unwrap_or(Ordering::Equal),
    }
}

fn matches(condition: &WhereCondition, row: &Row) -> bool {
    let value = row.get(&condition.column).unwrap_or(&JsonValue::Null);
    let compare = |expected: &Option<JsonValue>, accept: fn(Ordering) -> bool| match expected {
        Some(expected) if !value.is_null() && !expected.is_null() => {
            compare_values(value, expected).map_or(false, accept)
        }
        _ => false,
    };

    match condition.operator {
        QueryOperator::IsNull => value.is_null(),
        QueryOperator::IsNotNull => !value.is_null(),
        QueryOperator::Equal => condition
            .value
            .as_ref()
            .map_or(false, |expected| values_equal(value, expected)),
        QueryOperator::NotEqual => match &condition.value {
            Some(expected) if !value.is_null() && !expected.is_null() => {
                !values_equal(value, expected)
            }
            _ => false,
        },
        QueryOperator::GreaterThan => compare(&condition.value, |o| o == Ordering::Greater),
        QueryOperator::GreaterThanOrEqual => compare(&condition.value, |o| o != Ordering::Less),
        QueryOperator::LessThan => compare(&condition.value, |o| o == Ordering::Less),
        QueryOperator::LessThanOrEqual => compare(&condition.value, |o| o != Ordering::Greater),
        QueryOperator::In => condition
            .values
            .iter()
            .any(|expected| values_equal(value, expected)),
    }
}
