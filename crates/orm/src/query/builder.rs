//! Query Builder - Core builder implementation

use std::marker::PhantomData;

use serde_json::Value;

use super::types::*;

/// Query builder for constructing database queries
///
/// `M` ties a select query to the model it hydrates. Backends receive the
/// untyped form (`QueryBuilder<()>`).
#[derive(Debug)]
pub struct QueryBuilder<M = ()> {
    pub(crate) query_type: QueryType,
    pub(crate) select_fields: Vec<String>,
    pub(crate) table: Option<String>,
    pub(crate) set_clauses: Vec<SetClause>,
    pub(crate) where_conditions: Vec<WhereCondition>,
    pub(crate) order_by: Vec<(String, OrderDirection)>,
    pub(crate) limit_count: Option<i64>,
    pub(crate) offset_value: Option<i64>,
    pub(crate) returning: Option<String>,
    _phantom: PhantomData<M>,
}

impl<M> Clone for QueryBuilder<M> {
    fn clone(&self) -> Self {
        Self {
            query_type: self.query_type.clone(),
            select_fields: self.select_fields.clone(),
            table: self.table.clone(),
            set_clauses: self.set_clauses.clone(),
            where_conditions: self.where_conditions.clone(),
            order_by: self.order_by.clone(),
            limit_count: self.limit_count,
            offset_value: self.offset_value,
            returning: self.returning.clone(),
            _phantom: PhantomData,
        }
    }
}

impl<M> Default for QueryBuilder<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M> QueryBuilder<M> {
    /// Create a new query builder
    pub fn new() -> Self {
        Self {
            query_type: QueryType::Select,
            select_fields: Vec::new(),
            table: None,
            set_clauses: Vec::new(),
            where_conditions: Vec::new(),
            order_by: Vec::new(),
            limit_count: None,
            offset_value: None,
            returning: None,
            _phantom: PhantomData,
        }
    }

    /// Select specific expressions instead of `*`
    pub fn select(mut self, fields: &[&str]) -> Self {
        self.select_fields = fields.iter().map(|f| f.to_string()).collect();
        self
    }

    /// Set the table to select from
    pub fn from(mut self, table: &str) -> Self {
        self.table = Some(table.to_string());
        self
    }

    /// Start an INSERT into the given table
    pub fn insert_into(mut self, table: &str) -> Self {
        self.query_type = QueryType::Insert;
        self.table = Some(table.to_string());
        self
    }

    /// Start an UPDATE of the given table
    pub fn update(mut self, table: &str) -> Self {
        self.query_type = QueryType::Update;
        self.table = Some(table.to_string());
        self
    }

    /// Assign a column for INSERT/UPDATE; JSON null becomes SQL NULL
    pub fn set<T: Into<Value>>(mut self, column: &str, value: T) -> Self {
        let value = match value.into() {
            Value::Null => None,
            other => Some(other),
        };
        self.set_clauses.push(SetClause {
            column: column.to_string(),
            value,
        });
        self
    }

    /// Expression returned by INSERT/UPDATE
    pub fn returning(mut self, expression: &str) -> Self {
        self.returning = Some(expression.to_string());
        self
    }

    /// Add ORDER BY clause
    pub fn order_by(mut self, column: &str, direction: OrderDirection) -> Self {
        self.order_by.push((column.to_string(), direction));
        self
    }

    /// Add ORDER BY ... DESC clause
    pub fn order_by_desc(self, column: &str) -> Self {
        self.order_by(column, OrderDirection::Desc)
    }

    /// Add LIMIT clause
    pub fn limit(mut self, count: i64) -> Self {
        self.limit_count = Some(count);
        self
    }

    /// Add OFFSET clause
    pub fn offset(mut self, offset: i64) -> Self {
        self.offset_value = Some(offset);
        self
    }

    /// Page through results (1-indexed pages)
    pub fn paginate(self, per_page: i64, page: i64) -> Self {
        let offset = (page.max(1) - 1).saturating_mul(per_page);
        self.limit(per_page).offset(offset)
    }

    pub fn table(&self) -> Option<&str> {
        self.table.as_deref()
    }

    pub fn conditions(&self) -> &[WhereCondition] {
        &self.where_conditions
    }

    pub fn orders(&self) -> &[(String, OrderDirection)] {
        &self.order_by
    }

    pub fn limit_value(&self) -> Option<i64> {
        self.limit_count
    }

    pub fn offset_value(&self) -> Option<i64> {
        self.offset_value
    }

    /// Drop the model marker so the query can be handed to a backend
    pub fn untyped(&self) -> QueryBuilder {
        self.clone().cast()
    }

    pub(crate) fn cast<N>(self) -> QueryBuilder<N> {
        QueryBuilder {
            query_type: self.query_type,
            select_fields: self.select_fields,
            table: self.table,
            set_clauses: self.set_clauses,
            where_conditions: self.where_conditions,
            order_by: self.order_by,
            limit_count: self.limit_count,
            offset_value: self.offset_value,
            returning: self.returning,
            _phantom: PhantomData,
        }
    }
}
