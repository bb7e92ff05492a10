//! Query Builder WHERE clause operations

use super::builder::QueryBuilder;
use super::types::*;
use serde_json::Value;

impl<M> QueryBuilder<M> {
    fn push_condition(mut self, column: &str, operator: QueryOperator, value: Option<Value>) -> Self {
        self.where_conditions.push(WhereCondition {
            column: column.to_string(),
            operator,
            value,
            values: Vec::new(),
        });
        self
    }

    /// Add WHERE condition with equality
    pub fn where_eq<T: Into<Value>>(self, column: &str, value: T) -> Self {
        self.push_condition(column, QueryOperator::Equal, Some(value.into()))
    }

    /// Add WHERE condition with not equal
    pub fn where_ne<T: Into<Value>>(self, column: &str, value: T) -> Self {
        self.push_condition(column, QueryOperator::NotEqual, Some(value.into()))
    }

    /// Add WHERE condition with greater than
    pub fn where_gt<T: Into<Value>>(self, column: &str, value: T) -> Self {
        self.push_condition(column, QueryOperator::GreaterThan, Some(value.into()))
    }

    /// Add WHERE condition with greater than or equal
    pub fn where_gte<T: Into<Value>>(self, column: &str, value: T) -> Self {
        self.push_condition(column, QueryOperator::GreaterThanOrEqual, Some(value.into()))
    }

    /// Add WHERE condition with less than
    pub fn where_lt<T: Into<Value>>(self, column: &str, value: T) -> Self {
        self.push_condition(column, QueryOperator::LessThan, Some(value.into()))
    }

    /// Add WHERE condition with less than or equal
    pub fn where_lte<T: Into<Value>>(self, column: &str, value: T) -> Self {
        self.push_condition(column, QueryOperator::LessThanOrEqual, Some(value.into()))
    }

    /// Add WHERE condition with IN
    pub fn where_in<T: Into<Value>>(mut self, column: &str, values: Vec<T>) -> Self {
        self.where_conditions.push(WhereCondition {
            column: column.to_string(),
            operator: QueryOperator::In,
            value: None,
            values: values.into_iter().map(|v| v.into()).collect(),
        });
        self
    }

    /// Add WHERE condition with IS NULL
    pub fn where_null(self, column: &str) -> Self {
        self.push_condition(column, QueryOperator::IsNull, None)
    }

    /// Add WHERE condition with IS NOT NULL
    pub fn where_not_null(self, column: &str) -> Self {
        self.push_condition(column, QueryOperator::IsNotNull, None)
    }
}
