//! Query Builder SQL generation (PostgreSQL dialect, `$n` placeholders)

use serde_json::Value;

use super::builder::QueryBuilder;
use super::types::*;
use crate::security::escape_identifier;

/// A placeholder's value together with the column it is compared with or
/// written to, so backends can bind it with that column's type
#[derive(Debug, Clone, PartialEq)]
pub struct BoundParam {
    pub column: String,
    pub value: Value,
}

impl<M> QueryBuilder<M> {
    /// Generate SQL with parameter placeholders and return the parameters
    pub fn to_sql_with_params(&self) -> (String, Vec<Value>) {
        let (sql, params) = self.to_sql_with_bound_params();
        (sql, params.into_iter().map(|param| param.value).collect())
    }

    /// Like `to_sql_with_params`, keeping the column of each parameter
    pub fn to_sql_with_bound_params(&self) -> (String, Vec<BoundParam>) {
        let mut params = Vec::new();
        let sql = match self.query_type {
            QueryType::Select => self.build_select_sql(&mut params),
            QueryType::Insert => self.build_insert_sql(&mut params),
            QueryType::Update => self.build_update_sql(&mut params),
        };
        (sql, params)
    }

    /// SQL text only; parameters stay as placeholders
    pub fn to_sql(&self) -> String {
        self.to_sql_with_params().0
    }

    fn table_sql(&self) -> String {
        self.table
            .as_deref()
            .map(escape_identifier)
            .unwrap_or_default()
    }

    fn build_select_sql(&self, params: &mut Vec<BoundParam>) -> String {
        let mut sql = String::from("SELECT ");

        if self.select_fields.is_empty() {
            sql.push('*');
        } else {
            sql.push_str(&self.select_fields.join(", "));
        }

        if self.table.is_some() {
            sql.push_str(" FROM ");
            sql.push_str(&self.table_sql());
        }

        self.build_where_clause(&mut sql, params);
        self.build_order_limit_clause(&mut sql);
        sql
    }

    fn build_insert_sql(&self, params: &mut Vec<BoundParam>) -> String {
        let mut sql = format!("INSERT INTO {}", self.table_sql());

        if self.set_clauses.is_empty() {
            sql.push_str(" DEFAULT VALUES");
        } else {
            let columns: Vec<String> = self
                .set_clauses
                .iter()
                .map(|clause| escape_identifier(&clause.column))
                .collect();
            let values: Vec<String> = self
                .set_clauses
                .iter()
                .map(|clause| Self::placeholder(&clause.column, clause.value.as_ref(), params))
                .collect();
            sql.push_str(&format!(" ({}) VALUES ({})", columns.join(", "), values.join(", ")));
        }

        self.build_returning_clause(&mut sql);
        sql
    }

    fn build_update_sql(&self, params: &mut Vec<BoundParam>) -> String {
        let mut sql = format!("UPDATE {}", self.table_sql());

        if !self.set_clauses.is_empty() {
            let assignments: Vec<String> = self
                .set_clauses
                .iter()
                .map(|clause| {
                    format!(
                        "{} = {}",
                        escape_identifier(&clause.column),
                        Self::placeholder(&clause.column, clause.value.as_ref(), params)
                    )
                })
                .collect();
            sql.push_str(" SET ");
            sql.push_str(&assignments.join(", "));
        }

        self.build_where_clause(&mut sql, params);
        self.build_returning_clause(&mut sql);
        sql
    }

    /// NULL is inlined so the column type decides, not the bound parameter type
    fn placeholder(column: &str, value: Option<&Value>, params: &mut Vec<BoundParam>) -> String {
        match value {
            Some(value) if !value.is_null() => {
                params.push(BoundParam {
                    column: column.to_string(),
                    value: value.clone(),
                });
                format!("${}", params.len())
            }
            _ => "NULL".to_string(),
        }
    }

    fn build_where_clause(&self, sql: &mut String, params: &mut Vec<BoundParam>) {
        if self.where_conditions.is_empty() {
            return;
        }

        let conditions: Vec<String> = self
            .where_conditions
            .iter()
            .map(|condition| {
                let column = escape_identifier(&condition.column);
                match condition.operator {
                    QueryOperator::IsNull | QueryOperator::IsNotNull => {
                        format!("{} {}", column, condition.operator)
                    }
                    QueryOperator::In if condition.values.is_empty() => "FALSE".to_string(),
                    QueryOperator::In => {
                        let placeholders: Vec<String> = condition
                            .values
                            .iter()
                            .map(|value| Self::placeholder(&condition.column, Some(value), params))
                            .collect();
                        format!("{} IN ({})", column, placeholders.join(", "))
                    }
                    _ => match &condition.value {
                        Some(value) if !value.is_null() => {
                            let placeholder = Self::placeholder(&condition.column, Some(value), params);
                            format!("{} {} {}", column, condition.operator, placeholder)
                        }
                        // Comparing against NULL never matches in SQL
                        _ => "FALSE".to_string(),
                    },
                }
            })
            .collect();

        sql.push_str(" WHERE ");
        sql.push_str(&conditions.join(" AND "));
    }

    fn build_order_limit_clause(&self, sql: &mut String) {
        if !self.order_by.is_empty() {
            let clauses: Vec<String> = self
                .order_by
                .iter()
                .map(|(column, direction)| format!("{} {}", escape_identifier(column), direction))
                .collect();
            sql.push_str(" ORDER BY ");
            sql.push_str(&clauses.join(", "));
        }

        if let Some(limit) = self.limit_count {
            sql.push_str(&format!(" LIMIT {}", limit));
        }

        if let Some(offset) = self.offset_value {
            sql.push_str(&format!(" OFFSET {}", offset));
        }
    }

    fn build_returning_clause(&self, sql: &mut String) {
        if let Some(returning) = &self.returning {
            sql.push_str(" RETURNING ");
            sql.push_str(returning);
        }
    }
}
