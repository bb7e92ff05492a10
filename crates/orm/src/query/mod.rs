//! Query Builder Module - Fluent query builder for database operations

pub mod builder;
pub mod execution;
pub mod sql_generation;
pub mod types;
pub mod where_clause;

pub use builder::QueryBuilder;
pub use sql_generation::BoundParam;
pub use types::{OrderDirection, QueryOperator, QueryType, SetClause, WhereCondition};
