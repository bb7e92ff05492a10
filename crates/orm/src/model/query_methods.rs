//! Query Methods - Collection query operations for models

use crate::backends::DatabasePool;
use crate::error::ModelResult;
use crate::model::core_trait::Model;
use crate::query::QueryBuilder;

/// Trait providing query operations for model collections
pub trait QueryMethods: Model {
    /// Get a query builder for this model
    fn query() -> QueryBuilder<Self>
    where
        Self: Sized,
    {
        QueryBuilder::new().from(Self::table_name())
    }

    /// Get all records for this model
    async fn all(pool: &dyn DatabasePool) -> ModelResult<Vec<Self>>
    where
        Self: Sized,
    {
        Self::query().get(pool).await
    }

    /// Count all records for this model
    async fn count(pool: &dyn DatabasePool) -> ModelResult<i64>
    where
        Self: Sized,
    {
        Self::query().count(pool).await
    }
}

impl<T: Model> QueryMethods for T {}
