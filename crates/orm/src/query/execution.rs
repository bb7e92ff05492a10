//! Query Builder execution for Model types

use super::builder::QueryBuilder;
use crate::backends::DatabasePool;
use crate::error::{ModelError, ModelResult};
use crate::model::Model;
use crate::transaction::Transaction;

// Implement specialized methods for Model-typed query builders
impl<M: Model> QueryBuilder<M> {
    /// Execute query and return models
    pub async fn get(self, pool: &dyn DatabasePool) -> ModelResult<Vec<M>> {
        pool.fetch_all(&self.untyped())
            .await?
            .into_iter()
            .map(M::from_fields)
            .collect()
    }

    /// Execute query inside an open transaction
    pub async fn get_in(self, tx: &mut Transaction) -> ModelResult<Vec<M>> {
        tx.fetch_all(&self.untyped())
            .await?
            .into_iter()
            .map(M::from_fields)
            .collect()
    }

    /// Execute query and return first model
    pub async fn first(self, pool: &dyn DatabasePool) -> ModelResult<Option<M>> {
        let query = self.limit(1);
        let mut results = query.get(pool).await?;
        Ok(results.pop())
    }

    /// Execute query and return first model or error
    pub async fn first_or_fail(self, pool: &dyn DatabasePool) -> ModelResult<M> {
        self.first(pool)
            .await?
            .ok_or_else(|| ModelError::NotFound(M::table_name().to_string()))
    }

    /// Count query results, ignoring limit and offset
    pub async fn count(self, pool: &dyn DatabasePool) -> ModelResult<i64> {
        pool.count(&self.untyped()).await
    }
}
