//! Transaction Management
//!
//! Wraps a backend transaction with explicit commit/rollback and a warning
//! when it is dropped while still open.

use tracing::{debug, warn};

use crate::backends::{DatabasePool, DatabaseTransaction, Row};
use crate::error::{ModelError, ModelResult};
use crate::query::QueryBuilder;

/// High-level transaction wrapper with automatic cleanup
pub struct Transaction {
    inner: Option<Box<dyn DatabaseTransaction>>,
    backend: &'static str,
    committed: bool,
}

impl Transaction {
    /// Begin a transaction on the given pool
    pub async fn begin(pool: &dyn DatabasePool) -> ModelResult<Transaction> {
        debug!("Beginning transaction on {}", pool.backend_name());
        let inner = pool.begin_transaction().await?;

        Ok(Transaction {
            inner: Some(inner),
            backend: pool.backend_name(),
            committed: false,
        })
    }

    fn active(&mut self) -> ModelResult<&mut (dyn DatabaseTransaction + 'static)> {
        self.inner
            .as_deref_mut()
            .ok_or_else(|| ModelError::Transaction("Transaction has already been consumed".to_string()))
    }

    /// Run a SELECT inside the transaction
    pub async fn fetch_all(&mut self, query: &QueryBuilder) -> ModelResult<Vec<Row>> {
        self.active()?.fetch_all(query).await
    }

    /// Insert a row inside the transaction
    pub async fn insert(&mut self, table: &str, fields: Row) -> ModelResult<Row> {
        self.active()?.insert(table, fields).await
    }

    /// Update the row identified by `key_column = key`
    pub async fn update(
        &mut self,
        table: &str,
        key_column: &str,
        key: &serde_json::Value,
        fields: Row,
    ) -> ModelResult<u64> {
        self.active()?.update(table, key_column, key, fields).await
    }

    /// Commit the transaction
    pub async fn commit(mut self) -> ModelResult<()> {
        if let Some(tx) = self.inner.take() {
            debug!("Committing transaction on {}", self.backend);
            tx.commit().await?;
            self.committed = true;
            debug!("Transaction committed successfully");
            Ok(())
        } else {
            Err(ModelError::Transaction("Transaction has already been consumed".to_string()))
        }
    }

    /// Rollback the transaction
    pub async fn rollback(mut self) -> ModelResult<()> {
        if let Some(tx) = self.inner.take() {
            debug!("Rolling back transaction on {}", self.backend);
            tx.rollback().await?;
            debug!("Transaction rolled back successfully");
            Ok(())
        } else {
            Err(ModelError::Transaction("Transaction has already been consumed".to_string()))
        }
    }

    /// Check if the transaction has been committed
    pub fn is_committed(&self) -> bool {
        self.committed
    }

    /// Check if the transaction is still active (not committed or rolled back)
    pub fn is_active(&self) -> bool {
        self.inner.is_some()
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if self.inner.take().is_some() && !self.committed {
            // Backends discard uncommitted work when their handle is dropped
            warn!(
                "Transaction on {} dropped without explicit commit or rollback - changes are discarded",
                self.backend
            );
        }
    }
}
