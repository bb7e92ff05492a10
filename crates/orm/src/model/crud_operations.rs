//! CRUD Operations - Create, Read and Update operations for models
//!
//! Every write runs inside a `Transaction`. The `*_in` variants take an open
//! transaction so callers can group several writes and decide when to commit.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::backends::DatabasePool;
use crate::error::{ModelError, ModelResult};
use crate::model::core_trait::Model;
use crate::query::QueryBuilder;
use crate::transaction::Transaction;

/// Options for a single save
///
/// Unset fields fall back to defaults: validations run and `updated_at` is
/// refreshed for models that use timestamps.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SaveOptions {
    pub validate: Option<bool>,
    pub touch: Option<bool>,
}

impl SaveOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_validation(mut self, validate: bool) -> Self {
        self.validate = Some(validate);
        self
    }

    pub fn with_touch(mut self, touch: bool) -> Self {
        self.touch = Some(touch);
        self
    }

    /// Fill unset fields from `defaults`; fields set on `self` win
    pub fn merge(self, defaults: SaveOptions) -> SaveOptions {
        SaveOptions {
            validate: self.validate.or(defaults.validate),
            touch: self.touch.or(defaults.touch),
        }
    }

    pub fn should_validate(&self) -> bool {
        self.validate.unwrap_or(true)
    }

    pub fn should_touch(&self) -> bool {
        self.touch.unwrap_or(true)
    }
}

fn primary_key_value<M: Model>(key: &M::PrimaryKey) -> ModelResult<serde_json::Value> {
    Ok(serde_json::to_value(key)?)
}

/// Trait providing CRUD operations for models
pub trait CrudOperations: Model {
    /// Find a model by its primary key
    async fn find(pool: &dyn DatabasePool, id: Self::PrimaryKey) -> ModelResult<Option<Self>>
    where
        Self: Sized,
    {
        let query: QueryBuilder = QueryBuilder::new()
            .from(Self::table_name())
            .where_eq(Self::primary_key_name(), primary_key_value::<Self>(&id)?)
            .limit(1);

        match pool.fetch_all(&query).await?.into_iter().next() {
            Some(row) => Ok(Some(Self::from_fields(row)?)),
            None => Ok(None),
        }
    }

    /// Find a model by its primary key or return an error if not found
    async fn find_or_fail(pool: &dyn DatabasePool, id: Self::PrimaryKey) -> ModelResult<Self>
    where
        Self: Sized,
    {
        Self::find(pool, id.clone())
            .await?
            .ok_or_else(|| ModelError::NotFound(format!("{}({})", Self::table_name(), id)))
    }

    /// Validate and insert a new model, returning it as stored
    async fn create(pool: &dyn DatabasePool, model: Self) -> ModelResult<Self>
    where
        Self: Sized,
    {
        let mut tx = Transaction::begin(pool).await?;
        match Self::create_in(&mut tx, model).await {
            Ok(created) => {
                tx.commit().await?;
                Ok(created)
            }
            Err(e) => {
                if let Err(rollback_error) = tx.rollback().await {
                    warn!("Rollback after failed create failed: {}", rollback_error);
                }
                Err(e)
            }
        }
    }

    /// Insert a new model inside an open transaction
    async fn create_in(tx: &mut Transaction, mut model: Self) -> ModelResult<Self>
    where
        Self: Sized,
    {
        model.save_strict_in(tx, None).await?;
        Ok(model)
    }

    /// Reload this model's fields from the database
    async fn reload(&mut self, pool: &dyn DatabasePool) -> ModelResult<()>
    where
        Self: Sized,
    {
        let pk = self.primary_key().ok_or(ModelError::MissingPrimaryKey)?;
        *self = Self::find_or_fail(pool, pk).await?;
        Ok(())
    }

    /// Save in its own transaction; `Ok(false)` when validation fails
    async fn save(&mut self, pool: &dyn DatabasePool, options: Option<SaveOptions>) -> ModelResult<bool>
    where
        Self: Sized,
    {
        match self.save_strict(pool, options).await {
            Ok(()) => Ok(true),
            Err(e) if e.is_validation() => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Save in its own transaction; validation failures are errors
    async fn save_strict(&mut self, pool: &dyn DatabasePool, options: Option<SaveOptions>) -> ModelResult<()>
    where
        Self: Sized,
    {
        let mut tx = Transaction::begin(pool).await?;
        match self.save_strict_in(&mut tx, options).await {
            Ok(()) => tx.commit().await,
            Err(e) => {
                if let Err(rollback_error) = tx.rollback().await {
                    warn!("Rollback after failed save failed: {}", rollback_error);
                }
                Err(e)
            }
        }
    }

    /// Save inside an open transaction; `Ok(false)` when validation fails
    async fn save_in(&mut self, tx: &mut Transaction, options: Option<SaveOptions>) -> ModelResult<bool>
    where
        Self: Sized,
    {
        match self.save_strict_in(tx, options).await {
            Ok(()) => Ok(true),
            Err(e) if e.is_validation() => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Save inside an open transaction
    ///
    /// Inserts when the model has no primary key yet and adopts the stored
    /// row (generated key included); otherwise updates the row by key.
    async fn save_strict_in(&mut self, tx: &mut Transaction, options: Option<SaveOptions>) -> ModelResult<()>
    where
        Self: Sized,
    {
        let options = options.unwrap_or_default();

        if options.should_validate() {
            self.validate()?;
        }

        let now = Utc::now();
        if Self::uses_timestamps() && options.should_touch() {
            self.set_updated_at(now);
        }

        match self.primary_key() {
            Some(pk) => {
                let key = primary_key_value::<Self>(&pk)?;
                debug!("Updating {}({})", Self::table_name(), pk);
                let affected = tx
                    .update(Self::table_name(), Self::primary_key_name(), &key, self.to_fields()?)
                    .await?;
                if affected == 0 {
                    return Err(ModelError::NotFound(format!("{}({})", Self::table_name(), pk)));
                }
            }
            None => {
                if Self::uses_timestamps() {
                    self.set_created_at(now);
                    self.set_updated_at(now);
                }
                debug!("Inserting into {}", Self::table_name());
                let row = tx.insert(Self::table_name(), self.to_fields()?).await?;
                *self = Self::from_fields(row)?;
            }
        }

        Ok(())
    }
}

// Implement CrudOperations for all types that implement Model
impl<T: Model> CrudOperations for T {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_save_options_defaults() {
        let options = SaveOptions::new();
        assert!(options.should_validate());
        assert!(options.should_touch());
    }

    #[test]
    fn test_merge_prefers_caller() {
        let defaults = SaveOptions::new().with_validation(false);

        let merged = SaveOptions::new().merge(defaults);
        assert_eq!(merged.validate, Some(false));
        assert!(!merged.should_validate());

        let merged = SaveOptions::new().with_validation(true).merge(defaults);
        assert!(merged.should_validate());

        let merged = SaveOptions::new().with_touch(false).merge(defaults);
        assert!(!merged.should_touch());
        assert_eq!(merged.validate, Some(false));
    }

    #[test]
    fn test_save_options_deserialize_partial() {
        let options: SaveOptions = serde_json::from_str(r#"{ "validate": false }"#).unwrap();
        assert_eq!(options, SaveOptions::new().with_validation(false));
    }
}
