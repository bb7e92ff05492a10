//! Core Model Trait - Base definition for database entities
//!
//! Defines the fundamental Model trait with table metadata, primary key
//! handling, timestamp configuration, validation and the serialization
//! contract. Rows are exchanged with backends as JSON maps, so a model only
//! has to be `serde`-serializable; column access by name goes through the
//! same representation.

use std::fmt::{Debug, Display};

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::backends::Row;
use crate::error::{ModelError, ModelResult, ValidationErrors};

/// Core trait for database models with standard ORM operations
pub trait Model: Send + Sync + Debug + Serialize + DeserializeOwned {
    /// The type used for this model's primary key
    type PrimaryKey: Clone + Send + Sync + Debug + Display + Serialize;

    /// Table name for this model
    fn table_name() -> &'static str;

    /// Primary key field name
    fn primary_key_name() -> &'static str {
        "id"
    }

    /// Get the primary key value for this model instance, `None` until persisted
    fn primary_key(&self) -> Option<Self::PrimaryKey>;

    /// Check if this model uses timestamps (created_at, updated_at)
    fn uses_timestamps() -> bool {
        false
    }

    /// Set created_at timestamp
    fn set_created_at(&mut self, _timestamp: DateTime<Utc>) {}

    /// Set updated_at timestamp
    fn set_updated_at(&mut self, _timestamp: DateTime<Utc>) {}

    /// Validation rules run by `save` unless the caller disables them
    fn validate(&self) -> Result<(), ValidationErrors> {
        Ok(())
    }

    /// Convert model to field-value pairs for database operations
    fn to_fields(&self) -> ModelResult<Row> {
        match serde_json::to_value(self)? {
            Value::Object(fields) => Ok(fields),
            other => Err(ModelError::Serialization(format!(
                "{} must serialize to an object, got {}",
                Self::table_name(),
                other
            ))),
        }
    }

    /// Create a model instance from a database row
    fn from_fields(fields: Row) -> ModelResult<Self>
    where
        Self: Sized,
    {
        Ok(serde_json::from_value(Value::Object(fields))?)
    }

    /// Read a column by name
    fn attribute(&self, column: &str) -> ModelResult<Value> {
        self.to_fields()?
            .remove(column)
            .ok_or_else(|| ModelError::ColumnNotFound {
                table: Self::table_name().to_string(),
                column: column.to_string(),
            })
    }

    /// Write a column by name; the column must already be part of the model
    fn set_attribute(&mut self, column: &str, value: Value) -> ModelResult<()>
    where
        Self: Sized,
    {
        let mut fields = self.to_fields()?;
        match fields.get_mut(column) {
            Some(slot) => *slot = value,
            None => {
                return Err(ModelError::ColumnNotFound {
                    table: Self::table_name().to_string(),
                    column: column.to_string(),
                })
            }
        }
        *self = Self::from_fields(fields)?;
        Ok(())
    }
}
