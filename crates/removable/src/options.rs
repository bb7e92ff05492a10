//! Per-type removal configuration

use removable_orm::model::SaveOptions;
use removable_orm::security::validate_identifier;
use serde::{Deserialize, Serialize};

use crate::error::{RemovalError, RemovalResult};

/// Column holding the removal timestamp unless configured otherwise
pub const DEFAULT_COLUMN_NAME: &str = "removed_at";

/// Options given when registering a record type as removable
///
/// Unset fields keep the value from an earlier registration of the same
/// type, or the default (`removed_at`, no validation). Deserializes with
/// missing fields left unset, so it can be read from application
/// configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemovableOptions {
    /// Nullable timestamp column marking a record as removed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub column_name: Option<String>,
    /// Run model validations on the save triggered by remove/unremove
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validate: Option<bool>,
}

impl RemovableOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_column_name(mut self, column_name: impl Into<String>) -> Self {
        self.column_name = Some(column_name.into());
        self
    }

    pub fn with_validation(mut self, validate: bool) -> Self {
        self.validate = Some(validate);
        self
    }

    pub fn column_name(&self) -> &str {
        self.column_name.as_deref().unwrap_or(DEFAULT_COLUMN_NAME)
    }

    pub fn validate(&self) -> bool {
        self.validate.unwrap_or(false)
    }

    /// Fill unset fields from `earlier`; fields set on `self` win
    pub fn merge(self, earlier: &RemovableOptions) -> RemovableOptions {
        RemovableOptions {
            column_name: self.column_name.or_else(|| earlier.column_name.clone()),
            validate: self.validate.or(earlier.validate),
        }
    }

    /// Reject column names that cannot be used as a SQL identifier
    pub fn check(&self) -> RemovalResult<()> {
        validate_identifier(self.column_name()).map_err(|e| {
            RemovalError::InvalidOptions(format!("column_name '{}': {}", self.column_name(), e))
        })
    }

    /// Save options for removal-triggered saves; the caller's options win
    pub fn save_defaults(&self) -> SaveOptions {
        SaveOptions::new().with_validation(self.validate())
    }
}
