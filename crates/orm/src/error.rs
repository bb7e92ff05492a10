//! Error types for the ORM system
//!
//! Provides error handling for database operations, model validation,
//! and query building.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Result type alias for model operations
pub type ModelResult<T> = Result<T, ModelError>;

/// Error types for ORM operations
#[derive(Debug, Clone, thiserror::Error)]
pub enum ModelError {
    /// Database connection or query error
    #[error("Database error: {0}")]
    Database(String),

    /// Model not found in database
    #[error("Record not found in table '{0}'")]
    NotFound(String),

    /// Model validation failed
    #[error("Validation failed: {0}")]
    Validation(ValidationErrors),

    /// Primary key is missing or invalid
    #[error("Primary key is missing or invalid")]
    MissingPrimaryKey,

    /// Column does not exist on the table or model
    #[error("Unknown column '{column}' on '{table}'")]
    ColumnNotFound { table: String, column: String },

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Connection pool error
    #[error("Connection error: {0}")]
    Connection(String),

    /// Transaction error
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl ModelError {
    /// Whether this error came from the model's validation rules
    pub fn is_validation(&self) -> bool {
        matches!(self, ModelError::Validation(_))
    }

    /// Validation details, if this is a validation failure
    pub fn validation_errors(&self) -> Option<&ValidationErrors> {
        match self {
            ModelError::Validation(errors) => Some(errors),
            _ => None,
        }
    }
}

impl From<sqlx::Error> for ModelError {
    fn from(err: sqlx::Error) -> Self {
        ModelError::Database(err.to_string())
    }
}

impl From<serde_json::Error> for ModelError {
    fn from(err: serde_json::Error) -> Self {
        ModelError::Serialization(err.to_string())
    }
}

impl From<ValidationErrors> for ModelError {
    fn from(errors: ValidationErrors) -> Self {
        ModelError::Validation(errors)
    }
}

/// Individual validation error for a specific field
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ValidationError {
    /// The field that failed validation
    pub field: String,
    /// Human-readable error message
    pub message: String,
    /// Error code for programmatic handling
    pub code: String,
}

impl ValidationError {
    /// Create a new validation error
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
            code: "validation_failed".to_string(),
        }
    }

    /// Set the error code
    pub fn code(mut self, code: impl Into<String>) -> Self {
        self.code = code.into();
        self
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Collection of validation errors, grouped by field
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ValidationErrors {
    pub errors: BTreeMap<String, Vec<ValidationError>>,
}

impl ValidationErrors {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a single validation error
    pub fn add(&mut self, error: ValidationError) {
        self.errors
            .entry(error.field.clone())
            .or_default()
            .push(error);
    }

    /// Add a simple validation error with field and message
    pub fn add_error(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.add(ValidationError::new(field, message));
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    /// Number of fields with errors
    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn has_field_errors(&self, field: &str) -> bool {
        self.errors.contains_key(field)
    }

    /// Ok when empty, otherwise the collected errors
    pub fn into_result(self) -> Result<(), ValidationErrors> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let messages: Vec<String> = self
            .errors
            .values()
            .flatten()
            .map(|error| error.to_string())
            .collect();
        write!(f, "{}", messages.join(", "))
    }
}

impl std::error::Error for ValidationErrors {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_errors_group_by_field() {
        let mut errors = ValidationErrors::new();
        errors.add_error("name", "can't be blank");
        errors.add_error("name", "is too short");
        errors.add(ValidationError::new("email", "is invalid").code("format"));

        assert_eq!(errors.len(), 2);
        assert!(errors.has_field_errors("name"));
        assert_eq!(errors.errors["name"].len(), 2);
        assert_eq!(errors.errors["email"][0].code, "format");
    }

    #[test]
    fn test_validation_errors_into_result() {
        assert!(ValidationErrors::new().into_result().is_ok());

        let mut errors = ValidationErrors::new();
        errors.add_error("name", "can't be blank");
        let err = errors.into_result().unwrap_err();
        assert_eq!(err.to_string(), "name: can't be blank");
    }

    #[test]
    fn test_model_error_validation_helpers() {
        let mut errors = ValidationErrors::new();
        errors.add_error("name", "can't be blank");
        let error: ModelError = errors.into();

        assert!(error.is_validation());
        assert!(error.validation_errors().unwrap().has_field_errors("name"));
        assert!(!ModelError::MissingPrimaryKey.is_validation());
        assert_eq!(
            error.to_string(),
            "Validation failed: name: can't be blank"
        );
    }

    #[test]
    fn test_column_not_found_display() {
        let error = ModelError::ColumnNotFound {
            table: "posts".to_string(),
            column: "removed_at".to_string(),
        };
        assert_eq!(error.to_string(), "Unknown column 'removed_at' on 'posts'");
    }
}
