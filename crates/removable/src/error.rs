//! Error types for removal operations

use removable_orm::error::{ModelError, ValidationErrors};

use crate::hooks::{HookError, HookTiming, RemovalEvent};

/// Result type alias for removal operations
pub type RemovalResult<T> = Result<T, RemovalError>;

#[derive(Debug, Clone, thiserror::Error)]
pub enum RemovalError {
    /// Validation, persistence or transaction error from the ORM
    #[error(transparent)]
    Model(#[from] ModelError),

    /// A hook failed and the operation was rolled back
    #[error("{timing}_{event} hook aborted the operation: {source}")]
    HookAborted {
        event: RemovalEvent,
        timing: HookTiming,
        source: HookError,
    },

    /// The record type was never registered as removable
    #[error("{type_name} is not registered as removable")]
    NotRegistered { type_name: &'static str },

    #[error("Invalid removable options: {0}")]
    InvalidOptions(String),
}

impl RemovalError {
    /// Failures the non-strict operations report as `false`
    pub fn is_save_failure(&self) -> bool {
        match self {
            RemovalError::Model(error) => error.is_validation(),
            RemovalError::HookAborted { .. } => true,
            _ => false,
        }
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, RemovalError::Model(error) if error.is_validation())
    }

    /// Validation details, if the save was rejected by the model's rules
    pub fn validation_errors(&self) -> Option<&ValidationErrors> {
        match self {
            RemovalError::Model(error) => error.validation_errors(),
            _ => None,
        }
    }
}
