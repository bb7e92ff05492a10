//! Model System - Modular model trait system for database entities
//!
//! - `core_trait`: Core Model trait definition
//! - `crud_operations`: Create, Read, Update operations and save options
//! - `query_methods`: Collection query operations

pub mod core_trait;
pub mod crud_operations;
pub mod query_methods;

// Re-export main types and traits for convenience
pub use core_trait::Model;
pub use crud_operations::{CrudOperations, SaveOptions};
pub use query_methods::QueryMethods;
