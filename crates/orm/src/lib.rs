//! # removable-orm: persistence layer for removable models
//!
//! Model trait, query builder, transactions and database backends. Models are
//! plain `serde` structs; backends exchange rows as JSON maps so the same
//! model runs against PostgreSQL or the in-memory backend used in tests.

pub mod backends;
pub mod error;
pub mod model;
pub mod query;
pub mod security;
pub mod transaction;

// Re-export core traits and types
pub use backends::{DatabasePool, DatabasePoolConfig, DatabaseTransaction, MemoryPool, PostgresPool, Row};
pub use error::*;
pub use model::*;
pub use query::*;
pub use transaction::Transaction;
