//! Database Backend Abstractions
//!
//! Backends implement `DatabasePool` / `DatabaseTransaction` over JSON rows.
//! `memory` keeps tables in process memory, `postgres` talks to PostgreSQL
//! through sqlx.

pub mod core;
pub mod memory;
pub mod postgres;

// Re-export core traits and types
pub use core::*;
pub use memory::{MemoryPool, MemoryTransaction};
pub use postgres::{DatabasePoolConfig, PostgresPool, PostgresTransaction};
