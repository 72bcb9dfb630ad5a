//! # storage-adapters
//!
//! Content Store implementations. The in-memory store is always available
//! and backs tests and single-process deployments; PostgreSQL sits behind
//! the `db-postgres` feature.

pub mod memory;

#[cfg(feature = "db-postgres")]
pub mod postgres;

pub use memory::InMemoryStore;

#[cfg(feature = "db-postgres")]
pub use postgres::PgStore;
