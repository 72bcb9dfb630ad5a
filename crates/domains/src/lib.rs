//! insight/crates/domains/src/lib.rs
//!
//! Entities, error taxonomy and port definitions for the scoring engine.
//! Nothing in here performs I/O.

pub mod errors;
pub mod models;
pub mod ports;

// Re-exporting for easier access in other crates
pub use errors::*;
pub use models::*;
pub use ports::*;
