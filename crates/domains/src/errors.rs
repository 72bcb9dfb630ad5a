//! # DomainError
//!
//! Centralized error taxonomy for the scoring engine.
//! Transport layers translate these into their own responses; the engine
//! itself only ever exposes a short machine-readable reason.

use thiserror::Error;

/// The primary error type for all engine and port operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Referenced user, post, comment or vote does not exist
    #[error("{entity} not found with ID {id}")]
    NotFound { entity: &'static str, id: String },

    /// Request collides with existing state (duplicate username, second post today)
    #[error("conflict: {0}")]
    Conflict(String),

    /// Malformed input (empty title, unknown vote direction)
    #[error("validation error: {0}")]
    Validation(String),

    /// Bad credentials or an invalid/expired bearer token
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// A bounded operation ran past its deadline and applied nothing
    #[error("timed out: {0}")]
    Timeout(String),

    /// Internal consistency defect; never a recoverable condition
    #[error("invariant violated: {0}")]
    Invariant(String),

    /// Infrastructure failure (DB down, pool exhausted)
    #[error("storage error: {0}")]
    Storage(String),
}

impl DomainError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        DomainError::NotFound { entity, id: id.to_string() }
    }

    /// Short machine-readable reason string for the outer request layer.
    pub fn reason(&self) -> &'static str {
        match self {
            DomainError::NotFound { .. } => "not_found",
            DomainError::Conflict(msg) if msg == ALREADY_POSTED_TODAY => "already_posted_today",
            DomainError::Conflict(_) => "conflict",
            DomainError::Validation(_) => "validation",
            DomainError::Unauthorized(_) => "unauthorized",
            DomainError::Timeout(_) => "timeout",
            DomainError::Invariant(_) => "invariant",
            DomainError::Storage(_) => "storage",
        }
    }
}

/// Conflict message raised by the posting gate.
pub const ALREADY_POSTED_TODAY: &str = "already posted today";

/// A specialized Result type for engine logic.
pub type Result<T> = std::result::Result<T, DomainError>;
