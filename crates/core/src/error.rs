// Central Error Type for the Application

use thiserror::Error;

/// Application-level error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Domain error: {0}")]
    Domain(#[from] crate::domain::DomainError),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Database error: {0}")]
    Database(String),

    /// Lock wait or busy storage; safe to retry the whole unit of work
    #[error("Storage contention: {0}")]
    Contention(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Queue error: {0}")]
    Queue(String),

    #[error("Unknown job type: {0}")]
    UnknownJobType(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// True when the failure came from storage contention rather than bad input
    pub fn is_contention(&self) -> bool {
        matches!(self, AppError::Contention(_))
    }
}

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;

// Note: sqlx::Error conversion is handled in the infra-sqlite crate
// by mapping SQLite result codes onto Database / Contention
