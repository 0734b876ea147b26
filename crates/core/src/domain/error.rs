// Domain Error Types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DomainError {
    #[error("Invalid batch option '{key}': {reason}")]
    InvalidOption { key: String, reason: String },

    #[error("A chain needs at least one job")]
    EmptyChain,

    #[error("Validation error: {0}")]
    ValidationError(String),
}

pub type Result<T> = std::result::Result<T, DomainError>;
