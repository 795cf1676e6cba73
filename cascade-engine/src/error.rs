//! Engine error types.

use thiserror::Error;

/// Errors raised by pure engine computations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    /// Inputs that cannot produce a valid order
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Domain validation failed
    #[error("Domain error: {0}")]
    Domain(#[from] cascade_domain::DomainError),
}

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;
