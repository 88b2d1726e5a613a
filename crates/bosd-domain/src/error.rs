use thiserror::Error;

#[derive(Debug, Error)]
pub enum DomainError {
    #[error("invalid name '{name}': {reason}")]
    InvalidName { name: String, reason: String },

    #[error("invalid session template '{name}': {reason}")]
    InvalidTemplate { name: String, reason: String },

    #[error("invalid session '{name}': {reason}")]
    InvalidSession { name: String, reason: String },

    #[error("invalid operation: {0}")]
    InvalidOperation(String),
}
