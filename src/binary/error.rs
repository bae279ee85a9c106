//! binary store errors

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BinaryError {
    /// no stored content for this digest
    #[error("binary not found: {0}")]
    NotFound(String),

    /// the string is not a lowercase hex SHA-256 digest
    #[error("invalid digest: {0}")]
    InvalidDigest(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl BinaryError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, BinaryError::NotFound(_))
    }
}

pub type BinaryResult<T> = Result<T, BinaryError>;
