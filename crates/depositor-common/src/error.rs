//! Error types shared across the depositor crates

use thiserror::Error;

/// Result type alias for common operations
pub type Result<T> = std::result::Result<T, CommonError>;

/// Errors raised by the shared checksum and file helpers
#[derive(Error, Debug)]
pub enum CommonError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Unsupported checksum algorithm: {0}")]
    UnsupportedAlgorithm(String),
}

impl CommonError {
    /// Whether the error came from the local filesystem
    pub fn is_io(&self) -> bool {
        matches!(self, CommonError::Io(_))
    }
}
