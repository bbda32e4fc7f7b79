//! Error types for the depositor core

use depositor_common::CommonError;
use thiserror::Error;

/// Result type alias for lifecycle operations
pub type DepositResult<T> = std::result::Result<T, DepositError>;

/// Rejections and failures surfaced to callers of the lifecycle manager
#[derive(Error, Debug)]
pub enum DepositError {
    #[error("Validation failed: {}", issues.join("; "))]
    ValidationFailed { issues: Vec<String> },

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Configuration expired: {0}")]
    Expired(String),

    #[error("Configuration permanently failed: {0}")]
    PermanentlyFailed(String),

    #[error("Capacity exceeded: {limit} ingest units outstanding")]
    CapacityExceeded { limit: usize },

    #[error("Checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    #[error("Unsupported checksum algorithm: {0}")]
    UnsupportedAlgorithm(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Persistence error: {0}")]
    Persistence(String),
}

impl DepositError {
    pub fn validation(issue: impl Into<String>) -> Self {
        DepositError::ValidationFailed {
            issues: vec![issue.into()],
        }
    }

    /// Stable machine-readable identifier for the transport layer
    pub fn code(&self) -> &'static str {
        match self {
            DepositError::ValidationFailed { .. } => "validation_failed",
            DepositError::AlreadyExists(_) => "already_exists",
            DepositError::NotFound(_) => "not_found",
            DepositError::Expired(_) => "expired",
            DepositError::PermanentlyFailed(_) => "permanently_failed",
            DepositError::CapacityExceeded { .. } => "capacity_exceeded",
            DepositError::ChecksumMismatch { .. } => "checksum_mismatch",
            DepositError::UnsupportedAlgorithm(_) => "unsupported_algorithm",
            DepositError::Io(_) => "io_error",
            DepositError::Persistence(_) => "persistence_error",
        }
    }

    /// Whether resending the same request later may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            DepositError::CapacityExceeded { .. }
                | DepositError::ChecksumMismatch { .. }
                | DepositError::Io(_)
        )
    }
}

impl From<CommonError> for DepositError {
    fn from(err: CommonError) -> Self {
        match err {
            CommonError::Io(e) => DepositError::Io(e),
            CommonError::UnsupportedAlgorithm(name) => DepositError::UnsupportedAlgorithm(name),
        }
    }
}

/// Outcome classes of a hand-off to the external ingestion service
#[derive(Error, Debug)]
pub enum IngestError {
    /// The service rejected our parameters; needs operator intervention
    #[error("Ingestion configuration error: {0}")]
    Configuration(String),

    #[error("Transient ingestion error: {0}")]
    Transient(String),

    #[error("Stored checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl IngestError {
    /// Whether the reaper should issue another attempt
    pub fn is_retryable(&self) -> bool {
        !matches!(self, IngestError::Configuration(_))
    }
}

impl From<CommonError> for IngestError {
    fn from(err: CommonError) -> Self {
        match err {
            CommonError::Io(e) => IngestError::Io(e),
            CommonError::UnsupportedAlgorithm(name) => {
                IngestError::Configuration(format!("unsupported checksum algorithm {name}"))
            },
        }
    }
}
