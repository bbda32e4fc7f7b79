//! External ingestion service interface
//!
//! The lifecycle core treats the repository that finally stores content as a
//! black box with two calls: store a file, and report the checksum it holds
//! for a stored object.

use crate::configuration::Configuration;
use crate::error::IngestError;
use async_trait::async_trait;
use std::path::PathBuf;
use url::Url;

/// Content category attached to every hand-off
pub const CONTENT_CATEGORY: &str = "ORIGINAL";

/// Parameters of one store call
#[derive(Debug, Clone)]
pub struct StoreRequest {
    pub endpoint: Url,
    pub credential: String,
    pub container_id: String,
    pub content_model_id: String,
    pub context_id: String,
    pub file_path: PathBuf,
    pub logical_name: String,
    pub category: &'static str,
}

impl StoreRequest {
    pub fn new(configuration: &Configuration, file_path: PathBuf, logical_name: &str) -> Self {
        Self {
            endpoint: configuration.endpoint().clone(),
            credential: configuration.user_handle().to_string(),
            container_id: configuration.container_id().to_string(),
            content_model_id: configuration.content_model_id().to_string(),
            context_id: configuration.context_id().to_string(),
            file_path,
            logical_name: logical_name.to_string(),
            category: CONTENT_CATEGORY,
        }
    }
}

/// Checksum the service reports for a stored object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredChecksum {
    /// Algorithm name as reported, e.g. "MD5"
    pub algorithm: String,
    pub checksum: String,
}

#[async_trait]
pub trait IngestionService: Send + Sync {
    /// Durably store the file and return the external identifier
    async fn store(&self, request: &StoreRequest) -> Result<String, IngestError>;

    /// Fetch the checksum recorded for a stored object
    async fn retrieve_checksum(
        &self,
        endpoint: &Url,
        credential: &str,
        external_id: &str,
    ) -> Result<StoredChecksum, IngestError>;
}
