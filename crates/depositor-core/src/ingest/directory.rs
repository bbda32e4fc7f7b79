//! Ingestion service backed by a local directory
//!
//! Stores each hand-off under `<root>/<container-id>/<external-id>/` next to
//! an `object.json` record, and reports MD5 checksums the way the remote
//! repository does. Lets the binary run end-to-end without the repository.

use super::service::{IngestionService, StoreRequest, StoredChecksum};
use crate::error::IngestError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use depositor_common::checksum::compute_file_checksum_async;
use depositor_common::ChecksumAlgorithm;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::{debug, info};
use url::Url;
use uuid::Uuid;

const OBJECT_RECORD_FILE_NAME: &str = "object.json";

#[derive(Debug, Serialize, Deserialize)]
struct ObjectRecord {
    external_id: String,
    logical_name: String,
    endpoint: String,
    container_id: String,
    content_model_id: String,
    context_id: String,
    category: String,
    checksum_algorithm: String,
    checksum: String,
    stored_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct DirectoryIngestionService {
    root: PathBuf,
}

impl DirectoryIngestionService {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    async fn find_object(&self, external_id: &str) -> Result<Option<PathBuf>, IngestError> {
        let mut containers = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(IngestError::Transient(format!("cannot read repository: {e}"))),
        };

        while let Some(container) = containers
            .next_entry()
            .await
            .map_err(|e| IngestError::Transient(format!("cannot read repository: {e}")))?
        {
            let candidate = container.path().join(external_id).join(OBJECT_RECORD_FILE_NAME);
            if tokio::fs::try_exists(&candidate).await.unwrap_or(false) {
                return Ok(Some(candidate));
            }
        }

        Ok(None)
    }
}

fn path_segment(raw: &str) -> String {
    raw.chars()
        .map(|c| if matches!(c, '/' | '\\' | '\0') { '_' } else { c })
        .collect()
}

fn transient(context: &str) -> impl Fn(std::io::Error) -> IngestError + '_ {
    move |e| IngestError::Transient(format!("{context}: {e}"))
}

#[async_trait]
impl IngestionService for DirectoryIngestionService {
    async fn store(&self, request: &StoreRequest) -> Result<String, IngestError> {
        if request.credential.trim().is_empty() {
            return Err(IngestError::Configuration("credential is empty".to_string()));
        }
        let container = path_segment(request.container_id.trim());
        if container.is_empty() || container == "." || container == ".." {
            return Err(IngestError::Configuration(format!(
                "invalid container id '{}'",
                request.container_id
            )));
        }

        // Missing local content is our failure, not the repository's.
        tokio::fs::metadata(&request.file_path).await?;

        let external_id = Uuid::new_v4().simple().to_string();
        let object_dir = self.root.join(&container).join(&external_id);
        tokio::fs::create_dir_all(&object_dir)
            .await
            .map_err(transient("cannot create object directory"))?;

        tokio::fs::copy(&request.file_path, object_dir.join(&request.logical_name))
            .await
            .map_err(transient("cannot copy content"))?;

        let checksum = compute_file_checksum_async(
            object_dir.join(&request.logical_name),
            ChecksumAlgorithm::Md5,
        )
        .await
        .map_err(|e| IngestError::Transient(format!("cannot digest stored content: {e}")))?;

        let record = ObjectRecord {
            external_id: external_id.clone(),
            logical_name: request.logical_name.clone(),
            endpoint: request.endpoint.to_string(),
            container_id: request.container_id.clone(),
            content_model_id: request.content_model_id.clone(),
            context_id: request.context_id.clone(),
            category: request.category.to_string(),
            checksum_algorithm: ChecksumAlgorithm::Md5.to_string(),
            checksum,
            stored_at: Utc::now(),
        };
        let json = serde_json::to_vec_pretty(&record)
            .map_err(|e| IngestError::Transient(format!("cannot encode object record: {e}")))?;
        tokio::fs::write(object_dir.join(OBJECT_RECORD_FILE_NAME), json)
            .await
            .map_err(transient("cannot write object record"))?;

        info!(
            external_id = %external_id,
            container_id = %request.container_id,
            logical_name = %request.logical_name,
            "Stored object in repository directory"
        );

        Ok(external_id)
    }

    async fn retrieve_checksum(
        &self,
        _endpoint: &Url,
        credential: &str,
        external_id: &str,
    ) -> Result<StoredChecksum, IngestError> {
        if credential.trim().is_empty() {
            return Err(IngestError::Configuration("credential is empty".to_string()));
        }

        let path = self.find_object(external_id).await?.ok_or_else(|| {
            IngestError::Transient(format!("object {external_id} not found in repository"))
        })?;
        let bytes = tokio::fs::read(&path)
            .await
            .map_err(transient("cannot read object record"))?;
        let record: ObjectRecord = serde_json::from_slice(&bytes)
            .map_err(|e| IngestError::Transient(format!("corrupt object record: {e}")))?;

        debug!(external_id, algorithm = %record.checksum_algorithm, "Retrieved stored checksum");

        Ok(StoredChecksum {
            algorithm: record.checksum_algorithm,
            checksum: record.checksum,
        })
    }
}
