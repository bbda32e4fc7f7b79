//! One hand-off attempt of a stored content file
//!
//! A unit never retries on its own. It leaves the file carrying either the
//! `successful_` or the `failed_` marker and returns a [`UnitReport`] that the
//! lifecycle manager uses to decide about retries.

use super::service::{IngestionService, StoreRequest, StoredChecksum};
use crate::configuration::Configuration;
use crate::content_file::{ContentFile, FileState};
use crate::error::IngestError;
use depositor_common::checksum::{checksums_match, compute_file_checksum_async};
use depositor_common::ChecksumAlgorithm;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

pub struct IngestUnit {
    unit_id: Uuid,
    configuration: Arc<Configuration>,
    file: ContentFile,
    claimed_checksum: Option<String>,
    service: Arc<dyn IngestionService>,
    call_timeout: Duration,
}

/// Result of one attempt
#[derive(Debug)]
pub struct UnitReport {
    pub unit_id: Uuid,
    pub configuration_id: String,
    /// File as left on disk after the attempt
    pub file: ContentFile,
    pub checksum: Option<String>,
    /// External identifier on success
    pub outcome: Result<String, IngestError>,
}

impl UnitReport {
    pub fn succeeded(&self) -> bool {
        self.outcome.is_ok()
    }
}

impl IngestUnit {
    /// `claimed_checksum` is `None` on the recovery path; the digest is then
    /// recomputed from the file with the configuration's algorithm.
    pub fn new(
        configuration: Arc<Configuration>,
        file: ContentFile,
        claimed_checksum: Option<String>,
        service: Arc<dyn IngestionService>,
        call_timeout: Duration,
    ) -> Self {
        Self {
            unit_id: Uuid::new_v4(),
            configuration,
            file,
            claimed_checksum,
            service,
            call_timeout,
        }
    }

    pub fn unit_id(&self) -> Uuid {
        self.unit_id
    }

    pub async fn run(mut self) -> UnitReport {
        let configuration_id = self.configuration.id().to_string();
        let logical_name = self.file.logical_name().to_string();

        info!(
            unit_id = %self.unit_id,
            configuration_id = %configuration_id,
            logical_name = %logical_name,
            "Ingest unit started"
        );

        let outcome = self.attempt().await;

        let outcome = match outcome {
            Ok(external_id) => match self.file.transition(FileState::Successful).await {
                Ok(()) => {
                    info!(
                        unit_id = %self.unit_id,
                        configuration_id = %configuration_id,
                        logical_name = %logical_name,
                        external_id = %external_id,
                        "Content file stored"
                    );
                    Ok(external_id)
                },
                Err(e) => {
                    error!(
                        unit_id = %self.unit_id,
                        configuration_id = %configuration_id,
                        logical_name = %logical_name,
                        error = %e,
                        "Stored externally but cannot mark file successful"
                    );
                    Err(IngestError::Io(e))
                },
            },
            Err(e) => Err(e),
        };

        if let Err(ref e) = outcome {
            warn!(
                unit_id = %self.unit_id,
                configuration_id = %configuration_id,
                logical_name = %logical_name,
                error = %e,
                retryable = e.is_retryable(),
                "Ingest unit failed"
            );
            if let Err(rename) = self.file.transition(FileState::Failed).await {
                error!(
                    unit_id = %self.unit_id,
                    path = %self.file.path().display(),
                    error = %rename,
                    "Cannot mark content file failed"
                );
            }
        }

        UnitReport {
            unit_id: self.unit_id,
            configuration_id,
            file: self.file,
            checksum: self.claimed_checksum,
            outcome,
        }
    }

    async fn attempt(&mut self) -> Result<String, IngestError> {
        // A retry re-enters pending before the hand-off.
        if self.file.state() == FileState::Failed {
            self.file.transition(FileState::Pending).await?;
        }

        let checksum = match self.claimed_checksum.clone() {
            Some(checksum) => checksum,
            None => {
                let checksum =
                    compute_file_checksum_async(self.file.path(), self.configuration.algorithm())
                        .await?;
                debug!(
                    unit_id = %self.unit_id,
                    logical_name = %self.file.logical_name(),
                    checksum = %checksum,
                    "Recomputed checksum"
                );
                self.claimed_checksum = Some(checksum.clone());
                checksum
            },
        };

        let request = StoreRequest::new(&self.configuration, self.file.path(), self.file.logical_name());
        let external_id = self
            .bounded("store", self.service.store(&request))
            .await?;

        let stored = self
            .bounded(
                "retrieve_checksum",
                self.service.retrieve_checksum(
                    self.configuration.endpoint(),
                    self.configuration.user_handle(),
                    &external_id,
                ),
            )
            .await?;

        self.verify(&checksum, &stored).await?;

        Ok(external_id)
    }

    async fn bounded<T, F>(&self, call: &str, future: F) -> Result<T, IngestError>
    where
        F: Future<Output = Result<T, IngestError>>,
    {
        match tokio::time::timeout(self.call_timeout, future).await {
            Ok(result) => result,
            Err(_) => Err(IngestError::Transient(format!(
                "{call} timed out after {:?}",
                self.call_timeout
            ))),
        }
    }

    /// Compare the repository's checksum with ours
    ///
    /// Same algorithm: compare with the claimed digest. Other known algorithm:
    /// digest the local file again with it. Unknown algorithm: mismatch.
    async fn verify(&self, claimed: &str, stored: &StoredChecksum) -> Result<(), IngestError> {
        let reported = match stored.algorithm.parse::<ChecksumAlgorithm>() {
            Ok(algorithm) => algorithm,
            Err(_) => {
                return Err(IngestError::ChecksumMismatch {
                    expected: claimed.to_string(),
                    actual: format!(
                        "{} (unsupported algorithm {})",
                        stored.checksum, stored.algorithm
                    ),
                })
            },
        };

        let expected = if reported == self.configuration.algorithm() {
            claimed.to_string()
        } else {
            compute_file_checksum_async(self.file.path(), reported).await?
        };

        if checksums_match(&expected, &stored.checksum) {
            Ok(())
        } else {
            Err(IngestError::ChecksumMismatch {
                expected,
                actual: stored.checksum.clone(),
            })
        }
    }
}
