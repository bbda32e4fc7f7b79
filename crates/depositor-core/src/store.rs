//! Durable configuration registry
//!
//! Layout under the base directory:
//!
//! ```text
//! base/
//!   2011_03_01_10_00_00_000/           active configuration
//!     configuration.xml
//!     a.txt                            pending
//!     successful_b.txt
//!     failed_c.txt
//!   failed_expired_2011_02_01_09_00_00_000/
//! ```
//!
//! The directory tree is the source of truth across restarts. The in-memory
//! registry remembers every id seen, including closed ones, so that an id can
//! never be registered twice.

use crate::configuration::{
    Configuration, CONFIGURATION_FILE_NAME, CONFIGURATION_TEMP_FILE_NAME,
};
use crate::content_file::{
    is_reserved_name, ContentFile, FileState, FAILED_EXPIRED_PREFIX, SUCCESSFUL_PREFIX,
};
use crate::error::{DepositError, DepositResult};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::io::AsyncWriteExt;
use tracing::{debug, error, info, warn};

const DIRECTORY_NAME_FORMAT: &str = "%Y_%m_%d_%H_%M_%S_%3f";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RegistryStatus {
    Open,
    ClosedSuccessful,
    ClosedFailed,
}

/// Registry entry handed out to callers
#[derive(Debug, Clone)]
pub struct StoredConfiguration {
    pub configuration: Arc<Configuration>,
    pub directory: PathBuf,
    pub status: RegistryStatus,
}

/// A configuration directory found at startup
#[derive(Debug, Clone)]
pub struct RecoveredConfiguration {
    pub configuration: Arc<Configuration>,
    pub directory: PathBuf,
    /// Unprefixed and `failed_` files that need another hand-off attempt
    pub pending: Vec<ContentFile>,
}

/// Everything [`ConfigurationStore::open`] found on disk
#[derive(Debug, Default)]
pub struct Recovery {
    pub configurations: Vec<RecoveredConfiguration>,
    pub failed_expired: Vec<String>,
}

/// Read-only view of one directory under the base directory
#[derive(Debug, Clone, Serialize)]
pub struct DirectoryReport {
    pub directory: String,
    pub configuration_id: Option<String>,
    pub failed_expired: bool,
    pub files: Vec<(String, FileState)>,
    pub problem: Option<String>,
}

pub struct ConfigurationStore {
    base_dir: PathBuf,
    registry: Mutex<HashMap<String, StoredConfiguration>>,
    /// Serializes document rewrites done outside the registry lock
    document_writes: tokio::sync::Mutex<()>,
}

impl ConfigurationStore {
    /// Open the base directory and rebuild the registry from it
    ///
    /// Unreadable directories are logged and left untouched.
    pub fn open(base_dir: impl Into<PathBuf>) -> DepositResult<(Self, Recovery)> {
        let base_dir = base_dir.into();
        std::fs::create_dir_all(&base_dir)?;

        let mut registry = HashMap::new();
        let mut recovery = Recovery::default();

        for directory in list_directories(&base_dir)? {
            let name = directory_name(&directory);
            let failed_expired = name.starts_with(FAILED_EXPIRED_PREFIX);

            let configuration = match load_configuration(&directory) {
                Ok(configuration) => Arc::new(configuration),
                Err(e) => {
                    error!(
                        directory = %directory.display(),
                        error = %e,
                        "Cannot restore configuration from directory, skipping it"
                    );
                    continue;
                },
            };

            let id = configuration.id().to_string();
            if registry.contains_key(&id) {
                warn!(
                    configuration_id = %id,
                    directory = %directory.display(),
                    "Configuration id already restored from another directory, skipping"
                );
                continue;
            }

            if failed_expired {
                info!(configuration_id = %id, directory = %name, "Restored failed-expired configuration");
                registry.insert(
                    id.clone(),
                    StoredConfiguration {
                        configuration,
                        directory,
                        status: RegistryStatus::ClosedFailed,
                    },
                );
                recovery.failed_expired.push(id);
                continue;
            }

            let files = match list_content_files(&directory) {
                Ok(files) => files,
                Err(e) => {
                    error!(
                        configuration_id = %id,
                        directory = %directory.display(),
                        error = %e,
                        "Cannot list content files of configuration directory, skipping it"
                    );
                    continue;
                },
            };
            let pending: Vec<ContentFile> = files
                .into_iter()
                .filter(|file| file.state() != FileState::Successful)
                .collect();

            info!(
                configuration_id = %id,
                directory = %name,
                pending = pending.len(),
                "Restored configuration"
            );

            registry.insert(
                id,
                StoredConfiguration {
                    configuration: Arc::clone(&configuration),
                    directory: directory.clone(),
                    status: RegistryStatus::Open,
                },
            );
            recovery.configurations.push(RecoveredConfiguration {
                configuration,
                directory,
                pending,
            });
        }

        let store = Self {
            base_dir,
            registry: Mutex::new(registry),
            document_writes: tokio::sync::Mutex::new(()),
        };

        Ok((store, recovery))
    }

    fn registry(&self) -> MutexGuard<'_, HashMap<String, StoredConfiguration>> {
        self.registry.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Persist a new configuration into its own timestamped directory
    pub fn register(
        &self,
        configuration: Configuration,
        now: DateTime<Utc>,
    ) -> DepositResult<PathBuf> {
        let mut registry = self.registry();

        if let Some(existing) = registry.get(configuration.id()) {
            return Err(DepositError::AlreadyExists(format!(
                "configuration {} is already known ({:?})",
                configuration.id(),
                existing.status
            )));
        }

        let directory = create_unique_directory(&self.base_dir, now)?;
        if let Err(e) = write_configuration(&directory, &configuration) {
            if let Err(cleanup) = std::fs::remove_dir_all(&directory) {
                warn!(directory = %directory.display(), error = %cleanup, "Failed to remove directory after failed registration");
            }
            return Err(e);
        }

        info!(
            configuration_id = %configuration.id(),
            directory = %directory.display(),
            "Registered configuration"
        );

        registry.insert(
            configuration.id().to_string(),
            StoredConfiguration {
                configuration: Arc::new(configuration),
                directory: directory.clone(),
                status: RegistryStatus::Open,
            },
        );

        Ok(directory)
    }

    pub fn get(&self, id: &str) -> Option<StoredConfiguration> {
        self.registry().get(id).cloned()
    }

    /// Set the monitoring start once and write it back to disk
    ///
    /// Returns the stored configuration unchanged when a start already exists.
    /// The registry lock is not held while the document is written.
    pub async fn persist_monitoring_start(
        &self,
        id: &str,
        start: DateTime<Utc>,
    ) -> DepositResult<Arc<Configuration>> {
        let _writing = self.document_writes.lock().await;

        let (directory, updated) = {
            let registry = self.registry();
            let entry = registry
                .get(id)
                .ok_or_else(|| DepositError::NotFound(format!("configuration {id}")))?;
            if entry.configuration.monitoring_start().is_some() {
                return Ok(Arc::clone(&entry.configuration));
            }
            (
                entry.directory.clone(),
                entry.configuration.with_monitoring_start(start),
            )
        };

        replace_configuration(&directory, &updated).await?;
        debug!(configuration_id = %id, start = %start, "Persisted monitoring start");

        let updated = Arc::new(updated);
        if let Some(entry) = self.registry().get_mut(id) {
            entry.configuration = Arc::clone(&updated);
        }
        Ok(updated)
    }

    /// Locate a file by logical name regardless of its state prefix
    pub async fn find_content_file(
        &self,
        directory: &Path,
        logical_name: &str,
    ) -> DepositResult<Option<ContentFile>> {
        for state in [FileState::Pending, FileState::Successful, FileState::Failed] {
            let path = directory.join(format!("{}{}", state.prefix(), logical_name));
            if tokio::fs::try_exists(&path).await? {
                return Ok(ContentFile::from_path(&path));
            }
        }
        Ok(None)
    }

    /// Remove the directory and close the entry as successful
    pub async fn mark_successful_expiry(&self, id: &str) -> DepositResult<()> {
        let directory = {
            let mut registry = self.registry();
            let entry = registry
                .get_mut(id)
                .ok_or_else(|| DepositError::NotFound(format!("configuration {id}")))?;
            entry.status = RegistryStatus::ClosedSuccessful;
            entry.directory.clone()
        };

        match tokio::fs::remove_dir_all(&directory).await {
            Ok(()) => {
                info!(configuration_id = %id, directory = %directory.display(), "Removed expired configuration");
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {},
            Err(e) => {
                error!(
                    configuration_id = %id,
                    directory = %directory.display(),
                    error = %e,
                    "Failed to remove expired configuration directory"
                );
            },
        }

        Ok(())
    }

    /// Drop successful files and rename the directory with the failed marker
    ///
    /// Best effort: if the rename fails the original directory is kept, but
    /// the entry is still closed as failed.
    pub async fn mark_failed_expiry(&self, id: &str) -> DepositResult<PathBuf> {
        let directory = {
            let mut registry = self.registry();
            let entry = registry
                .get_mut(id)
                .ok_or_else(|| DepositError::NotFound(format!("configuration {id}")))?;
            entry.status = RegistryStatus::ClosedFailed;
            entry.directory.clone()
        };

        let mut entries = tokio::fs::read_dir(&directory).await?;
        while let Some(entry) = entries.next_entry().await? {
            let is_successful = entry
                .file_name()
                .to_str()
                .is_some_and(|name| name.starts_with(SUCCESSFUL_PREFIX));
            if is_successful {
                if let Err(e) = tokio::fs::remove_file(entry.path()).await {
                    warn!(
                        configuration_id = %id,
                        path = %entry.path().display(),
                        error = %e,
                        "Failed to remove stored file from failed configuration"
                    );
                }
            }
        }

        let renamed = self
            .base_dir
            .join(format!("{FAILED_EXPIRED_PREFIX}{}", directory_name(&directory)));
        match tokio::fs::rename(&directory, &renamed).await {
            Ok(()) => {
                warn!(
                    configuration_id = %id,
                    directory = %renamed.display(),
                    "Configuration expired with failed files"
                );
                if let Some(entry) = self.registry().get_mut(id) {
                    entry.directory = renamed.clone();
                }
                Ok(renamed)
            },
            Err(e) => {
                error!(
                    configuration_id = %id,
                    directory = %directory.display(),
                    error = %e,
                    "Cannot rename failed configuration directory, keeping original name"
                );
                Ok(directory)
            },
        }
    }
}

/// Scan the base directory without changing anything
pub fn inspect(base_dir: &Path) -> DepositResult<Vec<DirectoryReport>> {
    let mut reports = Vec::new();

    for directory in list_directories(base_dir)? {
        let name = directory_name(&directory);
        let (configuration_id, mut problem) = match load_configuration(&directory) {
            Ok(configuration) => (Some(configuration.id().to_string()), None),
            Err(e) => (None, Some(e.to_string())),
        };
        let files = match list_content_files(&directory) {
            Ok(files) => files
                .into_iter()
                .map(|file| (file.logical_name().to_string(), file.state()))
                .collect(),
            Err(e) => {
                problem.get_or_insert_with(|| e.to_string());
                Vec::new()
            },
        };

        reports.push(DirectoryReport {
            failed_expired: name.starts_with(FAILED_EXPIRED_PREFIX),
            directory: name,
            configuration_id,
            files,
            problem,
        });
    }

    Ok(reports)
}

fn directory_name(directory: &Path) -> String {
    directory
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn list_directories(base_dir: &Path) -> DepositResult<Vec<PathBuf>> {
    let mut directories = Vec::new();
    for entry in std::fs::read_dir(base_dir)? {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                error!(base_dir = %base_dir.display(), error = %e, "Cannot read base directory entry");
                continue;
            },
        };
        match entry.file_type() {
            Ok(file_type) if file_type.is_dir() => directories.push(entry.path()),
            Ok(_) => {
                warn!(path = %entry.path().display(), "Ignoring stray entry in base directory");
            },
            Err(e) => {
                error!(path = %entry.path().display(), error = %e, "Cannot stat base directory entry, skipping it");
            },
        }
    }
    directories.sort();
    Ok(directories)
}

fn list_content_files(directory: &Path) -> DepositResult<Vec<ContentFile>> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(directory)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let path = entry.path();
        let reserved = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(is_reserved_name);
        if reserved {
            continue;
        }
        match ContentFile::from_path(&path) {
            Some(file) => files.push(file),
            None => debug!(path = %path.display(), "Skipping unrecognised file"),
        }
    }
    files.sort_by(|a, b| a.logical_name().cmp(b.logical_name()));
    Ok(files)
}

fn load_configuration(directory: &Path) -> DepositResult<Configuration> {
    let path = directory.join(CONFIGURATION_FILE_NAME);
    let xml = std::fs::read_to_string(&path)?;
    Configuration::from_xml(&xml)
}

/// Write the document next to its final name, then rename over it
fn write_configuration(directory: &Path, configuration: &Configuration) -> DepositResult<()> {
    let xml = configuration.to_xml()?;
    let temp = directory.join(CONFIGURATION_TEMP_FILE_NAME);

    let mut file = std::fs::File::create(&temp)?;
    file.write_all(xml.as_bytes())?;
    file.sync_all()?;
    drop(file);

    std::fs::rename(&temp, directory.join(CONFIGURATION_FILE_NAME))?;
    Ok(())
}

async fn replace_configuration(directory: &Path, configuration: &Configuration) -> DepositResult<()> {
    let xml = configuration.to_xml()?;
    let temp = directory.join(CONFIGURATION_TEMP_FILE_NAME);

    let mut file = tokio::fs::File::create(&temp).await?;
    file.write_all(xml.as_bytes()).await?;
    file.sync_all().await?;
    drop(file);

    tokio::fs::rename(&temp, directory.join(CONFIGURATION_FILE_NAME)).await?;
    Ok(())
}

fn create_unique_directory(base_dir: &Path, now: DateTime<Utc>) -> DepositResult<PathBuf> {
    let stem = now.format(DIRECTORY_NAME_FORMAT).to_string();
    let mut candidate = base_dir.join(&stem);
    let mut suffix = 0u32;

    loop {
        match std::fs::create_dir(&candidate) {
            Ok(()) => return Ok(candidate),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                suffix += 1;
                candidate = base_dir.join(format!("{stem}_{suffix}"));
            },
            Err(e) => return Err(e.into()),
        }
    }
}
