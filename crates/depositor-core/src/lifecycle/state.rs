//! Per-configuration state table entries

use crate::content_file::ContentFile;
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;
use uuid::Uuid;

/// Lifecycle of one configuration as tracked in memory
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ConfigState {
    Active { failed_files: BTreeSet<String> },
    Reaping { failed_files: BTreeSet<String> },
    ExpiredSuccessful,
    ExpiredFailed,
}

impl ConfigState {
    pub(crate) fn active() -> Self {
        ConfigState::Active {
            failed_files: BTreeSet::new(),
        }
    }

    pub(crate) fn failed_files(&self) -> Option<&BTreeSet<String>> {
        match self {
            ConfigState::Active { failed_files } | ConfigState::Reaping { failed_files } => {
                Some(failed_files)
            },
            _ => None,
        }
    }

    pub(crate) fn failed_files_mut(&mut self) -> Option<&mut BTreeSet<String>> {
        match self {
            ConfigState::Active { failed_files } | ConfigState::Reaping { failed_files } => {
                Some(failed_files)
            },
            _ => None,
        }
    }

    pub(crate) fn public(&self) -> LifecycleState {
        match self {
            ConfigState::Active { failed_files } if failed_files.is_empty() => {
                LifecycleState::Active
            },
            ConfigState::Active { .. } => LifecycleState::Failing,
            ConfigState::Reaping { .. } => LifecycleState::Reaping,
            ConfigState::ExpiredSuccessful => LifecycleState::ExpiredSuccessful,
            ConfigState::ExpiredFailed => LifecycleState::ExpiredFailed,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Active,
    /// Active with at least one failed file
    Failing,
    Reaping,
    ExpiredSuccessful,
    ExpiredFailed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum UnitStatus {
    /// Found at startup, waiting for the first reaper cycle
    Queued,
    /// Bytes are still being received
    Receiving,
    Running,
    Succeeded,
    Failed { retryable: bool },
}

impl UnitStatus {
    /// Still holds or is about to take a budget slot
    pub fn is_outstanding(self) -> bool {
        matches!(
            self,
            UnitStatus::Queued | UnitStatus::Receiving | UnitStatus::Running
        )
    }
}

#[derive(Debug, Clone)]
pub(crate) struct UnitRecord {
    pub(crate) unit_id: Option<Uuid>,
    pub(crate) file: ContentFile,
    pub(crate) checksum: Option<String>,
    pub(crate) status: UnitStatus,
    pub(crate) attempts: u32,
}

#[derive(Debug)]
pub(crate) struct Entry {
    pub(crate) state: ConfigState,
    pub(crate) directory: PathBuf,
    /// Window was already over when the directory was recovered
    pub(crate) recovered_expired: bool,
    pub(crate) units: HashMap<String, UnitRecord>,
}

impl Entry {
    pub(crate) fn new(state: ConfigState, directory: PathBuf) -> Self {
        Self {
            state,
            directory,
            recovered_expired: false,
            units: HashMap::new(),
        }
    }

    pub(crate) fn has_outstanding_units(&self) -> bool {
        self.units.values().any(|u| u.status.is_outstanding())
    }
}

/// Outcome of finalizing a configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReapOutcome {
    /// No failed files: directory deleted
    Removed,
    /// Failed files remain: directory kept under the failed-expired marker
    PreservedAsFailed,
}

#[derive(Debug, Clone, Serialize)]
pub struct FileStatus {
    pub logical_name: String,
    #[serde(flatten)]
    pub status: UnitStatus,
    pub attempts: u32,
}

/// Snapshot returned by [`super::LifecycleManager::status`]
#[derive(Debug, Clone, Serialize)]
pub struct ConfigurationStatus {
    pub configuration_id: String,
    pub state: LifecycleState,
    pub directory: PathBuf,
    pub failed_files: Vec<String>,
    pub files: Vec<FileStatus>,
}
