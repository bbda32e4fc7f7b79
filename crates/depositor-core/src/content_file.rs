//! Content files and their filename-encoded state
//!
//! A content file lives directly in its configuration's working directory.
//! Its state is carried by a prefix on the file name: none while pending,
//! `successful_` once stored externally, `failed_` after a failed hand-off.

use crate::configuration::{CONFIGURATION_FILE_NAME, CONFIGURATION_TEMP_FILE_NAME};
use crate::error::{DepositError, DepositResult};
use serde::Serialize;
use std::fmt;
use std::io;
use std::path::{Component, Path, PathBuf};

pub const SUCCESSFUL_PREFIX: &str = "successful_";
pub const FAILED_PREFIX: &str = "failed_";

/// Applied to a whole configuration directory, never to a single file
pub const FAILED_EXPIRED_PREFIX: &str = "failed_expired_";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FileState {
    Pending,
    Successful,
    Failed,
}

impl FileState {
    /// Marker carried by the file name in this state
    pub fn prefix(self) -> &'static str {
        match self {
            FileState::Pending => "",
            FileState::Successful => SUCCESSFUL_PREFIX,
            FileState::Failed => FAILED_PREFIX,
        }
    }
}

impl fmt::Display for FileState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FileState::Pending => "pending",
            FileState::Successful => "successful",
            FileState::Failed => "failed",
        })
    }
}

/// One physical file under a configuration directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentFile {
    directory: PathBuf,
    logical_name: String,
    state: FileState,
}

impl ContentFile {
    pub fn pending(directory: impl Into<PathBuf>, logical_name: impl Into<String>) -> Self {
        Self {
            directory: directory.into(),
            logical_name: logical_name.into(),
            state: FileState::Pending,
        }
    }

    /// Interpret an existing file; `None` for the configuration document
    /// and for names that are not valid UTF-8
    pub fn from_path(path: &Path) -> Option<Self> {
        let directory = path.parent()?.to_path_buf();
        let name = path.file_name()?.to_str()?;
        if is_reserved_name(name) {
            return None;
        }

        let (state, logical_name) = if let Some(rest) = name.strip_prefix(SUCCESSFUL_PREFIX) {
            (FileState::Successful, rest)
        } else if let Some(rest) = name.strip_prefix(FAILED_PREFIX) {
            (FileState::Failed, rest)
        } else {
            (FileState::Pending, name)
        };

        if logical_name.is_empty() {
            return None;
        }

        Some(Self {
            directory,
            logical_name: logical_name.to_string(),
            state,
        })
    }

    pub fn logical_name(&self) -> &str {
        &self.logical_name
    }

    pub fn state(&self) -> FileState {
        self.state
    }

    /// Name on disk including the state prefix
    pub fn file_name(&self) -> String {
        format!("{}{}", self.state.prefix(), self.logical_name)
    }

    pub fn path(&self) -> PathBuf {
        self.directory.join(self.file_name())
    }

    /// Rename the file to carry the marker of `to`
    ///
    /// A successful file is final; moving it anywhere else is refused.
    pub async fn transition(&mut self, to: FileState) -> io::Result<()> {
        if self.state == to {
            return Ok(());
        }
        if self.state == FileState::Successful {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{} is already successful", self.logical_name),
            ));
        }

        let from = self.path();
        let target = self.directory.join(format!("{}{}", to.prefix(), self.logical_name));
        tokio::fs::rename(&from, &target).await?;
        self.state = to;
        Ok(())
    }
}

/// Names used by the configuration document itself
pub fn is_reserved_name(name: &str) -> bool {
    name == CONFIGURATION_FILE_NAME || name == CONFIGURATION_TEMP_FILE_NAME
}

/// Check a declared file name before anything touches the disk
pub fn validate_logical_name(name: &str) -> DepositResult<()> {
    if name.trim().is_empty() {
        return Err(DepositError::validation("file name is empty"));
    }

    let mut components = Path::new(name).components();
    let single_normal = matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    );
    if !single_normal || name.contains('/') || name.contains('\\') {
        return Err(DepositError::validation(format!(
            "file name '{name}' must be a single path component"
        )));
    }

    if is_reserved_name(name) {
        return Err(DepositError::validation(format!(
            "file name '{name}' is reserved"
        )));
    }

    if name.starts_with(SUCCESSFUL_PREFIX) || name.starts_with(FAILED_PREFIX) {
        return Err(DepositError::validation(format!(
            "file name '{name}' starts with a reserved state prefix"
        )));
    }

    Ok(())
}
