//! Shared fixtures for lifecycle tests

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use depositor_common::checksum::compute_checksum;
use depositor_common::ChecksumAlgorithm;
use depositor_core::clock::ManualClock;
use depositor_core::config::ServiceConfig;
use depositor_core::configuration::*;
use depositor_core::ingest::{
    DirectoryIngestionService, IngestionService, StoreRequest, StoredChecksum,
};
use depositor_core::{IngestError, LifecycleManager, UnitStatus};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tokio::sync::watch;
use url::Url;

pub const MONITORING_MINUTES: i64 = 60;

/// Ingestion service over a temporary repository with scripted failures
pub struct ScriptedService {
    inner: DirectoryIngestionService,
    transient_failures: Mutex<HashMap<String, u32>>,
    rejected: Mutex<Vec<String>>,
    gate: watch::Sender<bool>,
    held: watch::Sender<HashSet<String>>,
    stores: Mutex<Vec<String>>,
}

impl ScriptedService {
    pub fn new(root: impl Into<PathBuf>) -> Arc<Self> {
        let (gate, _) = watch::channel(false);
        let (held, _) = watch::channel(HashSet::new());
        Arc::new(Self {
            inner: DirectoryIngestionService::new(root),
            transient_failures: Mutex::new(HashMap::new()),
            rejected: Mutex::new(Vec::new()),
            gate,
            held,
            stores: Mutex::new(Vec::new()),
        })
    }

    /// The next `times` stores of `logical_name` fail transiently
    pub fn fail_times(&self, logical_name: &str, times: u32) {
        self.transient_failures
            .lock()
            .unwrap()
            .insert(logical_name.to_string(), times);
    }

    /// Every store of `logical_name` fails with a configuration error
    pub fn reject(&self, logical_name: &str) {
        self.rejected.lock().unwrap().push(logical_name.to_string());
    }

    /// Hold every store until [`ScriptedService::open_gate`]
    pub fn close_gate(&self) {
        self.gate.send_replace(true);
    }

    pub fn open_gate(&self) {
        self.gate.send_replace(false);
    }

    /// Hold stores of `logical_name` only, until [`ScriptedService::release`]
    pub fn hold(&self, logical_name: &str) {
        self.held.send_modify(|held| {
            held.insert(logical_name.to_string());
        });
    }

    pub fn release(&self, logical_name: &str) {
        self.held.send_modify(|held| {
            held.remove(logical_name);
        });
    }

    pub fn store_count(&self, logical_name: &str) -> usize {
        self.stores
            .lock()
            .unwrap()
            .iter()
            .filter(|name| name.as_str() == logical_name)
            .count()
    }
}

#[async_trait]
impl IngestionService for ScriptedService {
    async fn store(&self, request: &StoreRequest) -> Result<String, IngestError> {
        let mut gate = self.gate.subscribe();
        gate.wait_for(|closed| !*closed)
            .await
            .map_err(|e| IngestError::Transient(e.to_string()))?;
        let mut held = self.held.subscribe();
        held.wait_for(|held| !held.contains(&request.logical_name))
            .await
            .map_err(|e| IngestError::Transient(e.to_string()))?;

        self.stores
            .lock()
            .unwrap()
            .push(request.logical_name.clone());

        if self.rejected.lock().unwrap().contains(&request.logical_name) {
            return Err(IngestError::Configuration(format!(
                "repository refuses {}",
                request.logical_name
            )));
        }

        {
            let mut failures = self.transient_failures.lock().unwrap();
            if let Some(remaining) = failures.get_mut(&request.logical_name) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(IngestError::Transient("repository unavailable".to_string()));
                }
            }
        }

        self.inner.store(request).await
    }

    async fn retrieve_checksum(
        &self,
        endpoint: &Url,
        credential: &str,
        external_id: &str,
    ) -> Result<StoredChecksum, IngestError> {
        self.inner
            .retrieve_checksum(endpoint, credential, external_id)
            .await
    }
}

pub struct Harness {
    pub temp: TempDir,
    pub clock: Arc<ManualClock>,
    pub service: Arc<ScriptedService>,
}

impl Harness {
    pub fn new() -> Self {
        let temp = TempDir::new().unwrap();
        let service = ScriptedService::new(temp.path().join("repository"));
        Self {
            temp,
            clock: Arc::new(ManualClock::new(start_time())),
            service,
        }
    }

    pub fn base_dir(&self) -> PathBuf {
        self.temp.path().join("sessions")
    }

    /// Reaper sleeps far longer than any test; cycles are driven by hand
    pub fn config(&self) -> ServiceConfig {
        ServiceConfig::default()
            .with_base_dir(self.base_dir())
            .with_service_root(self.temp.path().join("repository"))
            .with_ping_interval_secs(3600)
            .with_ingest_timeout_secs(30)
            .with_drain_poll_millis(10)
    }

    pub fn start(&self) -> LifecycleManager {
        self.start_with(self.config())
    }

    pub fn start_with(&self, config: ServiceConfig) -> LifecycleManager {
        LifecycleManager::start(config, self.service.clone(), self.clock.clone()).unwrap()
    }

    pub fn expire(&self) {
        self.clock
            .advance(chrono::Duration::minutes(MONITORING_MINUTES + 1));
    }
}

pub fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
}

pub fn properties(id: &str) -> BTreeMap<String, String> {
    [
        (PROPERTY_CONFIGURATION_ID, id),
        (PROPERTY_USER_HANDLE, "handle-abc"),
        (PROPERTY_CONTENT_MODEL_ID, "cm:1"),
        (PROPERTY_CONTEXT_ID, "ctx:7"),
        (PROPERTY_CONTAINER_ID, "exp-42"),
        (PROPERTY_INFRASTRUCTURE_ENDPOINT, "http://repo.example.org/fedora"),
        (PROPERTY_MONITORING_DURATION, "60"),
        (PROPERTY_CHECKSUM_ALGORITHM, "SHA-256"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}

pub fn sha256(content: &str) -> String {
    compute_checksum(&mut content.as_bytes(), ChecksumAlgorithm::Sha256).unwrap()
}

pub async fn submit(
    manager: &LifecycleManager,
    id: &str,
    name: &str,
    content: &str,
) -> depositor_core::DepositResult<depositor_core::Accepted> {
    manager
        .submit(id, name, &sha256(content), &mut content.as_bytes())
        .await
}

/// Poll until `condition` holds, panicking after a few seconds
pub async fn wait_until<F>(mut condition: F)
where
    F: FnMut() -> bool,
{
    let deadline = Instant::now() + Duration::from_secs(10);
    while !condition() {
        assert!(Instant::now() < deadline, "condition not reached in time");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

pub fn file_status(manager: &LifecycleManager, id: &str, name: &str) -> Option<UnitStatus> {
    manager
        .status(id)?
        .files
        .into_iter()
        .find(|f| f.logical_name == name)
        .map(|f| f.status)
}

pub async fn wait_for_status(manager: &LifecycleManager, id: &str, name: &str, status: UnitStatus) {
    wait_until(|| file_status(manager, id, name) == Some(status)).await;
}

/// Names of the regular files in `directory`, sorted
pub fn file_names(directory: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(directory)
        .unwrap()
        .map(|e| e.unwrap())
        .filter(|e| e.file_type().unwrap().is_file())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

/// Names of the subdirectories of `directory`, sorted
pub fn dir_names(directory: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(directory)
        .unwrap()
        .map(|e| e.unwrap())
        .filter(|e| e.file_type().unwrap().is_dir())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}
