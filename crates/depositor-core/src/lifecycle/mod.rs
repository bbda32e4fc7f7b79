//! Lifecycle manager
//!
//! Owns the configuration state table, admits content submissions under the
//! concurrency budget, runs ingest units as tasks and finalizes configurations
//! whose monitoring window has elapsed.
//!
//! Units report back through a channel; a single event loop applies their
//! reports to the state table. The reaper task serializes reaping and retry
//! decisions per configuration through the `Reaping` state; reaps started by
//! the reaper drain in their own tasks.
//!
//! ```text
//! Active ──(unit fails)──> Active(failing) ──(retry succeeds)──> Active
//!   │                            │
//!   └──(window over)──> Reaping <┘──(window over)
//!                          │
//!          ┌───────────────┴───────────────┐
//!   ExpiredSuccessful               ExpiredFailed
//!   (directory removed)     (failed_expired_ directory kept)
//! ```

mod budget;
mod reaper;
mod state;

pub use state::{ConfigurationStatus, FileStatus, LifecycleState, ReapOutcome, UnitStatus};

use crate::clock::Clock;
use crate::config::ServiceConfig;
use crate::configuration::Configuration;
use crate::content_file::{validate_logical_name, ContentFile};
use crate::error::{DepositError, DepositResult};
use crate::ingest::{IngestUnit, IngestionService, UnitReport};
use crate::store::ConfigurationStore;
use budget::{Budget, BudgetSlot};
use depositor_common::checksum::{checksums_match, store_and_digest};
use depositor_common::CommonError;
use state::{ConfigState, Entry, UnitRecord};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::io::AsyncRead;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// A submission that was durably received and handed to an ingest unit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Accepted {
    pub unit_id: Uuid,
}

enum UnitEvent {
    Finished(UnitReport),
}

struct Inner {
    config: ServiceConfig,
    store: ConfigurationStore,
    service: Arc<dyn IngestionService>,
    clock: Arc<dyn Clock>,
    table: Mutex<HashMap<String, Entry>>,
    budget: Arc<Budget>,
    events: mpsc::UnboundedSender<UnitEvent>,
    /// Bumped after every state table change that may end a wait
    progress: watch::Sender<u64>,
    units: TaskTracker,
    /// Drain-and-finalize tasks started by the reaper
    reaps: TaskTracker,
}

struct BackgroundTasks {
    reaper: JoinHandle<()>,
    reaper_cancel: CancellationToken,
    events: JoinHandle<()>,
    events_cancel: CancellationToken,
}

#[derive(Clone)]
pub struct LifecycleManager {
    inner: Arc<Inner>,
    tasks: Arc<Mutex<Option<BackgroundTasks>>>,
}

impl LifecycleManager {
    /// Open the base directory, restore state and start the background tasks
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(
        config: ServiceConfig,
        service: Arc<dyn IngestionService>,
        clock: Arc<dyn Clock>,
    ) -> DepositResult<Self> {
        config
            .validate()
            .map_err(|e| DepositError::validation(e.to_string()))?;

        let (store, recovery) = ConfigurationStore::open(&config.base_dir)?;
        let now = clock.now();
        let mut table = HashMap::new();

        for id in &recovery.failed_expired {
            if let Some(stored) = store.get(id) {
                table.insert(id.clone(), Entry::new(ConfigState::ExpiredFailed, stored.directory));
            }
        }

        for recovered in recovery.configurations {
            let id = recovered.configuration.id().to_string();
            let mut entry = Entry::new(ConfigState::active(), recovered.directory);
            entry.recovered_expired = recovered
                .configuration
                .is_monitoring_over(now, config.default_monitoring_minutes);

            for file in recovered.pending {
                entry.units.insert(
                    file.logical_name().to_string(),
                    UnitRecord {
                        unit_id: None,
                        file,
                        checksum: None,
                        status: UnitStatus::Queued,
                        attempts: 0,
                    },
                );
            }

            if entry.recovered_expired {
                info!(configuration_id = %id, "Recovered configuration is already expired");
            }
            table.insert(id, entry);
        }

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (progress, _) = watch::channel(0u64);

        let inner = Arc::new(Inner {
            budget: Budget::new(config.max_units),
            config,
            store,
            service,
            clock,
            table: Mutex::new(table),
            events: events_tx,
            progress,
            units: TaskTracker::new(),
            reaps: TaskTracker::new(),
        });

        let events_cancel = CancellationToken::new();
        let reaper_cancel = CancellationToken::new();
        let events = tokio::spawn(Arc::clone(&inner).run_event_loop(events_rx, events_cancel.clone()));
        let reaper = tokio::spawn(Arc::clone(&inner).run_reaper(reaper_cancel.clone()));

        info!(
            base_dir = %inner.config.base_dir.display(),
            max_units = inner.config.max_units,
            "Lifecycle manager started"
        );

        Ok(Self {
            inner,
            tasks: Arc::new(Mutex::new(Some(BackgroundTasks {
                reaper,
                reaper_cancel,
                events,
                events_cancel,
            }))),
        })
    }

    /// Validate and persist a configuration given as a property map
    pub fn register(&self, properties: BTreeMap<String, String>) -> DepositResult<PathBuf> {
        let configuration = Configuration::from_properties(properties)?;
        self.register_configuration(configuration)
    }

    /// Validate and persist a configuration given as a properties document
    pub fn register_xml(&self, xml: &str) -> DepositResult<PathBuf> {
        let configuration = Configuration::from_xml(xml)?;
        self.register_configuration(configuration)
    }

    fn register_configuration(&self, configuration: Configuration) -> DepositResult<PathBuf> {
        let id = configuration.id().to_string();
        let directory = self
            .inner
            .store
            .register(configuration, self.inner.clock.now())?;

        self.inner
            .table()
            .insert(id, Entry::new(ConfigState::active(), directory.clone()));

        Ok(directory)
    }

    /// Receive a content file, verify it and hand it to an ingest unit
    ///
    /// Returns once the bytes are on disk and the checksum matched; the
    /// hand-off itself continues in the background.
    pub async fn submit<R>(
        &self,
        configuration_id: &str,
        file_name: &str,
        claimed_checksum: &str,
        reader: &mut R,
    ) -> DepositResult<Accepted>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let inner = &self.inner;
        let slot = inner
            .budget
            .try_reserve()
            .ok_or(DepositError::CapacityExceeded {
                limit: inner.budget.limit(),
            })?;

        let directory = inner.admit(configuration_id, file_name, claimed_checksum)?;

        let received = inner
            .receive(configuration_id, file_name, claimed_checksum, &directory, reader)
            .await;

        match received {
            Ok(configuration) => {
                Ok(inner.launch(configuration, &directory, file_name, claimed_checksum, slot))
            },
            Err(e) => {
                inner.forget_receiving(configuration_id, file_name);
                Err(e)
            },
        }
    }

    /// Finalize a configuration now, whatever its window
    pub async fn delete(&self, configuration_id: &str) -> DepositResult<ReapOutcome> {
        loop {
            let state = self
                .inner
                .table()
                .get(configuration_id)
                .map(|entry| entry.state.clone());

            match state {
                None => {
                    return Err(DepositError::NotFound(format!(
                        "configuration {configuration_id}"
                    )))
                },
                Some(ConfigState::ExpiredFailed) => {
                    return Err(DepositError::PermanentlyFailed(configuration_id.to_string()))
                },
                Some(ConfigState::ExpiredSuccessful) => {
                    return Err(DepositError::Expired(configuration_id.to_string()))
                },
                Some(ConfigState::Reaping { .. }) => {
                    return self.inner.wait_for_reap(configuration_id).await
                },
                Some(ConfigState::Active { .. }) => {
                    if self.inner.claim_reap(configuration_id) {
                        return Ok(self.inner.finish_reap(configuration_id).await);
                    }
                },
            }
        }
    }

    pub fn status(&self, configuration_id: &str) -> Option<ConfigurationStatus> {
        let table = self.inner.table();
        let entry = table.get(configuration_id)?;

        let mut files: Vec<FileStatus> = entry
            .units
            .iter()
            .map(|(name, record)| FileStatus {
                logical_name: name.clone(),
                status: record.status,
                attempts: record.attempts,
            })
            .collect();
        files.sort_by(|a, b| a.logical_name.cmp(&b.logical_name));

        Some(ConfigurationStatus {
            configuration_id: configuration_id.to_string(),
            state: entry.state.public(),
            directory: entry.directory.clone(),
            failed_files: entry
                .state
                .failed_files()
                .map(|f| f.iter().cloned().collect())
                .unwrap_or_default(),
            files,
        })
    }

    /// Current value of the concurrency budget counter
    pub fn outstanding_units(&self) -> usize {
        self.inner.budget.outstanding()
    }

    /// Run one reaper pass immediately and wait for the reaps it started
    pub async fn run_reaper_cycle(&self) {
        for reap in self.inner.reaper_cycle() {
            if let Err(e) = reap.await {
                error!(error = %e, "Reap task ended abnormally");
            }
        }
    }

    /// Stop the reaper after its current cycle, then wait for reaps in
    /// flight and running units
    pub async fn shutdown(&self) {
        let tasks = self
            .tasks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        let Some(tasks) = tasks else {
            return;
        };

        info!("Stopping lifecycle manager");
        tasks.reaper_cancel.cancel();
        if let Err(e) = tasks.reaper.await {
            error!(error = %e, "Reaper task ended abnormally");
        }

        self.inner.reaps.close();
        self.inner.reaps.wait().await;
        self.inner.units.close();
        self.inner.units.wait().await;

        tasks.events_cancel.cancel();
        if let Err(e) = tasks.events.await {
            error!(error = %e, "Event loop ended abnormally");
        }
        info!("Lifecycle manager stopped");
    }
}

impl Inner {
    fn table(&self) -> MutexGuard<'_, HashMap<String, Entry>> {
        self.table.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn bump_progress(&self) {
        self.progress.send_modify(|n| *n = n.wrapping_add(1));
    }

    /// Lifecycle and in-memory duplicate checks; records the file as receiving
    ///
    /// The receiving record reserves the name until [`Inner::receive`] has
    /// checked the directory.
    fn admit(
        &self,
        configuration_id: &str,
        file_name: &str,
        claimed_checksum: &str,
    ) -> DepositResult<PathBuf> {
        let now = self.clock.now();
        let mut table = self.table();
        let entry = table
            .get_mut(configuration_id)
            .ok_or_else(|| DepositError::NotFound(format!("configuration {configuration_id}")))?;

        match entry.state {
            ConfigState::ExpiredSuccessful | ConfigState::Reaping { .. } => {
                return Err(DepositError::Expired(configuration_id.to_string()))
            },
            ConfigState::ExpiredFailed => {
                return Err(DepositError::PermanentlyFailed(configuration_id.to_string()))
            },
            ConfigState::Active { .. } => {},
        }

        let stored = self
            .store
            .get(configuration_id)
            .ok_or_else(|| DepositError::NotFound(format!("configuration {configuration_id}")))?;
        if entry.recovered_expired
            || stored
                .configuration
                .is_monitoring_over(now, self.config.default_monitoring_minutes)
        {
            return Err(DepositError::Expired(configuration_id.to_string()));
        }

        validate_logical_name(file_name)?;

        if entry.units.contains_key(file_name) {
            return Err(DepositError::AlreadyExists(format!(
                "file {file_name} in configuration {configuration_id}"
            )));
        }

        entry.units.insert(
            file_name.to_string(),
            UnitRecord {
                unit_id: None,
                file: ContentFile::pending(&entry.directory, file_name),
                checksum: Some(claimed_checksum.to_string()),
                status: UnitStatus::Receiving,
                attempts: 0,
            },
        );

        Ok(entry.directory.clone())
    }

    /// Check the directory for the name, start the window if needed, then
    /// store and digest the bytes
    async fn receive<R>(
        &self,
        configuration_id: &str,
        file_name: &str,
        claimed_checksum: &str,
        directory: &Path,
        reader: &mut R,
    ) -> DepositResult<Arc<Configuration>>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        if self
            .store
            .find_content_file(directory, file_name)
            .await?
            .is_some()
        {
            return Err(DepositError::AlreadyExists(format!(
                "file {file_name} in configuration {configuration_id}"
            )));
        }

        let configuration = self
            .store
            .persist_monitoring_start(configuration_id, self.clock.now())
            .await?;

        let destination = directory.join(file_name);
        let digest = store_and_digest(reader, &destination, configuration.algorithm())
            .await
            .map_err(|e| match e {
                CommonError::Io(io) if io.kind() == std::io::ErrorKind::AlreadyExists => {
                    DepositError::AlreadyExists(format!(
                        "file {file_name} in configuration {configuration_id}"
                    ))
                },
                other => other.into(),
            })?;

        if !checksums_match(claimed_checksum, &digest) {
            if let Err(e) = tokio::fs::remove_file(&destination).await {
                error!(
                    path = %destination.display(),
                    error = %e,
                    "Cannot remove content file after checksum mismatch"
                );
            }
            warn!(
                configuration_id,
                logical_name = file_name,
                claimed = claimed_checksum,
                computed = %digest,
                "Rejected content file with wrong checksum"
            );
            return Err(DepositError::ChecksumMismatch {
                expected: claimed_checksum.to_string(),
                actual: digest,
            });
        }

        debug!(configuration_id, logical_name = file_name, checksum = %digest, "Content file received");
        Ok(configuration)
    }

    fn forget_receiving(&self, configuration_id: &str, file_name: &str) {
        let mut table = self.table();
        if let Some(entry) = table.get_mut(configuration_id) {
            let receiving = entry
                .units
                .get(file_name)
                .is_some_and(|record| record.status == UnitStatus::Receiving);
            if receiving {
                entry.units.remove(file_name);
            }
        }
        drop(table);
        self.bump_progress();
    }

    fn launch(
        self: &Arc<Self>,
        configuration: Arc<Configuration>,
        directory: &Path,
        file_name: &str,
        claimed_checksum: &str,
        slot: BudgetSlot,
    ) -> Accepted {
        let unit = IngestUnit::new(
            Arc::clone(&configuration),
            ContentFile::pending(directory, file_name),
            Some(claimed_checksum.to_string()),
            Arc::clone(&self.service),
            self.config.ingest_timeout(),
        );
        let unit_id = unit.unit_id();

        if let Some(record) = self
            .table()
            .get_mut(configuration.id())
            .and_then(|entry| entry.units.get_mut(file_name))
        {
            record.unit_id = Some(unit_id);
            record.status = UnitStatus::Running;
            record.attempts += 1;
        }

        self.spawn_unit(unit, slot);
        Accepted { unit_id }
    }

    fn spawn_unit(&self, unit: IngestUnit, slot: BudgetSlot) {
        let events = self.events.clone();
        self.units.spawn(async move {
            let report = unit.run().await;
            if events.send(UnitEvent::Finished(report)).is_err() {
                debug!("Event loop stopped before unit report was delivered");
            }
            drop(slot);
        });
    }

    async fn run_event_loop(
        self: Arc<Self>,
        mut events: mpsc::UnboundedReceiver<UnitEvent>,
        cancel: CancellationToken,
    ) {
        loop {
            tokio::select! {
                biased;
                event = events.recv() => match event {
                    Some(event) => self.apply(event),
                    None => break,
                },
                _ = cancel.cancelled() => {
                    while let Ok(event) = events.try_recv() {
                        self.apply(event);
                    }
                    break;
                },
            }
        }
    }

    fn apply(&self, event: UnitEvent) {
        let UnitEvent::Finished(report) = event;
        let name = report.file.logical_name().to_string();

        {
            let mut table = self.table();
            let Some(entry) = table.get_mut(&report.configuration_id) else {
                return;
            };
            let Some(record) = entry.units.get_mut(&name) else {
                return;
            };
            if record.unit_id != Some(report.unit_id) {
                debug!(unit_id = %report.unit_id, "Ignoring report of a superseded unit");
                return;
            }

            record.file = report.file.clone();
            if report.checksum.is_some() {
                record.checksum = report.checksum.clone();
            }
            record.status = match &report.outcome {
                Ok(_) => UnitStatus::Succeeded,
                Err(e) => UnitStatus::Failed {
                    retryable: e.is_retryable(),
                },
            };

            if let Some(failed_files) = entry.state.failed_files_mut() {
                if report.succeeded() {
                    if failed_files.remove(&name) {
                        info!(
                            configuration_id = %report.configuration_id,
                            logical_name = %name,
                            "Previously failed file stored"
                        );
                    }
                } else if failed_files.insert(name.clone()) {
                    warn!(
                        configuration_id = %report.configuration_id,
                        logical_name = %name,
                        "Configuration has failing files"
                    );
                }
            }
        }

        self.bump_progress();
    }
}
