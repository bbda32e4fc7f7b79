//! Reaper loop: recovery, expiry and retries

use super::state::{ConfigState, ReapOutcome, UnitStatus};
use super::Inner;
use crate::error::{DepositError, DepositResult};
use crate::ingest::IngestUnit;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

impl Inner {
    pub(super) async fn run_reaper(self: Arc<Self>, cancel: CancellationToken) {
        let interval = self.config.reaper_interval();
        info!(interval = ?interval, "Reaper started");

        loop {
            // Reap tasks run on `self.reaps`.
            drop(self.reaper_cycle());

            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(interval) => {},
            }
        }

        info!("Reaper stopped");
    }

    /// Returns the reap tasks started by this cycle
    pub(super) fn reaper_cycle(self: &Arc<Self>) -> Vec<JoinHandle<()>> {
        self.resume_recovered();
        let mut reaps = Vec::new();

        let now = self.clock.now();
        let candidates: Vec<(String, bool, bool)> = self
            .table()
            .iter()
            .filter_map(|(id, entry)| match &entry.state {
                ConfigState::Active { failed_files } => {
                    Some((id.clone(), entry.recovered_expired, !failed_files.is_empty()))
                },
                _ => None,
            })
            .collect();

        for (id, recovered_expired, failing) in candidates {
            let expired = recovered_expired
                || self.store.get(&id).is_some_and(|stored| {
                    stored
                        .configuration
                        .is_monitoring_over(now, self.config.default_monitoring_minutes)
                });

            if expired {
                if self.claim_reap(&id) {
                    let inner = Arc::clone(self);
                    reaps.push(self.reaps.spawn(async move {
                        let outcome = inner.finish_reap(&id).await;
                        info!(configuration_id = %id, outcome = ?outcome, "Reaped expired configuration");
                    }));
                }
            } else if failing {
                self.retry_failed(&id);
            }
        }

        reaps
    }

    /// Start a unit for every file queued at startup
    fn resume_recovered(self: &Arc<Self>) {
        let mut launches = Vec::new();

        {
            let mut table = self.table();
            for (id, entry) in table.iter_mut() {
                let queued = entry
                    .units
                    .values()
                    .any(|record| record.status == UnitStatus::Queued);
                if !queued {
                    continue;
                }
                let Some(stored) = self.store.get(id) else {
                    continue;
                };

                for record in entry.units.values_mut() {
                    if record.status != UnitStatus::Queued {
                        continue;
                    }
                    let unit = IngestUnit::new(
                        Arc::clone(&stored.configuration),
                        record.file.clone(),
                        record.checksum.clone(),
                        Arc::clone(&self.service),
                        self.config.ingest_timeout(),
                    );
                    record.unit_id = Some(unit.unit_id());
                    record.status = UnitStatus::Running;
                    record.attempts += 1;
                    info!(
                        configuration_id = %id,
                        logical_name = %record.file.logical_name(),
                        "Re-ingesting file found at startup"
                    );
                    launches.push(unit);
                }
            }
        }

        for unit in launches {
            let slot = self.budget.force_reserve();
            self.spawn_unit(unit, slot);
        }
    }

    /// Issue a fresh unit for every retryable failed file
    fn retry_failed(self: &Arc<Self>, configuration_id: &str) {
        let Some(stored) = self.store.get(configuration_id) else {
            return;
        };
        let mut launches = Vec::new();

        {
            let mut table = self.table();
            let Some(entry) = table.get_mut(configuration_id) else {
                return;
            };
            if !matches!(entry.state, ConfigState::Active { .. }) {
                return;
            }

            for record in entry.units.values_mut() {
                if record.status != (UnitStatus::Failed { retryable: true }) {
                    continue;
                }
                let unit = IngestUnit::new(
                    Arc::clone(&stored.configuration),
                    record.file.clone(),
                    record.checksum.clone(),
                    Arc::clone(&self.service),
                    self.config.ingest_timeout(),
                );
                record.unit_id = Some(unit.unit_id());
                record.status = UnitStatus::Running;
                record.attempts += 1;
                info!(
                    configuration_id,
                    logical_name = %record.file.logical_name(),
                    attempt = record.attempts,
                    "Retrying failed file"
                );
                launches.push(unit);
            }
        }

        for unit in launches {
            let slot = self.budget.force_reserve();
            self.spawn_unit(unit, slot);
        }
    }

    /// Move an active configuration to `Reaping`
    ///
    /// Returns `false` when it is unknown, closed or already being reaped.
    /// The caller that gets `true` must follow up with [`Inner::finish_reap`].
    pub(super) fn claim_reap(&self, configuration_id: &str) -> bool {
        {
            let mut table = self.table();
            let Some(entry) = table.get_mut(configuration_id) else {
                return false;
            };
            let failed_files = match &mut entry.state {
                ConfigState::Active { failed_files } => std::mem::take(failed_files),
                _ => return false,
            };
            entry.state = ConfigState::Reaping { failed_files };
        }
        self.bump_progress();
        info!(configuration_id, "Reaping configuration");
        true
    }

    /// Wait for the units of a claimed configuration, then finalize it
    pub(super) async fn finish_reap(&self, configuration_id: &str) -> ReapOutcome {
        self.wait_for_drain(configuration_id).await;

        let failing = self
            .table()
            .get(configuration_id)
            .and_then(|entry| entry.state.failed_files().map(|f| !f.is_empty()))
            .unwrap_or(false);

        let (state, outcome) = if failing {
            if let Err(e) = self.store.mark_failed_expiry(configuration_id).await {
                error!(
                    configuration_id,
                    error = %e,
                    "Cannot finalize failed configuration directory"
                );
            }
            (ConfigState::ExpiredFailed, ReapOutcome::PreservedAsFailed)
        } else {
            if let Err(e) = self.store.mark_successful_expiry(configuration_id).await {
                error!(
                    configuration_id,
                    error = %e,
                    "Cannot finalize configuration directory"
                );
            }
            (ConfigState::ExpiredSuccessful, ReapOutcome::Removed)
        };

        if let Some(entry) = self.table().get_mut(configuration_id) {
            entry.state = state;
            if outcome == ReapOutcome::Removed {
                entry.units.clear();
            }
            if let Some(stored) = self.store.get(configuration_id) {
                entry.directory = stored.directory;
            }
        }
        self.bump_progress();

        outcome
    }

    /// Wait until no unit of the configuration is receiving or running
    async fn wait_for_drain(&self, configuration_id: &str) {
        let mut progress = self.progress.subscribe();
        loop {
            let outstanding = self
                .table()
                .get(configuration_id)
                .is_some_and(|entry| entry.has_outstanding_units());
            if !outstanding {
                return;
            }
            debug!(configuration_id, "Waiting for ingest units to finish");
            // Re-check at least once per poll interval.
            let _ = tokio::time::timeout(self.config.drain_poll(), progress.changed()).await;
        }
    }

    /// Wait for a reap started elsewhere and report its result
    pub(super) async fn wait_for_reap(&self, configuration_id: &str) -> DepositResult<ReapOutcome> {
        let mut progress = self.progress.subscribe();
        loop {
            let state = self
                .table()
                .get(configuration_id)
                .map(|entry| entry.state.clone());
            match state {
                Some(ConfigState::Reaping { .. }) => {
                    let _ =
                        tokio::time::timeout(self.config.drain_poll(), progress.changed()).await;
                },
                Some(ConfigState::ExpiredSuccessful) => return Ok(ReapOutcome::Removed),
                Some(ConfigState::ExpiredFailed) => {
                    return Err(DepositError::PermanentlyFailed(configuration_id.to_string()))
                },
                Some(ConfigState::Active { .. }) | None => {
                    return Err(DepositError::NotFound(format!(
                        "configuration {configuration_id}"
                    )))
                },
            }
        }
    }
}
