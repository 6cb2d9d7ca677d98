use crate::dispatch::Dispatcher;
use crate::error::CheckError;
use crate::extractor::Extractor;
use chrono::{DateTime, Utc};
use driftwatch_alert::diff::diff;
use driftwatch_alert::engine::AlertEngine;
use driftwatch_alert::{AlertRule, RuleContext};
use driftwatch_common::types::{Alert, Entity, HistoryRecord};
use driftwatch_storage::error::StorageError;
use driftwatch_storage::HistoryStore;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// An entity together with its built alert rules, in declaration order.
#[derive(Clone)]
pub struct MonitoredEntity {
    pub entity: Entity,
    pub rules: Vec<Arc<dyn AlertRule>>,
}

impl MonitoredEntity {
    pub fn new(entity: Entity, rules: Vec<Arc<dyn AlertRule>>) -> Self {
        Self { entity, rules }
    }
}

#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub max_concurrent: usize,
    pub extract_timeout: Duration,
    pub history_retention: usize,
    pub degraded_after_failures: u32,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            max_concurrent: 4,
            extract_timeout: Duration::from_secs(30),
            history_retention: 100,
            degraded_after_failures: 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckStatus {
    FirstSeen,
    Unchanged,
    Changed,
}

/// Result of one entity's successful, committed check.
#[derive(Debug, Clone)]
pub struct EntityReport {
    pub entity_id: String,
    pub status: CheckStatus,
    pub alerts: Vec<Alert>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntityFailure {
    pub entity_id: String,
    pub error: CheckError,
}

/// Everything one poll cycle produced, handed to the dispatcher.
#[derive(Debug, Clone, Serialize)]
pub struct CycleSummary {
    pub cycle_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Entities the cycle attempted.
    pub checked: usize,
    pub unchanged: usize,
    pub changed: usize,
    pub first_seen: usize,
    /// Entities whose check failed, excluding cancelled ones.
    pub errored: usize,
    /// Entities that produced at least one alert.
    pub alerted: usize,
    pub cancelled: usize,
    /// Alerts grouped by entity in configuration order, each entity's in
    /// rule-declaration order.
    pub alerts: Vec<Alert>,
    pub failures: Vec<EntityFailure>,
    /// Entities with repeated consecutive history store failures.
    pub degraded: Vec<String>,
}

impl CycleSummary {
    fn new(cycle_id: String, started_at: DateTime<Utc>) -> Self {
        Self {
            cycle_id,
            started_at,
            finished_at: started_at,
            checked: 0,
            unchanged: 0,
            changed: 0,
            first_seen: 0,
            errored: 0,
            alerted: 0,
            cancelled: 0,
            alerts: Vec::new(),
            failures: Vec::new(),
            degraded: Vec::new(),
        }
    }

    fn record(&mut self, entity_id: String, result: Result<EntityReport, CheckError>) {
        self.checked += 1;
        match result {
            Ok(report) => {
                match report.status {
                    CheckStatus::FirstSeen => self.first_seen += 1,
                    CheckStatus::Unchanged => self.unchanged += 1,
                    CheckStatus::Changed => self.changed += 1,
                }
                if !report.alerts.is_empty() {
                    self.alerted += 1;
                    self.alerts.extend(report.alerts);
                }
            }
            Err(error) => {
                if error == CheckError::Cancelled {
                    self.cancelled += 1;
                } else {
                    self.errored += 1;
                }
                self.failures.push(EntityFailure { entity_id, error });
            }
        }
    }
}

/// Shared, cloneable half of the orchestrator moved into each check task.
#[derive(Clone)]
struct EntityChecker {
    extractor: Arc<dyn Extractor>,
    store: Arc<dyn HistoryStore>,
    engine: Arc<AlertEngine>,
    settings: OrchestratorSettings,
}

impl EntityChecker {
    /// Fetch, diff, evaluate and commit one entity.
    ///
    /// History is written only after the whole pass succeeded and the
    /// cycle was not cancelled, so any error leaves the stored record as
    /// it was.
    async fn check(
        &self,
        monitored: &MonitoredEntity,
        cancel: &CancellationToken,
    ) -> Result<EntityReport, CheckError> {
        let entity = &monitored.entity;
        if cancel.is_cancelled() {
            return Err(CheckError::Cancelled);
        }

        let history = self.store.load(&entity.id)?;

        let timeout = self.settings.extract_timeout;
        let fetched = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(CheckError::Cancelled),
            fetched = tokio::time::timeout(timeout, self.extractor.fetch_snapshot(entity)) => fetched,
        };
        let snapshot = fetched.map_err(|_| CheckError::Timeout(timeout.as_millis() as u64))??;
        let now = Utc::now();

        let delta = diff(history.as_ref().map(|h| &h.snapshot), &snapshot);

        let history = match history {
            Some(mut record) if !delta.hash_changed => {
                record.last_checked_at = now;
                self.commit(&record, cancel)?;
                tracing::debug!(entity_id = %entity.id, "Snapshot unchanged");
                return Ok(EntityReport {
                    entity_id: entity.id.clone(),
                    status: CheckStatus::Unchanged,
                    alerts: Vec::new(),
                });
            }
            other => other,
        };
        let previous = history.as_ref().map(|h| &h.snapshot);

        let mut states = history
            .as_ref()
            .map(|h| h.rule_states.clone())
            .unwrap_or_default();
        let alerts = {
            let ctx = RuleContext {
                entity,
                diff: &delta,
                previous,
                current: &snapshot,
                history: history.as_ref(),
            };
            self.engine.evaluate(&monitored.rules, &ctx, &mut states, now)
        };
        // forget rules that were removed from the configuration
        states.retain(|id, _| monitored.rules.iter().any(|r| r.id() == id));

        let status = if history.is_some() {
            CheckStatus::Changed
        } else {
            CheckStatus::FirstSeen
        };
        let mut record = match history {
            Some(mut record) => {
                record.snapshot_hash = snapshot.content_hash();
                record.snapshot = snapshot;
                record.last_changed_at = now;
                record
            }
            None => HistoryRecord::first(entity.id.clone(), snapshot),
        };
        record.last_checked_at = now;
        record.rule_states = states;
        record.record_series(entity, self.settings.history_retention);

        self.commit(&record, cancel)?;

        tracing::debug!(
            entity_id = %entity.id,
            status = ?status,
            changed_fields = ?delta.changed_fields,
            alerts = alerts.len(),
            "Entity checked"
        );
        Ok(EntityReport {
            entity_id: entity.id.clone(),
            status,
            alerts,
        })
    }

    fn commit(&self, record: &HistoryRecord, cancel: &CancellationToken) -> Result<(), CheckError> {
        if cancel.is_cancelled() {
            return Err(CheckError::Cancelled);
        }
        self.store.save(record)?;
        Ok(())
    }
}

/// Drives poll cycles over the configured entities.
///
/// Each entity is checked in its own task, at most `max_concurrent` at a
/// time. A failing, slow or panicking check only affects its own entity.
pub struct PollOrchestrator {
    entities: RwLock<Vec<MonitoredEntity>>,
    checker: EntityChecker,
    /// Consecutive history store failures per entity.
    persistence_failures: Mutex<HashMap<String, u32>>,
}

impl PollOrchestrator {
    pub fn new(
        entities: Vec<MonitoredEntity>,
        extractor: Arc<dyn Extractor>,
        store: Arc<dyn HistoryStore>,
        engine: Arc<AlertEngine>,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            entities: RwLock::new(entities),
            checker: EntityChecker {
                extractor,
                store,
                engine,
                settings,
            },
            persistence_failures: Mutex::new(HashMap::new()),
        }
    }

    pub fn settings(&self) -> &OrchestratorSettings {
        &self.checker.settings
    }

    pub fn entities(&self) -> Vec<Entity> {
        self.entities
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .iter()
            .map(|m| m.entity.clone())
            .collect()
    }

    /// Adds an entity, replacing any entity with the same id. Its history
    /// is kept, so a replaced entity continues from its last snapshot.
    /// Returns true if an entity was replaced.
    pub fn add_entity(&self, monitored: MonitoredEntity) -> bool {
        let mut entities = self.entities.write().unwrap_or_else(|p| p.into_inner());
        tracing::info!(
            entity_id = %monitored.entity.id,
            rules = monitored.rules.len(),
            "Entity added"
        );
        match entities
            .iter_mut()
            .find(|m| m.entity.id == monitored.entity.id)
        {
            Some(existing) => {
                *existing = monitored;
                true
            }
            None => {
                entities.push(monitored);
                false
            }
        }
    }

    /// Stops monitoring an entity and drops its stored history.
    pub fn remove_entity(&self, entity_id: &str) -> Result<bool, StorageError> {
        let removed = {
            let mut entities = self.entities.write().unwrap_or_else(|p| p.into_inner());
            let before = entities.len();
            entities.retain(|m| m.entity.id != entity_id);
            entities.len() != before
        };
        self.persistence_failures
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .remove(entity_id);
        let had_history = self.checker.store.remove(entity_id)?;
        if removed || had_history {
            tracing::info!(entity_id, "Entity removed");
        }
        Ok(removed || had_history)
    }

    /// Runs one cycle over every entity and waits for all checks to finish.
    ///
    /// Cancelling `cancel` abandons checks that have not committed yet;
    /// they are reported as [`CheckError::Cancelled`].
    pub async fn run_cycle(&self, cancel: &CancellationToken) -> CycleSummary {
        let mut summary = CycleSummary::new(driftwatch_common::id::next_id(), Utc::now());
        let entities = self
            .entities
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .clone();

        tracing::info!(
            cycle_id = %summary.cycle_id,
            entities = entities.len(),
            "Poll cycle started"
        );

        let semaphore = Arc::new(Semaphore::new(self.checker.settings.max_concurrent.max(1)));
        let mut handles: Vec<(String, Option<JoinHandle<Result<EntityReport, CheckError>>>)> =
            Vec::with_capacity(entities.len());

        for monitored in entities {
            let entity_id = monitored.entity.id.clone();
            let permit = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                permit = semaphore.clone().acquire_owned() => permit.ok(),
            };
            let Some(permit) = permit else {
                handles.push((entity_id, None));
                continue;
            };

            let checker = self.checker.clone();
            let cancel = cancel.clone();
            let handle = tokio::spawn(async move {
                let result = checker.check(&monitored, &cancel).await;
                drop(permit);
                result
            });
            handles.push((entity_id, Some(handle)));
        }

        for (entity_id, handle) in handles {
            let result = match handle {
                None => Err(CheckError::Cancelled),
                Some(handle) => match handle.await {
                    Ok(result) => result,
                    Err(e) if e.is_panic() => {
                        tracing::error!(entity_id = %entity_id, error = %e, "Entity check task panicked");
                        Err(CheckError::Internal(e.to_string()))
                    }
                    Err(_) => Err(CheckError::Cancelled),
                },
            };

            match &result {
                Err(e) if e.is_persistence() => {
                    tracing::error!(entity_id = %entity_id, error = %e, "History store failure, entity skipped");
                }
                Err(CheckError::Cancelled) => {
                    tracing::debug!(entity_id = %entity_id, "Entity check cancelled");
                }
                Err(e) => {
                    tracing::warn!(entity_id = %entity_id, error = %e, "Entity check failed");
                }
                Ok(_) => {}
            }
            self.track_health(&entity_id, &result);
            summary.record(entity_id, result);
        }

        summary.degraded = self.degraded();
        summary.finished_at = Utc::now();

        tracing::info!(
            cycle_id = %summary.cycle_id,
            checked = summary.checked,
            changed = summary.changed,
            errored = summary.errored,
            alerts = summary.alerts.len(),
            "Poll cycle finished"
        );
        summary
    }

    fn track_health(&self, entity_id: &str, result: &Result<EntityReport, CheckError>) {
        let mut failures = self
            .persistence_failures
            .lock()
            .unwrap_or_else(|p| p.into_inner());
        match result {
            Ok(_) => {
                failures.remove(entity_id);
            }
            Err(e) if e.is_persistence() => {
                *failures.entry(entity_id.to_string()).or_insert(0) += 1;
            }
            Err(_) => {}
        }
    }

    /// Ids of entities whose consecutive history store failures reached
    /// the configured limit, sorted.
    pub fn degraded(&self) -> Vec<String> {
        let limit = self.checker.settings.degraded_after_failures.max(1);
        let mut ids: Vec<String> = self
            .persistence_failures
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .iter()
            .filter(|(_, count)| **count >= limit)
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    /// Runs a cycle every `poll_interval` until `cancel` fires, handing each
    /// summary to `dispatcher`. A cycle interrupted by cancellation is still
    /// dispatched so alerts from already committed checks are not lost.
    pub async fn run(
        &self,
        poll_interval: Duration,
        dispatcher: Arc<dyn Dispatcher>,
        cancel: CancellationToken,
    ) {
        tracing::info!(
            interval_secs = poll_interval.as_secs(),
            max_concurrent = self.checker.settings.max_concurrent,
            dispatcher = dispatcher.name(),
            "Poll orchestrator started"
        );

        let mut tick = interval(poll_interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tick.tick() => {}
            }

            let summary = self.run_cycle(&cancel).await;
            if let Err(e) = dispatcher.dispatch(&summary).await {
                tracing::error!(
                    cycle_id = %summary.cycle_id,
                    dispatcher = dispatcher.name(),
                    error = %e,
                    "Failed to dispatch cycle summary"
                );
            }
        }

        tracing::info!("Poll orchestrator stopped");
    }
}
