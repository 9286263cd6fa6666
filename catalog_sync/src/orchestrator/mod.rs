//! Sync orchestrator
//!
//! Drives one cycle per source: consult the ledger, fetch, parse, reconcile
//! against the other sources' staged records, persist what changed, and only
//! then advance the ledger. Sources run concurrently up to the worker
//! ceiling; every per-source error ends up in the [`SyncReport`] instead of
//! aborting the run.

pub mod cycle;
pub mod report;

use crate::config::SyncConfig;
use crate::error::{Result, SyncError};
use crate::fetch::cache::PayloadCache;
use crate::fetch::{build_http_client, FetchClient, FetchOutcome, VersionToken};
use crate::ledger::VersionLedger;
use crate::reconcile::Reconciler;
use crate::sources;
use crate::store::{EntityStore, StoreError, StoreResult, StoredEntity};
use chrono::Utc;
use cycle::{Cycle, CycleStage};
use futures::stream::{self, StreamExt};
use mtg_common::{CanonicalEntity, EntityKind, IntermediateRecord, SourceId};
use report::{EntityFailure, SourceSyncOutcome, SyncReport, SyncStatus};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

/// Failures listed in the ledger note of a partial success
const NOTE_FAILURE_LIMIT: usize = 5;

/// Changes computed while reconciling, applied while persisting
#[derive(Default)]
struct WritePlan {
    writes: Vec<(CanonicalEntity, String)>,
    created: usize,
    updated: usize,
    unchanged: usize,
    /// New staged snapshot, when it differs from the stored one
    snapshot: Option<Vec<IntermediateRecord>>,
}

impl WritePlan {
    fn is_empty(&self) -> bool {
        self.writes.is_empty() && self.snapshot.is_none()
    }
}

fn persist(store: &dyn EntityStore, source: SourceId, plan: &WritePlan) -> StoreResult<()> {
    for (entity, fingerprint) in &plan.writes {
        store.put(entity, fingerprint)?;
    }
    if let Some(records) = &plan.snapshot {
        store.replace_source_records(source, records)?;
    }
    Ok(())
}

/// Coordinates sync cycles across all configured sources
pub struct SyncOrchestrator {
    clients: BTreeMap<SourceId, FetchClient>,
    store: Arc<dyn EntityStore>,
    ledger: VersionLedger,
    reconciler: Reconciler,
    source_locks: HashMap<SourceId, Mutex<()>>,
    kind_locks: HashMap<EntityKind, Mutex<()>>,
    max_workers: usize,
    cancel: CancellationToken,
}

impl SyncOrchestrator {
    /// Build fetch clients for every configured source
    pub fn new(config: &SyncConfig, store: Arc<dyn EntityStore>, ledger: VersionLedger) -> Result<Self> {
        config.validate()?;
        let http = build_http_client(&config.user_agent, config.request_timeout())?;
        let cache = Arc::new(PayloadCache::new(&config.cache_dir));

        let clients = config
            .sources
            .iter()
            .map(|descriptor| {
                let client = FetchClient::new(
                    descriptor.clone(),
                    http.clone(),
                    config.retry.clone(),
                    Some(Arc::clone(&cache)),
                )
                .offline(config.offline);
                (descriptor.id, client)
            })
            .collect();

        Ok(Self {
            clients,
            store,
            ledger,
            reconciler: Reconciler::new(),
            source_locks: SourceId::ALL.into_iter().map(|s| (s, Mutex::new(()))).collect(),
            kind_locks: EntityKind::ALL.into_iter().map(|k| (k, Mutex::new(()))).collect(),
            max_workers: config.max_workers.max(1),
            cancel: CancellationToken::new(),
        })
    }

    /// Share an externally owned cancellation token
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn ledger(&self) -> &VersionLedger {
        &self.ledger
    }

    /// Configured sources in a stable order
    pub fn sources(&self) -> Vec<SourceId> {
        self.clients.keys().copied().collect()
    }

    /// Sync every configured source; sources in `force` skip the interval
    /// check and fetch unconditionally
    pub async fn sync_all(&self, force: &HashSet<SourceId>) -> SyncReport {
        self.sync_sources(&self.sources(), force).await
    }

    /// Sync the given sources concurrently
    pub async fn sync_sources(&self, sources: &[SourceId], force: &HashSet<SourceId>) -> SyncReport {
        let started_at = Utc::now();
        let selected: BTreeSet<SourceId> = sources.iter().copied().collect();
        let workers = self.max_workers.min(selected.len()).max(1);
        log::info!(
            "Starting sync of {} source(s) with {} worker(s)",
            selected.len(),
            workers
        );

        let mut outcomes: Vec<SourceSyncOutcome> = stream::iter(selected)
            .map(|source| self.sync_one(source, force.contains(&source)))
            .buffer_unordered(workers)
            .collect()
            .await;
        outcomes.sort_by_key(|o| o.source);

        let report = SyncReport {
            started_at,
            finished_at: Utc::now(),
            outcomes,
        };
        log::info!(
            "Sync finished: {} entities changed, {} source(s) failed",
            report.changed(),
            report.sources_with(SyncStatus::Failed).len()
        );
        report
    }

    /// Run one cycle for `source`. A concurrent cycle of the same source is
    /// waited for, not duplicated.
    pub async fn sync_one(&self, source: SourceId, force: bool) -> SourceSyncOutcome {
        let started = Instant::now();
        let mut outcome = SourceSyncOutcome::new(source);
        let mut cycle = Cycle::new(source);

        let result = match self.source_locks.get(&source) {
            Some(lock) => {
                let guard = tokio::select! {
                    _ = self.cancel.cancelled() => None,
                    guard = lock.lock() => Some(guard),
                };
                match guard {
                    Some(_guard) => self.run_cycle(source, force, &mut cycle, &mut outcome).await,
                    None => Err(SyncError::Cancelled),
                }
            }
            None => Err(SyncError::UnknownSource(source)),
        };

        match result {
            Ok(status) => {
                outcome.status = status;
                log::info!("{}: {}", source, status);
            }
            Err(SyncError::Cancelled) => {
                cycle.fail();
                outcome.status = SyncStatus::Cancelled;
                log::warn!("{}: cycle cancelled", source);
            }
            Err(e) => {
                let stage = cycle.fail();
                outcome.status = SyncStatus::Failed;
                outcome.failed_stage = Some(stage);
                outcome.error = Some(e.to_string());
                log::error!("{}: cycle failed during {}: {}", source, stage, e);
                if let Err(ledger_err) = self.ledger.record_failure(source, &e.to_string(), Utc::now()) {
                    log::error!("{}: could not record failure in ledger: {}", source, ledger_err);
                }
            }
        }

        outcome.duration_ms = started.elapsed().as_millis() as u64;
        outcome
    }

    fn check_cancelled(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            Err(SyncError::Cancelled)
        } else {
            Ok(())
        }
    }

    async fn run_cycle(
        &self,
        source: SourceId,
        force: bool,
        cycle: &mut Cycle,
        outcome: &mut SourceSyncOutcome,
    ) -> Result<SyncStatus> {
        let client = self
            .clients
            .get(&source)
            .ok_or(SyncError::UnknownSource(source))?;

        cycle.advance(CycleStage::CheckingVersion);
        self.check_cancelled()?;
        let previous = self.ledger.get(source)?;
        if let Some(record) = &previous {
            outcome.upstream_version = record.upstream_version.clone();
        }
        let min_interval = client.descriptor().min_interval();
        if !self.ledger.needs_refresh(source, force, min_interval, Utc::now())? {
            log::info!("{}: synced within the last {:?}, skipping", source, min_interval);
            outcome.version_token = previous.and_then(|r| r.version_token);
            cycle.advance(CycleStage::Done);
            return Ok(SyncStatus::UpToDate);
        }
        let conditional: Option<VersionToken> = if force {
            None
        } else {
            previous.and_then(|r| r.version_token)
        };

        cycle.advance(CycleStage::Fetching);
        let fetched = tokio::select! {
            _ = self.cancel.cancelled() => return Err(SyncError::Cancelled),
            fetched = client.fetch(conditional.as_ref()) => fetched?,
        };
        let payload = match fetched {
            FetchOutcome::NotModified => {
                if let Some(token) = &conditional {
                    self.ledger.record_unchanged(source, token, Utc::now())?;
                }
                outcome.version_token = conditional;
                cycle.advance(CycleStage::Done);
                return Ok(SyncStatus::NotModified);
            }
            FetchOutcome::Payload(payload) => payload,
        };
        outcome.attempts = payload.attempts;

        self.check_cancelled()?;
        cycle.advance(CycleStage::Parsing);
        let parsed = sources::parse(source, &payload.body)?;
        outcome.records = parsed.records.len();
        let upstream_version = parsed.upstream_version;
        if upstream_version.is_some() {
            outcome.upstream_version = upstream_version.clone();
        }

        self.check_cancelled()?;
        cycle.advance(CycleStage::Reconciling);
        // Kinds are locked in declaration order, the same for every source
        let mut guards = Vec::new();
        for kind in source.entity_kinds() {
            if let Some(lock) = self.kind_locks.get(kind) {
                guards.push(lock.lock().await);
            }
        }
        let plan = self.plan_writes(source, parsed.records, outcome)?;
        let (created, updated, unchanged) = (plan.created, plan.updated, plan.unchanged);

        self.check_cancelled()?;
        cycle.advance(CycleStage::Persisting);
        if plan.is_empty() {
            log::debug!("{}: nothing to persist", source);
        } else {
            let store = Arc::clone(&self.store);
            tokio::task::spawn_blocking(move || persist(store.as_ref(), source, &plan))
                .await
                .map_err(|e| StoreError::Join(e.to_string()))??;
        }
        drop(guards);
        outcome.created = created;
        outcome.updated = updated;
        outcome.unchanged = unchanged;

        // Entity writes are committed; a cancellation now leaves the ledger
        // behind and the next run re-applies the same payload as a no-op
        self.check_cancelled()?;
        let token = payload.version_token();
        let note = failure_note(&outcome.failures);
        self.ledger.record_success_with_note(
            source,
            &token,
            upstream_version.as_deref(),
            note.as_deref(),
            Utc::now(),
        )?;
        outcome.version_token = Some(token);
        cycle.advance(CycleStage::Done);

        Ok(if outcome.failures.is_empty() {
            SyncStatus::Succeeded
        } else {
            SyncStatus::PartiallySucceeded
        })
    }

    /// Reconcile every key the source touches now or touched last time
    fn plan_writes(
        &self,
        source: SourceId,
        mut fresh: Vec<IntermediateRecord>,
        outcome: &mut SourceSyncOutcome,
    ) -> Result<WritePlan> {
        fresh.sort_by(|a, b| (a.kind, &a.key).cmp(&(b.kind, &b.key)));
        let mut plan = WritePlan::default();
        let mut restage = false;

        for &kind in source.entity_kinds() {
            let own: Vec<&IntermediateRecord> = fresh.iter().filter(|r| r.kind == kind).collect();
            let previous = self.store.source_records(source, kind)?;
            if previous.len() != own.len() || previous.iter().zip(&own).any(|(p, f)| p != *f) {
                restage = true;
            }

            let mut by_key: BTreeMap<&str, Vec<&IntermediateRecord>> = BTreeMap::new();
            for record in own.iter().copied() {
                by_key.entry(record.key.as_str()).or_default().push(record);
            }
            // Keys this source dropped still need a merge without it
            for record in &previous {
                by_key.entry(record.key.as_str()).or_default();
            }

            let mut staged_by_others = Vec::new();
            for other in kind.sources().into_iter().filter(|s| *s != source) {
                staged_by_others.extend(self.store.source_records(other, kind)?);
            }
            for record in &staged_by_others {
                if let Some(records) = by_key.get_mut(record.key.as_str()) {
                    records.push(record);
                }
            }

            let existing: HashMap<String, StoredEntity> = self
                .store
                .list_all(kind)?
                .into_iter()
                .map(|stored| (stored.entity.key().to_string(), stored))
                .collect();

            for (key, incoming) in &by_key {
                if incoming.is_empty() {
                    log::debug!("{} '{}': no source reports it any more, keeping", kind, key);
                    continue;
                }
                let stored = existing.get(*key);
                match self.reconciler.reconcile(stored, incoming) {
                    Ok(reconciled) if reconciled.changed => {
                        if stored.is_some() {
                            plan.updated += 1;
                        } else {
                            plan.created += 1;
                        }
                        plan.writes.push((reconciled.entity, reconciled.fingerprint));
                    }
                    Ok(_) => plan.unchanged += 1,
                    Err(e) => {
                        log::warn!("{}: {}", source, e);
                        outcome.failures.push(EntityFailure {
                            kind,
                            key: key.to_string(),
                            error: e.to_string(),
                        });
                    }
                }
            }
        }

        log::info!(
            "{}: {} created, {} updated, {} unchanged, {} failed",
            source,
            plan.created,
            plan.updated,
            plan.unchanged,
            outcome.failures.len()
        );
        if restage {
            plan.snapshot = Some(fresh);
        }
        Ok(plan)
    }

    /// Delete entities of `kind` that no source reports any more.
    ///
    /// Returns the removed keys. Does nothing while no source has staged
    /// records of that kind.
    pub async fn prune(&self, kind: EntityKind) -> Result<Vec<String>> {
        let _guard = match self.kind_locks.get(&kind) {
            Some(lock) => Some(lock.lock().await),
            None => None,
        };

        let mut staged: HashSet<String> = HashSet::new();
        for source in kind.sources() {
            staged.extend(
                self.store
                    .source_records(source, kind)?
                    .into_iter()
                    .map(|r| r.key),
            );
        }
        if staged.is_empty() {
            log::warn!("No staged {} records; refusing to prune", kind);
            return Ok(Vec::new());
        }

        let mut removed = Vec::new();
        for stored in self.store.list_all(kind)? {
            let key = stored.entity.key();
            if !staged.contains(key) && self.store.delete(kind, key)? {
                removed.push(key.to_string());
            }
        }
        log::info!("Pruned {} {} entities", removed.len(), kind);
        Ok(removed)
    }
}

/// Ledger note summarizing entity failures of a partial success
fn failure_note(failures: &[EntityFailure]) -> Option<String> {
    if failures.is_empty() {
        return None;
    }
    let shown: Vec<&str> = failures
        .iter()
        .take(NOTE_FAILURE_LIMIT)
        .map(|f| f.error.as_str())
        .collect();
    let more = failures.len().saturating_sub(NOTE_FAILURE_LIMIT);
    let mut note = format!("{} entities failed reconciliation: {}", failures.len(), shown.join("; "));
    if more > 0 {
        note.push_str(&format!("; and {} more", more));
    }
    Some(note)
}
