//! Sync orchestrator
//!
//! Drives a job end to end: read a master batch, map each record, capture
//! it in the state store, resolve against the current slave record, flush
//! or park as a conflict, then move to the next batch until the master is
//! exhausted or the job is cancelled. Cancellation is cooperative and only
//! takes effect between batches, so counters always reflect whole batches.

use std::collections::HashSet;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::adapters::{Adapter, UpsertOutcome};
use crate::error::{Error, Result};
use crate::mapper::FieldMapper;
use crate::models::{
    record_key_string, CapturedRecord, Conflict, ConflictId, ConflictResolution, ConflictStatus,
    Datasource, JobId, JobStatus, Record, SyncConfig, SyncConfigId, SyncJob, TriggerSource,
};
use crate::resolver::{self, Resolution, ResolveContext, WebhookResolver};
use crate::settings::EngineSettings;
use crate::state::{Lease, StateStore};
use crate::store::{
    ConflictRepository, Database, DatasourceRepository, JobRepository, SyncConfigRepository,
};

/// Cooperative cancellation handle, checked between batches
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    /// A flag that has not been raised
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation was requested
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// The sync engine, bound to the durable store and the state store
pub struct SyncEngine<'a> {
    db: &'a Database,
    state: &'a StateStore,
    settings: EngineSettings,
}

impl<'a> SyncEngine<'a> {
    /// Build an engine over the given stores
    #[must_use]
    pub const fn new(db: &'a Database, state: &'a StateStore, settings: EngineSettings) -> Self {
        Self {
            db,
            state,
            settings,
        }
    }

    /// Create a pending job for a config
    pub async fn trigger(
        &self,
        config_id: &SyncConfigId,
        trigger: TriggerSource,
    ) -> Result<SyncJob> {
        let configs = SyncConfigRepository::new(self.db.conn());
        let config = configs
            .get(config_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Sync config {config_id}")))?;
        config.validate()?;

        let job = SyncJob::new(config.id, trigger);
        JobRepository::new(self.db.conn()).create(&job).await?;
        info!(job_id = %job.id, config = %config.name, "job created");
        Ok(job)
    }

    /// Run a pending job to a terminal state.
    ///
    /// Always returns the terminal job record; a job-level failure is
    /// reported through `JobStatus::Failed` plus `error_message`, not as an
    /// `Err` (those are reserved for the engine's own storage failing).
    pub async fn run_job(&self, job_id: &JobId, cancel: &CancelFlag) -> Result<SyncJob> {
        let jobs = JobRepository::new(self.db.conn());
        let mut job = jobs
            .get(job_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Job {job_id}")))?;
        if job.status != JobStatus::Pending {
            return Err(Error::InvalidInput(format!(
                "Job {job_id} is {}, not pending",
                job.status
            )));
        }

        job.status = JobStatus::Running;
        job.started_at = Some(chrono::Utc::now().timestamp_millis());
        jobs.update(&job).await?;

        match self.execute(&mut job, cancel).await {
            Ok(()) => {}
            Err(e) => {
                warn!(job_id = %job.id, error = %e, "job failed");
                job.status = JobStatus::Failed;
                job.error_message = Some(e.to_string());
            }
        }

        // Expired captures are reconciled into the counters regardless of
        // how the run ended.
        let abandoned = self.state.reap_expired(&job.id).await?;
        if !abandoned.is_empty() {
            warn!(job_id = %job.id, count = abandoned.len(), "abandoned expired captures");
            job.counters.abandoned += abandoned.len() as u64;
        }

        job.finished_at = Some(chrono::Utc::now().timestamp_millis());
        jobs.update(&job).await?;

        if job.status == JobStatus::Completed {
            SyncConfigRepository::new(self.db.conn())
                .set_last_synced(&job.config_id, job.finished_at.unwrap_or_default())
                .await?;
        }

        info!(
            job_id = %job.id,
            status = %job.status,
            processed = job.counters.processed,
            inserted = job.counters.inserted,
            updated = job.counters.updated,
            conflicts = job.counters.conflicts,
            errors = job.counters.errors,
            "job finished"
        );
        Ok(job)
    }

    async fn execute(&self, job: &mut SyncJob, cancel: &CancelFlag) -> Result<()> {
        let run = self.prepare(job).await?;
        let jobs = JobRepository::new(self.db.conn());

        let total = self
            .bounded("count master records", run.master.count(&run.config.master_table, &run.config.master_filters))
            .await?;
        job.total_records = Some(total);
        jobs.update(job).await?;

        let mut offset = 0;
        let mut consecutive_errors = 0_u64;
        loop {
            if cancel.is_cancelled() {
                info!(job_id = %job.id, "cancelled at batch boundary");
                job.status = JobStatus::Cancelled;
                return Ok(());
            }

            let batch = self
                .with_retry("read master batch", || {
                    self.bounded(
                        "read master batch",
                        run.master.read_batch(
                            &run.config.master_table,
                            &run.config.master_filters,
                            run.config.batch_size,
                            offset,
                        ),
                    )
                })
                .await?;
            if batch.records.is_empty() {
                break;
            }
            let fetched = batch.records.len() as u64;
            debug!(job_id = %job.id, offset, fetched, "processing batch");

            for record in batch.records {
                job.counters.processed += 1;
                match self.process_record(job, &run, &record).await {
                    Ok(()) => consecutive_errors = 0,
                    Err(e) if e.is_per_record() => {
                        warn!(job_id = %job.id, error = %e, "record skipped");
                        job.counters.errors += 1;
                        consecutive_errors += 1;
                        if consecutive_errors >= self.settings.error_threshold {
                            return Err(Error::InvalidInput(format!(
                                "{consecutive_errors} consecutive record errors, last: {e}"
                            )));
                        }
                    }
                    Err(e) => return Err(e),
                }
            }

            jobs.update(job).await?;
            offset += fetched;
            if fetched < run.config.batch_size {
                break;
            }
        }

        if run.config.propagate_deletes {
            self.propagate_deletes(job, &run).await?;
        }

        job.status = JobStatus::Completed;
        Ok(())
    }

    async fn process_record(&self, job: &mut SyncJob, run: &RunContext, master: &Record) -> Result<()> {
        let candidate = run.mapper.map_record(master)?;
        let key_value = run.mapper.key_value(master)?;
        let record_key = record_key_string(key_value);

        self.state
            .capture(CapturedRecord::new(
                job.id,
                record_key.clone(),
                master.clone(),
                candidate.clone(),
                self.settings.capture_ttl_ms(),
            ))
            .await?;

        let slave_key = candidate.get(run.mapper.slave_key_column()).unwrap_or(key_value);
        let slave_record = self
            .with_retry("read slave record", || {
                self.bounded(
                    "read slave record",
                    run.slave
                        .read_by_key(&run.config.slave_table, run.mapper.slave_key_column(), slave_key),
                )
            })
            .await?;

        let ctx = ResolveContext {
            strategy: run.config.strategy,
            slave_modified_column: run.config.slave_modified_column.as_deref(),
            last_synced_at: run.config.last_synced_at,
            webhook: run.webhook.as_ref(),
        };
        let resolution =
            resolver::resolve(&run.mapper, &candidate, slave_record.as_ref(), &ctx).await?;

        match resolution {
            Resolution::Write(record) => {
                let outcome = match self
                    .with_retry("write slave record", || {
                        self.bounded(
                            "write slave record",
                            run.slave.upsert(
                                &run.config.slave_table,
                                run.mapper.slave_key_column(),
                                &record,
                            ),
                        )
                    })
                    .await
                {
                    Ok(outcome) => outcome,
                    // Exhausted retries on a transport error stay job-fatal.
                    Err(e) if e.is_retryable() => return Err(e),
                    Err(e) => {
                        self.state.remove(&job.id, &record_key).await?;
                        return Err(Error::WriteRejected(e.to_string()));
                    }
                };
                match outcome {
                    UpsertOutcome::Inserted => job.counters.inserted += 1,
                    UpsertOutcome::Updated => job.counters.updated += 1,
                }
                self.state.remove(&job.id, &record_key).await?;
            }
            Resolution::Noop => {
                self.state.remove(&job.id, &record_key).await?;
            }
            Resolution::Conflict(fields) => {
                let conflict = Conflict::new(
                    job.id,
                    record_key,
                    master.clone(),
                    slave_record.unwrap_or_default(),
                    fields,
                );
                ConflictRepository::new(self.db.conn())
                    .create(&conflict)
                    .await?;
                job.counters.conflicts += 1;
                // The captured record stays alive for the reviewer.
            }
        }
        Ok(())
    }

    /// Remove slave records whose keys no longer exist on the master
    async fn propagate_deletes(&self, job: &mut SyncJob, run: &RunContext) -> Result<()> {
        let master_keys = self
            .bounded(
                "list master keys",
                run.master.all_keys(
                    &run.config.master_table,
                    run.mapper.master_key_column(),
                    &run.config.master_filters,
                ),
            )
            .await?;
        let keep: HashSet<String> = master_keys.iter().map(record_key_string).collect();

        let slave_keys = self
            .bounded(
                "list slave keys",
                run.slave
                    .all_keys(&run.config.slave_table, run.mapper.slave_key_column(), &[]),
            )
            .await?;

        for key in slave_keys {
            if keep.contains(&record_key_string(&key)) {
                continue;
            }
            let removed = self
                .with_retry("delete slave record", || {
                    self.bounded(
                        "delete slave record",
                        run.slave
                            .delete(&run.config.slave_table, run.mapper.slave_key_column(), &key),
                    )
                })
                .await?;
            if removed {
                job.counters.deleted += 1;
            }
        }
        Ok(())
    }

    async fn prepare(&self, job: &SyncJob) -> Result<RunContext> {
        let configs = SyncConfigRepository::new(self.db.conn());
        let config = configs
            .get(&job.config_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Sync config {}", job.config_id)))?;
        config.validate()?;

        let datasources = DatasourceRepository::new(self.db.conn());
        let master_ds = self.load_datasource(&datasources, &config.master_datasource_id).await?;
        let slave_ds = self.load_datasource(&datasources, &config.slave_datasource_id).await?;

        let mapper = FieldMapper::compile(&config.field_mappings)?;
        let webhook = config
            .webhook_url
            .as_deref()
            .map(|url| WebhookResolver::new(url, self.settings.webhook_timeout));

        let master = self
            .with_retry("connect master", || Adapter::connect(&master_ds))
            .await?;
        let slave = self
            .with_retry("connect slave", || Adapter::connect(&slave_ds))
            .await?;

        Ok(RunContext {
            config,
            mapper,
            master,
            slave,
            webhook,
        })
    }

    async fn load_datasource(
        &self,
        repo: &DatasourceRepository<'_>,
        id: &crate::models::DatasourceId,
    ) -> Result<Datasource> {
        repo.get(id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Datasource {id}")))
    }

    /// Resolve a pending conflict and, unless skipped, flush exactly once.
    ///
    /// The winning record comes from the still-live captured state: master
    /// and merged resolutions need the mapped candidate, and a lease that
    /// expired before the reviewer acted surfaces as `StateExpired`.
    pub async fn resolve_conflict(
        &self,
        conflict_id: &ConflictId,
        resolution: ConflictResolution,
        merged_data: Option<Record>,
    ) -> Result<Conflict> {
        let conflicts = ConflictRepository::new(self.db.conn());
        let conflict = conflicts
            .get(conflict_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Conflict {conflict_id}")))?;
        if conflict.status.is_terminal() {
            return Err(Error::AlreadyResolved(conflict_id.as_str()));
        }

        // Determine what would be flushed before transitioning, so an
        // expired lease leaves the conflict pending and reviewable again
        // after a fresh sync.
        let write = match resolution {
            ConflictResolution::Skipped => None,
            ConflictResolution::Slave => Some(conflict.slave_data.clone()),
            ConflictResolution::Merged => merged_data.clone(),
            ConflictResolution::Source => {
                match self.state.get(&conflict.job_id, &conflict.record_key).await? {
                    Lease::Live(captured) => Some(captured.candidate_record),
                    Lease::Expired(_) | Lease::Missing => {
                        return Err(Error::StateExpired(format!(
                            "Captured record {}:{} is no longer available",
                            conflict.job_id, conflict.record_key
                        )))
                    }
                }
            }
        };

        // Connect before transitioning so an unreachable slave does not
        // strand the conflict in a terminal state with nothing written.
        let flush_target = if write.is_some() {
            Some(self.slave_adapter_for(&conflict.job_id).await?)
        } else {
            None
        };

        // Atomic pending -> terminal transition; losers get AlreadyResolved.
        // Only a merged resolution carries reviewer data.
        let merged_for_store = if resolution == ConflictResolution::Merged {
            merged_data.as_ref()
        } else {
            None
        };
        let resolved = conflicts
            .resolve(conflict_id, resolution, merged_for_store)
            .await?;

        if let (Some(record), Some((adapter, config, mapper))) = (write, flush_target) {
            let flushed = self
                .bounded(
                    "flush resolved record",
                    adapter.upsert(&config.slave_table, mapper.slave_key_column(), &record),
                )
                .await;
            if let Err(e) = flushed {
                // Compensate: the resolution is only real once the slave
                // accepted the write, so put the conflict back for review.
                warn!(conflict_id = %conflict_id, error = %e, "resolution flush failed, reopening");
                conflicts.reopen(conflict_id).await?;
                return Err(e);
            }
        }

        self.state
            .remove(&conflict.job_id, &conflict.record_key)
            .await?;
        info!(conflict_id = %conflict_id, status = %resolved.status, "conflict resolved");
        Ok(resolved)
    }

    /// Re-arm the captured record behind a conflict, called on reviewer
    /// touches so state does not expire mid-review
    pub async fn touch_conflict(&self, conflict: &Conflict) -> Result<bool> {
        if conflict.status != ConflictStatus::Pending {
            return Ok(false);
        }
        self.state
            .touch(
                &conflict.job_id,
                &conflict.record_key,
                self.settings.capture_ttl_ms(),
            )
            .await
    }

    async fn slave_adapter_for(&self, job_id: &JobId) -> Result<(Adapter, SyncConfig, FieldMapper)> {
        let jobs = JobRepository::new(self.db.conn());
        let job = jobs
            .get(job_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Job {job_id}")))?;
        let config = SyncConfigRepository::new(self.db.conn())
            .get(&job.config_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Sync config {}", job.config_id)))?;
        let datasources = DatasourceRepository::new(self.db.conn());
        let slave_ds = self.load_datasource(&datasources, &config.slave_datasource_id).await?;
        let adapter = self
            .with_retry("connect slave", || Adapter::connect(&slave_ds))
            .await?;
        let mapper = FieldMapper::compile(&config.field_mappings)?;
        Ok((adapter, config, mapper))
    }

    /// Bound an adapter or state-store call with the operation timeout
    async fn bounded<T>(
        &self,
        what: &str,
        fut: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        match tokio::time::timeout(self.settings.operation_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout(what.to_string())),
        }
    }

    /// Retry retryable failures with exponential backoff
    async fn with_retry<T, F, Fut>(&self, what: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt < self.settings.max_retries => {
                    let delay = self.settings.backoff_delay(attempt);
                    warn!(operation = what, attempt, error = %e, delay_ms = delay.as_millis() as u64, "retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Everything a running job needs, resolved once at start
struct RunContext {
    config: SyncConfig,
    mapper: FieldMapper,
    master: Adapter,
    slave: Adapter,
    webhook: Option<WebhookResolver>,
}

/// Convenience: trigger and run a job in one call, used by the CLI
pub async fn run_once(
    db: &Database,
    state: &StateStore,
    settings: EngineSettings,
    config_id: &SyncConfigId,
    trigger: TriggerSource,
) -> Result<SyncJob> {
    let engine = SyncEngine::new(db, state, settings);
    let job = engine.trigger(config_id, trigger).await?;
    engine.run_job(&job.id, &CancelFlag::new()).await
}
