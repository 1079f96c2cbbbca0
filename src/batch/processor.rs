//! # Batch Processor
//!
//! Drives one named batch job to completion: resolves the total item
//! count, pages through the data source with bounded parallelism, runs
//! every item of a page concurrently with per-item retry, aggregates the
//! counters, persists progress snapshots, and invokes lifecycle callbacks.
//!
//! Concurrency model: each page is one unit of admission for the job's
//! [`Semaphore`]; items inside an admitted page are not gated further.
//! Pages may finish in any order - only the counters are ordered, and they
//! only ever grow.

use crate::config::{BatchConfig, RetryPolicy};
use crate::constants::store_keys;
use crate::error::{CoreError, Result};
use crate::store::ProgressStore;
use crate::sync::Semaphore;
use dashmap::DashMap;
use futures::future::join_all;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::data_source::DataSource;
use super::types::{
    BatchJobConfig, ItemProcessor, JobCallbacks, JobInstance, JobStatus, ProgressCallback,
};

type SharedInstance = Arc<Mutex<JobInstance>>;

/// Where a status query found its answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusSource {
    /// The job is live in this process
    Live,
    /// Read back from the persisted snapshot
    Snapshot,
}

/// Result of [`BatchProcessor::get_job_status`].
#[derive(Debug, Clone)]
pub struct JobStatusReport {
    pub instance: JobInstance,
    pub source: StatusSource,
}

/// Executes batch jobs and owns the live-run registry.
///
/// One instance is constructed at process startup and shared by handle;
/// all of its state lives on the instance, so tests get isolation by
/// simply constructing their own.
pub struct BatchProcessor {
    /// Instance id used in structured log fields
    id: Uuid,
    running_jobs: DashMap<String, SharedInstance>,
    store: Arc<dyn ProgressStore>,
    snapshot_ttl: Duration,
}

impl BatchProcessor {
    pub fn new(store: Arc<dyn ProgressStore>) -> Self {
        Self::with_config(store, &BatchConfig::default())
    }

    pub fn with_config(store: Arc<dyn ProgressStore>, config: &BatchConfig) -> Self {
        let id = Uuid::new_v4();
        info!(processor_id = %id, snapshot_ttl_seconds = config.snapshot_ttl.as_secs(), "Creating BatchProcessor");
        Self {
            id,
            running_jobs: DashMap::new(),
            store,
            snapshot_ttl: config.snapshot_ttl,
        }
    }

    /// Run one batch job to a terminal state.
    ///
    /// Returns the final [`JobInstance`] on completion (or cancellation
    /// mid-run), or the batch-level error after the job was marked failed,
    /// persisted, and reported through `on_error`.
    pub async fn execute_batch_job<T>(&self, config: BatchJobConfig<T>) -> Result<JobInstance>
    where
        T: Clone + Send + Sync + 'static,
    {
        let BatchJobConfig {
            job_id,
            job_type,
            source,
            batch_size,
            max_concurrency,
            retry,
            processor,
            callbacks,
        } = config;

        info!(
            processor_id = %self.id,
            job_id = %job_id,
            job_type = %job_type,
            batch_size,
            max_concurrency,
            "🚀 Starting batch job"
        );

        let instance: SharedInstance = Arc::new(Mutex::new(JobInstance::new(
            job_id.clone(),
            job_type.clone(),
        )));
        self.running_jobs.insert(job_id.clone(), Arc::clone(&instance));

        let runtime = Arc::new(JobRuntime {
            job_id: job_id.clone(),
            source,
            processor,
            retry,
            instance: Arc::clone(&instance),
            store: Arc::clone(&self.store),
            snapshot_ttl: self.snapshot_ttl,
            on_progress: callbacks.on_progress.clone(),
        });

        match self
            .run_batches(&runtime, batch_size.max(1), max_concurrency.max(1))
            .await
        {
            Ok(()) => Ok(self.finish_job(&job_id, &instance, &callbacks).await),
            Err(err) => Err(self.fail_job(&job_id, &instance, &callbacks, err).await),
        }
    }

    /// Plan and launch the batch tasks, then wait for all of them.
    async fn run_batches<T>(
        &self,
        runtime: &Arc<JobRuntime<T>>,
        batch_size: usize,
        max_concurrency: usize,
    ) -> Result<()>
    where
        T: Clone + Send + Sync + 'static,
    {
        let total_items = runtime.source.total_count().await?;
        {
            let mut instance = runtime.instance.lock();
            instance.total_items = total_items;
        }

        if total_items == 0 {
            debug!(job_id = %runtime.job_id, "Data source is empty, completing immediately");
            return Ok(());
        }

        let batches = total_items.div_ceil(batch_size as u64);
        debug!(
            job_id = %runtime.job_id,
            total_items,
            batches,
            batch_size,
            "Computed batch plan"
        );

        let semaphore = Arc::new(Semaphore::new(max_concurrency));
        let mut handles = Vec::with_capacity(batches as usize);
        for batch_index in 0..batches {
            let semaphore = Arc::clone(&semaphore);
            let runtime = Arc::clone(runtime);
            handles.push(tokio::spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                runtime.process_batch(batch_index, batch_size).await
            }));
        }

        // Every batch runs to its own conclusion before the job settles,
        // even when an earlier batch already failed.
        let mut first_error = None;
        for joined in join_all(handles).await {
            let outcome = match joined {
                Ok(outcome) => outcome,
                Err(join_err) => Err(CoreError::InvalidState(format!(
                    "batch task aborted: {join_err}"
                ))),
            };
            if let Err(err) = outcome {
                if first_error.is_none() {
                    first_error = Some(err);
                }
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Terminal bookkeeping for a run whose batches all returned.
    async fn finish_job(
        &self,
        job_id: &str,
        instance: &SharedInstance,
        callbacks: &JobCallbacks,
    ) -> JobInstance {
        let final_instance = {
            let mut inst = instance.lock();
            if inst.status == JobStatus::Running {
                inst.mark_completed();
            }
            inst.clone()
        };
        self.running_jobs.remove(job_id);

        if final_instance.status == JobStatus::Completed {
            self.persist_snapshot(&final_instance).await;
            if let Some(on_complete) = &callbacks.on_complete {
                on_complete(&final_instance);
            }
            info!(
                processor_id = %self.id,
                job_id = %job_id,
                processed_items = final_instance.processed_items,
                failed_items = final_instance.failed_items,
                duration_ms = final_instance.duration_ms,
                "✅ Batch job completed"
            );
        } else {
            // Cancelled mid-run: the cancellation already persisted the
            // terminal snapshot, nothing further to book.
            debug!(job_id = %job_id, status = %final_instance.status, "Batch job drained after cancellation");
        }
        final_instance
    }

    /// Terminal bookkeeping for a run aborted by a batch-level error.
    async fn fail_job(
        &self,
        job_id: &str,
        instance: &SharedInstance,
        callbacks: &JobCallbacks,
        err: CoreError,
    ) -> CoreError {
        let final_instance = {
            let mut inst = instance.lock();
            if inst.status == JobStatus::Running {
                inst.mark_failed(err.to_string());
                Some(inst.clone())
            } else {
                None
            }
        };
        self.running_jobs.remove(job_id);

        if let Some(final_instance) = final_instance {
            self.persist_snapshot(&final_instance).await;
            if let Some(on_error) = &callbacks.on_error {
                on_error(&final_instance, &err);
            }
            error!(
                processor_id = %self.id,
                job_id = %job_id,
                error = %err,
                "❌ Batch job failed"
            );
        }
        err
    }

    /// Live instance first, then the persisted snapshot.
    pub async fn get_job_status(&self, job_id: &str) -> Result<JobStatusReport> {
        if let Some(entry) = self.running_jobs.get(job_id) {
            return Ok(JobStatusReport {
                instance: entry.lock().clone(),
                source: StatusSource::Live,
            });
        }

        let key = store_keys::job_snapshot_key(job_id);
        let raw = self
            .store
            .get(&key)
            .await
            .map_err(|e| CoreError::Store(e.to_string()))?;
        match raw {
            Some(payload) => {
                let instance: JobInstance = serde_json::from_str(&payload)
                    .map_err(|e| CoreError::Store(format!("corrupt snapshot for '{job_id}': {e}")))?;
                Ok(JobStatusReport {
                    instance,
                    source: StatusSource::Snapshot,
                })
            }
            None => Err(CoreError::JobNotFound(job_id.to_string())),
        }
    }

    /// Snapshot list of every live run.
    pub fn get_running_jobs(&self) -> Vec<JobInstance> {
        self.running_jobs
            .iter()
            .map(|entry| entry.value().lock().clone())
            .collect()
    }

    /// Cancel a live run. In-flight batches drain without further
    /// bookkeeping; the job stops being reported as running immediately.
    pub async fn cancel_job(&self, job_id: &str) -> bool {
        let Some((_, instance)) = self.running_jobs.remove(job_id) else {
            return false;
        };

        let snapshot = {
            let mut inst = instance.lock();
            inst.mark_cancelled();
            inst.clone()
        };
        self.persist_snapshot(&snapshot).await;
        info!(processor_id = %self.id, job_id = %job_id, "🛑 Batch job cancelled");
        true
    }

    /// Terminal persists must not turn a settled job into an error; they
    /// are logged and dropped on failure.
    async fn persist_snapshot(&self, instance: &JobInstance) {
        if let Err(err) = persist(&*self.store, instance, self.snapshot_ttl).await {
            warn!(job_id = %instance.job_id, error = %err, "Failed to persist terminal snapshot");
        }
    }
}

/// Everything a spawned batch task needs, shared once per run.
struct JobRuntime<T> {
    job_id: String,
    source: DataSource<T>,
    processor: Arc<dyn ItemProcessor<T>>,
    retry: RetryPolicy,
    instance: SharedInstance,
    store: Arc<dyn ProgressStore>,
    snapshot_ttl: Duration,
    on_progress: Option<ProgressCallback>,
}

impl<T: Clone + Send + Sync + 'static> JobRuntime<T> {
    /// Fetch and process one page. Item failures are absorbed into the
    /// counters; an error from the page fetch itself aborts the job.
    async fn process_batch(&self, batch_index: u64, batch_size: usize) -> Result<()> {
        let offset = batch_index * batch_size as u64;
        let items = self.source.fetch_batch(offset, batch_size).await?;
        if items.is_empty() {
            return Ok(());
        }

        debug!(
            job_id = %self.job_id,
            batch_index,
            offset,
            item_count = items.len(),
            "Processing batch"
        );

        let outcomes = join_all(
            items
                .iter()
                .map(|item| self.process_item_with_retry(item)),
        )
        .await;
        let processed = outcomes.iter().filter(|outcome| outcome.is_ok()).count() as u64;
        let failed = outcomes.len() as u64 - processed;

        // Bookkeeping stops once the job has left the running state
        // (cooperative cancellation).
        let snapshot = {
            let mut instance = self.instance.lock();
            if instance.status != JobStatus::Running {
                debug!(job_id = %self.job_id, batch_index, "Skipping bookkeeping for non-running job");
                return Ok(());
            }
            instance.record_page(processed, failed);
            instance.clone()
        };

        if failed > 0 {
            warn!(
                job_id = %self.job_id,
                batch_index,
                failed,
                "Batch finished with item failures"
            );
        }
        if let Some(on_progress) = &self.on_progress {
            on_progress(&snapshot);
        }
        persist(&*self.store, &snapshot, self.snapshot_ttl).await
    }

    /// Try one item up to the configured number of attempts, backing off
    /// exponentially between tries. The last error becomes the item's
    /// failure; it never aborts the page.
    async fn process_item_with_retry(&self, item: &T) -> std::result::Result<(), anyhow::Error> {
        let attempts = self.retry.attempts.max(1);
        let mut last_error = None;
        for attempt in 1..=attempts {
            match self.processor.process(item).await {
                Ok(()) => return Ok(()),
                Err(err) => {
                    if attempt < attempts {
                        let delay = self.retry.delay_after_attempt(attempt);
                        debug!(
                            job_id = %self.job_id,
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            error = %err,
                            "Item processing failed, backing off before retry"
                        );
                        tokio::time::sleep(delay).await;
                    }
                    last_error = Some(err);
                }
            }
        }
        Err(last_error.unwrap_or_else(|| anyhow::anyhow!("item processing failed")))
    }
}

async fn persist(store: &dyn ProgressStore, instance: &JobInstance, ttl: Duration) -> Result<()> {
    let key = store_keys::job_snapshot_key(&instance.job_id);
    let payload = serde_json::to_string(instance)
        .map_err(|e| CoreError::Store(format!("snapshot serialization failed: {e}")))?;
    store
        .set_with_expiry(&key, payload, ttl)
        .await
        .map_err(|e| CoreError::Store(e.to_string()))
}
