//! # Batch Job Types
//!
//! Lifecycle states, the mutable per-run job record, and the configuration
//! callers hand to [`crate::BatchProcessor::execute_batch_job`].

use crate::config::RetryPolicy;
use crate::constants::defaults;
use crate::error::CoreError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use super::data_source::DataSource;

/// Lifecycle states of one batch job run.
///
/// Transitions are monotonic: `Running` moves to exactly one of the
/// terminal states, with `Cancelled` allowed to pre-empt a run in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Job is currently being executed
    Running,
    /// All batches finished and every item was accounted for
    Completed,
    /// A batch-level error aborted the run
    Failed,
    /// The run was cancelled by an operator
    Cancelled,
}

impl JobStatus {
    /// Check if this is a terminal state (no further transitions allowed)
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Check if the job is live and still doing bookkeeping
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Running)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl std::str::FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            _ => Err(format!("Invalid job status: {s}")),
        }
    }
}

/// Mutable record of one batch job run.
///
/// Owned by the processor while the job is live, then handed to callbacks
/// and mirrored into the progress store as a whole-record JSON overwrite.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobInstance {
    pub job_id: String,
    pub job_type: String,
    pub status: JobStatus,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    /// Wall-clock run time, set at the terminal transition
    pub duration_ms: Option<u64>,
    pub total_items: u64,
    pub processed_items: u64,
    pub failed_items: u64,
    /// Integer percent, monotonically non-decreasing; 100 exactly when
    /// the status is `Completed`
    pub progress: u8,
    /// Failure message, set only on `Failed`
    pub error: Option<String>,
}

impl JobInstance {
    pub(crate) fn new(job_id: String, job_type: String) -> Self {
        Self {
            job_id,
            job_type,
            status: JobStatus::Running,
            start_time: Utc::now(),
            end_time: None,
            duration_ms: None,
            total_items: 0,
            processed_items: 0,
            failed_items: 0,
            progress: 0,
            error: None,
        }
    }

    /// Fold one finished page into the counters and refresh progress.
    pub(crate) fn record_page(&mut self, processed: u64, failed: u64) {
        self.processed_items += processed;
        self.failed_items += failed;
        self.recompute_progress();
    }

    /// Recompute the derived percentage. Capped at 99 while the job is
    /// live so that 100 remains reserved for the `Completed` transition,
    /// and clamped to never decrease.
    fn recompute_progress(&mut self) {
        if self.total_items == 0 {
            return;
        }
        let done = self.processed_items + self.failed_items;
        let percent = ((done as f64 / self.total_items as f64) * 100.0).round() as u8;
        let capped = percent.min(99);
        if capped > self.progress {
            self.progress = capped;
        }
    }

    pub(crate) fn mark_completed(&mut self) {
        self.status = JobStatus::Completed;
        self.progress = 100;
        self.finish();
    }

    pub(crate) fn mark_failed(&mut self, message: String) {
        self.status = JobStatus::Failed;
        self.error = Some(message);
        self.finish();
    }

    pub(crate) fn mark_cancelled(&mut self) {
        self.status = JobStatus::Cancelled;
        self.finish();
    }

    fn finish(&mut self) {
        let now = Utc::now();
        self.duration_ms = Some((now - self.start_time).num_milliseconds().max(0) as u64);
        self.end_time = Some(now);
    }
}

/// Processes one item of a batch. May fail; failures are retried with
/// exponential backoff and, once exhausted, counted against the job's
/// `failed_items` without aborting the page.
#[async_trait::async_trait]
pub trait ItemProcessor<T>: Send + Sync {
    async fn process(&self, item: &T) -> anyhow::Result<()>;
}

/// Callback invoked with a snapshot after each finished page.
pub type ProgressCallback = Arc<dyn Fn(&JobInstance) + Send + Sync>;
/// Callback invoked once with the final snapshot of a completed run.
pub type CompleteCallback = Arc<dyn Fn(&JobInstance) + Send + Sync>;
/// Callback invoked once with the final snapshot and error of a failed run.
pub type ErrorCallback = Arc<dyn Fn(&JobInstance, &CoreError) + Send + Sync>;

/// Optional lifecycle callbacks for one run.
#[derive(Clone, Default)]
pub struct JobCallbacks {
    pub on_progress: Option<ProgressCallback>,
    pub on_complete: Option<CompleteCallback>,
    pub on_error: Option<ErrorCallback>,
}

impl fmt::Debug for JobCallbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobCallbacks")
            .field("on_progress", &self.on_progress.is_some())
            .field("on_complete", &self.on_complete.is_some())
            .field("on_error", &self.on_error.is_some())
            .finish()
    }
}

/// Immutable configuration for one batch job run.
pub struct BatchJobConfig<T> {
    pub job_id: String,
    pub job_type: String,
    pub source: DataSource<T>,
    pub batch_size: usize,
    pub max_concurrency: usize,
    pub retry: RetryPolicy,
    pub processor: Arc<dyn ItemProcessor<T>>,
    pub callbacks: JobCallbacks,
}

impl<T> BatchJobConfig<T> {
    /// Configuration with engine defaults for sizing and retry.
    pub fn new(
        job_id: impl Into<String>,
        job_type: impl Into<String>,
        source: DataSource<T>,
        processor: Arc<dyn ItemProcessor<T>>,
    ) -> Self {
        Self {
            job_id: job_id.into(),
            job_type: job_type.into(),
            source,
            batch_size: defaults::BATCH_SIZE,
            max_concurrency: defaults::MAX_CONCURRENCY,
            retry: RetryPolicy::default(),
            processor,
            callbacks: JobCallbacks::default(),
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Shorthand for a retry policy with `attempts` tries and `base_delay`
    /// initial backoff.
    pub fn with_retry_attempts(mut self, attempts: u32, base_delay: Duration) -> Self {
        self.retry = RetryPolicy {
            attempts,
            base_delay,
            ..RetryPolicy::default()
        };
        self
    }

    pub fn on_progress(mut self, callback: ProgressCallback) -> Self {
        self.callbacks.on_progress = Some(callback);
        self
    }

    pub fn on_complete(mut self, callback: CompleteCallback) -> Self {
        self.callbacks.on_complete = Some(callback);
        self
    }

    pub fn on_error(mut self, callback: ErrorCallback) -> Self {
        self.callbacks.on_error = Some(callback);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_terminal_check() {
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(JobStatus::Cancelled.is_terminal());
        assert!(!JobStatus::Running.is_terminal());
    }

    #[test]
    fn test_status_string_conversion() {
        assert_eq!(JobStatus::Running.to_string(), "running");
        assert_eq!("completed".parse::<JobStatus>().unwrap(), JobStatus::Completed);
        assert!("done".parse::<JobStatus>().is_err());
    }

    #[test]
    fn test_status_serde() {
        let json = serde_json::to_string(&JobStatus::Cancelled).unwrap();
        assert_eq!(json, "\"cancelled\"");

        let parsed: JobStatus = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, JobStatus::Cancelled);
    }

    #[test]
    fn test_progress_is_capped_while_running() {
        let mut instance = JobInstance::new("j1".to_string(), "test".to_string());
        instance.total_items = 10;

        instance.record_page(5, 0);
        assert_eq!(instance.progress, 50);

        instance.record_page(4, 1);
        // All items are accounted for, but 100 is reserved for Completed.
        assert_eq!(instance.progress, 99);

        instance.mark_completed();
        assert_eq!(instance.progress, 100);
        assert_eq!(instance.status, JobStatus::Completed);
        assert!(instance.end_time.is_some());
        assert!(instance.duration_ms.is_some());
    }

    #[test]
    fn test_progress_never_decreases() {
        let mut instance = JobInstance::new("j1".to_string(), "test".to_string());
        instance.total_items = 4;

        instance.record_page(3, 0);
        let before = instance.progress;
        instance.record_page(0, 0);
        assert_eq!(instance.progress, before);
    }

    #[test]
    fn test_instance_snapshot_round_trip() {
        let mut instance = JobInstance::new("j1".to_string(), "points_expiry".to_string());
        instance.total_items = 100;
        instance.record_page(40, 10);

        let payload = serde_json::to_string(&instance).unwrap();
        let restored: JobInstance = serde_json::from_str(&payload).unwrap();
        assert_eq!(restored.job_id, "j1");
        assert_eq!(restored.processed_items, 40);
        assert_eq!(restored.failed_items, 10);
        assert_eq!(restored.progress, 50);
        assert_eq!(restored.status, JobStatus::Running);
    }

    #[test]
    fn test_failed_instance_carries_error() {
        let mut instance = JobInstance::new("j1".to_string(), "test".to_string());
        instance.mark_failed("count query timed out".to_string());
        assert_eq!(instance.status, JobStatus::Failed);
        assert_eq!(instance.error.as_deref(), Some("count query timed out"));
        assert_ne!(instance.progress, 100);
    }
}
