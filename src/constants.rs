//! # System Constants
//!
//! Operational defaults and persisted-key layout for the batch engine.
//! Runtime overrides live in [`crate::config`]; these are the values the
//! engine falls back to when nothing else is specified.

/// Default sizing and retry parameters for batch job execution
pub mod defaults {
    /// Items per page fetched from a data source
    pub const BATCH_SIZE: usize = 1000;
    /// Concurrently processed batches per job
    pub const MAX_CONCURRENCY: usize = 5;
    /// Attempts per item before it is counted as failed
    pub const RETRY_ATTEMPTS: u32 = 3;
    /// Backoff before the second attempt; doubles per further attempt
    pub const RETRY_BASE_DELAY_MS: u64 = 1000;
    /// Exponential backoff growth factor
    pub const BACKOFF_MULTIPLIER: f64 = 2.0;
    /// Retention window for persisted progress snapshots
    pub const SNAPSHOT_TTL_SECONDS: u64 = 24 * 60 * 60;
    /// Cadence for recurring batch-job schedules armed at initialization
    pub const RECURRING_INTERVAL_SECONDS: u64 = 24 * 60 * 60;
    /// How far before an event's start its notification fires
    pub const EVENT_START_LEAD_SECONDS: u64 = 60 * 60;
    /// How far before a coupon's expiry its reminder fires
    pub const COUPON_EXPIRY_LEAD_SECONDS: u64 = 24 * 60 * 60;
}

/// Key layout for the external progress store
pub mod store_keys {
    /// Prefix for per-job progress snapshots
    pub const JOB_SNAPSHOT_PREFIX: &str = "jobs:batch:";

    /// Store key holding the snapshot for `job_id`
    pub fn job_snapshot_key(job_id: &str) -> String {
        format!("{JOB_SNAPSHOT_PREFIX}{job_id}")
    }
}
