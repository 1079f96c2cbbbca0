//! # Batch Job Handler Registry
//!
//! Maps the closed set of batch-job types to their handlers. The registry
//! is populated once at startup by [`crate::SchedulingManager::initialize`]
//! and resolved on every dispatch; unknown or unregistered types are a
//! typed error rather than a string-keyed lookup failure.
//!
//! ```
//! use mercato_core::registry::JobType;
//!
//! assert_eq!("points_expiry".parse::<JobType>().unwrap(), JobType::PointsExpiry);
//! assert_eq!(JobType::DailyDigest.to_string(), "daily_digest");
//! ```

use crate::batch::{BatchProcessor, JobInstance};
use crate::error::Result;
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{info, warn};

/// Closed set of batch-job classifications the scheduler can dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    /// Expire loyalty points past their validity window
    PointsExpiry,
    /// Assemble and send the daily notification digest
    DailyDigest,
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PointsExpiry => write!(f, "points_expiry"),
            Self::DailyDigest => write!(f, "daily_digest"),
        }
    }
}

impl std::str::FromStr for JobType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "points_expiry" => Ok(Self::PointsExpiry),
            "daily_digest" => Ok(Self::DailyDigest),
            _ => Err(format!("Invalid job type: {s}")),
        }
    }
}

/// Per-dispatch sizing overrides forwarded by operational tooling.
#[derive(Debug, Clone, Copy, Default)]
pub struct BatchRunOverrides {
    pub batch_size: Option<usize>,
    pub max_concurrency: Option<usize>,
    pub retry_attempts: Option<u32>,
}

/// One registered batch-job implementation.
///
/// Implementations live in the domain layer; they assemble a
/// [`crate::BatchJobConfig`] for their data and hand it to the processor.
#[async_trait]
pub trait BatchJobHandler: Send + Sync {
    /// The classification this handler serves.
    fn job_type(&self) -> JobType;

    /// Run the job to a terminal state on the given processor.
    async fn run(
        &self,
        processor: Arc<BatchProcessor>,
        overrides: BatchRunOverrides,
    ) -> Result<JobInstance>;
}

/// Thread-safe map from [`JobType`] to its handler.
#[derive(Default)]
pub struct JobHandlerRegistry {
    handlers: RwLock<HashMap<JobType, Arc<dyn BatchJobHandler>>>,
}

impl JobHandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler under its own job type. Re-registration replaces
    /// the previous handler and is logged.
    pub fn register(&self, handler: Arc<dyn BatchJobHandler>) {
        let job_type = handler.job_type();
        let previous = self.handlers.write().insert(job_type, handler);
        if previous.is_some() {
            warn!(job_type = %job_type, "Replacing previously registered batch job handler");
        } else {
            info!(job_type = %job_type, "Registered batch job handler");
        }
    }

    pub fn resolve(&self, job_type: JobType) -> Option<Arc<dyn BatchJobHandler>> {
        self.handlers.read().get(&job_type).cloned()
    }

    pub fn registered_types(&self) -> Vec<JobType> {
        self.handlers.read().keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.handlers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoopHandler(JobType);

    #[async_trait]
    impl BatchJobHandler for NoopHandler {
        fn job_type(&self) -> JobType {
            self.0
        }

        async fn run(
            &self,
            _processor: Arc<BatchProcessor>,
            _overrides: BatchRunOverrides,
        ) -> Result<JobInstance> {
            unimplemented!("not dispatched in registry tests")
        }
    }

    #[test]
    fn test_register_and_resolve() {
        let registry = JobHandlerRegistry::new();
        assert!(registry.is_empty());

        registry.register(Arc::new(NoopHandler(JobType::PointsExpiry)));
        assert_eq!(registry.len(), 1);
        assert!(registry.resolve(JobType::PointsExpiry).is_some());
        assert!(registry.resolve(JobType::DailyDigest).is_none());
    }

    #[test]
    fn test_re_registration_replaces() {
        let registry = JobHandlerRegistry::new();
        registry.register(Arc::new(NoopHandler(JobType::DailyDigest)));
        registry.register(Arc::new(NoopHandler(JobType::DailyDigest)));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_job_type_serde() {
        let json = serde_json::to_string(&JobType::PointsExpiry).unwrap();
        assert_eq!(json, "\"points_expiry\"");
        assert!("reindex_everything".parse::<JobType>().is_err());
    }
}
