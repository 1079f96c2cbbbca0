//! # Structured Error Handling
//!
//! Central error taxonomy for the batch-processing and scheduling core.
//! Configuration and dispatch problems fail fast; collaborator failures are
//! carried as messages so they can be persisted on the owning job record.

/// Errors surfaced by the batch engine and the scheduling layer.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// Invalid or unparsable configuration value
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// No live instance and no persisted snapshot for the requested job
    #[error("Job not found: {0}")]
    JobNotFound(String),

    /// Job type has no registered handler
    #[error("Unsupported job type: {0}")]
    UnsupportedJobType(String),

    /// Data source count or page fetch failed
    #[error("Data source error: {0}")]
    DataSource(String),

    /// Progress store read or write failed
    #[error("Store error: {0}")]
    Store(String),

    /// A batch job run ended in the failed state
    #[error("Batch job '{job_id}' failed: {message}")]
    BatchJobFailed { job_id: String, message: String },

    /// Recurring or one-time scheduling problem
    #[error("Scheduling error: {0}")]
    Scheduling(String),

    /// Lifecycle misuse (e.g. a spawned batch task panicked)
    #[error("Invalid state: {0}")]
    InvalidState(String),
}

pub type Result<T> = std::result::Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_formats() {
        let err = CoreError::UnsupportedJobType("mystery_job".to_string());
        assert_eq!(err.to_string(), "Unsupported job type: mystery_job");

        let err = CoreError::BatchJobFailed {
            job_id: "j1".to_string(),
            message: "page fetch failed".to_string(),
        };
        assert_eq!(err.to_string(), "Batch job 'j1' failed: page fetch failed");
    }
}
