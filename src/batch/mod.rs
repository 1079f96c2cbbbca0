//! # Batch Processing Engine
//!
//! Generic engine that walks large, possibly external data sources in
//! bounded-size pages under a concurrency cap, retrying failed items with
//! exponential backoff and reporting durable progress.
//!
//! ## Core Components
//!
//! - [`BatchProcessor`]: runs one job to a terminal state and owns the
//!   live-run registry
//! - [`DataSource`] / [`PagedDataSource`]: where the items come from
//! - [`ItemProcessor`]: caller-supplied per-item work
//! - [`JobInstance`] / [`JobStatus`]: the per-run record and its lifecycle

pub mod data_source;
pub mod processor;
pub mod types;

pub use data_source::{DataSource, PagedDataSource};
pub use processor::{BatchProcessor, JobStatusReport, StatusSource};
pub use types::{
    BatchJobConfig, CompleteCallback, ErrorCallback, ItemProcessor, JobCallbacks, JobInstance,
    JobStatus, ProgressCallback,
};
