#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Mercato Core Rust
//!
//! High-performance Rust implementation of the batch-processing and
//! job-scheduling core of the Mercato commerce backend.
//!
//! ## Overview
//!
//! The crate walks large, possibly external data sources in bounded-size
//! pages under a concurrency cap, retries failed items with exponential
//! backoff, reports durable progress to a key-value store, and schedules
//! both recurring and one-time work - including work whose trigger time is
//! computed from live business entities (event start times, coupon expiry).
//!
//! ## Module Organization
//!
//! - [`sync`] - FIFO counting semaphore bounding in-flight batches
//! - [`batch`] - the batch engine: data sources, per-item retry, progress
//! - [`scheduler`] - recurring tasks, one-time timers, and the manager
//! - [`registry`] - typed job-type to handler dispatch
//! - [`services`] - capability contracts for the domain collaborators
//! - [`store`] - durable progress snapshot boundary
//! - [`config`] - engine configuration with environment overrides
//! - [`error`] - structured error handling
//! - [`logging`] - environment-aware structured logging
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use mercato_core::{BatchJobConfig, BatchProcessor, DataSource, ItemProcessor};
//! use mercato_core::store::InMemoryProgressStore;
//! use std::sync::Arc;
//!
//! struct Reindex;
//!
//! #[async_trait::async_trait]
//! impl ItemProcessor<u64> for Reindex {
//!     async fn process(&self, item: &u64) -> anyhow::Result<()> {
//!         println!("reindexing record {item}");
//!         Ok(())
//!     }
//! }
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let processor = BatchProcessor::new(Arc::new(InMemoryProgressStore::new()));
//! let config = BatchJobConfig::new(
//!     "reindex-2024-06",
//!     "reindex",
//!     DataSource::in_memory((0..2500u64).collect()),
//!     Arc::new(Reindex),
//! )
//! .with_batch_size(1000)
//! .with_max_concurrency(2);
//!
//! let instance = processor.execute_batch_job(config).await?;
//! println!("processed {} items", instance.processed_items);
//! # Ok(())
//! # }
//! ```
//!
//! ## Concurrency Model
//!
//! One cooperative event loop owns all work; shared mutable state (the
//! live-run registry, per-job counters, semaphore queues, the one-time
//! registry) is mutex-protected so every component stays correct on a
//! multi-threaded runtime. Cancellation is cooperative: in-flight batches
//! drain, further bookkeeping stops.

pub mod batch;
pub mod config;
pub mod constants;
pub mod error;
pub mod logging;
pub mod registry;
pub mod scheduler;
pub mod services;
pub mod store;
pub mod sync;

pub use batch::{
    BatchJobConfig, BatchProcessor, DataSource, ItemProcessor, JobCallbacks, JobInstance,
    JobStatus, JobStatusReport, PagedDataSource, StatusSource,
};
pub use config::{BatchConfig, CoreConfig, RetryPolicy, SchedulerConfig};
pub use error::{CoreError, Result};
pub use registry::{BatchJobHandler, BatchRunOverrides, JobHandlerRegistry, JobType};
pub use scheduler::{
    CancelOutcome, OneTimeJobInfo, OneTimeJobQueue, OneTimeTask, RecurringScheduler,
    RecurringTask, ScheduledTaskInfo, SchedulerServices, SchedulingManager,
};
pub use services::{
    ActiveCoupon, CouponHolder, CouponsService, EventNotification, EventStatus, EventsService,
    Notification, NotificationService, UpcomingEvent,
};
pub use store::{InMemoryProgressStore, ProgressStore};
pub use sync::Semaphore;
