//! # Scheduling Layer
//!
//! Recurring schedules, one-time timers, and the manager that ties both
//! to the batch engine.
//!
//! ## Core Components
//!
//! - [`SchedulingManager`]: registration, dispatch, cancellation, shutdown
//! - [`OneTimeJobQueue`]: min-heap of absolute-time one-shot jobs
//! - [`RecurringScheduler`]: interval-driven recurring tasks

pub mod manager;
pub mod recurring;
pub mod timer;

pub use manager::{CancelOutcome, SchedulerServices, SchedulingManager};
pub use recurring::{RecurringScheduler, RecurringTask, ScheduledTaskInfo};
pub use timer::{OneTimeJobInfo, OneTimeJobQueue, OneTimeTask};
