//! # Concurrency Primitives
//!
//! In-process concurrency control for the batch engine.

pub mod semaphore;

pub use semaphore::{OwnedSemaphorePermit, Semaphore, SemaphorePermit};
