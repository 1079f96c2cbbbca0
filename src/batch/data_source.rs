//! # Batch Data Sources
//!
//! Where a batch job's items come from. Two shapes are supported: an
//! external paged source (count plus offset/limit fetch, typically backed
//! by a remote service) and a finite in-memory sequence paged by slicing.
//! The closed enum makes any other shape unrepresentable, so the shape
//! check the engine would otherwise need simply does not exist.

use crate::error::{CoreError, Result};
use async_trait::async_trait;
use std::sync::Arc;

/// External source exposing a total count and offset/limit pages.
#[async_trait]
pub trait PagedDataSource<T>: Send + Sync {
    /// Total number of items the job will process.
    async fn total_count(&self) -> anyhow::Result<u64>;

    /// Fetch the items in `[offset, offset + limit)`. A short or empty
    /// page past the end is valid.
    async fn fetch_batch(&self, offset: u64, limit: usize) -> anyhow::Result<Vec<T>>;
}

/// The two item-source shapes a batch job accepts.
pub enum DataSource<T> {
    /// Count + offset/limit queries against an external collaborator
    Paged(Arc<dyn PagedDataSource<T>>),
    /// Finite sequence already in memory, paged via slicing
    InMemory(Arc<Vec<T>>),
}

impl<T> Clone for DataSource<T> {
    fn clone(&self) -> Self {
        match self {
            Self::Paged(source) => Self::Paged(Arc::clone(source)),
            Self::InMemory(items) => Self::InMemory(Arc::clone(items)),
        }
    }
}

impl<T> DataSource<T> {
    pub fn paged(source: Arc<dyn PagedDataSource<T>>) -> Self {
        Self::Paged(source)
    }

    pub fn in_memory(items: Vec<T>) -> Self {
        Self::InMemory(Arc::new(items))
    }
}

impl<T: Clone + Send + Sync> DataSource<T> {
    pub(crate) async fn total_count(&self) -> Result<u64> {
        match self {
            Self::Paged(source) => source
                .total_count()
                .await
                .map_err(|e| CoreError::DataSource(e.to_string())),
            Self::InMemory(items) => Ok(items.len() as u64),
        }
    }

    pub(crate) async fn fetch_batch(&self, offset: u64, limit: usize) -> Result<Vec<T>> {
        match self {
            Self::Paged(source) => source
                .fetch_batch(offset, limit)
                .await
                .map_err(|e| CoreError::DataSource(e.to_string())),
            Self::InMemory(items) => {
                let start = (offset as usize).min(items.len());
                let end = start.saturating_add(limit).min(items.len());
                Ok(items[start..end].to_vec())
            }
        }
    }
}
