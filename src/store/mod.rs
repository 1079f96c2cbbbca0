//! # Progress Snapshot Store
//!
//! Key-value boundary for durable progress reporting. The engine only ever
//! writes whole-record overwrites keyed by job id, so last-writer-wins is
//! the intended semantics and any multi-writer-safe store qualifies.
//!
//! [`InMemoryProgressStore`] is the in-process implementation used by tests
//! and single-node deployments; production embeds a shared cache behind the
//! same trait.

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// Durable store for per-job progress snapshots.
#[async_trait]
pub trait ProgressStore: Send + Sync {
    /// Overwrite `key` with `value`, expiring after `ttl`.
    async fn set_with_expiry(&self, key: &str, value: String, ttl: Duration) -> anyhow::Result<()>;

    /// Read `key`, or `None` when absent or expired.
    async fn get(&self, key: &str) -> anyhow::Result<Option<String>>;
}

#[derive(Debug, Clone)]
struct StoredValue {
    value: String,
    expires_at: Instant,
}

/// In-memory store with per-entry TTL and lazy eviction on read.
#[derive(Clone, Default)]
pub struct InMemoryProgressStore {
    entries: Arc<DashMap<String, StoredValue>>,
}

impl InMemoryProgressStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a background sweep removing expired entries once a minute.
    ///
    /// Lazy eviction already keeps reads correct; the sweep only bounds
    /// memory for keys nobody reads again.
    pub fn start_ttl_cleanup(&self) -> tokio::task::JoinHandle<()> {
        let entries = Arc::clone(&self.entries);
        tokio::spawn(async move {
            let mut cleanup_interval = tokio::time::interval(Duration::from_secs(60));
            loop {
                cleanup_interval.tick().await;

                let now = Instant::now();
                let expired: Vec<String> = entries
                    .iter()
                    .filter(|entry| entry.value().expires_at <= now)
                    .map(|entry| entry.key().clone())
                    .collect();

                if !expired.is_empty() {
                    debug!(count = expired.len(), "Cleaning up expired snapshots");
                    for key in expired {
                        entries.remove(&key);
                    }
                }
            }
        })
    }

    /// Number of live (possibly expired, not yet evicted) entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl ProgressStore for InMemoryProgressStore {
    async fn set_with_expiry(&self, key: &str, value: String, ttl: Duration) -> anyhow::Result<()> {
        self.entries.insert(
            key.to_string(),
            StoredValue {
                value,
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
        let expired = match self.entries.get(key) {
            Some(entry) if entry.expires_at <= Instant::now() => true,
            Some(entry) => return Ok(Some(entry.value.clone())),
            None => return Ok(None),
        };
        if expired {
            self.entries.remove(key);
        }
        Ok(None)
    }
}
