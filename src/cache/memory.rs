use std::sync::{Arc, Weak};
use std::time::Duration;

use dashmap::DashMap;
use tracing::debug;

use super::{CacheEntry, CacheError, CacheStore};
use crate::handler::BoxFuture;

/// Process-local store. Expired entries are evicted when read and by a
/// periodic sweep (see [`spawn_sweeper`](MemoryCache::spawn_sweeper)).
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: DashMap<String, CacheEntry>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Removes every expired entry, read or not. Returns how many went.
    pub fn cleanup_expired(&self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, e| !e.is_expired());
        before.saturating_sub(self.entries.len())
    }

    /// Sweeps expired entries every `every` on the current runtime. The task
    /// holds only a weak reference and ends once the cache is dropped.
    pub fn spawn_sweeper(self: &Arc<Self>, every: Duration) -> tokio::task::JoinHandle<()> {
        let cache: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(every);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick completes immediately.
            tick.tick().await;
            loop {
                tick.tick().await;
                let Some(cache) = cache.upgrade() else { break };
                let removed = cache.cleanup_expired();
                if removed > 0 {
                    debug!(removed, remaining = cache.len(), "swept expired entries");
                }
            }
        })
    }

    fn lookup(&self, key: &str) -> Option<CacheEntry> {
        let entry = self.entries.get(key)?;
        if entry.is_expired() {
            // Release the shard read lock before taking the write lock.
            drop(entry);
            self.entries.remove_if(key, |_, e| e.is_expired());
            debug!(key, "evicted expired entry");
            return None;
        }
        Some(entry.clone())
    }
}

impl CacheStore for MemoryCache {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<CacheEntry>, CacheError>> {
        Box::pin(async move { Ok(self.lookup(key)) })
    }

    fn set<'a>(&'a self, key: &'a str, entry: CacheEntry) -> BoxFuture<'a, Result<(), CacheError>> {
        Box::pin(async move {
            self.entries.insert(key.to_owned(), entry);
            Ok(())
        })
    }

    fn ping(&self) -> BoxFuture<'_, Result<(), CacheError>> {
        Box::pin(async { Ok(()) })
    }
}
