//! Response cache stores.
//!
//! The gateway talks to a store through [`CacheStore`]. Two backends ship:
//!
//! | Backend | Scope | Notes |
//! |---|---|---|
//! | [`MemoryCache`] | this process | `DashMap`, TTL checked on read and swept |
//! | [`RedisCache`] | shared | hash per entry, TTL via `EXPIRE` |
//!
//! Every call may fail or stall independently of the request. Callers bound
//! them with a timeout and treat any failure as a miss.

mod memory;
mod redis;

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use bytes::Bytes;
use thiserror::Error;
use tracing::{info, warn};

use crate::config::{CacheBackendKind, CacheConfig};
use crate::handler::BoxFuture;
use crate::identity::UserId;

pub use self::memory::MemoryCache;
pub use self::redis::RedisCache;

/// A stored response.
#[derive(Clone, Debug, PartialEq)]
pub struct CacheEntry {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Bytes,
    pub stored_at: SystemTime,
    pub ttl: Duration,
}

impl CacheEntry {
    pub fn is_expired_at(&self, now: SystemTime) -> bool {
        match now.duration_since(self.stored_at) {
            Ok(age) => age >= self.ttl,
            // Stored "in the future" (clock skew between instances): trust it.
            Err(_) => false,
        }
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(SystemTime::now())
    }
}

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache call timed out after {0:?}")]
    Timeout(Duration),
    #[error("cache backend: {0}")]
    Backend(String),
    #[error("corrupt cache entry: {0}")]
    Corrupt(&'static str),
}

/// A key/value store for responses.
///
/// Implementations must be safe to call concurrently; a write to one key
/// is atomic with respect to reads of that key.
pub trait CacheStore: Send + Sync + 'static {
    /// Short backend name for logs and readiness.
    fn name(&self) -> &'static str;

    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<CacheEntry>, CacheError>>;

    fn set<'a>(&'a self, key: &'a str, entry: CacheEntry) -> BoxFuture<'a, Result<(), CacheError>>;

    /// Cheap liveness probe.
    fn ping(&self) -> BoxFuture<'_, Result<(), CacheError>>;
}

/// Runs one cache call, turning a stall past `limit` into
/// [`CacheError::Timeout`].
pub async fn bounded<T>(
    limit: Duration,
    call: impl Future<Output = Result<T, CacheError>>,
) -> Result<T, CacheError> {
    tokio::time::timeout(limit, call)
        .await
        .unwrap_or(Err(CacheError::Timeout(limit)))
}

/// Builds the cache key for a read by `user` of `path` with `query`.
///
/// Query pairs are sorted so `?b=2&a=1` and `?a=1&b=2` share an entry; empty
/// pairs (`&&`) are dropped. The user is part of the key: the same path
/// means a different resource for a different caller.
pub fn cache_key(user: UserId, path: &str, query: Option<&str>) -> String {
    let mut pairs: Vec<&str> = query
        .unwrap_or_default()
        .split('&')
        .filter(|p| !p.is_empty())
        .collect();
    pairs.sort_unstable();

    if pairs.is_empty() {
        format!("taskd:{user}:{path}")
    } else {
        format!("taskd:{user}:{path}?{}", pairs.join("&"))
    }
}

/// Builds the configured store, or `None` when caching is off.
///
/// A Redis backend that cannot be reached at startup is still returned: the
/// gateway degrades every call to a miss until Redis comes back.
pub async fn connect(config: &CacheConfig) -> Option<Arc<dyn CacheStore>> {
    if !config.enabled {
        info!("response caching disabled");
        return None;
    }

    match config.backend {
        CacheBackendKind::Memory => {
            info!(ttl_secs = config.ttl_secs, "response caching enabled (memory)");
            let store = Arc::new(MemoryCache::new());
            store.spawn_sweeper(config.ttl().max(Duration::from_secs(1)));
            Some(store)
        }
        CacheBackendKind::Redis => {
            let store = match RedisCache::connect(config) {
                Ok(store) => store,
                Err(e) => {
                    warn!(error = %e, "redis pool could not be created, caching disabled");
                    return None;
                }
            };
            match bounded(config.timeout(), store.ping()).await {
                Ok(()) => info!(url = %config.redis_url, "response caching enabled (redis)"),
                Err(e) => warn!(error = %e, "redis unavailable at startup, reads will recompute until it recovers"),
            }
            Some(Arc::new(store))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_canonicalizes_query_order() {
        let a = cache_key(UserId(1), "/tasks", Some("b=2&a=1"));
        let b = cache_key(UserId(1), "/tasks", Some("a=1&b=2"));
        assert_eq!(a, b);
        assert_eq!(a, "taskd:1:/tasks?a=1&b=2");
    }

    #[test]
    fn key_ignores_empty_pairs_and_empty_query() {
        assert_eq!(
            cache_key(UserId(1), "/tasks", Some("&x=1&&")),
            cache_key(UserId(1), "/tasks", Some("x=1")),
        );
        assert_eq!(
            cache_key(UserId(1), "/tasks", Some("")),
            cache_key(UserId(1), "/tasks", None),
        );
    }

    #[test]
    fn key_separates_resources_and_users() {
        let base = cache_key(UserId(1), "/tasks", Some("x=1"));
        assert_ne!(base, cache_key(UserId(1), "/tasks", Some("x=2")));
        assert_ne!(base, cache_key(UserId(1), "/tasks/1", Some("x=1")));
        assert_ne!(base, cache_key(UserId(2), "/tasks", Some("x=1")));
    }

    #[tokio::test(start_paused = true)]
    async fn bounded_call_times_out() {
        let limit = Duration::from_millis(10);
        let stalled = bounded(limit, std::future::pending::<Result<(), CacheError>>()).await;
        assert!(matches!(stalled, Err(CacheError::Timeout(d)) if d == limit));
        assert!(bounded(limit, async { Ok(1) }).await.is_ok());
    }

    #[tokio::test]
    async fn disabled_config_connects_nothing() {
        assert!(connect(&CacheConfig::default()).await.is_none());
    }

    #[tokio::test]
    async fn memory_backend_connects() {
        let config = CacheConfig { enabled: true, ..CacheConfig::default() };
        let store = connect(&config).await.unwrap();
        assert_eq!(store.name(), "memory");
        assert!(store.ping().await.is_ok());
    }

    #[test]
    fn entry_expiry_is_inclusive() {
        let stored_at = SystemTime::UNIX_EPOCH + Duration::from_secs(1_000);
        let entry = CacheEntry {
            status: 200,
            content_type: None,
            body: Bytes::from_static(b"x"),
            stored_at,
            ttl: Duration::from_secs(60),
        };
        assert!(!entry.is_expired_at(stored_at + Duration::from_secs(59)));
        assert!(entry.is_expired_at(stored_at + Duration::from_secs(60)));
        assert!(!entry.is_expired_at(stored_at - Duration::from_secs(5)));
    }
}
