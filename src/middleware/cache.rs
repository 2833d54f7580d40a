//! Cache-aside gateway.
//!
//! Wraps one handler call for a cached route:
//!
//! 1. Build the key from the caller, path and canonical query.
//! 2. Look it up, bounded by the cache timeout. A live entry is the response;
//!    the handler never runs. Errors, timeouts and stale entries are misses.
//! 3. On a miss, run the handler.
//! 4. If it answered 2xx with a non-empty body, attach a delivery hook. Once
//!    the connection has taken the full body, the hook stores exactly those
//!    bytes under the same key. Store failures are logged and dropped.
//!
//! Concurrent misses on one key both run the handler and both write; the
//! writes carry equivalent entries, so the last one wins harmlessly.

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use bytes::Bytes;
use tokio::runtime::Handle;
use tracing::{debug, warn};

use crate::cache::{CacheEntry, CacheStore, bounded, cache_key};
use crate::capture::DeliveryHook;
use crate::handler::BoxedHandler;
use crate::request::Request;
use crate::response::Response;
use crate::status::is_success;

/// Cache-aside wrapper around the handler of a cached route.
pub struct CacheGateway {
    store: Arc<dyn CacheStore>,
    ttl: Duration,
    timeout: Duration,
}

impl CacheGateway {
    pub fn new(store: Arc<dyn CacheStore>, ttl: Duration, timeout: Duration) -> Self {
        Self { store, ttl, timeout }
    }

    /// Serves `req` from cache or through `handler`. Requires an
    /// authenticated request.
    pub(crate) async fn serve(&self, req: Request, handler: &BoxedHandler) -> Response {
        let key = cache_key(req.user_id(), req.path(), req.query());

        if let Some(entry) = self.lookup(&key).await {
            debug!(key, status = entry.status, "cache hit");
            return Response::from_parts(entry.status, entry.content_type.as_deref(), entry.body);
        }

        let response = handler.call(req).await;

        if !is_success(response.status) || response.body.is_empty() {
            debug!(key, status = response.status, "response not cacheable");
            return response;
        }

        match self.populate_on_delivery(key, &response) {
            Some(hook) => response.on_delivered(hook),
            None => response,
        }
    }

    async fn lookup(&self, key: &str) -> Option<CacheEntry> {
        match bounded(self.timeout, self.store.get(key)).await {
            Ok(Some(entry)) if !entry.is_expired() && is_success(entry.status) => Some(entry),
            Ok(Some(_)) => {
                debug!(key, "stale cache entry ignored");
                None
            }
            Ok(None) => {
                debug!(key, "cache miss");
                None
            }
            Err(e) => {
                warn!(key, backend = self.store.name(), error = %e, "cache lookup failed, recomputing");
                None
            }
        }
    }

    fn populate_on_delivery(&self, key: String, response: &Response) -> Option<DeliveryHook> {
        let runtime = Handle::try_current().ok()?;
        let store = Arc::clone(&self.store);
        let status = response.status;
        let content_type = response.content_type().map(str::to_owned);
        let ttl = self.ttl;
        let timeout = self.timeout;

        Some(Box::new(move |body: Bytes| {
            if body.is_empty() {
                return;
            }
            runtime.spawn(async move {
                let entry = CacheEntry { status, content_type, body, stored_at: SystemTime::now(), ttl };
                match bounded(timeout, store.set(&key, entry)).await {
                    Ok(()) => debug!(key, "cache populated"),
                    Err(e) => warn!(key, error = %e, "cache write failed"),
                }
            });
        }))
    }
}
