use std::collections::HashMap;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use deadpool_redis::{Pool, Runtime};
use ::redis::AsyncCommands;

use super::{CacheEntry, CacheError, CacheStore};
use crate::config::CacheConfig;
use crate::handler::BoxFuture;

const STATUS: &str = "status";
const CONTENT_TYPE: &str = "content_type";
const BODY: &str = "body";
const STORED_AT_MS: &str = "stored_at_ms";
const TTL_MS: &str = "ttl_ms";

/// Shared store backed by Redis.
///
/// Each entry is one hash (`status`, `content_type`, `body`, `stored_at_ms`,
/// `ttl_ms`) written together with its expiry in a single `MULTI` block, so
/// readers never see a body without its status or an entry without a TTL.
#[derive(Clone)]
pub struct RedisCache {
    pool: Pool,
}

impl RedisCache {
    /// Creates the connection pool. Does not connect; see [`CacheStore::ping`].
    pub fn connect(config: &CacheConfig) -> Result<Self, CacheError> {
        let mut redis_config = deadpool_redis::Config::from_url(&config.redis_url);
        let mut pool_config = deadpool_redis::PoolConfig::new(config.pool_size);
        pool_config.timeouts.wait = Some(config.timeout());
        pool_config.timeouts.create = Some(config.timeout());
        pool_config.timeouts.recycle = Some(config.timeout());
        redis_config.pool = Some(pool_config);

        let pool = redis_config
            .create_pool(Some(Runtime::Tokio1))
            .map_err(backend)?;
        Ok(Self { pool })
    }

    async fn connection(&self) -> Result<deadpool_redis::Connection, CacheError> {
        self.pool.get().await.map_err(backend)
    }
}

fn backend(e: impl std::fmt::Display) -> CacheError {
    CacheError::Backend(e.to_string())
}

fn millis_since_epoch(t: SystemTime) -> u64 {
    t.duration_since(UNIX_EPOCH).map(|d| d.as_millis() as u64).unwrap_or(0)
}

fn parse_number(fields: &HashMap<String, Vec<u8>>, name: &'static str) -> Result<u64, CacheError> {
    fields
        .get(name)
        .and_then(|raw| std::str::from_utf8(raw).ok())
        .and_then(|s| s.parse().ok())
        .ok_or(CacheError::Corrupt(name))
}

fn decode(mut fields: HashMap<String, Vec<u8>>) -> Result<CacheEntry, CacheError> {
    let status = u16::try_from(parse_number(&fields, STATUS)?)
        .map_err(|_| CacheError::Corrupt(STATUS))?;
    let stored_at = UNIX_EPOCH + Duration::from_millis(parse_number(&fields, STORED_AT_MS)?);
    let ttl = Duration::from_millis(parse_number(&fields, TTL_MS)?);
    let body = fields.remove(BODY).ok_or(CacheError::Corrupt(BODY))?;
    let content_type = match fields.remove(CONTENT_TYPE) {
        Some(raw) => Some(String::from_utf8(raw).map_err(|_| CacheError::Corrupt(CONTENT_TYPE))?),
        None => None,
    };
    Ok(CacheEntry { status, content_type, body: Bytes::from(body), stored_at, ttl })
}

fn encode(entry: &CacheEntry) -> Vec<(&'static str, Vec<u8>)> {
    let mut fields = vec![
        (STATUS, entry.status.to_string().into_bytes()),
        (BODY, entry.body.to_vec()),
        (STORED_AT_MS, millis_since_epoch(entry.stored_at).to_string().into_bytes()),
        (TTL_MS, (entry.ttl.as_millis() as u64).to_string().into_bytes()),
    ];
    if let Some(ct) = &entry.content_type {
        fields.push((CONTENT_TYPE, ct.clone().into_bytes()));
    }
    fields
}

impl CacheStore for RedisCache {
    fn name(&self) -> &'static str {
        "redis"
    }

    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<CacheEntry>, CacheError>> {
        Box::pin(async move {
            let mut conn = self.connection().await?;
            let fields: HashMap<String, Vec<u8>> = conn.hgetall(key).await.map_err(backend)?;
            if fields.is_empty() {
                return Ok(None);
            }
            decode(fields).map(Some)
        })
    }

    fn set<'a>(&'a self, key: &'a str, entry: CacheEntry) -> BoxFuture<'a, Result<(), CacheError>> {
        Box::pin(async move {
            let mut conn = self.connection().await?;
            // Redis rejects a zero expiry; round sub-millisecond TTLs up.
            let ttl_ms = (entry.ttl.as_millis() as i64).max(1);
            let (): () = ::redis::pipe()
                .atomic()
                .del(key)
                .ignore()
                .hset_multiple(key, &encode(&entry))
                .ignore()
                .pexpire(key, ttl_ms)
                .ignore()
                .query_async(&mut conn)
                .await
                .map_err(backend)?;
            Ok(())
        })
    }

    fn ping(&self) -> BoxFuture<'_, Result<(), CacheError>> {
        Box::pin(async move {
            let mut conn = self.connection().await?;
            let _: String = ::redis::cmd("PING").query_async(&mut conn).await.map_err(backend)?;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> CacheEntry {
        CacheEntry {
            status: 200,
            content_type: Some("application/json".into()),
            body: Bytes::from_static(br#"[{"id":1}]"#),
            stored_at: UNIX_EPOCH + Duration::from_millis(1_700_000_000_123),
            ttl: Duration::from_secs(60),
        }
    }

    fn as_map(fields: Vec<(&'static str, Vec<u8>)>) -> HashMap<String, Vec<u8>> {
        fields.into_iter().map(|(k, v)| (k.to_owned(), v)).collect()
    }

    #[test]
    fn hash_fields_decode_to_the_same_entry() {
        assert_eq!(decode(as_map(encode(&sample()))).unwrap(), sample());
    }

    #[test]
    fn missing_content_type_is_allowed() {
        let mut entry = sample();
        entry.content_type = None;
        assert_eq!(decode(as_map(encode(&entry))).unwrap().content_type, None);
    }

    #[test]
    fn missing_or_garbled_fields_are_corrupt() {
        let mut fields = as_map(encode(&sample()));
        fields.remove(BODY);
        assert!(matches!(decode(fields), Err(CacheError::Corrupt(BODY))));

        let mut fields = as_map(encode(&sample()));
        fields.insert(STATUS.into(), b"two hundred".to_vec());
        assert!(matches!(decode(fields), Err(CacheError::Corrupt(STATUS))));

        let mut fields = as_map(encode(&sample()));
        fields.insert(STATUS.into(), b"70000".to_vec());
        assert!(matches!(decode(fields), Err(CacheError::Corrupt(STATUS))));
    }

    #[test]
    fn pool_creation_does_not_connect() {
        let config = CacheConfig {
            redis_url: "redis://127.0.0.1:1".into(),
            ..CacheConfig::default()
        };
        assert!(RedisCache::connect(&config).is_ok());
    }
}
