//! Response cache backed by Redis
//!
//! GET handlers store rendered JSON bodies here and writes invalidate them.
//! The cache is strictly best effort: when Redis is unreachable every call
//! degrades to a miss or a no-op and the request is served from Postgres.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use serde_json::Value;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::CacheConfig;
use crate::error::AppError;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);
/// After a failed connect, calls skip Redis for this long.
const RECONNECT_BACKOFF: Duration = Duration::from_secs(30);

/// Names of every cached response.
pub struct CacheKey;

impl CacheKey {
    pub const EVENTS_PAGES: &'static str = "events_list_page_*";
    pub const TICKETS: &'static str = "tickets_list";
    pub const TICKET_DETAILS: &'static str = "ticket_detail_*";
    pub const REGISTRATIONS: &'static str = "registrations_list";
    pub const REGISTRATION_DETAILS: &'static str = "registration_detail_*";
    pub const PAYMENTS: &'static str = "payments_list";
    pub const PAYMENT_DETAILS: &'static str = "payment_detail_*";

    pub fn events_page(page: i64) -> String {
        format!("events_list_page_{}", page)
    }

    pub fn event(id: Uuid) -> String {
        format!("event_detail_{}", id)
    }

    pub fn ticket(id: Uuid) -> String {
        format!("ticket_detail_{}", id)
    }

    pub fn registration(id: Uuid) -> String {
        format!("registration_detail_{}", id)
    }

    pub fn payment(id: Uuid) -> String {
        format!("payment_detail_{}", id)
    }
}

#[derive(Clone)]
pub struct ResponseCache {
    inner: Arc<CacheInner>,
}

struct CacheInner {
    client: Option<Client>,
    connection: OnceCell<ConnectionManager>,
    failed_at: Mutex<Option<Instant>>,
    prefix: String,
    ttl_seconds: u64,
}

impl ResponseCache {
    /// Parses the Redis URL; no connection is made until first use.
    pub fn new(config: &CacheConfig) -> Result<Self, AppError> {
        let client = if config.enabled {
            Some(Client::open(config.redis_url.as_str())?)
        } else {
            info!("Response cache disabled");
            None
        };

        Ok(Self {
            inner: Arc::new(CacheInner {
                client,
                connection: OnceCell::new(),
                failed_at: Mutex::new(None),
                prefix: config.prefix.clone(),
                ttl_seconds: config.ttl_seconds,
            }),
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.client.is_some()
    }

    fn full_key(&self, key: &str) -> String {
        format!("{}{}", self.inner.prefix, key)
    }

    fn in_backoff(&self) -> bool {
        match self.inner.failed_at.lock() {
            Ok(failed_at) => failed_at.is_some_and(|at| at.elapsed() < RECONNECT_BACKOFF),
            Err(_) => false,
        }
    }

    fn record_failure(&self) {
        if let Ok(mut failed_at) = self.inner.failed_at.lock() {
            *failed_at = Some(Instant::now());
        }
    }

    async fn connection(&self) -> Option<ConnectionManager> {
        let client = self.inner.client.as_ref()?;
        if let Some(connection) = self.inner.connection.get() {
            return Some(connection.clone());
        }
        if self.in_backoff() {
            debug!("Redis connect failed recently, bypassing cache");
            return None;
        }

        let result = self
            .inner
            .connection
            .get_or_try_init(|| async {
                match tokio::time::timeout(CONNECT_TIMEOUT, ConnectionManager::new(client.clone())).await {
                    Ok(connected) => connected.map_err(|e| e.to_string()),
                    Err(_) => Err("connection timed out".to_string()),
                }
            })
            .await;

        match result {
            Ok(connection) => Some(connection.clone()),
            Err(e) => {
                self.record_failure();
                warn!(
                    error = %e,
                    "Redis unavailable, bypassing cache for {}s",
                    RECONNECT_BACKOFF.as_secs()
                );
                None
            }
        }
    }

    pub async fn get(&self, key: &str) -> Option<Value> {
        let mut conn = self.connection().await?;
        let full_key = self.full_key(key);

        let raw: Option<String> = match conn.get(&full_key).await {
            Ok(raw) => raw,
            Err(e) => {
                warn!(key = %full_key, error = %e, "Cache read failed");
                return None;
            }
        };

        match raw {
            Some(data) => match serde_json::from_str(&data) {
                Ok(value) => {
                    debug!(key = %full_key, "Cache hit");
                    Some(value)
                }
                Err(e) => {
                    warn!(key = %full_key, error = %e, "Discarding unreadable cache entry");
                    None
                }
            },
            None => {
                debug!(key = %full_key, "Cache miss");
                None
            }
        }
    }

    pub async fn set(&self, key: &str, value: &Value) {
        let Some(mut conn) = self.connection().await else {
            return;
        };
        let full_key = self.full_key(key);
        let ttl = self.inner.ttl_seconds;

        let result: redis::RedisResult<()> = conn.set_ex(&full_key, value.to_string(), ttl).await;
        match result {
            Ok(()) => debug!(key = %full_key, ttl = ttl, "Cached response"),
            Err(e) => warn!(key = %full_key, error = %e, "Cache write failed"),
        }
    }

    pub async fn delete(&self, keys: &[String]) {
        if keys.is_empty() {
            return;
        }
        let Some(mut conn) = self.connection().await else {
            return;
        };
        let full_keys: Vec<String> = keys.iter().map(|key| self.full_key(key)).collect();

        let result: redis::RedisResult<u64> = conn.del(&full_keys).await;
        match result {
            Ok(deleted) => debug!(keys = ?full_keys, deleted = deleted, "Cache invalidated"),
            Err(e) => warn!(keys = ?full_keys, error = %e, "Cache invalidation failed"),
        }
    }

    /// Deletes every key matching a glob pattern (relative to the prefix).
    pub async fn delete_pattern(&self, pattern: &str) {
        let Some(mut conn) = self.connection().await else {
            return;
        };
        let full_pattern = self.full_key(pattern);

        let keys: Vec<String> = match conn.keys(&full_pattern).await {
            Ok(keys) => keys,
            Err(e) => {
                warn!(pattern = %full_pattern, error = %e, "Cache key scan failed");
                return;
            }
        };
        if keys.is_empty() {
            return;
        }

        let result: redis::RedisResult<u64> = conn.del(&keys).await;
        match result {
            Ok(deleted) => debug!(pattern = %full_pattern, deleted = deleted, "Cache invalidated by pattern"),
            Err(e) => warn!(pattern = %full_pattern, error = %e, "Cache invalidation failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn config(enabled: bool, redis_url: &str) -> CacheConfig {
        CacheConfig {
            enabled,
            redis_url: redis_url.to_string(),
            prefix: "test:".to_string(),
            ttl_seconds: 60,
        }
    }

    #[test]
    fn test_key_names() {
        let id = Uuid::nil();
        assert_eq!(CacheKey::events_page(3), "events_list_page_3");
        assert_eq!(CacheKey::event(id), format!("event_detail_{}", id));
        assert_eq!(CacheKey::ticket(id), format!("ticket_detail_{}", id));
        assert_eq!(CacheKey::registration(id), format!("registration_detail_{}", id));
        assert_eq!(CacheKey::payment(id), format!("payment_detail_{}", id));
    }

    #[test]
    fn test_prefixing() {
        let cache = ResponseCache::new(&config(false, "redis://localhost")).unwrap();
        assert_eq!(cache.full_key("tickets_list"), "test:tickets_list");
    }

    #[test]
    fn test_invalid_url_is_rejected() {
        assert!(ResponseCache::new(&config(true, "not a url")).is_err());
    }

    #[tokio::test]
    async fn test_disabled_cache_is_a_no_op() {
        let cache = ResponseCache::new(&config(false, "redis://localhost")).unwrap();
        assert!(!cache.is_enabled());

        cache.set("tickets_list", &json!({"tickets": []})).await;
        assert!(cache.get("tickets_list").await.is_none());
        cache.delete(&[CacheKey::TICKETS.to_string()]).await;
        cache.delete_pattern(CacheKey::EVENTS_PAGES).await;
    }

    #[tokio::test]
    async fn test_unreachable_redis_degrades_to_miss() {
        let cache = ResponseCache::new(&config(true, "redis://127.0.0.1:1/")).unwrap();
        assert!(cache.is_enabled());

        cache.set("tickets_list", &json!({"tickets": []})).await;
        assert!(cache.get("tickets_list").await.is_none());
    }

    #[tokio::test]
    async fn test_failed_connect_is_not_retried_on_every_call() {
        let cache = ResponseCache::new(&config(true, "redis://127.0.0.1:1/")).unwrap();
        assert!(!cache.in_backoff());

        assert!(cache.get("tickets_list").await.is_none());
        assert!(cache.in_backoff());

        let started = Instant::now();
        for _ in 0..20 {
            assert!(cache.get("tickets_list").await.is_none());
        }
        assert!(started.elapsed() < CONNECT_TIMEOUT);

        // Clones share the backoff.
        assert!(cache.clone().in_backoff());
    }
}
