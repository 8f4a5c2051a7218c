//! Redis-backed lookaside cache and atomic expiring counters.
//!
//! Cached code records are hints with a bounded staleness window (the
//! configured TTL); the Postgres store stays authoritative. Counters are
//! incremented and given their expiry in one atomic pipeline so concurrent
//! requests never undercount.

use async_trait::async_trait;
use redis::{aio::ConnectionManager, Client};
use secrecy::ExposeSecret;

use crate::config::RedisConfig;

#[async_trait]
pub trait VerificationCache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, anyhow::Error>;
    async fn set(&self, key: &str, value: &str, ttl_seconds: u64) -> Result<(), anyhow::Error>;
    async fn delete(&self, key: &str) -> Result<(), anyhow::Error>;
    /// Atomically increment `key` and, if it is new, start its expiry
    /// window. Returns the post-increment count.
    async fn incr_window(&self, key: &str, window_seconds: u64) -> Result<u64, anyhow::Error>;
    async fn health_check(&self) -> Result<(), anyhow::Error>;
}

#[derive(Clone)]
pub struct RedisCache {
    _client: Client,
    manager: ConnectionManager,
}

impl RedisCache {
    pub async fn new(config: &RedisConfig) -> Result<Self, anyhow::Error> {
        tracing::info!("Connecting to Redis");
        let client = Client::open(config.url.expose_secret().as_str())?;

        // ConnectionManager reconnects automatically.
        let manager = client.get_connection_manager().await.map_err(|e| {
            tracing::error!("Failed to get Redis connection manager: {}", e);
            anyhow::anyhow!("Failed to connect to Redis: {}", e)
        })?;

        tracing::info!("Successfully connected to Redis");

        Ok(Self {
            _client: client,
            manager,
        })
    }
}

#[async_trait]
impl VerificationCache for RedisCache {
    async fn get(&self, key: &str) -> Result<Option<String>, anyhow::Error> {
        let mut conn = self.manager.clone();
        redis::cmd("GET")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to get cache key: {}", e))
    }

    async fn set(&self, key: &str, value: &str, ttl_seconds: u64) -> Result<(), anyhow::Error> {
        let mut conn = self.manager.clone();
        redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("EX")
            .arg(ttl_seconds)
            .query_async(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to set cache key: {}", e))
    }

    async fn delete(&self, key: &str) -> Result<(), anyhow::Error> {
        let mut conn = self.manager.clone();
        redis::cmd("DEL")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to delete cache key: {}", e))
    }

    async fn incr_window(&self, key: &str, window_seconds: u64) -> Result<u64, anyhow::Error> {
        let mut conn = self.manager.clone();
        // EXPIRE NX keeps the window anchored at the first increment.
        let (count,): (u64,) = redis::pipe()
            .atomic()
            .cmd("INCR")
            .arg(key)
            .cmd("EXPIRE")
            .arg(key)
            .arg(window_seconds)
            .arg("NX")
            .ignore()
            .query_async(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to increment counter: {}", e))?;
        Ok(count)
    }

    async fn health_check(&self) -> Result<(), anyhow::Error> {
        let mut conn = self.manager.clone();
        redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Redis health check failed: {}", e))
    }
}

/// In-memory stand-in for tests. Counter windows are not simulated; tests
/// never sleep across them.
pub struct MockCache {
    entries: std::sync::Mutex<std::collections::HashMap<String, String>>,
    counters: std::sync::Mutex<std::collections::HashMap<String, u64>>,
    failing: std::sync::atomic::AtomicBool,
}

impl Default for MockCache {
    fn default() -> Self {
        Self::new()
    }
}

impl MockCache {
    pub fn new() -> Self {
        Self {
            entries: std::sync::Mutex::new(std::collections::HashMap::new()),
            counters: std::sync::Mutex::new(std::collections::HashMap::new()),
            failing: std::sync::atomic::AtomicBool::new(false),
        }
    }

    /// Make every operation return an error, to exercise degraded paths.
    pub fn set_failing(&self, failing: bool) {
        self.failing
            .store(failing, std::sync::atomic::Ordering::SeqCst);
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries
            .lock()
            .map(|m| m.contains_key(key))
            .unwrap_or(false)
    }

    fn check_failing(&self) -> Result<(), anyhow::Error> {
        if self.failing.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(anyhow::anyhow!("mock cache unavailable"));
        }
        Ok(())
    }
}

#[async_trait]
impl VerificationCache for MockCache {
    async fn get(&self, key: &str) -> Result<Option<String>, anyhow::Error> {
        self.check_failing()?;
        let val = self
            .entries
            .lock()
            .map_err(|e| anyhow::anyhow!("Mock cache mutex poisoned: {}", e))?
            .get(key)
            .cloned();
        Ok(val)
    }

    async fn set(&self, key: &str, value: &str, _ttl_seconds: u64) -> Result<(), anyhow::Error> {
        self.check_failing()?;
        self.entries
            .lock()
            .map_err(|e| anyhow::anyhow!("Mock cache mutex poisoned: {}", e))?
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), anyhow::Error> {
        self.check_failing()?;
        self.entries
            .lock()
            .map_err(|e| anyhow::anyhow!("Mock cache mutex poisoned: {}", e))?
            .remove(key);
        Ok(())
    }

    async fn incr_window(&self, key: &str, _window_seconds: u64) -> Result<u64, anyhow::Error> {
        self.check_failing()?;
        let mut counters = self
            .counters
            .lock()
            .map_err(|e| anyhow::anyhow!("Mock counter mutex poisoned: {}", e))?;
        let count = counters.entry(key.to_string()).or_insert(0);
        *count += 1;
        Ok(*count)
    }

    async fn health_check(&self) -> Result<(), anyhow::Error> {
        self.check_failing()
    }
}
