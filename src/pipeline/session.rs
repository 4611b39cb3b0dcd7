//! Key-value session store for dependency outputs.
//!
//! Outputs of successful functions are stored under the composite key
//! `"{task}+{function}"` so later tasks can fetch what their dependencies
//! produced. Two backends are provided:
//!
//! - [`InMemorySessionStore`]: process-local, for single runs and tests
//! - [`RedisSessionStore`]: one Redis hash per session, shared across runs
//!
//! # Redis Layout
//!
//! - `{prefix}:session:{session_id}`: hash of composite key to JSON value

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde_json::Value;
use tokio::sync::RwLock;

use crate::error::StoreError;

/// Builds the composite key for a function's output.
pub fn output_key(task: &str, function: &str) -> String {
    format!("{}+{}", task, function)
}

/// Opaque get/set by session id.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Fetches a stored value.
    async fn get(&self, session_id: &str, key: &str) -> Result<Option<Value>, StoreError>;

    /// Stores a value, replacing any previous one.
    async fn set(&self, session_id: &str, key: &str, value: &Value) -> Result<(), StoreError>;
}

/// Session store held in memory.
#[derive(Debug, Default)]
pub struct InMemorySessionStore {
    sessions: RwLock<HashMap<String, HashMap<String, Value>>>,
}

impl InMemorySessionStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys stored for `session_id`.
    pub async fn len(&self, session_id: &str) -> usize {
        self.sessions
            .read()
            .await
            .get(session_id)
            .map_or(0, HashMap::len)
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn get(&self, session_id: &str, key: &str) -> Result<Option<Value>, StoreError> {
        Ok(self
            .sessions
            .read()
            .await
            .get(session_id)
            .and_then(|s| s.get(key))
            .cloned())
    }

    async fn set(&self, session_id: &str, key: &str, value: &Value) -> Result<(), StoreError> {
        self.sessions
            .write()
            .await
            .entry(session_id.to_string())
            .or_default()
            .insert(key.to_string(), value.clone());
        Ok(())
    }
}

/// Redis-backed session store.
pub struct RedisSessionStore {
    /// Redis connection manager (handles reconnection automatically).
    redis: ConnectionManager,
    /// Key prefix.
    prefix: String,
    /// Expiry applied to a session hash on every write.
    ttl: Option<Duration>,
}

impl RedisSessionStore {
    /// Connects to Redis.
    ///
    /// # Arguments
    ///
    /// * `redis_url` - Redis connection URL (e.g., "redis://localhost:6379")
    /// * `prefix` - Prefix for every key this store writes
    ///
    /// # Errors
    ///
    /// Returns `StoreError::ConnectionFailed` if the connection fails.
    pub async fn connect(redis_url: &str, prefix: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| StoreError::ConnectionFailed(e.to_string()))?;

        let redis = ConnectionManager::new(client)
            .await
            .map_err(|e| StoreError::ConnectionFailed(e.to_string()))?;

        Ok(Self::from_connection(redis, prefix))
    }

    /// Creates a store from an existing ConnectionManager.
    pub fn from_connection(redis: ConnectionManager, prefix: &str) -> Self {
        Self {
            redis,
            prefix: prefix.to_string(),
            ttl: None,
        }
    }

    /// Expires sessions `ttl` after their last write.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    fn session_key(&self, session_id: &str) -> String {
        format!("{}:session:{}", self.prefix, session_id)
    }
}

#[async_trait]
impl SessionStore for RedisSessionStore {
    async fn get(&self, session_id: &str, key: &str) -> Result<Option<Value>, StoreError> {
        let mut conn = self.redis.clone();
        let raw: Option<String> = conn.hget(self.session_key(session_id), key).await?;
        match raw {
            Some(data) => Ok(Some(serde_json::from_str(&data)?)),
            None => Ok(None),
        }
    }

    async fn set(&self, session_id: &str, key: &str, value: &Value) -> Result<(), StoreError> {
        let serialized = serde_json::to_string(value)?;
        let session_key = self.session_key(session_id);
        let mut conn = self.redis.clone();

        let mut pipe = redis::pipe();
        pipe.hset(&session_key, key, serialized);
        if let Some(ttl) = self.ttl {
            pipe.expire(&session_key, ttl.as_secs().max(1) as i64);
        }
        pipe.query_async::<_, ()>(&mut conn).await?;
        Ok(())
    }
}
