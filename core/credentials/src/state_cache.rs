//! Short-lived key/value cache for OAuth anti-forgery state.
//!
//! Entries are single use: a successful read removes the entry under the
//! same lock. The cache is best effort. A failing backend turns reads into
//! `NotFound` and drops writes, which only forces the user to restart the
//! connect flow.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

use drivelink_common::{Error, Result};

/// Storage behind an [`EphemeralStateCache`].
#[async_trait]
pub trait StateBackend: Send + Sync {
    /// Store `value` under `key` until `ttl` elapses.
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()>;

    /// Atomically remove and return a live entry.
    async fn take(&self, key: &str) -> Result<Option<String>>;
}

struct StateEntry {
    value: String,
    expires_at: Instant,
}

/// Process-local state backend.
#[derive(Default)]
pub struct MemoryStateBackend {
    entries: Mutex<HashMap<String, StateEntry>>,
}

impl MemoryStateBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop expired entries, returning how many remain.
    pub async fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        entries.retain(|_, entry| entry.expires_at > now);
        entries.len()
    }
}

#[async_trait]
impl StateBackend for MemoryStateBackend {
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let entry = StateEntry {
            value: value.to_string(),
            expires_at: Instant::now() + ttl,
        };
        self.entries.lock().await.insert(key.to_string(), entry);
        Ok(())
    }

    async fn take(&self, key: &str) -> Result<Option<String>> {
        let entry = self.entries.lock().await.remove(key);
        Ok(entry
            .filter(|e| e.expires_at > Instant::now())
            .map(|e| e.value))
    }
}

/// One-time state cache used during the connect handshake.
#[derive(Clone)]
pub struct EphemeralStateCache {
    backend: Arc<dyn StateBackend>,
}

impl EphemeralStateCache {
    pub fn new(backend: Arc<dyn StateBackend>) -> Self {
        Self { backend }
    }

    /// Cache backed by process memory.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStateBackend::new()))
    }

    /// Store an entry. Backend failures are logged and dropped.
    pub async fn put(&self, key: &str, value: &str, ttl_seconds: u64) {
        if let Err(e) = self
            .backend
            .set(key, value, Duration::from_secs(ttl_seconds))
            .await
        {
            warn!(error = %e, "State cache write dropped");
        }
    }

    /// Remove and return an entry.
    ///
    /// # Errors
    /// - `NotFound` if the key is unknown, expired, already taken, or the
    ///   backend is unavailable
    pub async fn take_once(&self, key: &str) -> Result<String> {
        match self.backend.take(key).await {
            Ok(Some(value)) => Ok(value),
            Ok(None) => {
                debug!("State token unknown or already used");
                Err(Error::NotFound("state".to_string()))
            }
            Err(e) => {
                warn!(error = %e, "State cache read failed");
                Err(Error::NotFound("state".to_string()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use drivelink_common::ErrorKind;

    struct UnavailableBackend;

    #[async_trait]
    impl StateBackend for UnavailableBackend {
        async fn set(&self, _key: &str, _value: &str, _ttl: Duration) -> Result<()> {
            Err(Error::Store("connection refused".to_string()))
        }

        async fn take(&self, _key: &str) -> Result<Option<String>> {
            Err(Error::Store("connection refused".to_string()))
        }
    }

    #[tokio::test]
    async fn test_take_once_succeeds_exactly_once() {
        let cache = EphemeralStateCache::in_memory();
        cache.put("state-1", "user-1", 600).await;

        assert_eq!(cache.take_once("state-1").await.unwrap(), "user-1");
        let err = cache.take_once("state-1").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_expired_entry_not_returned() {
        let cache = EphemeralStateCache::in_memory();
        cache.put("state-1", "user-1", 0).await;

        assert!(cache.take_once("state-1").await.is_err());
    }

    #[tokio::test]
    async fn test_unavailable_backend_degrades() {
        let cache = EphemeralStateCache::new(Arc::new(UnavailableBackend));

        cache.put("state-1", "user-1", 600).await;
        let err = cache.take_once("state-1").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_concurrent_takes_yield_one_winner() {
        let cache = EphemeralStateCache::in_memory();
        cache.put("state-1", "user-1", 600).await;

        let attempts: Vec<_> = (0..8)
            .map(|_| {
                let cache = cache.clone();
                tokio::spawn(async move { cache.take_once("state-1").await.is_ok() })
            })
            .collect();
        let mut winners = 0;
        for attempt in attempts {
            if attempt.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn test_purge_expired() {
        let backend = MemoryStateBackend::new();
        backend.set("old", "u", Duration::ZERO).await.unwrap();
        backend
            .set("new", "u", Duration::from_secs(600))
            .await
            .unwrap();

        assert_eq!(backend.purge_expired().await, 1);
    }
}
