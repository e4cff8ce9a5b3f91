use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::debug;

use crate::security::token::TokenClaims;
use crate::service::config::Config;

const KEY_PREFIX: &str = "devops-gate:replay:";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("connection failed: {0}")]
    Connection(String),
    #[error("command failed: {0}")]
    Command(String),
}

/// Key-value store with per-key expiry backing the replay guard.
///
/// Implement this for Redis or any store offering an atomic
/// "set if absent with TTL".
#[async_trait]
pub trait ReplayStore: Send + Sync {
    /// Atomically create `key` with `ttl` unless it already exists.
    /// Returns `Ok(true)` if this call created it, `Ok(false)` if it was present.
    /// An existing key keeps its original expiry.
    async fn insert_once(&self, key: &str, ttl: Duration) -> Result<bool, StoreError>;

    async fn exists(&self, key: &str) -> Result<bool, StoreError>;
}

/// In-process store for tests and single-instance development.
/// Does not give the cross-instance guarantee a shared store does.
#[derive(Debug, Clone, Default)]
pub struct MemoryReplayStore {
    inner: Arc<Mutex<HashMap<String, Instant>>>,
}

impl MemoryReplayStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ReplayStore for MemoryReplayStore {
    async fn insert_once(&self, key: &str, ttl: Duration) -> Result<bool, StoreError> {
        let now = Instant::now();
        let mut map = self.inner.lock().await;
        // purge expired
        map.retain(|_, &mut expires_at| expires_at > now);
        if map.contains_key(key) {
            return Ok(false);
        }
        map.insert(key.to_string(), now + ttl);
        Ok(true)
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        let now = Instant::now();
        let map = self.inner.lock().await;
        Ok(map.get(key).is_some_and(|&expires_at| expires_at > now))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplayStatus {
    FirstUse,
    AlreadyUsed,
}

#[derive(Debug, Error)]
pub enum ReplayError {
    #[error("replay store unavailable: {0}")]
    Unavailable(String),
}

/// Stable store key for a token: a SHA-256 digest of its exact bytes.
pub fn replay_key(token: &str) -> String {
    format!("{}{}", KEY_PREFIX, hex::encode(Sha256::digest(token.as_bytes())))
}

/// Enforces single use of verified tokens against a shared [`ReplayStore`].
pub struct ReplayGuard {
    store: Arc<dyn ReplayStore>,
    timeout: Duration,
    min_ttl_secs: u64,
    max_ttl_secs: u64,
}

impl ReplayGuard {
    pub fn new(store: Arc<dyn ReplayStore>, config: &Config) -> Self {
        Self {
            store,
            timeout: config.store_timeout,
            min_ttl_secs: config.min_replay_ttl_secs,
            max_ttl_secs: config.max_replay_ttl_secs,
        }
    }

    /// Retention for a token's replay record: the longer of `timeToLifeSec`
    /// and the token's remaining lifetime, clamped to the configured window.
    pub fn record_ttl(&self, claims: &TokenClaims, now: i64) -> Duration {
        let requested = claims
            .time_to_life_sec
            .unwrap_or(0)
            .max(claims.remaining_lifetime(now));
        Duration::from_secs(requested.clamp(self.min_ttl_secs, self.max_ttl_secs))
    }

    /// Mark `token` as used, or report that it already was.
    pub async fn check_and_mark(
        &self,
        token: &str,
        claims: &TokenClaims,
        now: i64,
    ) -> Result<ReplayStatus, ReplayError> {
        let key = replay_key(token);
        let ttl = self.record_ttl(claims, now);
        let created = self
            .bounded(self.store.insert_once(&key, ttl))
            .await?;
        debug!(key = %key, ttl_secs = ttl.as_secs(), created, "replay check");
        Ok(if created {
            ReplayStatus::FirstUse
        } else {
            ReplayStatus::AlreadyUsed
        })
    }

    /// Whether a replay record currently exists for `token`. Read-only.
    pub async fn is_consumed(&self, token: &str) -> Result<bool, ReplayError> {
        self.bounded(self.store.exists(&replay_key(token))).await
    }

    async fn bounded<T>(
        &self,
        op: impl std::future::Future<Output = Result<T, StoreError>>,
    ) -> Result<T, ReplayError> {
        match tokio::time::timeout(self.timeout, op).await {
            Ok(Ok(v)) => Ok(v),
            Ok(Err(e)) => Err(ReplayError::Unavailable(e.to_string())),
            Err(_) => Err(ReplayError::Unavailable(format!(
                "no answer within {}ms",
                self.timeout.as_millis()
            ))),
        }
    }
}

impl std::fmt::Debug for ReplayGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplayGuard")
            .field("timeout", &self.timeout)
            .field("min_ttl_secs", &self.min_ttl_secs)
            .field("max_ttl_secs", &self.max_ttl_secs)
            .finish_non_exhaustive()
    }
}
