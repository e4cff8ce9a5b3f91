use async_trait::async_trait;
use redis::aio::ConnectionManager;
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::info;

use crate::security::replay::{ReplayStore, StoreError};

/// Redis-backed [`ReplayStore`]. Shared by every gate instance so the
/// single-use guarantee holds across the fleet.
///
/// Connects lazily on first use, so the gate starts even while Redis is down
/// and rejects requests until it comes back.
pub struct RedisReplayStore {
    client: redis::Client,
    conn: OnceCell<ConnectionManager>,
}

impl RedisReplayStore {
    pub fn new(url: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(url).map_err(|e| StoreError::Connection(e.to_string()))?;
        Ok(Self {
            client,
            conn: OnceCell::new(),
        })
    }

    async fn connection(&self) -> Result<ConnectionManager, StoreError> {
        let conn = self
            .conn
            .get_or_try_init(|| async {
                let manager = ConnectionManager::new(self.client.clone()).await?;
                info!("connected to redis replay store");
                Ok::<_, redis::RedisError>(manager)
            })
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;
        Ok(conn.clone())
    }
}

#[async_trait]
impl ReplayStore for RedisReplayStore {
    async fn insert_once(&self, key: &str, ttl: Duration) -> Result<bool, StoreError> {
        let mut conn = self.connection().await?;
        // SET NX EX is a single atomic command; the reply is nil when the key exists
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(1)
            .arg("NX")
            .arg("EX")
            .arg(ttl.as_secs().max(1))
            .query_async(&mut conn)
            .await
            .map_err(|e| StoreError::Command(e.to_string()))?;
        Ok(reply.is_some())
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        let mut conn = self.connection().await?;
        let found: bool = redis::cmd("EXISTS")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| StoreError::Command(e.to_string()))?;
        Ok(found)
    }
}

impl std::fmt::Debug for RedisReplayStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisReplayStore")
            .field("connected", &self.conn.initialized())
            .finish_non_exhaustive()
    }
}
