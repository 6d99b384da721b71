//! Redis implementation of the `KeyValueCache` trait.

use anyhow::{Context, Result};
use async_trait::async_trait;
use redis::{aio::Connection, AsyncCommands, Client};
use std::env;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::cache::KeyValueCache;

#[derive(Clone)]
pub struct RedisCache {
    client: Client,
    connection: Arc<Mutex<Connection>>,
}

impl RedisCache {
    /// Connect using `REDIS_URL` (default `redis://localhost:6379`).
    pub async fn new() -> Result<Self> {
        let redis_url =
            env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string());
        Self::connect(&redis_url).await
    }

    pub async fn connect(redis_url: &str) -> Result<Self> {
        let client = Client::open(redis_url).context("Failed to parse redis URL")?;
        let connection = client
            .get_async_connection()
            .await
            .context("Failed to connect to redis")?;

        Ok(Self {
            client,
            connection: Arc::new(Mutex::new(connection)),
        })
    }

    pub fn get_client(&self) -> Client {
        self.client.clone()
    }
}

#[async_trait]
impl KeyValueCache for RedisCache {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.connection.lock().await;
        conn.get::<_, Option<String>>(key)
            .await
            .context("Failed to read cache key")
    }

    async fn put(&self, key: &str, value: &str, ttl_seconds: u64) -> Result<()> {
        let mut conn = self.connection.lock().await;
        conn.set_ex::<_, _, ()>(key, value, ttl_seconds)
            .await
            .context("Failed to write cache key")
    }

    async fn forget(&self, key: &str) -> Result<()> {
        let mut conn = self.connection.lock().await;
        conn.del::<_, ()>(key)
            .await
            .context("Failed to delete cache key")
    }
}
