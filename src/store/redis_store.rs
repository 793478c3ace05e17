use super::KvStore;
use crate::{config::AppConfig, error::Result};
use async_trait::async_trait;
use redis::{AsyncCommands, Client};
use std::time::Duration;

pub struct RedisStore {
    client: Client,
}

impl RedisStore {
    pub async fn new(config: &AppConfig) -> Result<Self> {
        let client = Client::open(config.redis.url.clone())?;

        // Test connection
        let mut conn = client.get_async_connection().await?;
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;

        Ok(Self { client })
    }

    async fn connection(&self) -> Result<redis::aio::Connection> {
        Ok(self.client.get_async_connection().await?)
    }
}

#[async_trait]
impl KvStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.connection().await?;
        let value: Option<String> = conn.get(key).await?;
        Ok(value)
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let mut conn = self.connection().await?;
        let _: () = conn.set_ex(key, value, ttl.as_secs().max(1)).await?;
        Ok(())
    }

    async fn del(&self, keys: &[String]) -> Result<u64> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut conn = self.connection().await?;
        let removed: u64 = conn.del(keys).await?;
        Ok(removed)
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>> {
        let mut conn = self.connection().await?;
        let keys: Vec<String> = conn.keys(pattern).await?;
        Ok(keys)
    }

    async fn incr(&self, key: &str, delta: i64) -> Result<i64> {
        let mut conn = self.connection().await?;
        let result: i64 = conn.incr(key, delta).await?;
        Ok(result)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<()> {
        let mut conn = self.connection().await?;
        let _: bool = conn.expire(key, ttl.as_secs() as i64).await?;
        Ok(())
    }

    async fn zadd(&self, key: &str, member: &str, score: f64) -> Result<()> {
        let mut conn = self.connection().await?;
        let _: i64 = conn.zadd(key, member, score).await?;
        Ok(())
    }

    async fn zrem_range_by_score(&self, key: &str, min: f64, max: f64) -> Result<u64> {
        let mut conn = self.connection().await?;
        let removed: u64 = conn.zrembyscore(key, min, max).await?;
        Ok(removed)
    }

    async fn zcard(&self, key: &str) -> Result<u64> {
        let mut conn = self.connection().await?;
        let count: u64 = conn.zcard(key).await?;
        Ok(count)
    }

    async fn ping(&self) -> Result<()> {
        let mut conn = self.connection().await?;
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }

    fn backend_name(&self) -> &str {
        "redis"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;

    #[tokio::test]
    async fn unreachable_server_is_a_store_error() {
        let mut config = AppConfig::new().unwrap();
        config.redis.url = "redis://127.0.0.1:1/".to_string();

        match RedisStore::new(&config).await {
            Err(AppError::Store(_)) => {}
            Err(other) => panic!("unexpected error: {other:?}"),
            Ok(_) => panic!("port 1 should refuse connections"),
        }
    }
}
