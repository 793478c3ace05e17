use crate::store::KvStore;
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_TTL: Duration = Duration::from_secs(300);
pub const MARKET_DATA_TTL: Duration = Duration::from_secs(60);

#[derive(Debug, Serialize, Deserialize)]
struct CachedConversation {
    user_message: String,
    ai_response: String,
    cached_at: DateTime<Utc>,
}

/// JSON values with per-key TTL. Every failure degrades to a miss or a
/// skipped write.
pub struct CacheService {
    store: Option<Arc<dyn KvStore>>,
    default_ttl: Duration,
}

impl CacheService {
    pub fn new(store: Option<Arc<dyn KvStore>>) -> Self {
        Self {
            store,
            default_ttl: DEFAULT_TTL,
        }
    }

    pub async fn get<T>(&self, key: &str) -> Option<T>
    where
        T: DeserializeOwned,
    {
        let store = self.store.as_ref()?;
        match store.get(key).await {
            Ok(Some(raw)) => match serde_json::from_str(&raw) {
                Ok(value) => Some(value),
                Err(e) => {
                    tracing::error!("Error decoding cached value for key {}: {}", key, e);
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                tracing::error!("Error getting cached value for key {}: {}", key, e);
                None
            }
        }
    }

    pub async fn set<T>(&self, key: &str, value: &T, ttl: Option<Duration>) -> bool
    where
        T: Serialize,
    {
        let Some(store) = self.store.as_ref() else {
            return false;
        };

        let serialized = match serde_json::to_string(value) {
            Ok(s) => s,
            Err(e) => {
                tracing::error!("Error encoding cached value for key {}: {}", key, e);
                return false;
            }
        };

        match store
            .set_ex(key, &serialized, ttl.unwrap_or(self.default_ttl))
            .await
        {
            Ok(()) => true,
            Err(e) => {
                tracing::error!("Error setting cached value for key {}: {}", key, e);
                false
            }
        }
    }

    pub async fn delete(&self, key: &str) -> bool {
        let Some(store) = self.store.as_ref() else {
            return false;
        };
        match store.del(&[key.to_string()]).await {
            Ok(_) => true,
            Err(e) => {
                tracing::error!("Error deleting cached value for key {}: {}", key, e);
                false
            }
        }
    }

    pub fn conversation_key(session_id: &str, user_message: &str) -> String {
        let message_hash = sha256::digest(user_message.trim().to_lowercase());
        format!("conversation:{}:{}", session_id, message_hash)
    }

    pub fn market_data_key(symbol: &str) -> String {
        format!("market_data:{}", symbol)
    }

    pub fn news_key(symbols: Option<&str>) -> String {
        format!("news:{}", symbols.unwrap_or("general"))
    }

    pub async fn cache_response(
        &self,
        session_id: &str,
        user_message: &str,
        ai_response: &str,
        ttl: Option<Duration>,
    ) -> bool {
        let entry = CachedConversation {
            user_message: user_message.to_string(),
            ai_response: ai_response.to_string(),
            cached_at: Utc::now(),
        };
        self.set(&Self::conversation_key(session_id, user_message), &entry, ttl)
            .await
    }

    pub async fn get_cached_response(&self, session_id: &str, user_message: &str) -> Option<String> {
        self.get::<CachedConversation>(&Self::conversation_key(session_id, user_message))
            .await
            .map(|entry| entry.ai_response)
    }

    pub async fn cache_market_data<T: Serialize>(&self, symbol: &str, data: &T) -> bool {
        self.set(&Self::market_data_key(symbol), data, Some(MARKET_DATA_TTL))
            .await
    }

    pub async fn get_cached_market_data<T: DeserializeOwned>(&self, symbol: &str) -> Option<T> {
        self.get(&Self::market_data_key(symbol)).await
    }

    /// Drops every cached conversation for the session. Persisted history is
    /// left alone.
    pub async fn clear_session(&self, session_id: &str) -> bool {
        let Some(store) = self.store.as_ref() else {
            return false;
        };

        let pattern = format!("conversation:{}:*", session_id);
        let result = match store.keys(&pattern).await {
            Ok(keys) => store.del(&keys).await.map(|_| ()),
            Err(e) => Err(e),
        };

        match result {
            Ok(()) => true,
            Err(e) => {
                tracing::error!("Error clearing session cache for {}: {}", session_id, e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, UnavailableStore};

    fn memory_cache() -> CacheService {
        CacheService::new(Some(Arc::new(MemoryStore::new())))
    }

    #[tokio::test]
    async fn response_round_trip_ignores_case_and_padding() {
        let cache = memory_cache();
        assert!(cache.cache_response("s1", "What is a Stock?", "A share.", None).await);

        assert_eq!(
            cache.get_cached_response("s1", "what is a stock?").await.as_deref(),
            Some("A share.")
        );
        assert_eq!(
            cache.get_cached_response("s1", "  WHAT IS A STOCK?\n").await.as_deref(),
            Some("A share.")
        );
    }

    #[tokio::test]
    async fn responses_are_scoped_to_the_session() {
        let cache = memory_cache();
        cache.cache_response("s1", "hello", "hi there", None).await;
        assert_eq!(cache.get_cached_response("s2", "hello").await, None);
    }

    #[tokio::test]
    async fn clear_session_only_touches_that_namespace() {
        let cache = memory_cache();
        cache.cache_response("s1", "a", "1", None).await;
        cache.cache_response("s1", "b", "2", None).await;
        cache.cache_response("s2", "a", "3", None).await;

        assert!(cache.clear_session("s1").await);
        assert_eq!(cache.get_cached_response("s1", "a").await, None);
        assert_eq!(cache.get_cached_response("s1", "b").await, None);
        assert_eq!(cache.get_cached_response("s2", "a").await.as_deref(), Some("3"));
    }

    #[tokio::test]
    async fn market_data_round_trip() {
        let cache = memory_cache();
        assert!(cache.cache_market_data("SPY", &vec![1.0, 2.0]).await);
        let hit: Option<Vec<f64>> = cache.get_cached_market_data("SPY").await;
        assert_eq!(hit, Some(vec![1.0, 2.0]));
    }

    #[tokio::test]
    async fn missing_store_is_always_a_miss() {
        let cache = CacheService::new(None);
        assert!(!cache.cache_response("s1", "hello", "hi", None).await);
        assert_eq!(cache.get_cached_response("s1", "hello").await, None);
        assert!(!cache.clear_session("s1").await);
    }

    #[tokio::test]
    async fn store_errors_fail_soft() {
        let cache = CacheService::new(Some(Arc::new(UnavailableStore)));
        assert!(!cache.cache_response("s1", "hello", "hi", None).await);
        assert_eq!(cache.get_cached_response("s1", "hello").await, None);
        assert!(!cache.delete("k").await);
        assert!(!cache.clear_session("s1").await);
    }

    #[test]
    fn key_shapes() {
        assert_eq!(CacheService::market_data_key("AAPL"), "market_data:AAPL");
        assert_eq!(CacheService::news_key(None), "news:general");
        assert!(CacheService::conversation_key("s1", "Hi").starts_with("conversation:s1:"));
        assert_eq!(
            CacheService::conversation_key("s1", " Hi "),
            CacheService::conversation_key("s1", "hi")
        );
    }
}
