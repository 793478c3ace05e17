//! Tier-indexed throttling: a daily message ceiling plus a rolling 60-second
//! burst window, both kept in the key-value store.
//!
//! Both gates fail open. If the store is missing or errors, the request is
//! allowed and the error is logged.

use crate::{
    error::{AppError, Result},
    models::{Tier, TierAdvice, UsageStats, MAX_TIER},
    store::KvStore,
};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Reported as "remaining" for unlimited tiers or when no store is configured.
pub const UNLIMITED_SENTINEL: u64 = 999;

const WINDOW: Duration = Duration::from_secs(60);
const DAILY_TTL: Duration = Duration::from_secs(86_400);

pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Messages per day; `None` is unlimited. Unknown tiers get the tier-1 quota.
pub fn daily_limit(tier: Tier) -> Option<u64> {
    match tier {
        2 => Some(50),
        3 => Some(100),
        4 => Some(200),
        5 => Some(500),
        6 => Some(1000),
        7 => None,
        _ => Some(10),
    }
}

/// Requests per rolling 60-second window.
pub fn rate_limit(tier: Tier) -> u64 {
    match tier {
        2 => 5,
        3 => 10,
        4 => 15,
        5 => 20,
        6 => 30,
        7 => 50,
        _ => 2,
    }
}

pub struct RateLimiter {
    store: Option<Arc<dyn KvStore>>,
    clock: Clock,
}

impl RateLimiter {
    pub fn new(store: Option<Arc<dyn KvStore>>) -> Self {
        Self::with_clock(store, Arc::new(Utc::now))
    }

    pub fn with_clock(store: Option<Arc<dyn KvStore>>, clock: Clock) -> Self {
        Self { store, clock }
    }

    fn daily_key(&self, session_id: &str) -> String {
        let date = (self.clock)().format("%Y-%m-%d");
        format!("daily_limit:{}:{}", session_id, date)
    }

    fn rate_key(session_id: &str) -> String {
        format!("rate_limit:{}", session_id)
    }

    /// Runs the daily gate, then the burst gate.
    pub async fn check(&self, session_id: &str, tier: Tier) -> Result<()> {
        if !self.check_daily_limit(session_id, tier).await {
            let limit = daily_limit(tier).unwrap_or(UNLIMITED_SENTINEL);
            return Err(AppError::QuotaExceeded(format!(
                "Daily message limit reached ({} messages). Please upgrade your tier for more messages.",
                limit
            )));
        }

        if !self.check_rate_limit(session_id, tier).await {
            return Err(AppError::QuotaExceeded(
                "Rate limit exceeded. Please try again later.".to_string(),
            ));
        }

        Ok(())
    }

    pub async fn check_daily_limit(&self, session_id: &str, tier: Tier) -> bool {
        let Some(store) = self.store.as_ref() else {
            return true;
        };
        let Some(limit) = daily_limit(tier) else {
            return true;
        };

        match self.daily_count(store.as_ref(), session_id).await {
            Ok(count) => count < limit,
            Err(e) => {
                tracing::error!("Error checking daily limit for {}: {}", session_id, e);
                true
            }
        }
    }

    pub async fn check_rate_limit(&self, session_id: &str, tier: Tier) -> bool {
        let Some(store) = self.store.as_ref() else {
            return true;
        };

        match self.window_count(store.as_ref(), session_id).await {
            Ok(count) => count < rate_limit(tier),
            Err(e) => {
                tracing::error!("Error checking rate limit for {}: {}", session_id, e);
                true
            }
        }
    }

    /// Records one successful response against both gates.
    pub async fn increment_usage(&self, session_id: &str) -> bool {
        let Some(store) = self.store.as_ref() else {
            return true;
        };

        match self.record(store.as_ref(), session_id).await {
            Ok(()) => true,
            Err(e) => {
                tracing::error!("Error incrementing usage for {}: {}", session_id, e);
                false
            }
        }
    }

    async fn record(&self, store: &dyn KvStore, session_id: &str) -> Result<()> {
        let daily_key = self.daily_key(session_id);
        if store.incr(&daily_key, 1).await? == 1 {
            store.expire(&daily_key, DAILY_TTL).await?;
        }

        let now_ms = (self.clock)().timestamp_millis();
        let rate_key = Self::rate_key(session_id);
        let member = format!("{}:{}", now_ms, Uuid::new_v4().simple());
        store.zadd(&rate_key, &member, now_ms as f64).await?;
        store.expire(&rate_key, WINDOW).await?;
        Ok(())
    }

    async fn daily_count(&self, store: &dyn KvStore, session_id: &str) -> Result<u64> {
        let raw = store.get(&self.daily_key(session_id)).await?;
        Ok(raw.and_then(|v| v.parse().ok()).unwrap_or(0))
    }

    /// Prunes entries at or before `now - 60s`, then counts what is left.
    async fn window_count(&self, store: &dyn KvStore, session_id: &str) -> Result<u64> {
        let key = Self::rate_key(session_id);
        let window_start = (self.clock)().timestamp_millis() - WINDOW.as_millis() as i64;
        store
            .zrem_range_by_score(&key, 0.0, window_start as f64)
            .await?;
        store.zcard(&key).await
    }

    pub async fn usage_stats(&self, session_id: &str) -> Option<UsageStats> {
        let store = self.store.as_ref()?;

        let stats = async {
            Ok::<_, AppError>(UsageStats {
                daily_messages_used: self.daily_count(store.as_ref(), session_id).await?,
                rate_limit_usage: self.window_count(store.as_ref(), session_id).await?,
                timestamp: (self.clock)(),
            })
        };

        match stats.await {
            Ok(stats) => Some(stats),
            Err(e) => {
                tracing::error!("Error getting usage stats for {}: {}", session_id, e);
                None
            }
        }
    }

    pub async fn reset_daily_limit(&self, session_id: &str) -> bool {
        let Some(store) = self.store.as_ref() else {
            return true;
        };
        match store.del(&[self.daily_key(session_id)]).await {
            Ok(_) => true,
            Err(e) => {
                tracing::error!("Error resetting daily limit for {}: {}", session_id, e);
                false
            }
        }
    }

    pub async fn remaining_messages(&self, session_id: &str, tier: Tier) -> u64 {
        let Some(store) = self.store.as_ref() else {
            return UNLIMITED_SENTINEL;
        };
        let Some(limit) = daily_limit(tier) else {
            return UNLIMITED_SENTINEL;
        };

        match self.daily_count(store.as_ref(), session_id).await {
            Ok(used) => limit.saturating_sub(used),
            Err(e) => {
                tracing::error!("Error getting remaining messages for {}: {}", session_id, e);
                0
            }
        }
    }

    /// Suggests the next tier once 80% of today's quota is spent.
    pub async fn tier_upgrade_advice(&self, session_id: &str, tier: Tier) -> TierAdvice {
        let declined = |reason: &str| TierAdvice {
            beneficial: false,
            current_usage: None,
            current_limit: None,
            usage_percentage: None,
            recommended_tier: None,
            next_tier_limit: None,
            reason: reason.to_string(),
        };

        if self.store.is_none() {
            return declined("Cannot analyze usage without a usage store");
        }
        let Some(stats) = self.usage_stats(session_id).await else {
            return declined("Error analyzing usage");
        };
        let Some(current_limit) = daily_limit(tier) else {
            return declined("Your tier has no daily limit");
        };

        let used = stats.daily_messages_used;
        let usage_percentage = used as f64 / current_limit as f64 * 100.0;

        if usage_percentage >= 80.0 {
            let next_tier = tier.saturating_add(1).min(MAX_TIER);
            TierAdvice {
                beneficial: true,
                current_usage: Some(used),
                current_limit: Some(current_limit),
                usage_percentage: Some(usage_percentage),
                recommended_tier: Some(next_tier),
                next_tier_limit: Some(daily_limit(next_tier).unwrap_or(UNLIMITED_SENTINEL)),
                reason: format!("You are using {:.1}% of your daily limit", usage_percentage),
            }
        } else {
            TierAdvice {
                beneficial: false,
                current_usage: Some(used),
                current_limit: Some(current_limit),
                usage_percentage: Some(usage_percentage),
                recommended_tier: None,
                next_tier_limit: None,
                reason: "Your current tier seems sufficient for your usage pattern".to_string(),
            }
        }
    }
}
