//! Session, message and user-context persistence plus the read-side
//! aggregate used for prompt composition.

use crate::{
    database::Database,
    error::Result,
    models::{
        ChatMessage, ChatSession, ContextUpdate, JsonMap, LearningProgress, MessageContext,
        SessionContext, Tier, UserContext,
    },
};
use chrono::Utc;
use serde_json::Value;
use sqlx::types::Json;
use std::sync::Arc;
use uuid::Uuid;

const RECENT_WINDOW: i64 = 5;

const INSTRUMENT_KEYWORDS: [(&str, &[&str]); 5] = [
    ("stocks", &["stock", "equity", "share", "ticker"]),
    ("crypto", &["bitcoin", "ethereum", "crypto", "blockchain"]),
    ("bonds", &["bond", "treasury", "yield"]),
    ("options", &["option", "call", "put", "strike"]),
    ("forex", &["forex", "currency", "exchange rate"]),
];

const INTENT_KEYWORDS: [(&str, &[&str]); 4] = [
    ("learning", &["learn", "explain", "understand", "what is", "how does"]),
    ("analysis", &["analyze", "evaluate", "assess", "opinion"]),
    ("strategy", &["strategy", "plan", "approach", "method"]),
    ("current_market", &["current", "today", "now", "latest"]),
];

pub struct ContextService {
    database: Arc<Database>,
}

impl ContextService {
    pub fn new(database: Arc<Database>) -> Self {
        Self { database }
    }

    /// Idempotent upsert keyed by session id. Tier and type are
    /// last-write-wins; concurrent first writes collapse into one row.
    pub async fn create_or_update_session(
        &self,
        session_id: &str,
        tier: Tier,
        session_type: &str,
    ) -> Result<ChatSession> {
        self.upsert_session(session_id, None, tier, session_type).await
    }

    pub async fn upsert_session(
        &self,
        session_id: &str,
        user_id: Option<&str>,
        tier: Tier,
        session_type: &str,
    ) -> Result<ChatSession> {
        let now = Utc::now();
        let mut tx = self.database.pool().begin().await?;

        let session = sqlx::query_as::<_, ChatSession>(
            r#"
            INSERT INTO chat_sessions (id, user_id, created_at, updated_at, context_data, session_type, user_tier)
            VALUES (?1, ?2, ?3, ?3, '{}', ?4, ?5)
            ON CONFLICT (id) DO UPDATE SET
                user_id = COALESCE(excluded.user_id, chat_sessions.user_id),
                updated_at = excluded.updated_at,
                session_type = excluded.session_type,
                user_tier = excluded.user_tier
            RETURNING *
            "#,
        )
        .bind(session_id)
        .bind(user_id)
        .bind(now)
        .bind(session_type)
        .bind(i64::from(tier))
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(session)
    }

    pub async fn get_session(&self, session_id: &str) -> Result<Option<ChatSession>> {
        let session = sqlx::query_as::<_, ChatSession>("SELECT * FROM chat_sessions WHERE id = ?1")
            .bind(session_id)
            .fetch_optional(self.database.pool())
            .await?;
        Ok(session)
    }

    pub async fn get_session_context(&self, session_id: &str) -> Result<Option<SessionContext>> {
        let Some(session) = self.get_session(session_id).await? else {
            return Ok(None);
        };

        let recent_messages = self.get_conversation_history(session_id, RECENT_WINDOW).await?;
        let user_context = self.get_user_context(session_id).await?;
        let session_duration =
            (Utc::now() - session.created_at).num_milliseconds() as f64 / 3_600_000.0;

        Ok(Some(SessionContext {
            conversation_length: recent_messages.len(),
            session_info: session,
            recent_messages,
            user_context,
            session_duration,
            message_context: MessageContext::default(),
        }))
    }

    pub async fn get_user_context(&self, session_id: &str) -> Result<Option<UserContext>> {
        let context = sqlx::query_as::<_, UserContext>(
            "SELECT * FROM user_contexts WHERE session_id = ?1 ORDER BY created_at LIMIT 1",
        )
        .bind(session_id)
        .fetch_optional(self.database.pool())
        .await?;
        Ok(context)
    }

    /// Shallow-merges each supplied section into the stored record, creating
    /// the record (and a default session row) on first use.
    pub async fn update_user_context(&self, session_id: &str, updates: &ContextUpdate) -> Result<()> {
        let now = Utc::now();
        let mut tx = self.database.pool().begin().await?;

        sqlx::query(
            r#"
            INSERT INTO chat_sessions (id, created_at, updated_at, context_data, session_type, user_tier)
            VALUES (?1, ?2, ?2, '{}', 'general', 1)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(session_id)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        let existing = sqlx::query_as::<_, UserContext>(
            "SELECT * FROM user_contexts WHERE session_id = ?1 ORDER BY created_at LIMIT 1",
        )
        .bind(session_id)
        .fetch_optional(&mut *tx)
        .await?;

        let mut context = match existing {
            Some(context) => context,
            None => {
                let context = UserContext {
                    id: Uuid::new_v4().to_string(),
                    session_id: session_id.to_string(),
                    user_preferences: Json(JsonMap::new()),
                    portfolio_data: Json(JsonMap::new()),
                    recent_activity: Json(JsonMap::new()),
                    learning_progress: Json(JsonMap::new()),
                    created_at: now,
                    updated_at: now,
                };
                sqlx::query(
                    r#"
                    INSERT INTO user_contexts (id, session_id, created_at, updated_at)
                    VALUES (?1, ?2, ?3, ?3)
                    "#,
                )
                .bind(&context.id)
                .bind(session_id)
                .bind(now)
                .execute(&mut *tx)
                .await?;
                context
            }
        };

        merge(&mut context.user_preferences.0, updates.preferences.as_ref());
        merge(&mut context.portfolio_data.0, updates.portfolio_data.as_ref());
        merge(&mut context.recent_activity.0, updates.recent_activity.as_ref());
        merge(&mut context.learning_progress.0, updates.learning_progress.as_ref());

        sqlx::query(
            r#"
            UPDATE user_contexts
            SET user_preferences = ?1, portfolio_data = ?2, recent_activity = ?3,
                learning_progress = ?4, updated_at = ?5
            WHERE id = ?6
            "#,
        )
        .bind(&context.user_preferences)
        .bind(&context.portfolio_data)
        .bind(&context.recent_activity)
        .bind(&context.learning_progress)
        .bind(now)
        .bind(&context.id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    /// Newest `limit` messages, returned oldest-first.
    pub async fn get_conversation_history(&self, session_id: &str, limit: i64) -> Result<Vec<ChatMessage>> {
        let mut messages = sqlx::query_as::<_, ChatMessage>(
            r#"
            SELECT * FROM chat_messages
            WHERE session_id = ?1
            ORDER BY timestamp DESC, rowid DESC
            LIMIT ?2
            "#,
        )
        .bind(session_id)
        .bind(limit)
        .fetch_all(self.database.pool())
        .await?;

        messages.reverse();
        Ok(messages)
    }

    pub async fn save_message(
        &self,
        session_id: &str,
        user_message: &str,
        ai_response: &str,
        context_used: Value,
        response_time_ms: u64,
    ) -> Result<ChatMessage> {
        let message = sqlx::query_as::<_, ChatMessage>(
            r#"
            INSERT INTO chat_messages (id, session_id, user_message, ai_response, timestamp, context_used, response_time_ms)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(session_id)
        .bind(user_message)
        .bind(ai_response)
        .bind(Utc::now())
        .bind(Json(context_used))
        .bind(response_time_ms as i64)
        .fetch_one(self.database.pool())
        .await?;

        Ok(message)
    }

    /// Stored progress, or the beginner profile when nothing usable is stored.
    pub async fn get_user_learning_progress(&self, session_id: &str) -> LearningProgress {
        match self.get_user_context(session_id).await {
            Ok(Some(context)) => LearningProgress::from_map(&context.learning_progress.0),
            Ok(None) => LearningProgress::default(),
            Err(e) => {
                tracing::error!("Error getting learning progress for {}: {}", session_id, e);
                LearningProgress::default()
            }
        }
    }

    /// Keyword scan over the instrument and intent-indicator taxonomies. Every
    /// category with at least one hit is reported, in taxonomy order.
    pub fn extract_context_from_message(user_message: &str) -> MessageContext {
        let lowered = user_message.to_lowercase();
        let hits = |taxonomy: &[(&str, &[&str])]| -> Vec<String> {
            taxonomy
                .iter()
                .filter(|(_, keywords)| keywords.iter().any(|k| lowered.contains(k)))
                .map(|(category, _)| category.to_string())
                .collect()
        };

        MessageContext {
            mentioned_instruments: hits(&INSTRUMENT_KEYWORDS),
            detected_intents: hits(&INTENT_KEYWORDS),
        }
    }
}

fn merge(target: &mut JsonMap, updates: Option<&JsonMap>) {
    if let Some(updates) = updates {
        for (key, value) in updates {
            target.insert(key.clone(), value.clone());
        }
    }
}

/// Minimal context for when the aggregate read fails after a successful
/// session upsert.
pub fn bare_context(session: ChatSession) -> SessionContext {
    SessionContext {
        session_info: session,
        recent_messages: Vec::new(),
        user_context: None,
        conversation_length: 0,
        session_duration: 0.0,
        message_context: MessageContext::default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const SESSION: &str = "123e4567-e89b-12d3-a456-426614174000";

    async fn service() -> ContextService {
        ContextService::new(Arc::new(Database::in_memory().await.unwrap()))
    }

    fn update(value: Value) -> ContextUpdate {
        serde_json::from_value(value).unwrap()
    }

    #[tokio::test]
    async fn session_upsert_is_idempotent() {
        let svc = service().await;
        let first = svc.create_or_update_session(SESSION, 1, "general").await.unwrap();
        let second = svc.create_or_update_session(SESSION, 3, "learning").await.unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(second.user_tier, 3);
        assert_eq!(second.session_type, "learning");
        assert_eq!(second.created_at, first.created_at);
        assert!(second.updated_at >= first.updated_at);

        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM chat_sessions WHERE id = ?1")
            .bind(SESSION)
            .fetch_one(svc.database.pool())
            .await
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn upsert_keeps_owner_when_later_call_is_anonymous() {
        let svc = service().await;
        svc.upsert_session(SESSION, Some("user-1"), 1, "general").await.unwrap();
        let session = svc.create_or_update_session(SESSION, 2, "general").await.unwrap();
        assert_eq!(session.user_id.as_deref(), Some("user-1"));
    }

    #[tokio::test]
    async fn context_for_unknown_session_is_none() {
        let svc = service().await;
        assert!(svc.get_session_context(SESSION).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn session_context_keeps_five_most_recent_in_order() {
        let svc = service().await;
        svc.create_or_update_session(SESSION, 1, "general").await.unwrap();
        for i in 0..7 {
            svc.save_message(SESSION, &format!("q{i}"), &format!("a{i}"), json!({}), 10)
                .await
                .unwrap();
        }

        let ctx = svc.get_session_context(SESSION).await.unwrap().unwrap();
        let asked: Vec<&str> = ctx.recent_messages.iter().map(|m| m.user_message.as_str()).collect();
        assert_eq!(asked, vec!["q2", "q3", "q4", "q5", "q6"]);
        assert_eq!(ctx.conversation_length, 5);
        assert!(ctx.user_context.is_none());
        assert!(ctx.session_duration >= 0.0);
    }

    #[tokio::test]
    async fn history_is_capped_and_chronological() {
        let svc = service().await;
        svc.create_or_update_session(SESSION, 1, "general").await.unwrap();
        for i in 0..4 {
            svc.save_message(SESSION, &format!("q{i}"), "a", json!({"intent": "x"}), 1)
                .await
                .unwrap();
        }

        let history = svc.get_conversation_history(SESSION, 2).await.unwrap();
        let asked: Vec<&str> = history.iter().map(|m| m.user_message.as_str()).collect();
        assert_eq!(asked, vec!["q2", "q3"]);
        assert_eq!(history[0].context_used.0, json!({"intent": "x"}));
    }

    #[tokio::test]
    async fn saving_a_message_for_a_missing_session_fails() {
        let svc = service().await;
        assert!(svc.save_message(SESSION, "q", "a", json!({}), 0).await.is_err());
    }

    #[tokio::test]
    async fn context_updates_merge_instead_of_replacing() {
        let svc = service().await;
        svc.update_user_context(SESSION, &update(json!({"preferences": {"risk": "low", "horizon": "long"}})))
            .await
            .unwrap();
        svc.update_user_context(SESSION, &update(json!({"preferences": {"risk": "high"}})))
            .await
            .unwrap();

        let ctx = svc.get_user_context(SESSION).await.unwrap().unwrap();
        assert_eq!(
            Value::Object(ctx.user_preferences.0.clone()),
            json!({"risk": "high", "horizon": "long"})
        );
        assert!(ctx.portfolio_data.0.is_empty());

        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM user_contexts WHERE session_id = ?1")
            .bind(SESSION)
            .fetch_one(svc.database.pool())
            .await
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn learning_progress_defaults_then_reflects_updates() {
        let svc = service().await;
        assert_eq!(svc.get_user_learning_progress(SESSION).await, LearningProgress::default());

        svc.update_user_context(SESSION, &update(json!({"learning_progress": {"level": "advanced"}})))
            .await
            .unwrap();
        let progress = svc.get_user_learning_progress(SESSION).await;
        assert_eq!(progress.level, "advanced");
        assert_eq!(progress.preferred_learning_style, "conversational");
    }

    #[tokio::test]
    async fn stored_portfolio_surfaces_in_session_context() {
        let svc = service().await;
        svc.create_or_update_session(SESSION, 2, "general").await.unwrap();
        svc.update_user_context(SESSION, &update(json!({"portfolio_data": {"total_value": 10}})))
            .await
            .unwrap();

        let ctx = svc.get_session_context(SESSION).await.unwrap().unwrap();
        assert_eq!(ctx.stored_portfolio().unwrap()["total_value"], 10);
    }

    #[test]
    fn keyword_extraction_reports_every_matching_category() {
        let ctx = ContextService::extract_context_from_message(
            "Explain how bitcoin and treasury yields compare today",
        );
        assert_eq!(ctx.mentioned_instruments, vec!["crypto", "bonds"]);
        assert_eq!(ctx.detected_intents, vec!["learning", "current_market"]);
    }

    #[test]
    fn keyword_extraction_is_substring_based() {
        // "shares" hits "share"; "known" hits "now"
        let ctx = ContextService::extract_context_from_message("Shares I have known");
        assert_eq!(ctx.mentioned_instruments, vec!["stocks"]);
        assert_eq!(ctx.detected_intents, vec!["current_market"]);

        let none = ContextService::extract_context_from_message("hello there");
        assert!(none.mentioned_instruments.is_empty());
        assert!(none.detected_intents.is_empty());
    }
}
