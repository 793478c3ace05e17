use crate::{
    error::{AppError, Result},
    models::*,
    session::ChatSessionId,
    validators, AppState,
};
use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json},
};
use chrono::Utc;
use serde_json::{json, Value};
use tracing::info;
use uuid::Uuid;

const DEFAULT_HISTORY_LIMIT: i64 = 20;
const MAX_HISTORY_LIMIT: i64 = 100;

const FREE_SUGGESTIONS: [&str; 4] = [
    "What is a stock?",
    "Explain market volatility",
    "How do I start investing?",
    "What are the major stock indices?",
];

const PRO_SUGGESTIONS: [&str; 4] = [
    "Analyze my portfolio performance",
    "What's happening in the market today?",
    "Explain dividend investing",
    "How do I diversify my portfolio?",
];

const ADVANCED_SUGGESTIONS: [&str; 4] = [
    "Provide advanced market analysis",
    "Create a custom investment strategy",
    "Analyze sector performance trends",
    "Explain options trading strategies",
];

pub async fn health_check(State(state): State<AppState>) -> Result<impl IntoResponse> {
    let db_healthy = state.database.health_check().await.unwrap_or(false);
    let store_backend = state
        .services
        .store
        .as_ref()
        .map(|store| store.backend_name().to_string());
    let store_healthy = match state.services.store.as_ref() {
        Some(store) => store.ping().await.is_ok(),
        None => false,
    };

    let status = if db_healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let response = json!({
        "status": if db_healthy { "ok" } else { "degraded" },
        "timestamp": Utc::now(),
        "database": db_healthy,
        "cache": store_healthy,
        "cache_backend": store_backend,
        "version": env!("CARGO_PKG_VERSION")
    });

    Ok((status, Json(response)))
}

pub async fn create_session(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<impl IntoResponse> {
    // An empty body starts a default session; anything else must parse.
    let request: NewSessionRequest = if body.iter().all(u8::is_ascii_whitespace) {
        NewSessionRequest::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| AppError::InvalidInput(format!("Invalid session request: {}", e)))?
    };

    let raw_tier = request.tier.unwrap_or(i64::from(DEFAULT_TIER));
    let tier = match Tier::try_from(raw_tier) {
        Ok(tier) if validators::validate_user_tier(raw_tier) => tier,
        _ => {
            return Err(AppError::InvalidInput(format!(
                "Tier must be between 1 and {}",
                MAX_TIER
            )))
        }
    };

    let session_id = Uuid::new_v4().to_string();
    state
        .services
        .context
        .upsert_session(&session_id, request.user_id.as_deref(), tier, "general")
        .await?;

    let token = state.services.sessions.issue_token(&session_id, tier)?;
    let cookie = state.services.sessions.cookie(&token);
    info!("Session {} started at tier {}", session_id, tier);

    Ok((
        StatusCode::CREATED,
        [(header::SET_COOKIE, cookie)],
        Json(NewSessionResponse {
            session_id,
            user_tier: tier,
            token,
        }),
    ))
}

pub async fn send_message(
    State(state): State<AppState>,
    session: ChatSessionId,
    payload: Option<Json<Value>>,
) -> Result<Json<ChatReply>> {
    let Some(Json(payload)) = payload else {
        return Err(AppError::InvalidInput("No data provided".to_string()));
    };

    let reply = state
        .services
        .chat
        .handle_message(&session.session_id, session.tier, &payload)
        .await?;

    Ok(Json(reply))
}

pub async fn get_history(
    State(state): State<AppState>,
    session: ChatSessionId,
    Path(session_id): Path<String>,
    Query(params): Query<HistoryQuery>,
) -> Result<Json<HistoryResponse>> {
    if !validators::validate_session_id(&session_id) {
        return Err(AppError::InvalidInput("Invalid session ID".to_string()));
    }
    if session.session_id != session_id {
        return Err(AppError::Unauthorized("Unauthorized".to_string()));
    }

    let limit = params
        .limit
        .as_deref()
        .and_then(|raw| raw.trim().parse::<i64>().ok())
        .unwrap_or(DEFAULT_HISTORY_LIMIT)
        .clamp(1, MAX_HISTORY_LIMIT);

    let history = state
        .services
        .context
        .get_conversation_history(&session_id, limit)
        .await?;

    Ok(Json(HistoryResponse {
        total_messages: history.len(),
        history,
        session_id,
    }))
}

pub async fn update_context(
    State(state): State<AppState>,
    session: ChatSessionId,
    payload: Option<Json<Value>>,
) -> Result<Json<MessageResponse>> {
    let Some(Json(payload)) = payload else {
        return Err(AppError::InvalidInput("No data provided".to_string()));
    };

    let updates = validators::validate_context_update(&payload)?;
    state
        .services
        .context
        .update_user_context(&session.session_id, &updates)
        .await?;

    Ok(Json(MessageResponse {
        message: "Context updated successfully".to_string(),
    }))
}

pub async fn get_suggestions(session: ChatSessionId) -> Json<SuggestionsResponse> {
    let suggestions = match session.tier {
        0 | 1 => FREE_SUGGESTIONS,
        2 => PRO_SUGGESTIONS,
        _ => ADVANCED_SUGGESTIONS,
    };

    Json(SuggestionsResponse {
        suggestions: suggestions.iter().map(|s| s.to_string()).collect(),
        user_tier: session.tier,
        session_id: session.session_id,
    })
}

pub async fn clear_chat(
    State(state): State<AppState>,
    session: ChatSessionId,
) -> Json<MessageResponse> {
    if state.services.cache.clear_session(&session.session_id).await {
        info!("Cleared cached responses for session {}", session.session_id);
    }

    Json(MessageResponse {
        message: "Chat history cleared successfully".to_string(),
    })
}

pub async fn get_status(
    State(state): State<AppState>,
    session: ChatSessionId,
) -> Json<StatusResponse> {
    let limiter = &state.services.rate_limiter;
    let usage_stats = limiter.usage_stats(&session.session_id).await;
    let remaining_messages = limiter
        .remaining_messages(&session.session_id, session.tier)
        .await;
    let upgrade_advice = limiter
        .tier_upgrade_advice(&session.session_id, session.tier)
        .await;

    Json(StatusResponse {
        session_id: session.session_id,
        user_tier: session.tier,
        usage_stats,
        remaining_messages,
        upgrade_advice,
        timestamp: Utc::now(),
    })
}
