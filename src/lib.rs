pub mod ai;
pub mod api;
pub mod cache;
pub mod chat;
pub mod config;
pub mod context;
pub mod database;
pub mod error;
pub mod financial;
pub mod llm;
pub mod models;
pub mod prompts;
pub mod rate_limiter;
pub mod services;
pub mod session;
pub mod store;
pub mod validators;

use axum::{
    http::Method,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::{api::handlers, database::Database, services::AppServices};

#[derive(Clone)]
pub struct AppState {
    pub database: Arc<Database>,
    pub services: Arc<AppServices>,
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any);

    let chat = Router::new()
        .route("/chat/session", post(handlers::create_session))
        .route("/chat/message", post(handlers::send_message))
        .route("/chat/history/:session_id", get(handlers::get_history))
        .route("/chat/context/update", post(handlers::update_context))
        .route("/chat/suggestions", get(handlers::get_suggestions))
        .route("/chat/clear", post(handlers::clear_chat))
        .route("/chat/status", get(handlers::get_status));

    Router::new()
        .route("/", get(handlers::health_check))
        .route("/api/health", get(handlers::health_check))
        .nest("/api/v1", chat)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        )
        .with_state(state)
}
