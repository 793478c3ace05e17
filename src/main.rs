use finchat::{
    build_router,
    config::AppConfig,
    database::Database,
    llm::OpenAiProvider,
    services::AppServices,
    store::{KvStore, MemoryStore, RedisStore},
    AppState,
};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "finchat=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = AppConfig::new()?;
    let database = Arc::new(Database::new(&config).await?);

    // Without a store the limiter allows everything and the cache always misses.
    let store: Option<Arc<dyn KvStore>> = if config.redis.url.starts_with("memory:") {
        tracing::info!("Using the in-process store; counters reset on restart");
        Some(Arc::new(MemoryStore::new()))
    } else {
        match RedisStore::new(&config).await {
            Ok(store) => Some(Arc::new(store)),
            Err(e) => {
                tracing::warn!("Redis unavailable, running without rate limits or caching: {}", e);
                None
            }
        }
    };

    if config.openai.api_key.is_empty() {
        tracing::warn!("OPENAI_API_KEY is not set; answers will be fallback messages");
    }
    let provider = Arc::new(OpenAiProvider::new(&config));

    let services = Arc::new(AppServices::new(&config, database.clone(), store, provider));
    let app = build_router(AppState { database, services });

    let port = config.server.port;
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;

    tracing::info!("Server starting on port {}", port);

    axum::serve(listener, app).await?;

    Ok(())
}
