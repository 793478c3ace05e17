use crate::{
    ai::OpenAIService,
    cache::CacheService,
    chat::{ChatRouter, IntentHandlers, WorkerPool},
    config::AppConfig,
    context::ContextService,
    database::Database,
    financial::FinancialDataService,
    llm::LlmProvider,
    rate_limiter::RateLimiter,
    session::SessionService,
    store::KvStore,
};
use std::sync::Arc;

/// Every service is built once here and handed to its dependents explicitly.
pub struct AppServices {
    pub store: Option<Arc<dyn KvStore>>,
    pub sessions: SessionService,
    pub cache: Arc<CacheService>,
    pub rate_limiter: Arc<RateLimiter>,
    pub context: Arc<ContextService>,
    pub chat: ChatRouter,
}

impl AppServices {
    pub fn new(
        config: &AppConfig,
        database: Arc<Database>,
        store: Option<Arc<dyn KvStore>>,
        provider: Arc<dyn LlmProvider>,
    ) -> Self {
        let cache = Arc::new(CacheService::new(store.clone()));
        let rate_limiter = Arc::new(RateLimiter::new(store.clone()));
        let context = Arc::new(ContextService::new(database));
        let financial = Arc::new(FinancialDataService::new(cache.clone()));
        let ai = Arc::new(OpenAIService::new(provider, config.openai.model.clone()));

        let handlers = Arc::new(IntentHandlers::new(ai.clone(), financial, context.clone()));
        let chat = ChatRouter::new(
            rate_limiter.clone(),
            cache.clone(),
            context.clone(),
            ai,
            handlers,
            WorkerPool::new(config.workers.max),
        );

        Self {
            store,
            sessions: SessionService::new(config),
            cache,
            rate_limiter,
            context,
            chat,
        }
    }
}
