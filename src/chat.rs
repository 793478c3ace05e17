//! Chat turn orchestration.
//!
//! A turn runs validate, limit check, cache lookup, session load, intent
//! classification, handler dispatch, persist, cache store and usage increment,
//! in that order. Only validation, quota and session-creation failures end a
//! turn early; the bookkeeping after an answer exists is best-effort.

use crate::{
    ai::OpenAIService,
    cache::CacheService,
    context::{bare_context, ContextService},
    error::{AppError, Result},
    financial::FinancialDataService,
    models::*,
    rate_limiter::RateLimiter,
    validators,
};
use chrono::Utc;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tracing::{error, info, warn};

pub const CLASSIFY_BUDGET: Duration = Duration::from_secs(10);
pub const HANDLER_BUDGET: Duration = Duration::from_secs(15);

const SESSION_TYPE: &str = "general";

/// Bounded pool for provider calls. Each job runs on its own task and the
/// caller waits at most `budget` for it.
#[derive(Clone)]
pub struct WorkerPool {
    permits: Arc<Semaphore>,
}

impl WorkerPool {
    pub fn new(max_workers: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(max_workers.max(1))),
        }
    }

    pub async fn run<F, T>(&self, label: &str, budget: Duration, job: F) -> Result<T>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let permits = self.permits.clone();
        let mut task = tokio::spawn(async move {
            let _permit = permits.acquire_owned().await.ok();
            job.await
        });

        match tokio::time::timeout(budget, &mut task).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(AppError::Internal(format!("{} worker failed: {}", label, e))),
            Err(_) => {
                task.abort();
                Err(AppError::Timeout(format!(
                    "{} exceeded {}s",
                    label,
                    budget.as_secs_f64()
                )))
            }
        }
    }
}

/// Intent-specific response generation. Each call makes exactly one content
/// request to the provider.
pub struct IntentHandlers {
    ai: Arc<OpenAIService>,
    financial: Arc<FinancialDataService>,
    context: Arc<ContextService>,
}

impl IntentHandlers {
    pub fn new(
        ai: Arc<OpenAIService>,
        financial: Arc<FinancialDataService>,
        context: Arc<ContextService>,
    ) -> Self {
        Self {
            ai,
            financial,
            context,
        }
    }

    pub async fn respond(
        &self,
        intent: IntentClassification,
        message: &str,
        session_context: &SessionContext,
    ) -> (AiReply, ContextUsed) {
        let mut used = ContextUsed::for_intent(intent.clone());

        match intent.intent {
            Intent::MarketData => {
                let overview = self.financial.get_market_overview().await;
                match overview.data {
                    Some(market_data) if overview.success => {
                        let reply = self.ai.interpret_market_data(&market_data, message).await;
                        used.market_data = Some(market_data);
                        return (reply, used);
                    }
                    _ => warn!(
                        "Market data unavailable ({}), answering as a general query",
                        overview.error.as_deref().unwrap_or("no data")
                    ),
                }
            }
            Intent::PortfolioAnalysis => {
                let portfolio = match session_context.stored_portfolio() {
                    Some(stored) => Some(Value::Object(stored.clone())),
                    None => self
                        .financial
                        .get_portfolio_analysis(&Value::Object(JsonMap::new()))
                        .data
                        .and_then(|analysis| serde_json::to_value(analysis).ok()),
                };

                if let Some(portfolio) = portfolio {
                    let reply = self
                        .ai
                        .analyze_portfolio_question(message, &portfolio, session_context)
                        .await;
                    used.portfolio_data = Some(portfolio);
                    return (reply, used);
                }
                warn!("No portfolio available, answering as a general query");
            }
            Intent::Educational => {
                let progress = self
                    .context
                    .get_user_learning_progress(&session_context.session_info.id)
                    .await;
                let reply = self
                    .ai
                    .generate_educational_response(message, &progress.level, session_context)
                    .await;
                used.learning_level = Some(progress.level);
                used.topic = Some(message.to_string());
                return (reply, used);
            }
            Intent::GeneralFinancial | Intent::StrategyHelp => {}
        }

        let reply = self.ai.process_financial_query(message, session_context).await;
        (reply, used)
    }
}

pub struct ChatRouter {
    rate_limiter: Arc<RateLimiter>,
    cache: Arc<CacheService>,
    context: Arc<ContextService>,
    ai: Arc<OpenAIService>,
    handlers: Arc<IntentHandlers>,
    pool: WorkerPool,
    classify_budget: Duration,
    handler_budget: Duration,
}

impl ChatRouter {
    pub fn new(
        rate_limiter: Arc<RateLimiter>,
        cache: Arc<CacheService>,
        context: Arc<ContextService>,
        ai: Arc<OpenAIService>,
        handlers: Arc<IntentHandlers>,
        pool: WorkerPool,
    ) -> Self {
        Self {
            rate_limiter,
            cache,
            context,
            ai,
            handlers,
            pool,
            classify_budget: CLASSIFY_BUDGET,
            handler_budget: HANDLER_BUDGET,
        }
    }

    pub fn with_budgets(mut self, classify: Duration, handler: Duration) -> Self {
        self.classify_budget = classify;
        self.handler_budget = handler;
        self
    }

    pub async fn handle_message(&self, session_id: &str, tier: Tier, payload: &Value) -> Result<ChatReply> {
        let message = validators::validate_message(payload)?;

        self.rate_limiter.check(session_id, tier).await?;

        if let Some(cached) = self.cache.get_cached_response(session_id, &message).await {
            info!("Returning cached response for session {}", session_id);
            return Ok(ChatReply {
                response: cached,
                response_time_ms: None,
                intent: None,
                context_used: None,
                timestamp: Utc::now(),
                cached: true,
            });
        }

        let started = Instant::now();

        let session = self
            .context
            .create_or_update_session(session_id, tier, SESSION_TYPE)
            .await?;

        let mut session_context = match self.context.get_session_context(session_id).await {
            Ok(Some(ctx)) => ctx,
            Ok(None) => bare_context(session),
            Err(e) => {
                error!("Error loading context for session {}: {}", session_id, e);
                bare_context(session)
            }
        };
        session_context.message_context = ContextService::extract_context_from_message(&message);

        let ai = self.ai.clone();
        let to_classify = message.clone();
        let intent = self
            .pool
            .run("Intent classification", self.classify_budget, async move {
                ai.classify_intent(&to_classify).await
            })
            .await?;
        let intent_kind = intent.intent;

        let handlers = self.handlers.clone();
        let to_answer = message.clone();
        let (reply, context_used) = self
            .pool
            .run("Response generation", self.handler_budget, async move {
                handlers.respond(intent, &to_answer, &session_context).await
            })
            .await?;

        let degraded = reply.is_degraded();
        if degraded {
            warn!("Degraded answer for session {}", session_id);
        }

        let response_time_ms = started.elapsed().as_millis() as u64;

        let context_value = serde_json::to_value(&context_used).unwrap_or_else(|e| {
            error!("Error serializing context for session {}: {}", session_id, e);
            Value::Object(JsonMap::new())
        });
        if let Err(e) = self
            .context
            .save_message(session_id, &message, &reply.response, context_value, response_time_ms)
            .await
        {
            error!("Failed to save message for session {}: {}", session_id, e);
        }

        // Apologies are neither cached nor charged against the quota.
        if !degraded {
            if !self
                .cache
                .cache_response(session_id, &message, &reply.response, None)
                .await
            {
                warn!("Response for session {} was not cached", session_id);
            }

            if !self.rate_limiter.increment_usage(session_id).await {
                warn!("Usage for session {} was not recorded", session_id);
            }
        }

        Ok(ChatReply {
            response: reply.response,
            response_time_ms: Some(response_time_ms),
            intent: Some(intent_kind),
            context_used: Some(true),
            timestamp: Utc::now(),
            cached: false,
        })
    }
}
