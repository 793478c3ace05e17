use crate::{
    llm::{CompletionRequest, LlmProvider, PromptMessage},
    models::*,
    prompts,
};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, error, warn};

const CLASSIFY_MAX_TOKENS: u32 = 200;
const CLASSIFY_TEMPERATURE: f32 = 0.3;
const CONTENT_TEMPERATURE: f32 = 0.8;

const QUERY_APOLOGY: &str =
    "I'm sorry, I'm having trouble processing your request right now. Please try again later.";
const EDUCATION_APOLOGY: &str =
    "I'm sorry, I couldn't generate educational content right now. Please try again later.";
const PORTFOLIO_APOLOGY: &str =
    "I'm sorry, I couldn't analyze your portfolio question right now. Please try again later.";
const MARKET_APOLOGY: &str =
    "I'm sorry, I couldn't interpret the market data right now. Please try again later.";

/// Every method absorbs provider failures: callers get a routable
/// classification or an `AiReply` whose `error` is set.
pub struct OpenAIService {
    provider: Arc<dyn LlmProvider>,
    model: String,
}

impl OpenAIService {
    pub fn new(provider: Arc<dyn LlmProvider>, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
        }
    }

    pub async fn classify_intent(&self, message: &str) -> IntentClassification {
        let request = CompletionRequest {
            model: self.model.clone(),
            messages: vec![
                PromptMessage::system(prompts::CLASSIFIER_PROMPT),
                PromptMessage::user(message),
            ],
            max_tokens: CLASSIFY_MAX_TOKENS,
            temperature: CLASSIFY_TEMPERATURE,
            json_object: true,
        };

        let completion = match self.provider.chat_completion(request).await {
            Ok(completion) => completion,
            Err(e) => {
                error!("Intent classification failed: {}", e);
                return IntentClassification::fallback();
            }
        };

        match serde_json::from_str::<IntentClassification>(&completion.content) {
            Ok(classification) => {
                debug!(
                    "Classified message as {} ({:.2})",
                    classification.intent.as_str(),
                    classification.confidence
                );
                classification
            }
            Err(e) => {
                warn!("Unparseable classification payload: {}", e);
                IntentClassification::fallback()
            }
        }
    }

    pub async fn process_financial_query(&self, message: &str, context: &SessionContext) -> AiReply {
        let system = prompts::financial_assistant_prompt(context);
        self.generate(system, message.to_string(), 1000, QUERY_APOLOGY)
            .await
    }

    pub async fn generate_educational_response(
        &self,
        topic: &str,
        user_level: &str,
        context: &SessionContext,
    ) -> AiReply {
        let system = prompts::educational_prompt(user_level, context);
        self.generate(system, prompts::educational_request(topic), 1200, EDUCATION_APOLOGY)
            .await
    }

    pub async fn analyze_portfolio_question(
        &self,
        message: &str,
        portfolio: &Value,
        context: &SessionContext,
    ) -> AiReply {
        let system = prompts::portfolio_analysis_prompt(portfolio, context);
        self.generate(system, message.to_string(), 1000, PORTFOLIO_APOLOGY)
            .await
    }

    pub async fn interpret_market_data(&self, market_data: &MarketOverview, query: &str) -> AiReply {
        let system = prompts::market_interpretation_prompt(market_data);
        self.generate(system, query.to_string(), 800, MARKET_APOLOGY)
            .await
    }

    async fn generate(
        &self,
        system: String,
        user: String,
        max_tokens: u32,
        apology: &str,
    ) -> AiReply {
        let request = CompletionRequest {
            model: self.model.clone(),
            messages: vec![PromptMessage::system(system), PromptMessage::user(user)],
            max_tokens,
            temperature: CONTENT_TEMPERATURE,
            json_object: false,
        };

        match self.provider.chat_completion(request).await {
            Ok(completion) => AiReply {
                response: completion.content,
                model_used: Some(completion.model),
                tokens_used: completion.total_tokens,
                error: None,
            },
            Err(e) => {
                error!("Completion failed: {}", e);
                AiReply {
                    response: apology.to_string(),
                    model_used: None,
                    tokens_used: 0,
                    error: Some(e.to_string()),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::bare_context;
    use crate::error::AppError;
    use crate::llm::{testing::ScriptedProvider, Role};
    use chrono::Utc;
    use sqlx::types::Json;

    fn service(provider: Arc<ScriptedProvider>) -> OpenAIService {
        OpenAIService::new(provider, "gpt-4o")
    }

    fn context() -> SessionContext {
        bare_context(ChatSession {
            id: "s".to_string(),
            user_id: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            context_data: Json(serde_json::json!({})),
            session_type: "general".to_string(),
            user_tier: 1,
        })
    }

    #[tokio::test]
    async fn classification_uses_low_temperature_json_mode() {
        let provider = Arc::new(ScriptedProvider::new(vec![Ok(
            r#"{"intent":"educational","confidence":0.9,"keywords":["bond"],"requires_context":false}"#
                .to_string(),
        )]));
        let ai = service(provider.clone());

        let result = ai.classify_intent("explain bonds").await;
        assert_eq!(result.intent, Intent::Educational);

        let sent = provider.recorded();
        assert_eq!(sent[0].max_tokens, 200);
        assert_eq!(sent[0].temperature, 0.3);
        assert!(sent[0].json_object);
        assert_eq!(sent[0].messages[0].role, Role::System);
        assert_eq!(sent[0].messages[1].content, "explain bonds");
    }

    #[tokio::test]
    async fn classification_falls_back_on_provider_error() {
        let provider = Arc::new(ScriptedProvider::new(vec![Err(AppError::ProviderDegraded(
            "boom".to_string(),
        ))]));
        let result = service(provider).classify_intent("hi").await;
        assert_eq!(result, IntentClassification::fallback());
    }

    #[tokio::test]
    async fn classification_falls_back_on_garbage() {
        let provider = Arc::new(ScriptedProvider::new(vec![Ok("not json".to_string())]));
        let result = service(provider).classify_intent("hi").await;
        assert_eq!(result.intent, Intent::GeneralFinancial);
        assert_eq!(result.confidence, 0.5);
    }

    #[tokio::test]
    async fn content_call_reports_usage() {
        let provider = Arc::new(ScriptedProvider::new(vec![Ok("A stock is...".to_string())]));
        let ai = service(provider.clone());

        let reply = ai.process_financial_query("What is a stock?", &context()).await;
        assert_eq!(reply.response, "A stock is...");
        assert_eq!(reply.tokens_used, 42);
        assert!(!reply.is_degraded());

        let sent = provider.recorded();
        assert_eq!(sent[0].max_tokens, 1000);
        assert_eq!(sent[0].temperature, 0.8);
        assert!(!sent[0].json_object);
    }

    #[tokio::test]
    async fn content_failure_returns_apology() {
        let provider = Arc::new(ScriptedProvider::new(vec![]));
        let ai = service(provider.clone());

        let reply = ai.generate_educational_response("bonds", "beginner", &context()).await;
        assert_eq!(reply.response, EDUCATION_APOLOGY);
        assert!(reply.is_degraded());
        assert_eq!(reply.tokens_used, 0);
        assert_eq!(provider.recorded()[0].max_tokens, 1200);
    }
}
