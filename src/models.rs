use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use sqlx::types::Json;
use std::collections::BTreeMap;

pub type Tier = u8;
pub type JsonMap = Map<String, Value>;

pub const DEFAULT_TIER: Tier = 1;
pub const MAX_TIER: Tier = 7;

// ─── Persisted rows ──────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ChatSession {
    pub id: String,
    pub user_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub context_data: Json<Value>,
    pub session_type: String,
    pub user_tier: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ChatMessage {
    pub id: String,
    pub session_id: String,
    pub user_message: String,
    pub ai_response: String,
    pub timestamp: DateTime<Utc>,
    pub context_used: Json<Value>,
    pub response_time_ms: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct UserContext {
    pub id: String,
    pub session_id: String,
    pub user_preferences: Json<JsonMap>,
    pub portfolio_data: Json<JsonMap>,
    pub recent_activity: Json<JsonMap>,
    pub learning_progress: Json<JsonMap>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ─── Context records ─────────────────────────────────────────

/// Learning state used to pick the educational prompt variant. Unknown keys
/// written through a context update are kept in `extra`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LearningProgress {
    #[serde(default = "LearningProgress::default_level")]
    pub level: String,
    #[serde(default)]
    pub topics_covered: Vec<String>,
    #[serde(default = "LearningProgress::default_style")]
    pub preferred_learning_style: String,
    #[serde(default)]
    pub areas_of_interest: Vec<String>,
    #[serde(flatten)]
    pub extra: JsonMap,
}

impl LearningProgress {
    fn default_level() -> String {
        "beginner".to_string()
    }

    fn default_style() -> String {
        "conversational".to_string()
    }

    /// Reads a stored progress map, keeping the beginner defaults for any
    /// field that is missing or has the wrong shape.
    pub fn from_map(map: &JsonMap) -> Self {
        serde_json::from_value(Value::Object(map.clone())).unwrap_or_else(|_| {
            let mut progress = Self::default();
            if let Some(level) = map.get("level").and_then(Value::as_str) {
                progress.level = level.to_string();
            }
            progress
        })
    }
}

impl Default for LearningProgress {
    fn default() -> Self {
        Self {
            level: Self::default_level(),
            topics_covered: Vec::new(),
            preferred_learning_style: Self::default_style(),
            areas_of_interest: Vec::new(),
            extra: JsonMap::new(),
        }
    }
}

/// Validated body of a context update: each present section is merged into
/// the stored map of the same name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContextUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferences: Option<JsonMap>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub portfolio_data: Option<JsonMap>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recent_activity: Option<JsonMap>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub learning_progress: Option<JsonMap>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageContext {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mentioned_instruments: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub detected_intents: Vec<String>,
}

/// Read-side aggregate fed into prompt composition.
#[derive(Debug, Clone, Serialize)]
pub struct SessionContext {
    pub session_info: ChatSession,
    pub recent_messages: Vec<ChatMessage>,
    pub user_context: Option<UserContext>,
    pub conversation_length: usize,
    pub session_duration: f64,
    #[serde(flatten)]
    pub message_context: MessageContext,
}

impl SessionContext {
    pub fn user_tier(&self) -> i64 {
        self.session_info.user_tier
    }

    pub fn stored_portfolio(&self) -> Option<&JsonMap> {
        self.user_context
            .as_ref()
            .map(|ctx| &ctx.portfolio_data.0)
            .filter(|portfolio| !portfolio.is_empty())
    }
}

// ─── Intent classification ───────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    GeneralFinancial,
    Educational,
    PortfolioAnalysis,
    MarketData,
    StrategyHelp,
}

impl Intent {
    /// Unrecognised labels route as general financial questions.
    pub fn parse(label: &str) -> Self {
        match label.trim() {
            "educational" => Intent::Educational,
            "portfolio_analysis" => Intent::PortfolioAnalysis,
            "market_data" => Intent::MarketData,
            "strategy_help" => Intent::StrategyHelp,
            _ => Intent::GeneralFinancial,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Intent::GeneralFinancial => "general_financial",
            Intent::Educational => "educational",
            Intent::PortfolioAnalysis => "portfolio_analysis",
            Intent::MarketData => "market_data",
            Intent::StrategyHelp => "strategy_help",
        }
    }
}

fn lenient_intent<'de, D>(deserializer: D) -> std::result::Result<Intent, D::Error>
where
    D: Deserializer<'de>,
{
    let label = Option::<String>::deserialize(deserializer)?;
    Ok(label.map(|l| Intent::parse(&l)).unwrap_or(Intent::GeneralFinancial))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntentClassification {
    #[serde(deserialize_with = "lenient_intent", default = "IntentClassification::default_intent")]
    pub intent: Intent,
    #[serde(default = "IntentClassification::default_confidence")]
    pub confidence: f64,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub requires_context: bool,
}

impl IntentClassification {
    fn default_intent() -> Intent {
        Intent::GeneralFinancial
    }

    fn default_confidence() -> f64 {
        0.5
    }

    pub fn fallback() -> Self {
        Self {
            intent: Intent::GeneralFinancial,
            confidence: 0.5,
            keywords: Vec::new(),
            requires_context: false,
        }
    }
}

/// Generated text from one content call. `error` is set when the provider
/// failed and `response` holds the apology text instead.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiReply {
    pub response: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_used: Option<String>,
    pub tokens_used: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AiReply {
    pub fn is_degraded(&self) -> bool {
        self.error.is_some()
    }
}

/// Snapshot of what went into a turn, stored alongside the message.
#[derive(Debug, Clone, Serialize)]
pub struct ContextUsed {
    pub intent: IntentClassification,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub market_data: Option<MarketOverview>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub portfolio_data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub learning_level: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
}

impl ContextUsed {
    pub fn for_intent(intent: IntentClassification) -> Self {
        Self {
            intent,
            market_data: None,
            portfolio_data: None,
            learning_level: None,
            topic: None,
        }
    }
}

// ─── Usage ───────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageStats {
    pub daily_messages_used: u64,
    pub rate_limit_usage: u64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierAdvice {
    pub beneficial: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_usage: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_limit: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage_percentage: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recommended_tier: Option<Tier>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_tier_limit: Option<u64>,
    pub reason: String,
}

// ─── Market data ─────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataEnvelope<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub source: String,
}

impl<T> DataEnvelope<T> {
    pub fn ok(data: T, source: &str) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            source: source.to_string(),
        }
    }

    pub fn failed(error: impl Into<String>, source: &str) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
            source: source.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StockQuote {
    pub symbol: String,
    pub price: f64,
    pub change: f64,
    pub change_percent: f64,
    pub volume: u64,
    pub previous_close: f64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub timestamp: DateTime<Utc>,
    pub market_cap: u64,
    pub pe_ratio: f64,
    pub dividend_yield: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexQuote {
    pub price: f64,
    pub change: f64,
    pub change_percent: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SectorMove {
    pub change_percent: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketOverview {
    pub indices: BTreeMap<String, IndexQuote>,
    pub sectors: BTreeMap<String, SectorMove>,
    pub market_sentiment: String,
    pub vix: f64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Performer {
    pub symbol: String,
    #[serde(rename = "return")]
    pub return_percent: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortfolioAnalysis {
    pub total_value: f64,
    pub daily_change: f64,
    pub daily_change_percent: f64,
    pub diversification_score: f64,
    pub risk_level: String,
    pub sectors: BTreeMap<String, f64>,
    pub top_performers: Vec<Performer>,
    pub recommendations: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewsArticle {
    pub title: String,
    pub description: String,
    pub source: String,
    pub published_at: DateTime<Utc>,
    pub url: String,
    pub sentiment: String,
    pub relevance_score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EconomicIndicators {
    pub unemployment_rate: f64,
    pub inflation_rate: f64,
    pub gdp_growth: f64,
    pub consumer_confidence: f64,
    pub interest_rate: f64,
    pub dollar_index: f64,
    pub oil_price: f64,
    pub gold_price: f64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstrumentMatch {
    pub symbol: String,
    pub name: String,
    #[serde(rename = "type")]
    pub instrument_type: String,
    pub exchange: String,
    pub price: f64,
    pub change_percent: f64,
}

// ─── HTTP bodies ─────────────────────────────────────────────

#[derive(Debug, Serialize, Deserialize)]
pub struct ChatReply {
    pub response: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_time_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub intent: Option<Intent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context_used: Option<bool>,
    pub timestamp: DateTime<Utc>,
    pub cached: bool,
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HistoryResponse {
    pub history: Vec<ChatMessage>,
    pub session_id: String,
    pub total_messages: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SuggestionsResponse {
    pub suggestions: Vec<String>,
    pub user_tier: Tier,
    pub session_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    pub session_id: String,
    pub user_tier: Tier,
    pub usage_stats: Option<UsageStats>,
    pub remaining_messages: u64,
    pub upgrade_advice: TierAdvice,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MessageResponse {
    pub message: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct NewSessionRequest {
    pub tier: Option<i64>,
    pub user_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct NewSessionResponse {
    pub session_id: String,
    pub user_tier: Tier,
    pub token: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn unknown_intent_label_routes_as_general() {
        let parsed: IntentClassification = serde_json::from_value(json!({
            "intent": "crystal_ball",
            "confidence": 0.9,
            "keywords": ["future"],
            "requires_context": true
        }))
        .unwrap();
        assert_eq!(parsed.intent, Intent::GeneralFinancial);
        assert_eq!(parsed.keywords, vec!["future".to_string()]);
    }

    #[test]
    fn classification_fills_missing_fields() {
        let parsed: IntentClassification =
            serde_json::from_value(json!({"intent": "market_data"})).unwrap();
        assert_eq!(parsed.intent, Intent::MarketData);
        assert_eq!(parsed.confidence, 0.5);
        assert!(!parsed.requires_context);
    }

    #[test]
    fn learning_progress_defaults_to_beginner() {
        let progress = LearningProgress::from_map(&JsonMap::new());
        assert_eq!(progress, LearningProgress::default());
        assert_eq!(progress.level, "beginner");
        assert_eq!(progress.preferred_learning_style, "conversational");
    }

    #[test]
    fn learning_progress_keeps_level_when_other_fields_are_malformed() {
        let map = json!({"level": "advanced", "topics_covered": "bonds"});
        let progress = LearningProgress::from_map(map.as_object().unwrap());
        assert_eq!(progress.level, "advanced");
        assert!(progress.topics_covered.is_empty());
    }

    #[test]
    fn envelope_omits_absent_fields() {
        let env: DataEnvelope<u32> = DataEnvelope::failed("down", "mock");
        let value = serde_json::to_value(&env).unwrap();
        assert_eq!(value, json!({"success": false, "error": "down", "source": "mock"}));
    }
}
