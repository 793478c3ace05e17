//! Pure checks on inbound payloads and identifiers.

use crate::{
    error::{AppError, Result},
    models::{ContextUpdate, JsonMap, Tier, MAX_TIER},
};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

pub const MAX_MESSAGE_CHARS: usize = 5000;

const CONTEXT_FIELDS: [&str; 4] = [
    "preferences",
    "portfolio_data",
    "recent_activity",
    "learning_progress",
];

static UUID_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}$")
        .expect("uuid pattern compiles")
});

static SYMBOL_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Z]{1,5}$").expect("symbol pattern compiles"));

static HARMFUL_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"<script",
        r"javascript:",
        r"on\w+\s*=",
        r"eval\s*\(",
        r"document\.",
        r"window\.",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("harmful-content pattern compiles"))
    .collect()
});

/// Checks a chat payload and returns the trimmed message.
pub fn validate_message(payload: &Value) -> Result<String> {
    let object = payload
        .as_object()
        .ok_or_else(|| AppError::InvalidInput("Invalid data format".to_string()))?;

    let message = match object.get("message") {
        None => return Err(AppError::InvalidInput("Message field is required".to_string())),
        Some(Value::String(s)) => s,
        Some(_) => return Err(AppError::InvalidInput("Message must be a string".to_string())),
    };

    if message.trim().is_empty() {
        return Err(AppError::InvalidInput("Message cannot be empty".to_string()));
    }

    if message.chars().count() > MAX_MESSAGE_CHARS {
        return Err(AppError::InvalidInput(format!(
            "Message too long (max {} characters)",
            MAX_MESSAGE_CHARS
        )));
    }

    if contains_harmful_content(message) {
        return Err(AppError::InvalidInput(
            "Message contains inappropriate content".to_string(),
        ));
    }

    Ok(message.trim().to_string())
}

pub fn validate_session_id(session_id: &str) -> bool {
    UUID_PATTERN.is_match(session_id)
}

/// Only the four context sections are accepted, and each must be an object.
pub fn validate_context_update(payload: &Value) -> Result<ContextUpdate> {
    let object = payload
        .as_object()
        .ok_or_else(|| AppError::InvalidInput("Invalid data format".to_string()))?;

    if let Some(field) = object.keys().find(|k| !CONTEXT_FIELDS.contains(&k.as_str())) {
        return Err(AppError::InvalidField(format!("Invalid field: {}", field)));
    }

    Ok(ContextUpdate {
        preferences: section(object, "preferences", "Preferences")?,
        portfolio_data: section(object, "portfolio_data", "Portfolio data")?,
        recent_activity: section(object, "recent_activity", "Recent activity")?,
        learning_progress: section(object, "learning_progress", "Learning progress")?,
    })
}

fn section(object: &JsonMap, field: &str, label: &str) -> Result<Option<JsonMap>> {
    match object.get(field) {
        None => Ok(None),
        Some(Value::Object(map)) => Ok(Some(map.clone())),
        Some(_) => Err(AppError::InvalidInput(format!(
            "{} must be a dictionary",
            label
        ))),
    }
}

pub fn validate_portfolio(payload: &Value) -> Result<()> {
    let object = payload
        .as_object()
        .ok_or_else(|| AppError::InvalidInput("Portfolio data must be a dictionary".to_string()))?;

    for field in ["positions", "total_value"] {
        if !object.contains_key(field) {
            return Err(AppError::InvalidInput(format!(
                "Missing required field: {}",
                field
            )));
        }
    }

    let positions = object["positions"]
        .as_array()
        .ok_or_else(|| AppError::InvalidInput("Positions must be a list".to_string()))?;

    for position in positions {
        let position = position.as_object().ok_or_else(|| {
            AppError::InvalidInput("Each position must be a dictionary".to_string())
        })?;
        for field in ["symbol", "quantity", "price"] {
            if !position.contains_key(field) {
                return Err(AppError::InvalidInput(format!(
                    "Missing position field: {}",
                    field
                )));
            }
        }
    }

    match object["total_value"].as_f64() {
        Some(total) if total >= 0.0 => Ok(()),
        _ => Err(AppError::InvalidInput(
            "Total value must be a non-negative number".to_string(),
        )),
    }
}

pub fn validate_financial_symbol(symbol: &str) -> bool {
    SYMBOL_PATTERN.is_match(&symbol.to_uppercase())
}

pub fn validate_user_tier(tier: i64) -> bool {
    (1..=i64::from(MAX_TIER)).contains(&tier)
}

pub fn clamp_tier(tier: i64) -> Tier {
    if validate_user_tier(tier) {
        tier as Tier
    } else {
        1
    }
}

/// Strips markup-ish characters and caps the length.
pub fn sanitize_input(text: &str) -> String {
    let stripped: String = text
        .chars()
        .filter(|c| !matches!(c, '<' | '>' | '"' | '\''))
        .take(MAX_MESSAGE_CHARS)
        .collect();
    stripped.trim().to_string()
}

pub fn contains_harmful_content(text: &str) -> bool {
    let lowered = text.to_lowercase();
    HARMFUL_PATTERNS.iter().any(|re| re.is_match(&lowered))
}

pub fn validate_news_query(params: &Value) -> Result<()> {
    let object = params
        .as_object()
        .ok_or_else(|| AppError::InvalidInput("Parameters must be a dictionary".to_string()))?;

    if let Some(limit) = object.get("limit") {
        match limit.as_i64() {
            Some(n) if (1..=100).contains(&n) => {}
            _ => {
                return Err(AppError::InvalidInput(
                    "Limit must be between 1 and 100".to_string(),
                ))
            }
        }
    }

    if let Some(symbols) = object.get("symbols") {
        let symbols = symbols
            .as_array()
            .ok_or_else(|| AppError::InvalidInput("Symbols must be a list".to_string()))?;
        for symbol in symbols {
            match symbol.as_str() {
                Some(s) if validate_financial_symbol(s) => {}
                _ => {
                    return Err(AppError::InvalidInput(format!(
                        "Invalid symbol format: {}",
                        symbol
                    )))
                }
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn message_is_trimmed() {
        let msg = validate_message(&json!({"message": "  What is a stock?  "})).unwrap();
        assert_eq!(msg, "What is a stock?");
    }

    #[test]
    fn message_length_boundary() {
        let exact = "a".repeat(5000);
        assert!(validate_message(&json!({ "message": exact })).is_ok());

        let over = "a".repeat(5001);
        assert!(matches!(
            validate_message(&json!({ "message": over })),
            Err(AppError::InvalidInput(_))
        ));
    }

    #[test]
    fn empty_and_whitespace_messages_are_rejected() {
        assert!(validate_message(&json!({"message": ""})).is_err());
        assert!(validate_message(&json!({"message": " \n\t "})).is_err());
    }

    #[test]
    fn structural_failures() {
        assert!(validate_message(&json!(["message"])).is_err());
        assert!(validate_message(&json!({"text": "hi"})).is_err());
        assert!(validate_message(&json!({"message": 42})).is_err());
    }

    #[test]
    fn script_tags_rejected_in_any_case() {
        assert!(validate_message(&json!({"message": "hi <script>alert(1)"})).is_err());
        assert!(validate_message(&json!({"message": "hi <SCRIPT src=x>"})).is_err());
        assert!(validate_message(&json!({"message": "hi <ScRiPt"})).is_err());
    }

    #[test]
    fn other_harmful_patterns() {
        assert!(contains_harmful_content("click JavaScript:void(0)"));
        assert!(contains_harmful_content("<img onerror = x>"));
        assert!(contains_harmful_content("eval (payload)"));
        assert!(contains_harmful_content("read document.cookie"));
        assert!(contains_harmful_content("window.location"));
        assert!(!contains_harmful_content("Should I buy bonds this year?"));
    }

    #[test]
    fn session_id_format() {
        assert!(validate_session_id("123e4567-e89b-12d3-a456-426614174000"));
        assert!(!validate_session_id("123e4567e89b12d3a456426614174000"));
        assert!(!validate_session_id("123e4567-e89b-12d3-a456-42661417400"));
        assert!(!validate_session_id("zzze4567-e89b-12d3-a456-426614174000"));
        assert!(!validate_session_id(""));
    }

    #[test]
    fn context_update_allowlist() {
        let update = validate_context_update(&json!({
            "preferences": {"risk": "low"},
            "learning_progress": {"level": "intermediate"}
        }))
        .unwrap();
        assert_eq!(update.preferences.unwrap()["risk"], "low");
        assert!(update.portfolio_data.is_none());

        assert!(matches!(
            validate_context_update(&json!({"nickname": {}})),
            Err(AppError::InvalidField(_))
        ));
        assert!(matches!(
            validate_context_update(&json!({"preferences": "low"})),
            Err(AppError::InvalidInput(_))
        ));
    }

    #[test]
    fn portfolio_shape() {
        let good = json!({
            "positions": [{"symbol": "AAPL", "quantity": 10, "price": 180.0}],
            "total_value": 1800.0
        });
        assert!(validate_portfolio(&good).is_ok());

        let negative = json!({"positions": [], "total_value": -1});
        assert!(validate_portfolio(&negative).is_err());

        let missing_price = json!({
            "positions": [{"symbol": "AAPL", "quantity": 10}],
            "total_value": 10
        });
        assert!(validate_portfolio(&missing_price).is_err());

        assert!(validate_portfolio(&json!({"positions": []})).is_err());
        assert!(validate_portfolio(&json!({"positions": [], "total_value": "lots"})).is_err());
    }

    #[test]
    fn symbols_and_tiers() {
        assert!(validate_financial_symbol("aapl"));
        assert!(validate_financial_symbol("SPY"));
        assert!(!validate_financial_symbol("TOOLONG"));
        assert!(!validate_financial_symbol("BRK.B"));

        assert!(validate_user_tier(1));
        assert!(validate_user_tier(7));
        assert!(!validate_user_tier(0));
        assert!(!validate_user_tier(8));
        assert_eq!(clamp_tier(9), 1);
        assert_eq!(clamp_tier(4), 4);
    }

    #[test]
    fn sanitize_strips_and_caps() {
        assert_eq!(sanitize_input("  <b>\"hi\"</b> "), "bhi/b");
        assert_eq!(sanitize_input(&"x".repeat(6000)).len(), 5000);
    }

    #[test]
    fn news_query_bounds() {
        assert!(validate_news_query(&json!({"limit": 10, "symbols": ["AAPL"]})).is_ok());
        assert!(validate_news_query(&json!({"limit": 0})).is_err());
        assert!(validate_news_query(&json!({"limit": 101})).is_err());
        assert!(validate_news_query(&json!({"symbols": ["BRK.B"]})).is_err());
        assert!(validate_news_query(&json!({"symbols": "AAPL"})).is_err());
    }
}
