//! Chat-completions client. `OpenAiProvider` speaks the OpenAI wire format,
//! which also covers compatible gateways set through `OPENAI_BASE_URL`.

use crate::{
    config::AppConfig,
    error::{AppError, Result},
};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    System,
    User,
}

#[derive(Debug, Clone)]
pub struct PromptMessage {
    pub role: Role,
    pub content: String,
}

impl PromptMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<PromptMessage>,
    pub max_tokens: u32,
    pub temperature: f32,
    /// Ask the provider for a single JSON object.
    pub json_object: bool,
}

#[derive(Debug, Clone)]
pub struct Completion {
    pub content: String,
    pub model: String,
    pub total_tokens: u32,
}

#[async_trait]
pub trait LlmProvider: Send + Sync {
    async fn chat_completion(&self, request: CompletionRequest) -> Result<Completion>;
}

pub struct OpenAiProvider {
    client: Client,
    api_key: String,
    base_url: String,
}

impl OpenAiProvider {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            client: Client::new(),
            api_key: config.openai.api_key.clone(),
            base_url: config.openai.base_url.trim_end_matches('/').to_string(),
        }
    }

    fn build_request_body(request: &CompletionRequest) -> Value {
        let messages: Vec<Value> = request
            .messages
            .iter()
            .map(|m| {
                let role = match m.role {
                    Role::System => "system",
                    Role::User => "user",
                };
                json!({ "role": role, "content": m.content })
            })
            .collect();

        let mut body = json!({
            "model": request.model,
            "messages": messages,
            "max_tokens": request.max_tokens,
            "temperature": request.temperature,
        });

        if request.json_object {
            body["response_format"] = json!({ "type": "json_object" });
        }

        body
    }
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    async fn chat_completion(&self, request: CompletionRequest) -> Result<Completion> {
        if self.api_key.is_empty() {
            return Err(AppError::ProviderDegraded(
                "OPENAI_API_KEY is not configured".to_string(),
            ));
        }

        let url = format!("{}/v1/chat/completions", self.base_url);
        let body = Self::build_request_body(&request);

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| AppError::ProviderDegraded(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            return Err(AppError::ProviderDegraded(format!("HTTP {}: {}", status, text)));
        }

        let data: ApiResponse = response
            .json()
            .await
            .map_err(|e| AppError::ProviderDegraded(e.to_string()))?;

        let choice = data
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| AppError::ProviderDegraded("No choices in response".to_string()))?;

        Ok(Completion {
            content: choice.message.content.unwrap_or_default(),
            model: data.model.unwrap_or(request.model),
            total_tokens: data.usage.map(|u| u.total_tokens).unwrap_or(0),
        })
    }
}

// ─── API response types ──────────────────────────────────────

#[derive(Deserialize)]
struct ApiResponse {
    #[serde(default)]
    model: Option<String>,
    choices: Vec<ApiChoice>,
    #[serde(default)]
    usage: Option<ApiUsage>,
}

#[derive(Deserialize)]
struct ApiChoice {
    message: ApiMessage,
}

#[derive(Deserialize)]
struct ApiMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct ApiUsage {
    total_tokens: u32,
}


#[cfg(test)]
mod tests {
    use super::*;

    fn request(json_object: bool) -> CompletionRequest {
        CompletionRequest {
            model: "gpt-4o".to_string(),
            messages: vec![PromptMessage::system("sys"), PromptMessage::user("hi")],
            max_tokens: 200,
            temperature: 0.3,
            json_object,
        }
    }

    #[test]
    fn request_body_uses_wire_roles() {
        let body = OpenAiProvider::build_request_body(&request(false));
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["content"], "hi");
        assert_eq!(body["max_tokens"], 200);
        assert!(body.get("response_format").is_none());
    }

    #[test]
    fn json_mode_sets_response_format() {
        let body = OpenAiProvider::build_request_body(&request(true));
        assert_eq!(body["response_format"]["type"], "json_object");
    }

    #[test]
    fn api_response_tolerates_missing_usage() {
        let data: ApiResponse = serde_json::from_value(json!({
            "choices": [{"message": {"content": "hello"}}]
        }))
        .unwrap();
        assert!(data.usage.is_none());
        assert_eq!(data.choices[0].message.content.as_deref(), Some("hello"));
    }
}
