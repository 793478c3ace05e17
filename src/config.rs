use crate::error::{AppError, Result};
use std::str::FromStr;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub session: SessionConfig,
    pub openai: OpenAiConfig,
    pub workers: WorkerConfig,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
}

#[derive(Debug, Clone)]
pub struct RedisConfig {
    pub url: String,
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub secret: String,
    pub expiration_hours: i64,
}

#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub max: usize,
}

impl AppConfig {
    pub fn new() -> Result<Self> {
        Ok(Self {
            server: ServerConfig {
                port: parse_var("PORT", 5000)?,
            },
            database: DatabaseConfig {
                url: string_var("DATABASE_URL", "sqlite://finchat.db?mode=rwc"),
            },
            redis: RedisConfig {
                url: string_var("REDIS_URL", "redis://localhost:6379"),
            },
            session: SessionConfig {
                secret: string_var("SESSION_SECRET", "finchat-development-session-secret"),
                expiration_hours: parse_var("SESSION_EXPIRATION_HOURS", 24)?,
            },
            openai: OpenAiConfig {
                api_key: string_var("OPENAI_API_KEY", ""),
                base_url: string_var("OPENAI_BASE_URL", "https://api.openai.com"),
                model: string_var("OPENAI_MODEL", "gpt-4o"),
            },
            workers: WorkerConfig {
                max: parse_var("CHAT_MAX_WORKERS", 10)?,
            },
        })
    }
}

fn string_var(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

fn parse_var<T: FromStr>(name: &str, default: T) -> Result<T> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| AppError::Config(format!("{} has an invalid value: {:?}", name, raw))),
        Err(_) => Ok(default),
    }
}
