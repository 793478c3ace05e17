//! Signed session tokens. The chat endpoints only ever see the
//! `(session_id, tier)` pair carried inside the token.

use crate::{
    config::AppConfig,
    error::{AppError, Result},
    models::Tier,
    validators, AppState,
};
use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{header, request::Parts, HeaderMap},
};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

pub const SESSION_COOKIE: &str = "finchat_session";

#[derive(Debug, Serialize, Deserialize)]
pub struct SessionClaims {
    pub sid: String,
    pub tier: Tier,
    pub exp: i64,
    pub iat: i64,
}

pub struct SessionService {
    secret: String,
    expiration_hours: i64,
}

impl SessionService {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            secret: config.session.secret.clone(),
            expiration_hours: config.session.expiration_hours,
        }
    }

    pub fn issue_token(&self, session_id: &str, tier: Tier) -> Result<String> {
        let now = Utc::now();
        let exp = now + Duration::hours(self.expiration_hours);

        let claims = SessionClaims {
            sid: session_id.to_string(),
            tier,
            exp: exp.timestamp(),
            iat: now.timestamp(),
        };

        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.secret.as_ref()),
        )
        .map_err(|e| AppError::Internal(format!("Token generation failed: {}", e)))
    }

    pub fn verify_token(&self, token: &str) -> Result<SessionClaims> {
        decode::<SessionClaims>(
            token,
            &DecodingKey::from_secret(self.secret.as_ref()),
            &Validation::default(),
        )
        .map(|token_data| token_data.claims)
        .map_err(|e| AppError::Unauthorized(format!("Session token rejected: {}", e)))
    }

    pub fn cookie(&self, token: &str) -> String {
        format!(
            "{}={}; Path=/; HttpOnly; SameSite=Lax; Max-Age={}",
            SESSION_COOKIE,
            token,
            self.expiration_hours * 3600
        )
    }
}

/// Cookie first, then `Authorization: Bearer`.
pub fn token_from_headers(headers: &HeaderMap) -> Option<String> {
    let from_cookie = headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|raw| raw.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE)
        .map(|(_, value)| value.to_string());

    from_cookie.or_else(|| {
        headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .map(|token| token.trim().to_string())
    })
}

/// The caller's session as established by the session token.
#[derive(Debug, Clone)]
pub struct ChatSessionId {
    pub session_id: String,
    pub tier: Tier,
}

#[async_trait]
impl FromRequestParts<AppState> for ChatSessionId {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self> {
        let token = token_from_headers(&parts.headers)
            .ok_or_else(|| AppError::InvalidInput("No session found".to_string()))?;

        let claims = state.services.sessions.verify_token(&token).map_err(|e| {
            tracing::warn!("{}", e);
            AppError::InvalidInput("No session found".to_string())
        })?;

        if !validators::validate_session_id(&claims.sid) {
            return Err(AppError::InvalidInput("No session found".to_string()));
        }

        Ok(Self {
            session_id: claims.sid,
            tier: validators::clamp_tier(i64::from(claims.tier)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn service() -> SessionService {
        SessionService {
            secret: "test-secret".to_string(),
            expiration_hours: 1,
        }
    }

    #[test]
    fn token_round_trips_claims() {
        let svc = service();
        let token = svc
            .issue_token("123e4567-e89b-12d3-a456-426614174000", 3)
            .unwrap();
        let claims = svc.verify_token(&token).unwrap();
        assert_eq!(claims.sid, "123e4567-e89b-12d3-a456-426614174000");
        assert_eq!(claims.tier, 3);
    }

    #[test]
    fn foreign_signature_is_rejected() {
        let other = SessionService {
            secret: "other".to_string(),
            expiration_hours: 1,
        };
        let token = other.issue_token("abc", 1).unwrap();
        assert!(matches!(
            service().verify_token(&token),
            Err(AppError::Unauthorized(_))
        ));
    }

    #[test]
    fn token_is_read_from_cookie_or_bearer() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_static("theme=dark; finchat_session=tok123"),
        );
        assert_eq!(token_from_headers(&headers).as_deref(), Some("tok123"));

        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer tok456"));
        assert_eq!(token_from_headers(&headers).as_deref(), Some("tok456"));

        assert!(token_from_headers(&HeaderMap::new()).is_none());
    }

    #[test]
    fn cookie_carries_lifetime() {
        let cookie = service().cookie("tok");
        assert!(cookie.starts_with("finchat_session=tok;"));
        assert!(cookie.contains("Max-Age=3600"));
    }
}
