//! Bearer-token authentication for the MCP endpoint.

use axum::{
    body::Body,
    extract::State,
    http::{header, Request, StatusCode},
    middleware::Next,
    response::Response,
};
use subtle::ConstantTimeEq;

use crate::config::ServerConfig;

/// Authentication settings for the HTTP transport.
#[derive(Clone, Debug, Default)]
pub struct SecurityConfig {
    /// Token expected in `Authorization: Bearer <token>` (from WORKSYNC_API_KEY)
    pub api_key: Option<String>,
}

impl SecurityConfig {
    /// Load security configuration from environment variables.
    pub fn from_env() -> Self {
        Self::from_server_config(&ServerConfig::from_env())
    }

    pub fn from_server_config(config: &ServerConfig) -> Self {
        Self {
            api_key: config.api_key.clone(),
        }
    }

    /// No authentication (local debugging and tests).
    pub fn disabled() -> Self {
        Self { api_key: None }
    }

    pub fn with_api_key(key: impl Into<String>) -> Self {
        Self {
            api_key: Some(key.into()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.api_key.is_some()
    }
}

/// Rejects requests without the configured bearer token.
pub async fn auth_middleware(
    State(config): State<SecurityConfig>,
    request: Request<Body>,
    next: Next,
) -> Result<Response, StatusCode> {
    let expected_key = match &config.api_key {
        Some(key) => key,
        None => return Ok(next.run(request).await),
    };

    let auth_header = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok());

    match auth_header.and_then(|h| h.strip_prefix("Bearer ")) {
        Some(token) if token_matches(token, expected_key) => {
            Ok(next.run(request).await)
        }
        Some(_) => {
            tracing::warn!("Invalid API key provided");
            Err(StatusCode::UNAUTHORIZED)
        }
        None if auth_header.is_some() => {
            tracing::warn!("Invalid Authorization header format");
            Err(StatusCode::UNAUTHORIZED)
        }
        None => {
            tracing::warn!("Missing Authorization header");
            Err(StatusCode::UNAUTHORIZED)
        }
    }
}

fn token_matches(token: &str, expected: &str) -> bool {
    token.as_bytes().ct_eq(expected.as_bytes()).into()
}
