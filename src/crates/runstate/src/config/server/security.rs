//! Security configuration and middleware
//!
//! Handles the open and secret-key security modes. Secret-key is the default:
//! every request must carry the key as `Authorization: Bearer <key>` or in the
//! `x-api-key` header. Open mode is an explicit opt-in for local development.

use crate::api::ApiError;
use crate::config::{SecurityConfig, SecurityMode, ServerConfigError};
use axum::extract::{Request, State};
use axum::http::HeaderMap;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use std::sync::Arc;
use tracing::warn;

/// Security middleware state
#[derive(Debug, Clone)]
pub struct SecurityState {
    mode: SecurityMode,
    secret_key: Option<Arc<str>>,
}

impl SecurityState {
    /// Build from configuration; SECRET_KEY in the environment wins over the file
    pub fn new(config: SecurityConfig) -> Self {
        let secret_key = std::env::var("SECRET_KEY").ok().or(config.secret_key);
        Self::with_key(config.mode, secret_key)
    }

    pub fn with_key(mode: SecurityMode, secret_key: Option<String>) -> Self {
        Self {
            mode,
            secret_key: secret_key.filter(|k| !k.is_empty()).map(Arc::from),
        }
    }

    /// No authentication at all
    pub fn open() -> Self {
        Self::with_key(SecurityMode::Open, None)
    }

    pub fn mode(&self) -> SecurityMode {
        self.mode
    }

    /// Refuse a secret-key setup that no request could ever pass
    pub fn ensure_configured(&self) -> Result<(), ServerConfigError> {
        if self.mode == SecurityMode::SecretKey && self.secret_key.is_none() {
            return Err(ServerConfigError::InvalidConfig(
                "security mode is secret-key but no key is set; set SECRET_KEY or [security] secret_key, \
                 or opt into mode = \"open\" for local development"
                    .to_string(),
            ));
        }
        Ok(())
    }

    /// Whether the request headers carry the configured key
    pub fn authorize(&self, headers: &HeaderMap) -> bool {
        match self.mode {
            SecurityMode::Open => true,
            SecurityMode::SecretKey => {
                // Without a configured key nothing can authenticate
                let Some(expected) = self.secret_key.as_deref() else {
                    return false;
                };
                presented_key(headers).is_some_and(|key| keys_match(key.as_bytes(), expected.as_bytes()))
            }
        }
    }
}

/// Compare keys without short-circuiting on the first differing byte
fn keys_match(presented: &[u8], expected: &[u8]) -> bool {
    if presented.len() != expected.len() {
        return false;
    }
    presented
        .iter()
        .zip(expected)
        .fold(0u8, |diff, (a, b)| diff | (a ^ b))
        == 0
}

fn presented_key(headers: &HeaderMap) -> Option<&str> {
    if let Some(key) = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
    {
        return Some(key.trim());
    }

    headers
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
}

/// Security middleware for Axum
pub async fn security_middleware(
    State(state): State<Arc<SecurityState>>,
    request: Request,
    next: Next,
) -> Response {
    if state.authorize(request.headers()) {
        return next.run(request).await;
    }

    warn!(
        path = %request.uri().path(),
        "Unauthorized request - missing or invalid API key"
    );
    ApiError::Unauthorized("missing or invalid API key".to_string()).into_response()
}
