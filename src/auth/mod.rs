//! Authentication module
//!
//! Session verification for protected gateway routes. The session is a JWT
//! carried either as a bearer token or in the session cookie.

use crate::config::AuthConfig;
use async_trait::async_trait;
use hyper::header::HeaderMap;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

pub mod jwt;

pub use jwt::JwtAuthenticator;

/// Authentication errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("Missing authentication")]
    MissingAuth,

    #[error("Invalid token: {0}")]
    InvalidToken(String),

    #[error("Token expired")]
    TokenExpired,

    #[error("Invalid signature")]
    InvalidSignature,

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

/// Authenticated session
#[derive(Debug, Clone)]
pub struct AuthResult {
    pub subject: String,
    pub claims: HashMap<String, serde_json::Value>,
}

/// Verifies the session attached to a request
#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn authenticate(&self, request: &AuthRequest) -> Result<AuthResult, AuthError>;

    /// Short name used in logs and metrics
    fn method(&self) -> &'static str;
}

/// The parts of a request an authenticator looks at
#[derive(Debug, Default)]
pub struct AuthRequest {
    /// Header values keyed by lowercase name
    pub headers: HashMap<String, String>,
    pub method: String,
    pub path: String,
}

impl AuthRequest {
    pub fn from_headers(method: &str, path: &str, headers: &HeaderMap) -> Self {
        let headers = headers
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_ascii_lowercase(), v.to_string()))
            })
            .collect();
        Self {
            headers,
            method: method.to_string(),
            path: path.to_string(),
        }
    }

    /// Value of the named cookie, if the request carries it
    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.headers.get("cookie")?.split(';').find_map(|pair| {
            let (k, v) = pair.trim().split_once('=')?;
            (k == name).then_some(v)
        })
    }
}

/// Build the configured authenticator; `None` when auth is disabled.
pub fn from_config(config: &AuthConfig) -> Result<Option<Arc<dyn Authenticator>>, AuthError> {
    if !config.enabled {
        return Ok(None);
    }
    let jwt = config
        .jwt
        .as_ref()
        .ok_or_else(|| AuthError::ConfigError("auth.jwt is required when auth is enabled".into()))?;
    Ok(Some(Arc::new(JwtAuthenticator::from_config(jwt)?)))
}
