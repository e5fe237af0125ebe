//! JWT session authentication
//!
//! Accepts HS256 (shared secret) or RS256 (PEM public key) tokens from the
//! `Authorization: Bearer` header, falling back to the session cookie.

use super::{AuthError, AuthRequest, AuthResult, Authenticator};
use crate::config::JwtConfig;
use crate::metrics;
use async_trait::async_trait;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// JWT Claims
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub exp: usize,
    #[serde(default)]
    pub iat: Option<usize>,
    #[serde(default)]
    pub iss: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

/// JWT Authenticator
///
/// ```
/// use filegate::auth::jwt::JwtAuthenticator;
///
/// let auth = JwtAuthenticator::new_hs256("my-secret")
///     .with_issuer("https://auth.example.com")
///     .with_cookie_name("session");
/// ```
pub struct JwtAuthenticator {
    decoding_key: DecodingKey,
    validation: Validation,
    cookie_name: String,
}

impl JwtAuthenticator {
    /// HS256 with a shared secret
    pub fn new_hs256(secret: &str) -> Self {
        Self::with_key(
            DecodingKey::from_secret(secret.as_bytes()),
            Algorithm::HS256,
        )
    }

    /// RS256 with an RSA public key
    pub fn new_rs256(public_key_pem: &str) -> Result<Self, AuthError> {
        let decoding_key = DecodingKey::from_rsa_pem(public_key_pem.as_bytes())
            .map_err(|e| AuthError::ConfigError(e.to_string()))?;
        Ok(Self::with_key(decoding_key, Algorithm::RS256))
    }

    fn with_key(decoding_key: DecodingKey, algorithm: Algorithm) -> Self {
        let mut validation = Validation::new(algorithm);
        validation.validate_exp = true;
        validation.validate_aud = false;

        Self {
            decoding_key,
            validation,
            cookie_name: "session".to_string(),
        }
    }

    /// Build from the `auth.jwt` config section
    pub fn from_config(config: &JwtConfig) -> Result<Self, AuthError> {
        let secret = config
            .secret
            .as_deref()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| AuthError::ConfigError("auth.jwt.secret is required".into()))?;

        let auth = match config.algorithm.to_ascii_uppercase().as_str() {
            "HS256" => Self::new_hs256(secret),
            "RS256" => Self::new_rs256(secret)?,
            other => {
                return Err(AuthError::ConfigError(format!(
                    "unsupported JWT algorithm: {}",
                    other
                )))
            }
        };

        let auth = auth.with_cookie_name(&config.cookie_name);
        Ok(match &config.issuer {
            Some(issuer) => auth.with_issuer(issuer),
            None => auth,
        })
    }

    /// Require the `iss` claim to match
    #[must_use]
    pub fn with_issuer(mut self, issuer: &str) -> Self {
        self.validation.set_issuer(&[issuer]);
        self
    }

    /// Cookie consulted when no bearer token is sent
    #[must_use]
    pub fn with_cookie_name(mut self, name: &str) -> Self {
        self.cookie_name = name.to_string();
        self
    }

    fn extract_token<'a>(&self, request: &'a AuthRequest) -> Option<&'a str> {
        if let Some(auth) = request.headers.get("authorization") {
            if let Some(token) = auth.strip_prefix("Bearer ") {
                return Some(token.trim());
            }
        }
        request.cookie(&self.cookie_name).filter(|t| !t.is_empty())
    }
}

#[async_trait]
impl Authenticator for JwtAuthenticator {
    #[tracing::instrument(
        name = "auth.jwt",
        skip(self, request),
        fields(
            auth.method = "jwt",
            auth.token_present = self.extract_token(request).is_some(),
            auth.subject = tracing::field::Empty
        ),
        err
    )]
    async fn authenticate(&self, request: &AuthRequest) -> Result<AuthResult, AuthError> {
        let result = self.verify(request);
        metrics::record_auth_attempt(self.method(), result.is_ok());
        let result = result?;

        tracing::Span::current().record("auth.subject", result.subject.as_str());
        tracing::debug!(subject = %result.subject, "JWT authentication successful");
        Ok(result)
    }

    fn method(&self) -> &'static str {
        "jwt"
    }
}

impl JwtAuthenticator {
    fn verify(&self, request: &AuthRequest) -> Result<AuthResult, AuthError> {
        let token = self.extract_token(request).ok_or(AuthError::MissingAuth)?;

        let token_data =
            decode::<Claims>(token, &self.decoding_key, &self.validation).map_err(|e| {
                match e.kind() {
                    jsonwebtoken::errors::ErrorKind::ExpiredSignature => AuthError::TokenExpired,
                    jsonwebtoken::errors::ErrorKind::InvalidSignature => {
                        AuthError::InvalidSignature
                    }
                    _ => AuthError::InvalidToken(e.to_string()),
                }
            })?;

        let mut claims = HashMap::new();
        if let Some(iss) = token_data.claims.iss {
            claims.insert("iss".into(), serde_json::Value::String(iss));
        }
        if let Some(email) = token_data.claims.email {
            claims.insert("email".into(), serde_json::Value::String(email));
        }

        Ok(AuthResult {
            subject: token_data.claims.sub,
            claims,
        })
    }
}
