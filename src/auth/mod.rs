pub mod jwt;

use async_trait::async_trait;
use serde::{ Deserialize, Serialize };
use thiserror::Error;

pub use self::jwt::Hs256Verifier;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("No token provided")]
    MissingToken,
    /// The reason is for logs only; clients always see "Invalid token".
    #[error("Invalid token")]
    InvalidToken(String),
}

/// Decoded identity of a verified caller.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Claims {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,
}

impl Claims {
    /// The user this token speaks for, if it names one.
    pub fn subject(&self) -> Option<&str> {
        self.user_id
            .as_deref()
            .or(self.sub.as_deref())
            .filter(|s| !s.is_empty())
    }
}

#[async_trait]
pub trait TokenVerifier: Send + Sync {
    async fn verify(&self, token: &str) -> Result<Claims, AuthError>;
}

/// Accepts a single shared secret. Carries no user identity.
pub struct ApiKeyVerifier {
    key: String,
}

impl ApiKeyVerifier {
    pub fn new(key: impl Into<String>) -> Self {
        Self { key: key.into() }
    }
}

#[async_trait]
impl TokenVerifier for ApiKeyVerifier {
    async fn verify(&self, token: &str) -> Result<Claims, AuthError> {
        if constant_time_eq(token.as_bytes(), self.key.as_bytes()) {
            Ok(Claims::default())
        } else {
            Err(AuthError::InvalidToken("api key mismatch".into()))
        }
    }
}

/// Extracts the token from an `Authorization: Bearer <token>` header value.
pub fn bearer_token(header: Option<&str>) -> Option<&str> {
    header
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter()
        .zip(b)
        .fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
