//! Bearer token verification shared by HTTP services.
//!
//! Tokens are HS256 JWTs carrying the caller's user id. Issuing tokens
//! (login, registration) belongs to the identity service; this module only
//! needs to agree with it on the secret and the claim names.

use crate::error::AppError;
use chrono::{Duration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Cookie used by browser clients to carry the token.
pub const TOKEN_COOKIE: &str = "token";

/// Claims carried by an access token.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Claims {
    /// Verified caller identity.
    pub user_id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    /// Expiration time (Unix timestamp).
    pub exp: i64,
    /// Issued at (Unix timestamp).
    #[serde(default)]
    pub iat: i64,
}

/// Verifies (and, for tooling and tests, signs) access tokens.
#[derive(Clone)]
pub struct TokenVerifier {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
}

impl TokenVerifier {
    pub fn new(secret: &str) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 5;

        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }

    pub fn verify(&self, token: &str) -> Result<Claims, AppError> {
        let data = decode::<Claims>(token, &self.decoding_key, &self.validation)?;
        Ok(data.claims)
    }

    pub fn issue(
        &self,
        user_id: Uuid,
        email: Option<String>,
        ttl: Duration,
    ) -> Result<String, AppError> {
        let now = Utc::now();
        let claims = Claims {
            user_id,
            email,
            exp: (now + ttl).timestamp(),
            iat: now.timestamp(),
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| AppError::InternalError(anyhow::anyhow!("Failed to sign token: {}", e)))
    }
}
