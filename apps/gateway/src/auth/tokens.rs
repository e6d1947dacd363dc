//! Access token validation for `/ws` and the HTTP API.

use chrono::{Duration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::error::ApiError;

/// Access token TTL in seconds (1 hour).
pub const ACCESS_TOKEN_TTL_SECS: i64 = 3600;

#[derive(Debug, Serialize, Deserialize)]
pub struct AccessClaims {
    /// The authenticated user ID.
    pub sub: String,
    pub iat: i64,
    pub exp: i64,
}

/// Turns a presented token into the user ID it authenticates.
pub trait TokenValidator: Send + Sync {
    fn validate(&self, token: &str) -> Result<String, ApiError>;
}

/// HS256 validator sharing its secret with the service that issues tokens.
pub struct JwtValidator {
    key: DecodingKey,
    validation: Validation,
}

impl JwtValidator {
    pub fn new(secret: &str) -> Self {
        Self {
            key: DecodingKey::from_secret(secret.as_bytes()),
            validation: Validation::new(Algorithm::HS256),
        }
    }
}

impl TokenValidator for JwtValidator {
    fn validate(&self, token: &str) -> Result<String, ApiError> {
        let data = jsonwebtoken::decode::<AccessClaims>(token, &self.key, &self.validation)
            .map_err(|e| {
                tracing::debug!(?e, "access token validation failed");
                ApiError::unauthorized("Invalid or expired token")
            })?;

        if data.claims.sub.is_empty() {
            return Err(ApiError::unauthorized("Token has no subject"));
        }

        Ok(data.claims.sub)
    }
}

/// Sign an access token for `user_id`.
pub fn issue_access_token(secret: &str, user_id: &str) -> Result<String, ApiError> {
    issue_with_ttl(secret, user_id, Duration::seconds(ACCESS_TOKEN_TTL_SECS))
}

/// Sign a token with an explicit lifetime. A negative TTL yields an expired
/// token.
pub fn issue_with_ttl(secret: &str, user_id: &str, ttl: Duration) -> Result<String, ApiError> {
    let now = Utc::now();
    let claims = AccessClaims {
        sub: user_id.to_string(),
        iat: now.timestamp(),
        exp: (now + ttl).timestamp(),
    };

    jsonwebtoken::encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| {
        tracing::error!(?e, "failed to sign access token");
        ApiError::internal("Token signing failed")
    })
}
