use async_trait::async_trait;
use chrono::{Duration, Utc};
use jsonwebtoken::{
    Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode, errors::ErrorKind,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

use shared::config::server::AuthConfig;

use super::{AuthError, CredentialVerifier};

/// Token payload shared with the marketplace API.
///
/// The marketplace signs `{ id, iat, exp }`; `sub` is accepted as an alias so
/// tokens minted by standard tooling verify as well.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    #[serde(alias = "sub")]
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,
    pub exp: i64,
}

/// HS256 verifier keyed by the shared marketplace secret.
pub struct JwtVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl std::fmt::Debug for JwtVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtVerifier")
            .field("leeway", &self.validation.leeway)
            .finish_non_exhaustive()
    }
}

impl JwtVerifier {
    #[must_use]
    pub fn new(secret: &str, leeway_seconds: u64) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = leeway_seconds;
        validation.validate_exp = true;
        Self {
            key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }

    #[must_use]
    pub fn from_config(config: &AuthConfig) -> Self {
        Self::new(&config.jwt_secret, config.leeway_seconds)
    }

    fn verify(&self, token: &str) -> Result<Claims, AuthError> {
        decode::<Claims>(token, &self.key, &self.validation)
            .map(|data| data.claims)
            .map_err(|err| match err.kind() {
                ErrorKind::ExpiredSignature => AuthError::ExpiredCredential,
                other => {
                    debug!(reason = ?other, "rejecting credential");
                    AuthError::InvalidCredential
                }
            })
    }
}

#[async_trait]
impl CredentialVerifier for JwtVerifier {
    async fn resolve_credential(&self, token: &str) -> Result<String, AuthError> {
        let claims = self.verify(token.trim())?;
        if claims.id.trim().is_empty() {
            return Err(AuthError::InvalidCredential);
        }
        Ok(claims.id)
    }
}

/// Signs a token for `user_id` valid for `ttl` (negative values mint
/// already-expired tokens).
///
/// # Errors
/// Returns the underlying signing error.
pub fn issue_token(
    secret: &str,
    user_id: &str,
    ttl: Duration,
) -> Result<String, jsonwebtoken::errors::Error> {
    let now = Utc::now();
    let claims = Claims {
        id: user_id.to_string(),
        iat: Some(now.timestamp()),
        exp: (now + ttl).timestamp(),
    };
    encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
}
