//! Credential verification for realtime connections and the HTTP API.

mod jwt;

use async_trait::async_trait;
use thiserror::Error;

use crate::services::StoreError;

pub use jwt::{Claims, JwtVerifier, issue_token};

/// Reasons a presented credential does not yield a usable identity.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("no credential was presented")]
    MissingCredential,
    #[error("credential is invalid")]
    InvalidCredential,
    #[error("credential has expired")]
    ExpiredCredential,
    #[error("user {0} is not known")]
    UnknownUser(String),
    #[error("user directory unavailable")]
    DirectoryUnavailable(#[source] StoreError),
}

impl AuthError {
    /// Stable label used in logs, metrics, and problem documents.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::MissingCredential => "missing_credential",
            Self::InvalidCredential => "invalid_credential",
            Self::ExpiredCredential => "expired_credential",
            Self::UnknownUser(_) => "unknown_user",
            Self::DirectoryUnavailable(_) => "directory_unavailable",
        }
    }
}

/// Resolves a bearer credential to a stable user identifier.
#[async_trait]
pub trait CredentialVerifier: Send + Sync {
    async fn resolve_credential(&self, token: &str) -> Result<String, AuthError>;
}

/// Pulls the token out of an `Authorization: Bearer` header value.
#[must_use]
pub fn bearer_token(header: &str) -> Option<&str> {
    let (scheme, token) = header.trim().split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bearer_token_parses_scheme_case_insensitively() {
        assert_eq!(bearer_token("Bearer abc.def"), Some("abc.def"));
        assert_eq!(bearer_token("bearer   abc "), Some("abc"));
        assert_eq!(bearer_token("Basic abc"), None);
        assert_eq!(bearer_token("Bearer "), None);
        assert_eq!(bearer_token("abc"), None);
    }

    #[test]
    fn codes_are_stable() {
        assert_eq!(AuthError::ExpiredCredential.code(), "expired_credential");
        assert_eq!(AuthError::UnknownUser("x".into()).code(), "unknown_user");
    }
}
