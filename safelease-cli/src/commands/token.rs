//! Mints HS256 bearer tokens for local testing.

use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::Duration;
use server::auth::issue_token;
use shared::config::server::Config;

/// Signs a token for `user` with the secret the server would load from the
/// same configuration sources.
///
/// # Errors
/// Returns an error if configuration fails to load or signing fails.
pub fn mint_token(user: &str, ttl_minutes: i64, config: Option<PathBuf>) -> Result<String> {
    let config = Config::load_config(config, None).context("failed to load configuration")?;
    issue_token(
        &config.auth.jwt_secret,
        user,
        Duration::minutes(ttl_minutes),
    )
    .context("failed to sign token")
}

#[cfg(test)]
mod tests {
    use super::*;
    use server::auth::{CredentialVerifier, JwtVerifier};

    #[tokio::test]
    #[serial_test::serial]
    async fn minted_token_verifies_with_the_configured_secret() {
        let token = mint_token("tenant1", 5, None).unwrap();
        let defaults = Config::load_config(None, None).unwrap();
        let verifier = JwtVerifier::from_config(&defaults.auth);
        assert_eq!(verifier.resolve_credential(&token).await.unwrap(), "tenant1");
    }
}
