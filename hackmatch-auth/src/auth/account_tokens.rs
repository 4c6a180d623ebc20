//! Single-use password reset and email verification tokens.
//!
//! The plaintext is 32 random bytes in base64url, handed out once by email. Only its SHA-256
//! digest is stored, next to an expiry. Consuming a token clears both columns, so a token works
//! at most once.

use chrono::{DateTime, Utc};
use tracing::instrument;

use crate::auth::{password, tokens};
use crate::config::Config;
use crate::db::models::users::UserDBResponse;
use crate::db::store::CredentialStore;
use crate::errors::Error;

const TOKEN_BYTES: usize = 32;

/// Returned for unknown, expired or already used tokens
pub const INVALID_TOKEN_MESSAGE: &str = "Token is invalid or has expired";

fn invalid_token() -> Error {
    Error::BadRequest {
        message: INVALID_TOKEN_MESSAGE.to_string(),
    }
}

/// Create a reset token on the record and return its plaintext. The caller saves the record.
pub fn issue_password_reset_token(user: &mut UserDBResponse, config: &Config, now: DateTime<Utc>) -> Result<String, Error> {
    let token = tokens::generate_token(TOKEN_BYTES);
    let secrets = user.secrets_mut()?;
    secrets.password_reset_token = Some(tokens::hash_token(&token));
    secrets.password_reset_expires = Some(now + config.auth.tokens.password_reset_expiry);
    metrics::counter!("hackmatch_auth_password_reset_tokens_issued_total").increment(1);
    Ok(token)
}

pub fn clear_password_reset_token(user: &mut UserDBResponse) -> Result<(), Error> {
    let secrets = user.secrets_mut()?;
    secrets.password_reset_token = None;
    secrets.password_reset_expires = None;
    Ok(())
}

/// Create a verification token on the record and return its plaintext. The caller saves the record.
pub fn issue_email_verification_token(user: &mut UserDBResponse, config: &Config, now: DateTime<Utc>) -> Result<String, Error> {
    let token = tokens::generate_token(TOKEN_BYTES);
    let secrets = user.secrets_mut()?;
    secrets.email_verification_token = Some(tokens::hash_token(&token));
    secrets.email_verification_expires = Some(now + config.auth.tokens.email_verification_expiry);
    metrics::counter!("hackmatch_auth_email_verification_tokens_issued_total").increment(1);
    Ok(token)
}

pub fn clear_email_verification_token(user: &mut UserDBResponse) -> Result<(), Error> {
    let secrets = user.secrets_mut()?;
    secrets.email_verification_token = None;
    secrets.email_verification_expires = None;
    Ok(())
}

/// Set a new password for the holder of an unexpired reset token and retire the token.
///
/// Returns the saved record, with secrets.
#[instrument(skip_all, err)]
pub async fn consume_password_reset(
    store: &dyn CredentialStore,
    token: &str,
    new_password: &str,
    config: &Config,
    now: DateTime<Utc>,
) -> Result<UserDBResponse, Error> {
    let mut user = store
        .find_by_password_reset_token(&tokens::hash_token(token), now)
        .await?
        .ok_or_else(invalid_token)?;

    password::change_password(store, &mut user, new_password, config, now).await?;
    clear_password_reset_token(&mut user)?;
    let saved = store.save(&user).await?;

    tracing::info!(user_id = %crate::types::abbrev_uuid(&saved.id), "Password reset completed");
    Ok(saved)
}

/// Mark the holder of an unexpired verification token as verified and retire the token.
#[instrument(skip_all, err)]
pub async fn consume_email_verification(store: &dyn CredentialStore, token: &str, now: DateTime<Utc>) -> Result<UserDBResponse, Error> {
    let mut user = store
        .find_by_email_verification_token(&tokens::hash_token(token), now)
        .await?
        .ok_or_else(invalid_token)?;

    user.is_email_verified = true;
    clear_email_verification_token(&mut user)?;
    Ok(store.save(&user).await?)
}
