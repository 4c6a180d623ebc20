//! Revocation of access tokens before their natural expiry (logout).

use chrono::{DateTime, Utc};
use std::time::Duration;
use tracing::instrument;

use crate::db::store::CredentialStore;
use crate::errors::Error;
use crate::types::{UserId, abbrev_uuid};

/// Revoke `token` for `retention`, pruning the user's expired entries.
#[instrument(skip(store, token), fields(user_id = %abbrev_uuid(&user_id)), err)]
pub async fn revoke(
    store: &dyn CredentialStore,
    user_id: UserId,
    token: &str,
    retention: Duration,
    now: DateTime<Utc>,
) -> Result<(), Error> {
    store.blacklist_token(user_id, token, now + retention, now).await?;
    metrics::counter!("hackmatch_auth_tokens_revoked_total").increment(1);
    Ok(())
}

pub async fn is_revoked(store: &dyn CredentialStore, user_id: UserId, token: &str, now: DateTime<Utc>) -> Result<bool, Error> {
    Ok(store.is_token_blacklisted(user_id, token, now).await?)
}
