//! Database repository for revoked access tokens.

use crate::db::errors::Result;
use crate::types::{UserId, abbrev_uuid};
use chrono::{DateTime, Utc};
use sqlx::{Connection, PgConnection};
use tracing::instrument;

pub struct BlacklistedTokens<'c> {
    db: &'c mut PgConnection,
}

impl<'c> BlacklistedTokens<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }

    /// Record a revoked token, pruning the user's expired entries in the same transaction.
    ///
    /// Revoking the same token twice keeps one entry with the later expiry.
    #[instrument(skip(self, token), fields(user_id = %abbrev_uuid(&user_id)), err)]
    pub async fn insert(&mut self, user_id: UserId, token: &str, expires_at: DateTime<Utc>, now: DateTime<Utc>) -> Result<()> {
        let mut tx = self.db.begin().await?;

        let pruned = sqlx::query("DELETE FROM blacklisted_tokens WHERE user_id = $1 AND expires_at <= $2")
            .bind(user_id)
            .bind(now)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        sqlx::query(
            "INSERT INTO blacklisted_tokens (token, user_id, expires_at)
             VALUES ($1, $2, $3)
             ON CONFLICT (token) DO UPDATE SET expires_at = GREATEST(blacklisted_tokens.expires_at, EXCLUDED.expires_at)",
        )
        .bind(token)
        .bind(user_id)
        .bind(expires_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        if pruned > 0 {
            tracing::debug!(pruned, "Pruned expired blacklist entries");
        }
        Ok(())
    }

    #[instrument(skip(self, token), fields(user_id = %abbrev_uuid(&user_id)), err)]
    pub async fn contains(&mut self, user_id: UserId, token: &str, now: DateTime<Utc>) -> Result<bool> {
        let found = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS (SELECT 1 FROM blacklisted_tokens WHERE token = $1 AND user_id = $2 AND expires_at > $3)",
        )
        .bind(token)
        .bind(user_id)
        .bind(now)
        .fetch_one(&mut *self.db)
        .await?;
        Ok(found)
    }

    #[instrument(skip(self), err)]
    pub async fn delete_expired(&mut self, now: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM blacklisted_tokens WHERE expires_at <= $1")
            .bind(now)
            .execute(&mut *self.db)
            .await?;
        Ok(result.rows_affected())
    }
}
