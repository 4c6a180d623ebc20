//! Database models for users.

use crate::api::models::users::Role;
use crate::db::errors::{DbError, Result};
use crate::types::UserId;
use chrono::{DateTime, Utc};
use sqlx::FromRow;

/// Database request for creating a new user
#[derive(Debug, Clone)]
pub struct UserCreateDBRequest {
    pub name: String,
    /// Must already be lowercase
    pub email: String,
    pub password_hash: String,
    pub role: Role,
    pub is_email_verified: bool,
}

/// Which columns a read returns.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Fields {
    /// Profile, lifecycle flags and security counters
    #[default]
    Public,
    /// Everything in `Public` plus the password hash and token artifacts
    WithSecrets,
}

/// Credential and one-time token columns. Only loaded on request.
///
/// Token columns hold SHA-256 digests, never the plaintext handed to the client.
#[derive(Debug, Clone, Default, PartialEq, Eq, FromRow)]
pub struct UserSecrets {
    pub password_hash: String,
    pub password_reset_token: Option<String>,
    pub password_reset_expires: Option<DateTime<Utc>>,
    pub email_verification_token: Option<String>,
    pub email_verification_expires: Option<DateTime<Utc>>,
    pub refresh_token: Option<String>,
    pub refresh_token_expires: Option<DateTime<Utc>>,
}

/// Database response for a user
#[derive(Debug, Clone)]
pub struct UserDBResponse {
    pub id: UserId,
    pub name: String,
    pub email: String,
    pub role: Role,
    pub is_active: bool,
    pub is_email_verified: bool,
    pub login_attempts: i32,
    pub lock_until: Option<DateTime<Utc>>,
    pub last_login: Option<DateTime<Utc>>,
    pub password_changed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Present only when read with [`Fields::WithSecrets`]
    pub secrets: Option<UserSecrets>,
}

impl UserDBResponse {
    /// Locked while `lock_until` lies in the future
    pub fn is_locked(&self, now: DateTime<Utc>) -> bool {
        self.lock_until.is_some_and(|until| until > now)
    }

    pub fn secrets(&self) -> Result<&UserSecrets> {
        self.secrets
            .as_ref()
            .ok_or_else(|| DbError::Other(anyhow::anyhow!("user {} was read without secret fields", self.id)))
    }

    pub fn secrets_mut(&mut self) -> Result<&mut UserSecrets> {
        let id = self.id;
        self.secrets
            .as_mut()
            .ok_or_else(|| DbError::Other(anyhow::anyhow!("user {id} was read without secret fields")))
    }

    /// Drop secret fields, e.g. before handing a record to a public read
    pub fn without_secrets(mut self) -> Self {
        self.secrets = None;
        self
    }
}

/// Counts of artifacts removed by one maintenance sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub refresh_tokens: u64,
    pub password_reset_tokens: u64,
    pub email_verification_tokens: u64,
    pub blacklisted_tokens: u64,
}

impl SweepReport {
    pub fn total(&self) -> u64 {
        self.refresh_tokens + self.password_reset_tokens + self.email_verification_tokens + self.blacklisted_tokens
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use uuid::Uuid;

    fn user(lock_until: Option<DateTime<Utc>>) -> UserDBResponse {
        let now = Utc::now();
        UserDBResponse {
            id: Uuid::new_v4(),
            name: "Alice".to_string(),
            email: "alice@x.com".to_string(),
            role: Role::User,
            is_active: true,
            is_email_verified: false,
            login_attempts: 0,
            lock_until,
            last_login: None,
            password_changed_at: None,
            created_at: now,
            updated_at: now,
            secrets: None,
        }
    }

    #[test]
    fn test_lock_is_derived_from_lock_until() {
        let now = Utc::now();
        assert!(!user(None).is_locked(now));
        assert!(user(Some(now + Duration::minutes(5))).is_locked(now));
        assert!(!user(Some(now - Duration::seconds(1))).is_locked(now));
        // the boundary instant is already unlocked
        assert!(!user(Some(now)).is_locked(now));
    }

    #[test]
    fn test_secrets_required_when_missing() {
        let mut public = user(None);
        assert!(public.secrets().is_err());
        assert!(public.secrets_mut().is_err());

        public.secrets = Some(UserSecrets::default());
        assert!(public.secrets().is_ok());
        assert!(public.without_secrets().secrets.is_none());
    }
}
