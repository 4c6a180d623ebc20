//! The credential store: persistence for accounts, their security counters and revoked tokens.
//!
//! Request handlers only see `Arc<dyn CredentialStore>`. [`PgCredentialStore`] backs production
//! deployments; [`MemoryCredentialStore`] serves development setups and tests.

use crate::db::errors::Result;
use crate::db::models::users::{Fields, SweepReport, UserCreateDBRequest, UserDBResponse};
use crate::types::UserId;
use chrono::{DateTime, Utc};

pub mod memory;
pub mod postgres;

pub use memory::MemoryCredentialStore;
pub use postgres::PgCredentialStore;

#[async_trait::async_trait]
pub trait CredentialStore: Send + Sync {
    /// Insert a new account. Fails with a unique violation when the email is taken.
    ///
    /// The returned record carries its secret fields.
    async fn create(&self, request: &UserCreateDBRequest) -> Result<UserDBResponse>;

    async fn find_by_email(&self, email: &str, fields: Fields) -> Result<Option<UserDBResponse>>;

    async fn find_by_id(&self, id: UserId, fields: Fields) -> Result<Option<UserDBResponse>>;

    /// Lookups by token digest only match unexpired tokens and always return secret fields.
    async fn find_by_refresh_token(&self, digest: &str, now: DateTime<Utc>) -> Result<Option<UserDBResponse>>;

    async fn find_by_password_reset_token(&self, digest: &str, now: DateTime<Utc>) -> Result<Option<UserDBResponse>>;

    async fn find_by_email_verification_token(&self, digest: &str, now: DateTime<Utc>) -> Result<Option<UserDBResponse>>;

    /// Persist mutable fields. Token columns are written only when `user.secrets` is loaded;
    /// the password hash is never written here.
    async fn save(&self, user: &UserDBResponse) -> Result<UserDBResponse>;

    /// Set a new password hash together with `password_changed_at`
    async fn update_password(&self, id: UserId, password_hash: &str, changed_at: DateTime<Utc>) -> Result<()>;

    /// Revoke an access token until `expires_at`, pruning the user's expired entries
    async fn blacklist_token(&self, user_id: UserId, token: &str, expires_at: DateTime<Utc>, now: DateTime<Utc>) -> Result<()>;

    async fn is_token_blacklisted(&self, user_id: UserId, token: &str, now: DateTime<Utc>) -> Result<bool>;

    /// Clear expired token artifacts across all accounts. Idempotent.
    async fn cleanup_expired_tokens(&self, now: DateTime<Utc>) -> Result<SweepReport>;

    /// Check the backing storage is reachable
    async fn ping(&self) -> Result<()>;
}
