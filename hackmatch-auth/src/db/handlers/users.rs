//! Database repository for users.

use crate::types::{UserId, abbrev_uuid};
use crate::{
    api::models::users::Role,
    db::{
        errors::{DbError, Result},
        handlers::repository::Repository,
        models::users::{Fields, UserCreateDBRequest, UserDBResponse, UserSecrets},
    },
};
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgConnection, Postgres};
use tracing::instrument;
use uuid::Uuid;

const PUBLIC_COLUMNS: &str = "id, name, email, role, is_active, is_email_verified, login_attempts, lock_until, \
     last_login, password_changed_at, created_at, updated_at";

const SECRET_COLUMNS: &str = "password_hash, password_reset_token, password_reset_expires, email_verification_token, \
     email_verification_expires, refresh_token, refresh_token_expires";

fn columns(fields: Fields) -> String {
    match fields {
        Fields::Public => PUBLIC_COLUMNS.to_string(),
        Fields::WithSecrets => format!("{PUBLIC_COLUMNS}, {SECRET_COLUMNS}"),
    }
}

// Database entity model
#[derive(Debug, Clone, FromRow)]
struct User {
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
}

#[derive(Debug, Clone, FromRow)]
struct UserWithSecrets {
    #[sqlx(flatten)]
    user: User,
    #[sqlx(flatten)]
    secrets: UserSecrets,
}

impl From<(User, Option<UserSecrets>)> for UserDBResponse {
    fn from((user, secrets): (User, Option<UserSecrets>)) -> Self {
        Self {
            id: user.id,
            name: user.name,
            email: user.email,
            role: user.role,
            is_active: user.is_active,
            is_email_verified: user.is_email_verified,
            login_attempts: user.login_attempts,
            lock_until: user.lock_until,
            last_login: user.last_login,
            password_changed_at: user.password_changed_at,
            created_at: user.created_at,
            updated_at: user.updated_at,
            secrets,
        }
    }
}

impl From<UserWithSecrets> for UserDBResponse {
    fn from(row: UserWithSecrets) -> Self {
        UserDBResponse::from((row.user, Some(row.secrets)))
    }
}

/// The one-time token columns that can be looked up by digest
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenColumn {
    Refresh,
    PasswordReset,
    EmailVerification,
}

impl TokenColumn {
    fn token(self) -> &'static str {
        match self {
            TokenColumn::Refresh => "refresh_token",
            TokenColumn::PasswordReset => "password_reset_token",
            TokenColumn::EmailVerification => "email_verification_token",
        }
    }

    fn expires(self) -> &'static str {
        match self {
            TokenColumn::Refresh => "refresh_token_expires",
            TokenColumn::PasswordReset => "password_reset_expires",
            TokenColumn::EmailVerification => "email_verification_expires",
        }
    }
}

pub struct Users<'c> {
    db: &'c mut PgConnection,
}

#[async_trait::async_trait]
impl<'c> Repository for Users<'c> {
    type CreateRequest = UserCreateDBRequest;
    type Response = UserDBResponse;
    type Id = UserId;

    #[instrument(skip(self, request), err)]
    async fn create(&mut self, request: &Self::CreateRequest) -> Result<Self::Response> {
        // Always generate a new ID for users
        let user_id = Uuid::new_v4();

        let sql = format!(
            "INSERT INTO users (id, name, email, password_hash, role, is_email_verified)
             VALUES ($1, $2, $3, $4, $5, $6)
             RETURNING {}",
            columns(Fields::WithSecrets)
        );
        let row = sqlx::query_as::<_, UserWithSecrets>(&sql)
            .bind(user_id)
            .bind(&request.name)
            .bind(&request.email)
            .bind(&request.password_hash)
            .bind(request.role)
            .bind(request.is_email_verified)
            .fetch_one(&mut *self.db)
            .await?;

        Ok(row.into())
    }

    #[instrument(skip(self), fields(user_id = %abbrev_uuid(&id)), err)]
    async fn get_by_id(&mut self, id: Self::Id) -> Result<Option<Self::Response>> {
        self.get(id, Fields::Public).await
    }
}

impl<'c> Users<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }

    async fn fetch_where<T>(&mut self, fields: Fields, predicate: &str, value: T) -> Result<Option<UserDBResponse>>
    where
        T: for<'q> sqlx::Encode<'q, Postgres> + sqlx::Type<Postgres> + Send + 'static,
    {
        let sql = format!("SELECT {} FROM users WHERE {predicate}", columns(fields));
        let user = match fields {
            Fields::Public => sqlx::query_as::<_, User>(&sql)
                .bind(value)
                .fetch_optional(&mut *self.db)
                .await?
                .map(|user| UserDBResponse::from((user, None))),
            Fields::WithSecrets => sqlx::query_as::<_, UserWithSecrets>(&sql)
                .bind(value)
                .fetch_optional(&mut *self.db)
                .await?
                .map(UserDBResponse::from),
        };
        Ok(user)
    }

    #[instrument(skip(self), fields(user_id = %abbrev_uuid(&id)), err)]
    pub async fn get(&mut self, id: UserId, fields: Fields) -> Result<Option<UserDBResponse>> {
        self.fetch_where(fields, "id = $1", id).await
    }

    #[instrument(skip(self, email), err)]
    pub async fn get_by_email(&mut self, email: &str, fields: Fields) -> Result<Option<UserDBResponse>> {
        self.fetch_where(fields, "email = $1", email.to_lowercase()).await
    }

    /// Find the user holding an unexpired token with this digest. Always returns secret fields.
    #[instrument(skip(self, digest), err)]
    pub async fn get_by_token(&mut self, column: TokenColumn, digest: &str, now: DateTime<Utc>) -> Result<Option<UserDBResponse>> {
        let sql = format!(
            "SELECT {} FROM users WHERE {} = $1 AND {} > $2",
            columns(Fields::WithSecrets),
            column.token(),
            column.expires()
        );
        let user = sqlx::query_as::<_, UserWithSecrets>(&sql)
            .bind(digest)
            .bind(now)
            .fetch_optional(&mut *self.db)
            .await?;
        Ok(user.map(UserDBResponse::from))
    }

    /// Persist lifecycle flags, security counters and (when loaded) token artifacts.
    ///
    /// Never writes the password hash; see [`Users::update_password`].
    #[instrument(skip(self, user), fields(user_id = %abbrev_uuid(&user.id)), err)]
    pub async fn update(&mut self, user: &UserDBResponse) -> Result<UserDBResponse> {
        const SET_PUBLIC: &str = "role = $2, is_active = $3, is_email_verified = $4, login_attempts = $5, \
             lock_until = $6, last_login = $7, updated_at = NOW()";

        let row = match &user.secrets {
            None => {
                let sql = format!("UPDATE users SET {SET_PUBLIC} WHERE id = $1 RETURNING {PUBLIC_COLUMNS}");
                sqlx::query_as::<_, User>(&sql)
                    .bind(user.id)
                    .bind(user.role)
                    .bind(user.is_active)
                    .bind(user.is_email_verified)
                    .bind(user.login_attempts)
                    .bind(user.lock_until)
                    .bind(user.last_login)
                    .fetch_optional(&mut *self.db)
                    .await?
            }
            Some(secrets) => {
                let sql = format!(
                    "UPDATE users SET {SET_PUBLIC},
                        password_reset_token = $8, password_reset_expires = $9,
                        email_verification_token = $10, email_verification_expires = $11,
                        refresh_token = $12, refresh_token_expires = $13
                     WHERE id = $1 RETURNING {PUBLIC_COLUMNS}"
                );
                sqlx::query_as::<_, User>(&sql)
                    .bind(user.id)
                    .bind(user.role)
                    .bind(user.is_active)
                    .bind(user.is_email_verified)
                    .bind(user.login_attempts)
                    .bind(user.lock_until)
                    .bind(user.last_login)
                    .bind(&secrets.password_reset_token)
                    .bind(secrets.password_reset_expires)
                    .bind(&secrets.email_verification_token)
                    .bind(secrets.email_verification_expires)
                    .bind(&secrets.refresh_token)
                    .bind(secrets.refresh_token_expires)
                    .fetch_optional(&mut *self.db)
                    .await?
            }
        };

        let row = row.ok_or(DbError::NotFound)?;
        Ok(UserDBResponse::from((row, user.secrets.clone())))
    }

    /// Replace the password hash and stamp `password_changed_at` in one statement
    #[instrument(skip(self, password_hash), fields(user_id = %abbrev_uuid(&id)), err)]
    pub async fn update_password(&mut self, id: UserId, password_hash: &str, changed_at: DateTime<Utc>) -> Result<()> {
        let result = sqlx::query("UPDATE users SET password_hash = $2, password_changed_at = $3, updated_at = NOW() WHERE id = $1")
            .bind(id)
            .bind(password_hash)
            .bind(changed_at)
            .execute(&mut *self.db)
            .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::NotFound);
        }
        Ok(())
    }

    /// Null out every expired token of one kind, returning how many were cleared
    #[instrument(skip(self), err)]
    pub async fn clear_expired_tokens(&mut self, column: TokenColumn, now: DateTime<Utc>) -> Result<u64> {
        let sql = format!(
            "UPDATE users SET {token} = NULL, {expires} = NULL WHERE {token} IS NOT NULL AND {expires} <= $1",
            token = column.token(),
            expires = column.expires()
        );
        let result = sqlx::query(&sql).bind(now).execute(&mut *self.db).await?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use sqlx::PgPool;

    fn request(email: &str) -> UserCreateDBRequest {
        UserCreateDBRequest {
            name: "Alice".to_string(),
            email: email.to_string(),
            password_hash: "hash".to_string(),
            role: Role::User,
            is_email_verified: false,
        }
    }

    #[sqlx::test]
    async fn test_create_and_read_respects_fields(pool: PgPool) {
        let mut conn = pool.acquire().await.unwrap();
        let mut repo = Users::new(&mut conn);

        let created = repo.create(&request("alice@x.com")).await.unwrap();
        assert_eq!(created.secrets.as_ref().unwrap().password_hash, "hash");
        assert_eq!(created.role, Role::User);
        assert!(created.is_active);

        let public = repo.get_by_id(created.id).await.unwrap().unwrap();
        assert!(public.secrets.is_none());

        let full = repo.get_by_email("ALICE@x.com", Fields::WithSecrets).await.unwrap().unwrap();
        assert_eq!(full.id, created.id);
        assert_eq!(full.secrets.unwrap().password_hash, "hash");
    }

    #[sqlx::test]
    async fn test_duplicate_email_is_unique_violation(pool: PgPool) {
        let mut conn = pool.acquire().await.unwrap();
        let mut repo = Users::new(&mut conn);

        repo.create(&request("alice@x.com")).await.unwrap();
        let err = repo.create(&request("alice@x.com")).await.unwrap_err();
        assert!(err.is_duplicate_email(), "unexpected error: {err:?}");
    }

    #[sqlx::test]
    async fn test_update_writes_counters_and_tokens(pool: PgPool) {
        let mut conn = pool.acquire().await.unwrap();
        let mut repo = Users::new(&mut conn);
        let now = Utc::now();

        let mut user = repo.create(&request("alice@x.com")).await.unwrap();
        user.login_attempts = 3;
        user.lock_until = Some(now + Duration::hours(2));
        {
            let secrets = user.secrets.as_mut().unwrap();
            secrets.password_reset_token = Some("digest".to_string());
            secrets.password_reset_expires = Some(now + Duration::minutes(10));
        }
        repo.update(&user).await.unwrap();

        let found = repo
            .get_by_token(TokenColumn::PasswordReset, "digest", now)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, user.id);
        assert_eq!(found.login_attempts, 3);
        assert!(found.is_locked(now));

        // expired tokens do not match
        assert!(
            repo.get_by_token(TokenColumn::PasswordReset, "digest", now + Duration::minutes(11))
                .await
                .unwrap()
                .is_none()
        );
    }

    #[sqlx::test]
    async fn test_public_update_leaves_tokens_alone(pool: PgPool) {
        let mut conn = pool.acquire().await.unwrap();
        let mut repo = Users::new(&mut conn);
        let now = Utc::now();

        let mut user = repo.create(&request("alice@x.com")).await.unwrap();
        {
            let secrets = user.secrets.as_mut().unwrap();
            secrets.refresh_token = Some("refresh-digest".to_string());
            secrets.refresh_token_expires = Some(now + Duration::days(30));
        }
        repo.update(&user).await.unwrap();

        let mut public = repo.get(user.id, Fields::Public).await.unwrap().unwrap();
        public.is_active = false;
        repo.update(&public).await.unwrap();

        let full = repo.get(user.id, Fields::WithSecrets).await.unwrap().unwrap();
        assert!(!full.is_active);
        assert_eq!(full.secrets.unwrap().refresh_token.as_deref(), Some("refresh-digest"));
    }

    #[sqlx::test]
    async fn test_update_password_and_sweep(pool: PgPool) {
        let mut conn = pool.acquire().await.unwrap();
        let mut repo = Users::new(&mut conn);
        let now = Utc::now();

        let mut user = repo.create(&request("alice@x.com")).await.unwrap();
        repo.update_password(user.id, "new-hash", now).await.unwrap();
        let full = repo.get(user.id, Fields::WithSecrets).await.unwrap().unwrap();
        assert_eq!(full.secrets.unwrap().password_hash, "new-hash");
        assert!(full.password_changed_at.is_some());

        assert!(matches!(
            repo.update_password(Uuid::new_v4(), "x", now).await,
            Err(DbError::NotFound)
        ));

        {
            let secrets = user.secrets.as_mut().unwrap();
            secrets.email_verification_token = Some("v".to_string());
            secrets.email_verification_expires = Some(now - Duration::minutes(1));
        }
        repo.update(&user).await.unwrap();

        assert_eq!(repo.clear_expired_tokens(TokenColumn::EmailVerification, now).await.unwrap(), 1);
        assert_eq!(repo.clear_expired_tokens(TokenColumn::EmailVerification, now).await.unwrap(), 0);
    }
}
