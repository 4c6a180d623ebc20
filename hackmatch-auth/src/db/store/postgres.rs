//! PostgreSQL credential store.

use super::CredentialStore;
use crate::db::errors::{DbError, Result};
use crate::db::handlers::{BlacklistedTokens, Repository, TokenColumn, Users};
use crate::db::models::users::{Fields, SweepReport, UserCreateDBRequest, UserDBResponse};
use crate::types::UserId;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, pool::PoolConnection, Postgres};

#[derive(Debug, Clone)]
pub struct PgCredentialStore {
    pool: PgPool,
}

impl PgCredentialStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn conn(&self) -> Result<PoolConnection<Postgres>> {
        Ok(self.pool.acquire().await?)
    }
}

#[async_trait::async_trait]
impl CredentialStore for PgCredentialStore {
    async fn create(&self, request: &UserCreateDBRequest) -> Result<UserDBResponse> {
        let mut conn = self.conn().await?;
        Users::new(&mut conn).create(request).await
    }

    async fn find_by_email(&self, email: &str, fields: Fields) -> Result<Option<UserDBResponse>> {
        let mut conn = self.conn().await?;
        Users::new(&mut conn).get_by_email(email, fields).await
    }

    async fn find_by_id(&self, id: UserId, fields: Fields) -> Result<Option<UserDBResponse>> {
        let mut conn = self.conn().await?;
        Users::new(&mut conn).get(id, fields).await
    }

    async fn find_by_refresh_token(&self, digest: &str, now: DateTime<Utc>) -> Result<Option<UserDBResponse>> {
        let mut conn = self.conn().await?;
        Users::new(&mut conn).get_by_token(TokenColumn::Refresh, digest, now).await
    }

    async fn find_by_password_reset_token(&self, digest: &str, now: DateTime<Utc>) -> Result<Option<UserDBResponse>> {
        let mut conn = self.conn().await?;
        Users::new(&mut conn).get_by_token(TokenColumn::PasswordReset, digest, now).await
    }

    async fn find_by_email_verification_token(&self, digest: &str, now: DateTime<Utc>) -> Result<Option<UserDBResponse>> {
        let mut conn = self.conn().await?;
        Users::new(&mut conn)
            .get_by_token(TokenColumn::EmailVerification, digest, now)
            .await
    }

    async fn save(&self, user: &UserDBResponse) -> Result<UserDBResponse> {
        let mut conn = self.conn().await?;
        Users::new(&mut conn).update(user).await
    }

    async fn update_password(&self, id: UserId, password_hash: &str, changed_at: DateTime<Utc>) -> Result<()> {
        let mut conn = self.conn().await?;
        Users::new(&mut conn).update_password(id, password_hash, changed_at).await
    }

    async fn blacklist_token(&self, user_id: UserId, token: &str, expires_at: DateTime<Utc>, now: DateTime<Utc>) -> Result<()> {
        let mut conn = self.conn().await?;
        BlacklistedTokens::new(&mut conn).insert(user_id, token, expires_at, now).await
    }

    async fn is_token_blacklisted(&self, user_id: UserId, token: &str, now: DateTime<Utc>) -> Result<bool> {
        let mut conn = self.conn().await?;
        BlacklistedTokens::new(&mut conn).contains(user_id, token, now).await
    }

    async fn cleanup_expired_tokens(&self, now: DateTime<Utc>) -> Result<SweepReport> {
        let mut tx = self.pool.begin().await?;

        let mut users = Users::new(&mut tx);
        let refresh_tokens = users.clear_expired_tokens(TokenColumn::Refresh, now).await?;
        let password_reset_tokens = users.clear_expired_tokens(TokenColumn::PasswordReset, now).await?;
        let email_verification_tokens = users.clear_expired_tokens(TokenColumn::EmailVerification, now).await?;
        let blacklisted_tokens = BlacklistedTokens::new(&mut tx).delete_expired(now).await?;

        tx.commit().await?;

        Ok(SweepReport {
            refresh_tokens,
            password_reset_tokens,
            email_verification_tokens,
            blacklisted_tokens,
        })
    }

    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map(|_| ())
            .map_err(DbError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::models::users::Role;
    use chrono::Duration;

    #[sqlx::test]
    async fn test_sweep_clears_every_expired_artifact(pool: PgPool) {
        let store = PgCredentialStore::new(pool);
        let now = Utc::now();

        let mut user = store
            .create(&UserCreateDBRequest {
                name: "Alice".to_string(),
                email: "alice@x.com".to_string(),
                password_hash: "hash".to_string(),
                role: Role::User,
                is_email_verified: false,
            })
            .await
            .unwrap();
        {
            let secrets = user.secrets_mut().unwrap();
            secrets.refresh_token = Some("r".to_string());
            secrets.refresh_token_expires = Some(now - Duration::seconds(1));
            secrets.password_reset_token = Some("p".to_string());
            secrets.password_reset_expires = Some(now + Duration::minutes(5));
        }
        store.save(&user).await.unwrap();
        store
            .blacklist_token(user.id, "jwt", now - Duration::seconds(1), now - Duration::hours(1))
            .await
            .unwrap();

        let report = store.cleanup_expired_tokens(now).await.unwrap();
        assert_eq!(report.refresh_tokens, 1);
        assert_eq!(report.password_reset_tokens, 0);
        assert_eq!(report.blacklisted_tokens, 1);

        assert_eq!(store.cleanup_expired_tokens(now).await.unwrap().total(), 0);
        assert!(store.find_by_password_reset_token("p", now).await.unwrap().is_some());
        store.ping().await.unwrap();
    }

    #[sqlx::test]
    async fn test_session_flow_over_postgres(pool: PgPool) {
        use crate::test_utils::create_pg_test_server;
        use axum::http::StatusCode;
        use serde_json::{Value, json};

        let (server, _state, mailer) = create_pg_test_server(pool);

        let registered: Value = server
            .post("/api/v1/auth/register")
            .json(&json!({
                "name": "Alice",
                "email": "Alice@X.com",
                "password": "Abcd123!",
                "confirmPassword": "Abcd123!",
            }))
            .await
            .json();
        assert_eq!(registered["data"]["user"]["email"], "alice@x.com");

        let token = mailer.last_token().expect("verification link in email");
        server
            .get(&format!("/api/v1/auth/verify-email/{token}"))
            .await
            .assert_status_ok();

        for _ in 0..5 {
            server
                .post("/api/v1/auth/login")
                .json(&json!({"email": "alice@x.com", "password": "Wrong123!"}))
                .await
                .assert_status(StatusCode::UNAUTHORIZED);
        }
        let response = server
            .post("/api/v1/auth/login")
            .json(&json!({"email": "alice@x.com", "password": "Abcd123!"}))
            .await;
        response.assert_status(StatusCode::UNAUTHORIZED);
        assert_eq!(response.json::<Value>()["message"], crate::auth::lockout::LOCKED_MESSAGE);

        let access = registered["accessToken"].as_str().unwrap();
        let me: Value = server
            .get("/api/v1/auth/me")
            .add_header("authorization", format!("Bearer {access}"))
            .await
            .json();
        assert_eq!(me["data"]["user"]["isEmailVerified"], true);

        let refresh = registered["refreshToken"].as_str().unwrap();
        server
            .post("/api/v1/auth/refresh-token")
            .json(&json!({"refreshToken": refresh}))
            .await
            .assert_status_ok();

        server
            .post("/api/v1/auth/logout")
            .add_header("authorization", format!("Bearer {access}"))
            .await
            .assert_status_ok();
        server
            .get("/api/v1/auth/me")
            .add_header("authorization", format!("Bearer {access}"))
            .await
            .assert_status(StatusCode::UNAUTHORIZED);
        server
            .post("/api/v1/auth/refresh-token")
            .json(&json!({"refreshToken": refresh}))
            .await
            .assert_status(StatusCode::UNAUTHORIZED);
    }
}
