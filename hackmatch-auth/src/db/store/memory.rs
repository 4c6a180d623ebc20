//! In-process credential store backed by concurrent maps. Contents are lost on restart.

use super::CredentialStore;
use crate::db::errors::{DbError, Result};
use crate::db::models::users::{Fields, SweepReport, UserCreateDBRequest, UserDBResponse, UserSecrets};
use crate::types::UserId;
use chrono::{DateTime, Utc};
use dashmap::{DashMap, mapref::entry::Entry};
use uuid::Uuid;

#[derive(Debug, Clone)]
struct BlacklistEntry {
    user_id: UserId,
    expires_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    /// Records always hold their secrets; reads strip them as requested
    users: DashMap<UserId, UserDBResponse>,
    emails: DashMap<String, UserId>,
    blacklist: DashMap<String, BlacklistEntry>,
}

fn project(user: &UserDBResponse, fields: Fields) -> UserDBResponse {
    match fields {
        Fields::Public => user.clone().without_secrets(),
        Fields::WithSecrets => user.clone(),
    }
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn find_by_secret<F>(&self, matches: F) -> Option<UserDBResponse>
    where
        F: Fn(&UserSecrets) -> bool,
    {
        self.users
            .iter()
            .find(|entry| entry.secrets.as_ref().is_some_and(&matches))
            .map(|entry| entry.value().clone())
    }
}

fn unexpired(token: &Option<String>, expires: &Option<DateTime<Utc>>, digest: &str, now: DateTime<Utc>) -> bool {
    token.as_deref() == Some(digest) && expires.is_some_and(|at| at > now)
}

/// Clear a token pair when it has expired, reporting whether anything changed
fn clear_if_expired(token: &mut Option<String>, expires: &mut Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
    if token.is_some() && expires.is_some_and(|at| at <= now) {
        *token = None;
        *expires = None;
        true
    } else {
        false
    }
}

#[async_trait::async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn create(&self, request: &UserCreateDBRequest) -> Result<UserDBResponse> {
        let email = request.email.to_lowercase();
        match self.emails.entry(email.clone()) {
            Entry::Occupied(_) => Err(DbError::UniqueViolation {
                constraint: Some("users_email_unique".to_string()),
                table: Some("users".to_string()),
                message: format!("email {email} is already registered"),
            }),
            Entry::Vacant(slot) => {
                let now = Utc::now();
                let user = UserDBResponse {
                    id: Uuid::new_v4(),
                    name: request.name.clone(),
                    email,
                    role: request.role,
                    is_active: true,
                    is_email_verified: request.is_email_verified,
                    login_attempts: 0,
                    lock_until: None,
                    last_login: None,
                    password_changed_at: None,
                    created_at: now,
                    updated_at: now,
                    secrets: Some(UserSecrets {
                        password_hash: request.password_hash.clone(),
                        ..Default::default()
                    }),
                };
                self.users.insert(user.id, user.clone());
                slot.insert(user.id);
                Ok(user)
            }
        }
    }

    async fn find_by_email(&self, email: &str, fields: Fields) -> Result<Option<UserDBResponse>> {
        let Some(id) = self.emails.get(&email.to_lowercase()).map(|entry| *entry.value()) else {
            return Ok(None);
        };
        Ok(self.users.get(&id).map(|user| project(&user, fields)))
    }

    async fn find_by_id(&self, id: UserId, fields: Fields) -> Result<Option<UserDBResponse>> {
        Ok(self.users.get(&id).map(|user| project(&user, fields)))
    }

    async fn find_by_refresh_token(&self, digest: &str, now: DateTime<Utc>) -> Result<Option<UserDBResponse>> {
        Ok(self.find_by_secret(|s| unexpired(&s.refresh_token, &s.refresh_token_expires, digest, now)))
    }

    async fn find_by_password_reset_token(&self, digest: &str, now: DateTime<Utc>) -> Result<Option<UserDBResponse>> {
        Ok(self.find_by_secret(|s| unexpired(&s.password_reset_token, &s.password_reset_expires, digest, now)))
    }

    async fn find_by_email_verification_token(&self, digest: &str, now: DateTime<Utc>) -> Result<Option<UserDBResponse>> {
        Ok(self.find_by_secret(|s| unexpired(&s.email_verification_token, &s.email_verification_expires, digest, now)))
    }

    async fn save(&self, user: &UserDBResponse) -> Result<UserDBResponse> {
        let mut stored = self.users.get_mut(&user.id).ok_or(DbError::NotFound)?;

        stored.role = user.role;
        stored.is_active = user.is_active;
        stored.is_email_verified = user.is_email_verified;
        stored.login_attempts = user.login_attempts;
        stored.lock_until = user.lock_until;
        stored.last_login = user.last_login;
        stored.updated_at = Utc::now();

        if let (Some(incoming), Some(current)) = (&user.secrets, stored.secrets.as_mut()) {
            current.password_reset_token = incoming.password_reset_token.clone();
            current.password_reset_expires = incoming.password_reset_expires;
            current.email_verification_token = incoming.email_verification_token.clone();
            current.email_verification_expires = incoming.email_verification_expires;
            current.refresh_token = incoming.refresh_token.clone();
            current.refresh_token_expires = incoming.refresh_token_expires;
        }

        let fields = if user.secrets.is_some() { Fields::WithSecrets } else { Fields::Public };
        Ok(project(&stored, fields))
    }

    async fn update_password(&self, id: UserId, password_hash: &str, changed_at: DateTime<Utc>) -> Result<()> {
        let mut stored = self.users.get_mut(&id).ok_or(DbError::NotFound)?;
        if let Some(secrets) = stored.secrets.as_mut() {
            secrets.password_hash = password_hash.to_string();
        }
        stored.password_changed_at = Some(changed_at);
        stored.updated_at = Utc::now();
        Ok(())
    }

    async fn blacklist_token(&self, user_id: UserId, token: &str, expires_at: DateTime<Utc>, now: DateTime<Utc>) -> Result<()> {
        if !self.users.contains_key(&user_id) {
            return Err(DbError::ForeignKeyViolation {
                constraint: Some("blacklisted_tokens_user_id_fkey".to_string()),
                table: Some("blacklisted_tokens".to_string()),
                message: format!("user {user_id} does not exist"),
            });
        }

        self.blacklist
            .retain(|_, entry| entry.user_id != user_id || entry.expires_at > now);

        self.blacklist
            .entry(token.to_string())
            .and_modify(|entry| entry.expires_at = entry.expires_at.max(expires_at))
            .or_insert(BlacklistEntry { user_id, expires_at });
        Ok(())
    }

    async fn is_token_blacklisted(&self, user_id: UserId, token: &str, now: DateTime<Utc>) -> Result<bool> {
        Ok(self
            .blacklist
            .get(token)
            .is_some_and(|entry| entry.user_id == user_id && entry.expires_at > now))
    }

    async fn cleanup_expired_tokens(&self, now: DateTime<Utc>) -> Result<SweepReport> {
        let mut report = SweepReport::default();

        for mut user in self.users.iter_mut() {
            let Some(secrets) = user.secrets.as_mut() else {
                continue;
            };
            if clear_if_expired(&mut secrets.refresh_token, &mut secrets.refresh_token_expires, now) {
                report.refresh_tokens += 1;
            }
            if clear_if_expired(&mut secrets.password_reset_token, &mut secrets.password_reset_expires, now) {
                report.password_reset_tokens += 1;
            }
            if clear_if_expired(
                &mut secrets.email_verification_token,
                &mut secrets.email_verification_expires,
                now,
            ) {
                report.email_verification_tokens += 1;
            }
        }

        let before = self.blacklist.len();
        self.blacklist.retain(|_, entry| entry.expires_at > now);
        report.blacklisted_tokens = before.saturating_sub(self.blacklist.len()) as u64;

        Ok(report)
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::models::users::Role;
    use chrono::Duration;

    fn request(email: &str) -> UserCreateDBRequest {
        UserCreateDBRequest {
            name: "Alice".to_string(),
            email: email.to_string(),
            password_hash: "hash".to_string(),
            role: Role::User,
            is_email_verified: false,
        }
    }

    #[tokio::test]
    async fn test_email_uniqueness_is_case_insensitive() {
        let store = MemoryCredentialStore::new();
        let created = store.create(&request("Alice@X.com")).await.unwrap();
        assert_eq!(created.email, "alice@x.com");

        let err = store.create(&request("alice@x.com")).await.unwrap_err();
        assert!(err.is_duplicate_email());

        let found = store.find_by_email("ALICE@x.COM", Fields::Public).await.unwrap().unwrap();
        assert_eq!(found.id, created.id);
    }

    #[tokio::test]
    async fn test_concurrent_registrations_yield_one_account() {
        let store = std::sync::Arc::new(MemoryCredentialStore::new());
        let mut handles = Vec::new();
        for _ in 0..16 {
            let store = store.clone();
            handles.push(tokio::spawn(async move { store.create(&request("race@x.com")).await.is_ok() }));
        }

        let mut successes = 0;
        for handle in handles {
            if handle.await.unwrap() {
                successes += 1;
            }
        }
        assert_eq!(successes, 1);
        assert_eq!(store.users.len(), 1);
    }

    #[tokio::test]
    async fn test_public_reads_strip_secrets() {
        let store = MemoryCredentialStore::new();
        let created = store.create(&request("alice@x.com")).await.unwrap();

        let public = store.find_by_id(created.id, Fields::Public).await.unwrap().unwrap();
        assert!(public.secrets.is_none());
        let full = store.find_by_id(created.id, Fields::WithSecrets).await.unwrap().unwrap();
        assert_eq!(full.secrets.unwrap().password_hash, "hash");
    }

    #[tokio::test]
    async fn test_public_save_keeps_tokens() {
        let store = MemoryCredentialStore::new();
        let now = Utc::now();
        let mut user = store.create(&request("alice@x.com")).await.unwrap();
        {
            let secrets = user.secrets_mut().unwrap();
            secrets.refresh_token = Some("digest".to_string());
            secrets.refresh_token_expires = Some(now + Duration::days(30));
        }
        store.save(&user).await.unwrap();

        let mut public = store.find_by_id(user.id, Fields::Public).await.unwrap().unwrap();
        public.is_active = false;
        let saved = store.save(&public).await.unwrap();
        assert!(saved.secrets.is_none());
        assert!(!saved.is_active);

        let found = store.find_by_refresh_token("digest", now).await.unwrap().unwrap();
        assert_eq!(found.id, user.id);
        assert!(!found.is_active);
        assert!(store.find_by_refresh_token("digest", now + Duration::days(31)).await.unwrap().is_none());
        assert!(store.find_by_refresh_token("other", now).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_update_password_stamps_change_time() {
        let store = MemoryCredentialStore::new();
        let user = store.create(&request("alice@x.com")).await.unwrap();
        assert!(user.password_changed_at.is_none());

        let at = Utc::now() - Duration::seconds(1);
        store.update_password(user.id, "new-hash", at).await.unwrap();

        let full = store.find_by_id(user.id, Fields::WithSecrets).await.unwrap().unwrap();
        assert_eq!(full.secrets.unwrap().password_hash, "new-hash");
        assert_eq!(full.password_changed_at, Some(at));

        assert!(matches!(
            store.update_password(Uuid::new_v4(), "x", at).await,
            Err(DbError::NotFound)
        ));
    }

    #[tokio::test]
    async fn test_blacklist_prunes_expired_entries_of_that_user() {
        let store = MemoryCredentialStore::new();
        let now = Utc::now();
        let alice = store.create(&request("alice@x.com")).await.unwrap();
        let bob = store.create(&request("bob@x.com")).await.unwrap();

        store
            .blacklist_token(alice.id, "a-old", now - Duration::seconds(1), now - Duration::hours(1))
            .await
            .unwrap();
        store
            .blacklist_token(bob.id, "b-old", now - Duration::seconds(1), now - Duration::hours(1))
            .await
            .unwrap();
        store
            .blacklist_token(alice.id, "a-new", now + Duration::days(30), now)
            .await
            .unwrap();

        assert!(!store.blacklist.contains_key("a-old"));
        assert!(store.blacklist.contains_key("b-old"));
        assert!(store.is_token_blacklisted(alice.id, "a-new", now).await.unwrap());
        // entries are scoped to their owner
        assert!(!store.is_token_blacklisted(bob.id, "a-new", now).await.unwrap());

        let err = store
            .blacklist_token(Uuid::new_v4(), "x", now + Duration::days(1), now)
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::ForeignKeyViolation { .. }));
    }

    #[tokio::test]
    async fn test_cleanup_is_idempotent() {
        let store = MemoryCredentialStore::new();
        let now = Utc::now();
        let mut user = store.create(&request("alice@x.com")).await.unwrap();
        {
            let secrets = user.secrets_mut().unwrap();
            secrets.refresh_token = Some("r".to_string());
            secrets.refresh_token_expires = Some(now - Duration::seconds(1));
            secrets.password_reset_token = Some("p".to_string());
            secrets.password_reset_expires = Some(now - Duration::seconds(1));
            secrets.email_verification_token = Some("v".to_string());
            secrets.email_verification_expires = Some(now + Duration::hours(1));
        }
        store.save(&user).await.unwrap();
        store
            .blacklist_token(user.id, "jwt", now - Duration::seconds(1), now - Duration::hours(1))
            .await
            .unwrap();

        let report = store.cleanup_expired_tokens(now).await.unwrap();
        assert_eq!(
            report,
            SweepReport {
                refresh_tokens: 1,
                password_reset_tokens: 1,
                email_verification_tokens: 0,
                blacklisted_tokens: 1,
            }
        );
        assert_eq!(store.cleanup_expired_tokens(now).await.unwrap().total(), 0);
        assert!(store.find_by_email_verification_token("v", now).await.unwrap().is_some());
    }
}
