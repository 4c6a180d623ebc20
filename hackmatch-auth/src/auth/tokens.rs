//! Access token (JWT) creation and verification, and opaque refresh tokens.

use base64::{Engine as _, engine::general_purpose};
use chrono::{DateTime, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode, errors::ErrorKind};
use rand::prelude::RngExt;
use rand::rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::{
    config::Config,
    db::models::users::UserDBResponse,
    errors::Error,
    types::UserId,
};

/// Access token claims
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessClaims {
    pub sub: UserId, // Subject (user ID)
    pub jti: String, // Unique per token
    pub iat: i64,    // Issued at
    pub exp: i64,    // Expiration time
}

impl AccessClaims {
    pub fn issued_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.iat, 0)
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.exp, 0)
    }
}

fn secret_key(config: &Config) -> Result<&[u8], Error> {
    config
        .secret_key
        .as_deref()
        .map(str::as_bytes)
        .ok_or_else(|| Error::Internal {
            operation: "JWT: secret_key is required".to_string(),
        })
}

/// `len` random bytes, base64url encoded without padding
pub fn generate_token(len: usize) -> String {
    let mut bytes = vec![0u8; len];
    rng().fill(bytes.as_mut_slice());
    general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}

/// Lowercase hex SHA-256 of a token; the form every one-time token is stored in
pub fn hash_token(token: &str) -> String {
    format!("{:x}", Sha256::digest(token.as_bytes()))
}

/// Create an access token for a user
pub fn issue_access_token(user_id: UserId, config: &Config) -> Result<String, Error> {
    issue_access_token_at(user_id, Utc::now(), config)
}

/// Create an access token as if it had been issued at `issued_at`
pub fn issue_access_token_at(user_id: UserId, issued_at: DateTime<Utc>, config: &Config) -> Result<String, Error> {
    let exp = issued_at + config.auth.tokens.access_token_expiry;
    let claims = AccessClaims {
        sub: user_id,
        jti: generate_token(16),
        iat: issued_at.timestamp(),
        exp: exp.timestamp(),
    };

    let key = EncodingKey::from_secret(secret_key(config)?);
    encode(&Header::new(Algorithm::HS256), &claims, &key).map_err(|e| Error::Internal {
        operation: format!("create JWT: {e}"),
    })
}

/// Verify and decode an access token
pub fn verify_access_token(token: &str, config: &Config) -> Result<AccessClaims, Error> {
    let key = DecodingKey::from_secret(secret_key(config)?);
    let validation = Validation::new(Algorithm::HS256);

    let token_data = decode::<AccessClaims>(token, &key, &validation).map_err(|e| match e.kind() {
        ErrorKind::ExpiredSignature => Error::Unauthenticated {
            message: Some("Token expired.".to_string()),
        },

        // Anything the client could have sent wrongly
        ErrorKind::InvalidToken
        | ErrorKind::InvalidSignature
        | ErrorKind::MissingRequiredClaim(_)
        | ErrorKind::InvalidIssuer
        | ErrorKind::InvalidAudience
        | ErrorKind::InvalidSubject
        | ErrorKind::ImmatureSignature
        | ErrorKind::InvalidAlgorithm
        | ErrorKind::Base64(_)
        | ErrorKind::Json(_)
        | ErrorKind::Utf8(_) => Error::Unauthenticated {
            message: Some("Invalid token.".to_string()),
        },

        // Server errors (500) - key issues, internal failures
        _ => Error::Internal {
            operation: format!("JWT verification: {e}"),
        },
    })?;

    Ok(token_data.claims)
}

/// Whether the password changed after a token with this `iat` was issued
pub fn password_changed_after(user: &UserDBResponse, iat: i64) -> bool {
    user.password_changed_at.is_some_and(|changed| changed.timestamp() > iat)
}

/// Mint a refresh token and store its digest and expiry on the record.
///
/// Returns the plaintext, which is never persisted. The caller saves the record.
pub fn issue_refresh_token(user: &mut UserDBResponse, config: &Config, now: DateTime<Utc>) -> Result<String, Error> {
    let token = generate_token(64);
    let secrets = user.secrets_mut()?;
    secrets.refresh_token = Some(hash_token(&token));
    secrets.refresh_token_expires = Some(now + config.auth.tokens.refresh_token_expiry);
    Ok(token)
}

/// Forget the stored refresh token. The caller saves the record.
pub fn clear_refresh_token(user: &mut UserDBResponse) -> Result<(), Error> {
    let secrets = user.secrets_mut()?;
    secrets.refresh_token = None;
    secrets.refresh_token_expires = None;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::models::users::Role;
    use crate::db::models::users::UserSecrets;
    use chrono::Duration;
    use uuid::Uuid;

    fn create_test_config() -> Config {
        Config {
            secret_key: Some("test-secret-key-for-jwt".to_string()),
            ..Default::default()
        }
    }

    fn create_test_user() -> UserDBResponse {
        let now = Utc::now();
        UserDBResponse {
            id: Uuid::new_v4(),
            name: "Alice".to_string(),
            email: "alice@x.com".to_string(),
            role: Role::User,
            is_active: true,
            is_email_verified: false,
            login_attempts: 0,
            lock_until: None,
            last_login: None,
            password_changed_at: None,
            created_at: now,
            updated_at: now,
            secrets: Some(UserSecrets::default()),
        }
    }

    #[test]
    fn test_access_token_round_trip() {
        let config = create_test_config();
        let user_id = Uuid::new_v4();

        let token = issue_access_token(user_id, &config).unwrap();
        let claims = verify_access_token(&token, &config).unwrap();

        assert_eq!(claims.sub, user_id);
        assert_eq!(claims.exp - claims.iat, 15 * 60);
        assert!(claims.issued_at().is_some());
    }

    #[test]
    fn test_tokens_in_same_second_differ() {
        let config = create_test_config();
        let user_id = Uuid::new_v4();
        let now = Utc::now();

        let a = issue_access_token_at(user_id, now, &config).unwrap();
        let b = issue_access_token_at(user_id, now, &config).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_expired_token_rejected() {
        let config = create_test_config();
        let token = issue_access_token_at(Uuid::new_v4(), Utc::now() - Duration::hours(2), &config).unwrap();

        let err = verify_access_token(&token, &config).unwrap_err();
        assert_eq!(err.user_message(), "Token expired.");
    }

    #[test]
    fn test_invalid_tokens_rejected() {
        let config = create_test_config();

        for garbage in ["garbage", "a.b.c", ""] {
            let err = verify_access_token(garbage, &config).unwrap_err();
            assert_eq!(err.user_message(), "Invalid token.", "{garbage}");
        }

        // Signed with another key
        let other = Config {
            secret_key: Some("another-secret".to_string()),
            ..Default::default()
        };
        let token = issue_access_token(Uuid::new_v4(), &other).unwrap();
        let err = verify_access_token(&token, &config).unwrap_err();
        assert_eq!(err.user_message(), "Invalid token.");
    }

    #[test]
    fn test_missing_secret_is_internal() {
        let config = Config::default();
        assert!(matches!(
            issue_access_token(Uuid::new_v4(), &config),
            Err(Error::Internal { .. })
        ));
    }

    #[test]
    fn test_password_changed_after() {
        let mut user = create_test_user();
        let iat = Utc::now().timestamp();
        assert!(!password_changed_after(&user, iat));

        // The change is stamped one second in the past, so a token issued right after survives
        user.password_changed_at = Some(Utc::now() - Duration::seconds(1));
        assert!(!password_changed_after(&user, iat));

        user.password_changed_at = Some(Utc::now() + Duration::seconds(5));
        assert!(password_changed_after(&user, iat));
    }

    #[test]
    fn test_refresh_token_stored_as_digest() {
        let config = create_test_config();
        let mut user = create_test_user();
        let now = Utc::now();

        let token = issue_refresh_token(&mut user, &config, now).unwrap();
        let secrets = user.secrets.as_ref().unwrap();

        // 64 bytes base64url without padding
        assert_eq!(token.len(), 86);
        assert_ne!(secrets.refresh_token.as_deref(), Some(token.as_str()));
        assert_eq!(secrets.refresh_token.as_deref(), Some(hash_token(&token).as_str()));
        assert_eq!(secrets.refresh_token_expires, Some(now + Duration::days(30)));

        clear_refresh_token(&mut user).unwrap();
        assert!(user.secrets.unwrap().refresh_token.is_none());
    }

    #[test]
    fn test_refresh_token_requires_secrets() {
        let config = create_test_config();
        let mut user = create_test_user().without_secrets();
        assert!(issue_refresh_token(&mut user, &config, Utc::now()).is_err());
    }

    #[test]
    fn test_hash_token_is_hex_sha256() {
        let digest = hash_token("abc");
        assert_eq!(digest, "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad");
        assert_eq!(generate_token(32).len(), 43);
    }
}
