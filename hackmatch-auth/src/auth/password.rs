//! Password hashing, verification and the password policy.

use argon2::{
    Algorithm, Argon2, Params, Version,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};
use chrono::{DateTime, Duration, Utc};
use tracing::instrument;
use validator::ValidationError;

use crate::config::{Config, PasswordConfig};
use crate::db::models::users::UserDBResponse;
use crate::db::store::CredentialStore;
use crate::errors::Error;
use crate::types::abbrev_uuid;

/// Argon2 hashing parameters.
#[derive(Debug, Clone, Copy)]
pub struct Argon2Params {
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

impl Argon2Params {
    /// Create Argon2 instance with these parameters.
    fn to_argon2(self) -> Result<Argon2<'static>, Error> {
        let params = Params::new(self.memory_kib, self.iterations, self.parallelism, None).map_err(|e| Error::Internal {
            operation: format!("create argon2 params: {e}"),
        })?;

        Ok(Argon2::new(Algorithm::Argon2id, Version::V0x13, params))
    }
}

impl From<&PasswordConfig> for Argon2Params {
    fn from(config: &PasswordConfig) -> Self {
        Self {
            memory_kib: config.argon2_memory_kib,
            iterations: config.argon2_iterations,
            parallelism: config.argon2_parallelism,
        }
    }
}

/// Hash a password with Argon2id and a fresh random salt.
pub fn hash_string_with_params(input: &str, params: Argon2Params) -> Result<String, Error> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = params.to_argon2()?;

    let hash = argon2.hash_password(input.as_bytes(), &salt).map_err(|e| Error::Internal {
        operation: format!("hash string: {e}"),
    })?;

    Ok(hash.to_string())
}

/// Verify a string against a hash.
///
/// Note: Verification uses the parameters embedded in the hash itself.
pub fn verify_string(input: &str, hash: &str) -> Result<bool, Error> {
    let parsed_hash = PasswordHash::new(hash).map_err(|e| Error::Internal {
        operation: format!("parse hash: {e}"),
    })?;

    // Verification always uses params from the hash
    let argon2 = Argon2::default();
    Ok(argon2.verify_password(input.as_bytes(), &parsed_hash).is_ok())
}

/// Hash on a blocking thread to avoid stalling the async runtime
pub async fn hash_password(password: &str, params: Argon2Params) -> Result<String, Error> {
    let password = password.to_string();
    tokio::task::spawn_blocking(move || hash_string_with_params(&password, params))
        .await
        .map_err(|e| Error::Internal {
            operation: format!("spawn password hashing task: {e}"),
        })?
}

/// Verify on a blocking thread to avoid stalling the async runtime
pub async fn verify_password(password: &str, hash: &str) -> Result<bool, Error> {
    let password = password.to_string();
    let hash = hash.to_string();
    tokio::task::spawn_blocking(move || verify_string(&password, &hash))
        .await
        .map_err(|e| Error::Internal {
            operation: format!("spawn password verification task: {e}"),
        })?
}

/// Hash and store a new password, stamping `password_changed_at` one second before `now`.
///
/// Access tokens carry whole-second `iat` values; the one-second skew keeps a token minted right
/// after the change from looking older than it. Updates `user` to match what was stored.
#[instrument(skip_all, fields(user_id = %abbrev_uuid(&user.id)), err)]
pub async fn change_password(
    store: &dyn CredentialStore,
    user: &mut UserDBResponse,
    new_password: &str,
    config: &Config,
    now: DateTime<Utc>,
) -> Result<(), Error> {
    let hash = hash_password(new_password, Argon2Params::from(&config.auth.password)).await?;
    let changed_at = now - Duration::seconds(1);
    store.update_password(user.id, &hash, changed_at).await?;

    user.password_changed_at = Some(changed_at);
    if let Some(secrets) = user.secrets.as_mut() {
        secrets.password_hash = hash;
    }
    Ok(())
}

/// Check a candidate password against the configured policy.
///
/// Length bounds come from configuration; an uppercase letter, a lowercase letter, a digit and a
/// symbol are always required.
pub fn check_policy(password: &str, config: &PasswordConfig) -> Result<(), ValidationError> {
    let length = password.chars().count();
    if length < config.min_length {
        return Err(ValidationError::new("length")
            .with_message(format!("Password must be at least {} characters long", config.min_length).into()));
    }
    if length > config.max_length {
        return Err(ValidationError::new("length")
            .with_message(format!("Password must be no more than {} characters long", config.max_length).into()));
    }

    let has_upper = password.chars().any(|c| c.is_uppercase());
    let has_lower = password.chars().any(|c| c.is_lowercase());
    let has_digit = password.chars().any(|c| c.is_ascii_digit());
    let has_symbol = password.chars().any(|c| !c.is_alphanumeric() && !c.is_whitespace());

    if !(has_upper && has_lower && has_digit && has_symbol) {
        return Err(ValidationError::new("complexity").with_message(
            "Password must contain at least one uppercase letter, one lowercase letter, one number and one special character"
                .into(),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast() -> Argon2Params {
        Argon2Params {
            memory_kib: 128,
            iterations: 1,
            parallelism: 1,
        }
    }

    #[test]
    fn test_string_hashing() {
        let input = "Abcd123!";
        let hash = hash_string_with_params(input, fast()).unwrap();

        // Hash should never be the plaintext
        assert_ne!(hash, input);
        assert!(hash.starts_with("$argon2id$"));

        assert!(verify_string(input, &hash).unwrap());
        assert!(!verify_string("wrong_password", &hash).unwrap());
    }

    #[test]
    fn test_same_input_different_hashes() {
        let input = "same_password";

        let hash1 = hash_string_with_params(input, fast()).unwrap();
        let hash2 = hash_string_with_params(input, fast()).unwrap();

        // Same input should produce different hashes due to salt
        assert_ne!(hash1, hash2);
        assert!(verify_string(input, &hash1).unwrap());
        assert!(verify_string(input, &hash2).unwrap());
    }

    #[test]
    fn test_malformed_hash_is_internal_error() {
        assert!(matches!(verify_string("x", "not-a-phc-string"), Err(Error::Internal { .. })));
    }

    #[test]
    fn test_invalid_params_rejected() {
        let params = Argon2Params {
            memory_kib: 1,
            iterations: 0,
            parallelism: 1,
        };
        assert!(hash_string_with_params("x", params).is_err());
    }

    #[tokio::test]
    async fn test_async_round_trip() {
        let hash = hash_password("NewPass1!", fast()).await.unwrap();
        assert!(verify_password("NewPass1!", &hash).await.unwrap());
        assert!(!verify_password("Abcd123!", &hash).await.unwrap());
    }

    #[tokio::test]
    async fn test_change_password_stamps_skewed_time() {
        use crate::api::models::users::Role;
        use crate::db::models::users::{Fields, UserCreateDBRequest};
        use crate::db::store::MemoryCredentialStore;

        let store = MemoryCredentialStore::new();
        let mut config = Config::default();
        config.auth.password.argon2_memory_kib = 128;
        config.auth.password.argon2_iterations = 1;

        let mut user = store
            .create(&UserCreateDBRequest {
                name: "Alice".to_string(),
                email: "alice@x.com".to_string(),
                password_hash: hash_string_with_params("Abcd123!", fast()).unwrap(),
                role: Role::User,
                is_email_verified: false,
            })
            .await
            .unwrap();

        let now = Utc::now();
        change_password(&store, &mut user, "NewPass1!", &config, now).await.unwrap();
        assert_eq!(user.password_changed_at, Some(now - Duration::seconds(1)));

        let stored = store.find_by_id(user.id, Fields::WithSecrets).await.unwrap().unwrap();
        let hash = stored.secrets.unwrap().password_hash;
        assert!(verify_string("NewPass1!", &hash).unwrap());
        assert!(!verify_string("Abcd123!", &hash).unwrap());
        assert_eq!(stored.password_changed_at, Some(now - Duration::seconds(1)));
    }

    #[test]
    fn test_policy() {
        let config = PasswordConfig::default();

        assert!(check_policy("Abcd123!", &config).is_ok());
        assert!(check_policy("NewPass1!", &config).is_ok());

        let short = check_policy("Ab1!", &config).unwrap_err();
        assert_eq!(short.code, "length");
        assert_eq!(short.message.unwrap(), "Password must be at least 8 characters long");

        assert_eq!(check_policy(&format!("Aa1!{}", "x".repeat(200)), &config).unwrap_err().code, "length");

        for weak in ["abcd1234!", "ABCD1234!", "Abcdefgh!", "Abcd12345"] {
            assert_eq!(check_policy(weak, &config).unwrap_err().code, "complexity", "{weak}");
        }
    }
}
