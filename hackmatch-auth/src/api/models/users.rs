//! API request/response models for users.

use crate::db::models::users::UserDBResponse;
use crate::types::UserId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Account role. Every self-registered account is a `user`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, ToSchema)]
#[sqlx(type_name = "user_role", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    User,
    Admin,
}

/// Public profile of an account. Carries no credential or token artifacts.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UserResponse {
    #[schema(value_type = String, format = "uuid")]
    pub id: UserId,
    pub name: String,
    pub email: String,
    pub role: Role,
    pub is_active: bool,
    pub is_email_verified: bool,
    pub last_login: Option<DateTime<Utc>>,
    pub password_changed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<UserDBResponse> for UserResponse {
    fn from(db: UserDBResponse) -> Self {
        Self {
            id: db.id,
            name: db.name,
            email: db.email,
            role: db.role,
            is_active: db.is_active,
            is_email_verified: db.is_email_verified,
            last_login: db.last_login,
            password_changed_at: db.password_changed_at,
            created_at: db.created_at,
            updated_at: db.updated_at,
        }
    }
}

/// Admin request to enable or disable an account
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UserStatusUpdate {
    pub is_active: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::users::UserSecrets;
    use uuid::Uuid;

    #[test]
    fn test_user_response_never_carries_secrets() {
        let now = Utc::now();
        let db = UserDBResponse {
            id: Uuid::new_v4(),
            name: "Alice".to_string(),
            email: "alice@x.com".to_string(),
            role: Role::User,
            is_active: true,
            is_email_verified: false,
            login_attempts: 2,
            lock_until: None,
            last_login: None,
            password_changed_at: None,
            created_at: now,
            updated_at: now,
            secrets: Some(UserSecrets {
                password_hash: "$argon2id$v=19$...".to_string(),
                refresh_token: Some("digest".to_string()),
                ..Default::default()
            }),
        };

        let json = serde_json::to_value(UserResponse::from(db)).unwrap();
        let object = json.as_object().unwrap();

        assert_eq!(object["email"], "alice@x.com");
        assert_eq!(object["role"], "user");
        assert_eq!(object["isEmailVerified"], false);
        for forbidden in ["password", "passwordHash", "password_hash", "refreshToken", "loginAttempts", "secrets"] {
            assert!(!object.contains_key(forbidden), "leaked {forbidden}");
        }
    }

    #[test]
    fn test_role_serialization() {
        assert_eq!(serde_json::to_string(&Role::Admin).unwrap(), "\"admin\"");
        assert_eq!(serde_json::from_str::<Role>("\"user\"").unwrap(), Role::User);
        assert_eq!(Role::default(), Role::User);
    }
}
