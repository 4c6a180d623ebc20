//! Extractors for the authenticated caller.

use axum::{extract::FromRequestParts, http::request::Parts};
use chrono::Utc;
use tracing::instrument;

use crate::{
    AppState,
    api::models::users::Role,
    auth::{
        revocation,
        tokens::{self, AccessClaims},
    },
    db::models::users::{Fields, UserDBResponse},
    errors::{Error, Result},
};

/// The caller behind a valid, unrevoked bearer token.
///
/// Checks run in a fixed order and the first failure decides the 401 message: a token must be
/// present, verify, name an existing and active account, not be revoked, and not predate the
/// account's last password change.
#[derive(Debug, Clone)]
pub struct CurrentUser {
    /// Public fields only
    pub user: UserDBResponse,
    /// The raw bearer token, needed to revoke it
    pub token: String,
    pub claims: AccessClaims,
}

/// A [`CurrentUser`] holding the admin role
#[derive(Debug, Clone)]
pub struct AdminUser(pub CurrentUser);

fn unauthenticated(message: &str) -> Error {
    Error::Unauthenticated {
        message: Some(message.to_string()),
    }
}

/// Extract the token from an `Authorization: Bearer <token>` header
pub fn bearer_token(parts: &Parts) -> Option<&str> {
    parts
        .headers
        .get(axum::http::header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = Error;

    #[instrument(skip_all)]
    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self> {
        let token = bearer_token(parts)
            .ok_or_else(|| unauthenticated("Access denied. No token provided."))?
            .to_string();

        let claims = tokens::verify_access_token(&token, &state.config)?;

        let user = state
            .store
            .find_by_id(claims.sub, Fields::Public)
            .await?
            .ok_or_else(|| unauthenticated("The user belonging to this token no longer exists."))?;

        if !user.is_active {
            return Err(unauthenticated("This account has been deactivated."));
        }

        if revocation::is_revoked(state.store.as_ref(), user.id, &token, Utc::now()).await? {
            return Err(unauthenticated("Token has been invalidated. Please log in again."));
        }

        if tokens::password_changed_after(&user, claims.iat) {
            return Err(unauthenticated("User recently changed password. Please log in again."));
        }

        Ok(CurrentUser { user, token, claims })
    }
}

impl FromRequestParts<AppState> for AdminUser {
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self> {
        let current = CurrentUser::from_request_parts(parts, state).await?;
        if current.user.role != Role::Admin {
            return Err(Error::InsufficientPermissions { required: Role::Admin });
        }
        Ok(AdminUser(current))
    }
}
