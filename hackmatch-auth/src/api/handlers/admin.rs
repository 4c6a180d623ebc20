use axum::extract::State;

use crate::{
    AppState,
    api::extract::{Json, Path},
    api::models::{
        auth::UserEnvelope,
        users::{UserResponse, UserStatusUpdate},
    },
    auth::current_user::AdminUser,
    db::models::users::Fields,
    errors::Error,
    types::{UserId, abbrev_uuid},
};

/// Activate or deactivate an account
///
/// A deactivated account can no longer log in, refresh, or use its access tokens.
#[utoipa::path(
    patch,
    path = "/api/v1/admin/users/{id}/status",
    request_body = UserStatusUpdate,
    tag = "admin",
    params(("id" = String, Path, description = "User ID")),
    responses(
        (status = 200, description = "Account updated", body = UserEnvelope),
        (status = 401, description = "Not authenticated"),
        (status = 403, description = "Admin role required"),
        (status = 404, description = "No such user"),
    ),
    security(("bearer_auth" = []))
)]
#[tracing::instrument(skip_all, fields(admin_id = %abbrev_uuid(&admin.0.user.id), user_id = %abbrev_uuid(&id)))]
pub async fn update_user_status(
    State(state): State<AppState>,
    admin: AdminUser,
    Path(id): Path<UserId>,
    Json(request): Json<UserStatusUpdate>,
) -> Result<Json<UserEnvelope>, Error> {
    let mut user = state
        .store
        .find_by_id(id, Fields::Public)
        .await?
        .ok_or_else(|| Error::NotFound {
            message: "No user found with that ID".to_string(),
        })?;

    user.is_active = request.is_active;
    let user = state.store.save(&user).await?;
    tracing::info!(is_active = user.is_active, "Account status changed");

    Ok(Json(UserEnvelope::new(UserResponse::from(user))))
}
