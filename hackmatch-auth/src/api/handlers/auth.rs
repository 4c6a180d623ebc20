use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode, header},
};
use chrono::{DateTime, Utc};
use metrics::counter;
use tracing::{info, warn};

use crate::{
    AppState,
    api::extract::{Json, Path},
    api::models::{
        auth::{
            AuthResponse, EmailRequest, LoginRequest, MessageResponse, RefreshTokenRequest, RegisterRequest, ResetPasswordRequest,
            SessionResponse, UpdatePasswordRequest, UserEnvelope, ValidateRequest,
        },
        users::{Role, UserResponse},
    },
    auth::{
        account_tokens,
        current_user::CurrentUser,
        lockout::{FailureOutcome, LOCKED_MESSAGE, LockoutPolicy},
        password::{self, Argon2Params},
        revocation, tokens,
    },
    config::Config,
    db::models::users::{Fields, UserCreateDBRequest, UserDBResponse},
    email::{self, Email},
    errors::Error,
    types::abbrev_uuid,
};

const INCORRECT_CREDENTIALS: &str = "Incorrect email or password";
const NO_SUCH_EMAIL: &str = "There is no user with that email address";

fn unauthenticated(message: &str) -> Error {
    Error::Unauthenticated {
        message: Some(message.to_string()),
    }
}

fn no_such_email() -> Error {
    Error::NotFound {
        message: NO_SUCH_EMAIL.to_string(),
    }
}

/// `Set-Cookie` value carrying a refresh token
fn refresh_cookie(token: &str, config: &Config) -> String {
    let cookie = &config.auth.refresh_cookie;
    let max_age = config.auth.tokens.refresh_token_expiry.as_secs();
    let secure = if cookie.secure { "; Secure" } else { "" };
    format!(
        "{}={}; Path=/; HttpOnly{}; SameSite={}; Max-Age={}",
        cookie.name, token, secure, cookie.same_site, max_age
    )
}

/// `Set-Cookie` value that removes the refresh token cookie
fn expired_refresh_cookie(config: &Config) -> String {
    let cookie = &config.auth.refresh_cookie;
    let secure = if cookie.secure { "; Secure" } else { "" };
    format!("{}=; Path=/; HttpOnly{}; SameSite={}; Max-Age=0", cookie.name, secure, cookie.same_site)
}

fn read_cookie<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, value)| *key == name && !value.is_empty())
        .map(|(_, value)| value)
}

/// Persist `user`, then answer with a fresh access token and, when `remember` is set, a new
/// refresh token in both the body and a cookie.
async fn start_session(
    state: &AppState,
    mut user: UserDBResponse,
    remember: bool,
    status: StatusCode,
    now: DateTime<Utc>,
) -> Result<SessionResponse<AuthResponse>, Error> {
    let refresh_token = if remember {
        Some(tokens::issue_refresh_token(&mut user, &state.config, now)?)
    } else {
        None
    };
    let user = state.store.save(&user).await?;
    let access_token = tokens::issue_access_token(user.id, &state.config)?;

    let cookie = refresh_token.as_deref().map(|token| refresh_cookie(token, &state.config));
    Ok(SessionResponse::new(
        status,
        AuthResponse::new(access_token, refresh_token, UserResponse::from(user)),
        cookie,
    ))
}

/// Register a new account
#[utoipa::path(
    post,
    path = "/api/v1/auth/register",
    request_body = RegisterRequest,
    tag = "authentication",
    responses(
        (status = 201, description = "Account created and signed in", body = AuthResponse),
        (status = 400, description = "Invalid input, duplicate email or registration disabled"),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn register(State(state): State<AppState>, Json(mut request): Json<RegisterRequest>) -> Result<SessionResponse<AuthResponse>, Error> {
    if !state.config.auth.allow_registration {
        return Err(Error::BadRequest {
            message: "User registration is disabled".to_string(),
        });
    }

    request.normalize();
    request.validate_request(&state.config.auth.password)?;

    let password_hash = password::hash_password(&request.password, Argon2Params::from(&state.config.auth.password)).await?;
    let mut user = state
        .store
        .create(&UserCreateDBRequest {
            name: request.name,
            email: request.email,
            password_hash,
            role: Role::User,
            is_email_verified: false,
        })
        .await?;

    let now = Utc::now();
    let verification_token = account_tokens::issue_email_verification_token(&mut user, &state.config, now)?;
    let response = start_session(&state, user, true, StatusCode::CREATED, now).await?;
    let user = &response.body.data.user;
    info!(user_id = %abbrev_uuid(&user.id), "User registered");

    // Registration stands even if the welcome email cannot be sent
    let link = email::email_verification_link(&state.config.public_url, &verification_token);
    if let Err(e) = state
        .mailer
        .send(&user.email, Some(&user.name), &Email::verification(Some(&user.name), &link))
        .await
    {
        warn!(user_id = %abbrev_uuid(&user.id), "Failed to send verification email: {}", e);
    }

    Ok(response)
}

/// Log in with email and password
#[utoipa::path(
    post,
    path = "/api/v1/auth/login",
    request_body = LoginRequest,
    tag = "authentication",
    responses(
        (status = 200, description = "Login successful", body = AuthResponse),
        (status = 401, description = "Invalid credentials, locked or deactivated account"),
        (status = 429, description = "Too many login attempts"),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn login(State(state): State<AppState>, Json(mut request): Json<LoginRequest>) -> Result<SessionResponse<AuthResponse>, Error> {
    request.normalize();
    request.validate_request(&state.config.auth.password)?;

    let Some(mut user) = state.store.find_by_email(&request.email, Fields::WithSecrets).await? else {
        counter!("hackmatch_auth_failed_logins_total", "reason" => "unknown_email").increment(1);
        return Err(unauthenticated(INCORRECT_CREDENTIALS));
    };

    let now = Utc::now();
    if user.is_locked(now) {
        counter!("hackmatch_auth_failed_logins_total", "reason" => "locked").increment(1);
        return Err(unauthenticated(LOCKED_MESSAGE));
    }

    let hash = user.secrets()?.password_hash.clone();
    if !password::verify_password(&request.password, &hash).await? {
        counter!("hackmatch_auth_failed_logins_total", "reason" => "wrong_password").increment(1);
        let policy = LockoutPolicy::from(&state.config.auth.lockout);
        match policy.register_failure(&mut user, now) {
            FailureOutcome::Locked { until } => {
                counter!("hackmatch_auth_account_lockouts_total").increment(1);
                warn!(user_id = %abbrev_uuid(&user.id), %until, "Account locked after repeated failed logins");
            }
            FailureOutcome::Counted { attempts } => {
                info!(user_id = %abbrev_uuid(&user.id), attempts, "Failed login");
            }
            FailureOutcome::AlreadyLocked => {}
        }
        state.store.save(&user).await?;
        return Err(unauthenticated(INCORRECT_CREDENTIALS));
    }

    if !user.is_active {
        return Err(unauthenticated("This account has been deactivated."));
    }

    LockoutPolicy::from(&state.config.auth.lockout).register_success(&mut user, now);
    let response = start_session(&state, user, request.remember_me, StatusCode::OK, now).await?;
    info!(user_id = %abbrev_uuid(&response.body.data.user.id), "User logged in");
    Ok(response)
}

/// Log out: revoke the presented access token and drop the refresh token
#[utoipa::path(
    post,
    path = "/api/v1/auth/logout",
    tag = "authentication",
    responses(
        (status = 200, description = "Logged out", body = MessageResponse),
        (status = 401, description = "Not authenticated"),
    ),
    security(("bearer_auth" = []))
)]
#[tracing::instrument(skip_all, fields(user_id = %abbrev_uuid(&current_user.user.id)))]
pub async fn logout(State(state): State<AppState>, current_user: CurrentUser) -> Result<SessionResponse<MessageResponse>, Error> {
    let now = Utc::now();
    revocation::revoke(
        state.store.as_ref(),
        current_user.user.id,
        &current_user.token,
        state.config.auth.tokens.blacklist_retention,
        now,
    )
    .await?;

    if let Some(mut user) = state.store.find_by_id(current_user.user.id, Fields::WithSecrets).await? {
        tokens::clear_refresh_token(&mut user)?;
        state.store.save(&user).await?;
    }

    info!("User logged out");
    Ok(SessionResponse::new(
        StatusCode::OK,
        MessageResponse::new("Logged out successfully"),
        Some(expired_refresh_cookie(&state.config)),
    ))
}

/// Exchange a refresh token for a new access token
///
/// The token is read from the refresh cookie, falling back to the `refreshToken` body field.
#[utoipa::path(
    post,
    path = "/api/v1/auth/refresh-token",
    request_body(content = RefreshTokenRequest, description = "Optional when the refresh cookie is sent"),
    tag = "authentication",
    responses(
        (status = 200, description = "New access token", body = AuthResponse),
        (status = 401, description = "Missing, invalid or expired refresh token, or deactivated account"),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn refresh_token(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Result<Json<AuthResponse>, Error> {
    let from_body = if body.is_empty() {
        None
    } else {
        serde_json::from_slice::<RefreshTokenRequest>(&body)
            .unwrap_or_default()
            .refresh_token
            .filter(|token| !token.is_empty())
    };
    let token = read_cookie(&headers, &state.config.auth.refresh_cookie.name)
        .map(str::to_string)
        .or(from_body)
        .ok_or_else(|| unauthenticated("No refresh token provided"))?;

    let user = state
        .store
        .find_by_refresh_token(&tokens::hash_token(&token), Utc::now())
        .await?
        .ok_or_else(|| unauthenticated("Invalid refresh token"))?;

    if !user.is_active {
        return Err(unauthenticated("Account has been deactivated"));
    }

    let access_token = tokens::issue_access_token(user.id, &state.config)?;
    Ok(Json(AuthResponse::new(access_token, None, UserResponse::from(user))))
}

/// Get the profile of the authenticated user
#[utoipa::path(
    get,
    path = "/api/v1/auth/me",
    tag = "authentication",
    responses(
        (status = 200, description = "Current user", body = UserEnvelope),
        (status = 401, description = "Not authenticated"),
    ),
    security(("bearer_auth" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn get_me(current_user: CurrentUser) -> Json<UserEnvelope> {
    Json(UserEnvelope::new(UserResponse::from(current_user.user)))
}

/// Change the password of the authenticated user
///
/// Every access token issued before the change stops working; the response carries new ones.
#[utoipa::path(
    patch,
    path = "/api/v1/auth/update-password",
    request_body = UpdatePasswordRequest,
    tag = "authentication",
    responses(
        (status = 200, description = "Password changed", body = AuthResponse),
        (status = 400, description = "Invalid input"),
        (status = 401, description = "Current password is wrong"),
    ),
    security(("bearer_auth" = []))
)]
#[tracing::instrument(skip_all, fields(user_id = %abbrev_uuid(&current_user.user.id)))]
pub async fn update_password(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Json(request): Json<UpdatePasswordRequest>,
) -> Result<SessionResponse<AuthResponse>, Error> {
    request.validate_request(&state.config.auth.password)?;

    let mut user = state
        .store
        .find_by_id(current_user.user.id, Fields::WithSecrets)
        .await?
        .ok_or_else(|| unauthenticated("The user belonging to this token no longer exists."))?;

    let hash = user.secrets()?.password_hash.clone();
    if !password::verify_password(&request.current_password, &hash).await? {
        return Err(unauthenticated("Your current password is wrong"));
    }

    let now = Utc::now();
    password::change_password(state.store.as_ref(), &mut user, &request.new_password, &state.config, now).await?;
    info!("Password changed");

    start_session(&state, user, true, StatusCode::OK, now).await
}

/// Email a password reset link
#[utoipa::path(
    post,
    path = "/api/v1/auth/forgot-password",
    request_body = EmailRequest,
    tag = "authentication",
    responses(
        (status = 200, description = "Reset link sent", body = MessageResponse),
        (status = 404, description = "No account with that email"),
        (status = 429, description = "Too many reset requests"),
        (status = 500, description = "The email could not be sent"),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn forgot_password(State(state): State<AppState>, Json(mut request): Json<EmailRequest>) -> Result<Json<MessageResponse>, Error> {
    request.normalize();
    request.validate_request(&state.config.auth.password)?;

    let mut user = state
        .store
        .find_by_email(&request.email, Fields::WithSecrets)
        .await?
        .ok_or_else(no_such_email)?;

    let token = account_tokens::issue_password_reset_token(&mut user, &state.config, Utc::now())?;
    let mut user = state.store.save(&user).await?;

    let link = email::password_reset_link(&state.config.public_url, &token);
    let message = Email::password_reset(Some(&user.name), &link, state.config.auth.tokens.password_reset_expiry);
    if let Err(e) = state.mailer.send(&user.email, Some(&user.name), &message).await {
        account_tokens::clear_password_reset_token(&mut user)?;
        state.store.save(&user).await?;
        return Err(e);
    }

    info!(user_id = %abbrev_uuid(&user.id), "Password reset token sent");
    Ok(Json(MessageResponse::new("Token sent to email!")))
}

/// Set a new password with a reset token and sign in
#[utoipa::path(
    patch,
    path = "/api/v1/auth/reset-password/{token}",
    request_body = ResetPasswordRequest,
    tag = "authentication",
    params(("token" = String, Path, description = "Token from the reset email")),
    responses(
        (status = 200, description = "Password reset and signed in", body = AuthResponse),
        (status = 400, description = "Invalid input, or the token is invalid or expired"),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn reset_password(
    State(state): State<AppState>,
    Path(token): Path<String>,
    Json(request): Json<ResetPasswordRequest>,
) -> Result<SessionResponse<AuthResponse>, Error> {
    request.validate_request(&state.config.auth.password)?;

    let now = Utc::now();
    let user = account_tokens::consume_password_reset(state.store.as_ref(), &token, &request.password, &state.config, now).await?;
    start_session(&state, user, true, StatusCode::OK, now).await
}

/// Confirm an email address
#[utoipa::path(
    get,
    path = "/api/v1/auth/verify-email/{token}",
    tag = "authentication",
    params(("token" = String, Path, description = "Token from the verification email")),
    responses(
        (status = 200, description = "Email verified", body = MessageResponse),
        (status = 400, description = "The token is invalid or expired"),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn verify_email(State(state): State<AppState>, Path(token): Path<String>) -> Result<Json<MessageResponse>, Error> {
    let user = account_tokens::consume_email_verification(state.store.as_ref(), &token, Utc::now()).await?;
    info!(user_id = %abbrev_uuid(&user.id), "Email verified");
    Ok(Json(MessageResponse::new("Email verified successfully!")))
}

/// Send a new verification link
#[utoipa::path(
    post,
    path = "/api/v1/auth/resend-verification",
    request_body = EmailRequest,
    tag = "authentication",
    responses(
        (status = 200, description = "Verification email sent", body = MessageResponse),
        (status = 400, description = "Email is already verified"),
        (status = 404, description = "No account with that email"),
        (status = 500, description = "The email could not be sent"),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn resend_verification(State(state): State<AppState>, Json(mut request): Json<EmailRequest>) -> Result<Json<MessageResponse>, Error> {
    request.normalize();
    request.validate_request(&state.config.auth.password)?;

    let mut user = state
        .store
        .find_by_email(&request.email, Fields::WithSecrets)
        .await?
        .ok_or_else(no_such_email)?;

    if user.is_email_verified {
        return Err(Error::BadRequest {
            message: "Email is already verified".to_string(),
        });
    }

    let token = account_tokens::issue_email_verification_token(&mut user, &state.config, Utc::now())?;
    let mut user = state.store.save(&user).await?;

    let link = email::email_verification_link(&state.config.public_url, &token);
    if let Err(e) = state
        .mailer
        .send(&user.email, Some(&user.name), &Email::verification(Some(&user.name), &link))
        .await
    {
        account_tokens::clear_email_verification_token(&mut user)?;
        state.store.save(&user).await?;
        return Err(e);
    }

    Ok(Json(MessageResponse::new("Verification email sent!")))
}
