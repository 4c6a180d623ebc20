//! Request and response bodies of the authentication endpoints.
//!
//! Request bodies are validated with `validator` before any handler logic runs. Password rules
//! depend on configuration, so every body that carries a new password is checked through
//! [`ValidateRequest::validate_request`], which merges the derived checks with the policy.

use axum::{
    Json,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::{Validate, ValidationError, ValidationErrors};

use crate::api::models::users::UserResponse;
use crate::auth::password;
use crate::config::PasswordConfig;
use crate::errors::Error;

const SUCCESS: &str = "success";

fn validate_name(name: &str) -> Result<(), ValidationError> {
    if name.chars().all(|c| c.is_alphabetic() || c == ' ') {
        Ok(())
    } else {
        Err(ValidationError::new("name_chars").with_message("Name can only contain letters and spaces".into()))
    }
}

fn finish(result: Result<(), ValidationErrors>, extra: Vec<(&'static str, ValidationError)>) -> Result<(), Error> {
    let mut errors = result.err().unwrap_or_default();
    for (field, error) in extra {
        errors.add(field, error);
    }

    if errors.is_empty() { Ok(()) } else { Err(errors.into()) }
}

fn policy_errors(field: &'static str, password: &str, config: &PasswordConfig) -> Vec<(&'static str, ValidationError)> {
    match password::check_policy(password, config) {
        Ok(()) => Vec::new(),
        Err(error) => vec![(field, error)],
    }
}

fn mismatch(message: &'static str) -> ValidationError {
    ValidationError::new("must_match").with_message(message.into())
}

/// Normalize then validate a request body
pub trait ValidateRequest {
    /// Trim names and lowercase emails. Passwords are left untouched.
    fn normalize(&mut self) {}

    fn validate_request(&self, config: &PasswordConfig) -> Result<(), Error>;
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    #[validate(
        length(min = 2, max = 50, message = "Name must be between 2 and 50 characters"),
        custom(function = "validate_name")
    )]
    pub name: String,
    #[validate(email(message = "Please provide a valid email address"))]
    pub email: String,
    pub password: String,
    #[validate(must_match(other = "password", message = "Passwords do not match"))]
    pub confirm_password: String,
}

impl ValidateRequest for RegisterRequest {
    fn normalize(&mut self) {
        self.name = self.name.trim().to_string();
        self.email = self.email.trim().to_lowercase();
    }

    fn validate_request(&self, config: &PasswordConfig) -> Result<(), Error> {
        finish(self.validate(), policy_errors("password", &self.password, config))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct LoginRequest {
    #[validate(email(message = "Please provide a valid email address"))]
    pub email: String,
    #[validate(length(min = 1, message = "Password is required"))]
    pub password: String,
    #[serde(default)]
    pub remember_me: bool,
}

impl ValidateRequest for LoginRequest {
    fn normalize(&mut self) {
        self.email = self.email.trim().to_lowercase();
    }

    fn validate_request(&self, _config: &PasswordConfig) -> Result<(), Error> {
        finish(self.validate(), Vec::new())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RefreshTokenRequest {
    /// Used when the refresh token cookie is absent
    pub refresh_token: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UpdatePasswordRequest {
    #[validate(length(min = 1, message = "Current password is required"))]
    pub current_password: String,
    pub new_password: String,
    pub confirm_new_password: Option<String>,
}

impl ValidateRequest for UpdatePasswordRequest {
    fn validate_request(&self, config: &PasswordConfig) -> Result<(), Error> {
        let mut extra = policy_errors("new_password", &self.new_password, config);
        if self
            .confirm_new_password
            .as_ref()
            .is_some_and(|confirm| confirm != &self.new_password)
        {
            extra.push(("confirm_new_password", mismatch("New passwords do not match")));
        }
        finish(self.validate(), extra)
    }
}

/// Body of forgot-password and resend-verification
#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct EmailRequest {
    #[validate(email(message = "Please provide a valid email address"))]
    pub email: String,
}

impl ValidateRequest for EmailRequest {
    fn normalize(&mut self) {
        self.email = self.email.trim().to_lowercase();
    }

    fn validate_request(&self, _config: &PasswordConfig) -> Result<(), Error> {
        finish(self.validate(), Vec::new())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ResetPasswordRequest {
    pub password: String,
    #[validate(must_match(other = "password", message = "Passwords do not match"))]
    pub confirm_password: String,
}

impl ValidateRequest for ResetPasswordRequest {
    fn validate_request(&self, config: &PasswordConfig) -> Result<(), Error> {
        finish(self.validate(), policy_errors("password", &self.password, config))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UserData {
    pub user: UserResponse,
}

/// Issued tokens plus the account they belong to
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AuthResponse {
    pub status: String,
    pub access_token: String,
    /// Also set as an HttpOnly cookie
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    pub data: UserData,
}

impl AuthResponse {
    pub fn new(access_token: String, refresh_token: Option<String>, user: UserResponse) -> Self {
        Self {
            status: SUCCESS.to_string(),
            access_token,
            refresh_token,
            data: UserData { user },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UserEnvelope {
    pub status: String,
    pub data: UserData,
}

impl UserEnvelope {
    pub fn new(user: UserResponse) -> Self {
        Self {
            status: SUCCESS.to_string(),
            data: UserData { user },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct MessageResponse {
    pub status: String,
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            status: SUCCESS.to_string(),
            message: message.into(),
        }
    }
}

/// A JSON body plus an optional `Set-Cookie` header carrying the refresh token
pub struct SessionResponse<T> {
    pub status: StatusCode,
    pub body: T,
    pub cookie: Option<String>,
}

impl<T> SessionResponse<T> {
    pub fn new(status: StatusCode, body: T, cookie: Option<String>) -> Self {
        Self { status, body, cookie }
    }
}

impl<T: Serialize> IntoResponse for SessionResponse<T> {
    fn into_response(self) -> Response {
        match self.cookie {
            Some(cookie) => (self.status, [(header::SET_COOKIE, cookie)], Json(self.body)).into_response(),
            None => (self.status, Json(self.body)).into_response(),
        }
    }
}
