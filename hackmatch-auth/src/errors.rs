use crate::api::models::users::Role;
use crate::db::errors::DbError;
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use thiserror::Error as ThisError;
use utoipa::ToSchema;

/// Message shown to clients for failures that are not safe to describe
pub const GENERIC_ERROR_MESSAGE: &str = "Something went wrong!";

#[derive(ThisError, Debug)]
pub enum Error {
    /// Authentication required but missing, invalid, revoked or refused
    #[error("Not authenticated")]
    Unauthenticated { message: Option<String> },

    /// User lacks the role required for the operation
    #[error("Insufficient permissions: {required:?} role required")]
    InsufficientPermissions { required: Role },

    /// Request body failed field-level validation
    #[error("Validation failed for {} field(s)", errors.len())]
    Validation { errors: Vec<FieldError> },

    /// Invalid request data or business rule violation
    #[error("{message}")]
    BadRequest { message: String },

    /// Requested resource not found
    #[error("{message}")]
    NotFound { message: String },

    /// Client exceeded a rate limit
    #[error("{message}")]
    TooManyRequests { message: String },

    /// The mail transport refused or failed to deliver a message
    #[error("Failed to deliver email: {reason}")]
    EmailDelivery { reason: String },

    /// Generic internal service error
    #[error("Failed to {operation}")]
    Internal { operation: String },

    /// Database operation error
    #[error(transparent)]
    Database(#[from] DbError),

    /// Unexpected error with full context chain
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// A single rejected request field
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

/// JSON body of every error response
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorBody {
    /// `fail` for client errors, `error` for server errors
    pub status: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<FieldError>,
}

impl Error {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::Unauthenticated { .. } => StatusCode::UNAUTHORIZED,
            Error::InsufficientPermissions { .. } => StatusCode::FORBIDDEN,
            Error::Validation { .. } | Error::BadRequest { .. } => StatusCode::BAD_REQUEST,
            Error::NotFound { .. } => StatusCode::NOT_FOUND,
            Error::TooManyRequests { .. } => StatusCode::TOO_MANY_REQUESTS,
            Error::EmailDelivery { .. } | Error::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Error::Database(db_err) => match db_err {
                DbError::NotFound => StatusCode::NOT_FOUND,
                DbError::UniqueViolation { .. } => StatusCode::BAD_REQUEST,
                DbError::ForeignKeyViolation { .. } => StatusCode::BAD_REQUEST,
                DbError::CheckViolation { .. } => StatusCode::BAD_REQUEST,
                DbError::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Error::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Returns a user-safe error message, without leaking internal implementation details
    pub fn user_message(&self) -> String {
        match self {
            Error::Unauthenticated { message } => message.clone().unwrap_or_else(|| "Not authorized to access this route.".to_string()),
            Error::InsufficientPermissions { .. } => "Access denied. Insufficient permissions.".to_string(),
            Error::Validation { .. } => "Validation failed".to_string(),
            Error::BadRequest { message } | Error::NotFound { message } | Error::TooManyRequests { message } => message.clone(),
            Error::EmailDelivery { .. } => "There was an error sending the email. Try again later!".to_string(),
            Error::Database(db_err) => match db_err {
                DbError::NotFound => "Resource not found".to_string(),
                err @ DbError::UniqueViolation { .. } if err.is_duplicate_email() => "User with this email already exists".to_string(),
                DbError::UniqueViolation { .. } => "Resource already exists".to_string(),
                DbError::ForeignKeyViolation { .. } | DbError::CheckViolation { .. } => "Invalid data provided".to_string(),
                DbError::Other(_) => GENERIC_ERROR_MESSAGE.to_string(),
            },
            Error::Internal { .. } | Error::Other(_) => GENERIC_ERROR_MESSAGE.to_string(),
        }
    }

    fn body(&self) -> ErrorBody {
        let status = if self.status_code().is_server_error() { "error" } else { "fail" };
        let errors = match self {
            Error::Validation { errors } => errors.clone(),
            _ => Vec::new(),
        };

        ErrorBody {
            status: status.to_string(),
            message: self.user_message(),
            errors,
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        // Log full error details for debugging - different log levels based on severity
        match &self {
            Error::Database(DbError::Other(_)) | Error::Internal { .. } | Error::Other(_) => {
                tracing::error!("Internal service error: {:#}", self);
            }
            Error::EmailDelivery { .. } => {
                tracing::error!("Email delivery error: {}", self);
            }
            Error::Database(_) => {
                tracing::warn!("Database constraint error: {}", self);
            }
            Error::Unauthenticated { .. } | Error::InsufficientPermissions { .. } => {
                tracing::info!("Authorization error: {} ({})", self, self.user_message());
            }
            Error::TooManyRequests { .. } => {
                tracing::warn!("Rate limit exceeded: {}", self);
            }
            Error::Validation { .. } | Error::BadRequest { .. } | Error::NotFound { .. } => {
                tracing::debug!("Client error: {}", self);
            }
        }

        (self.status_code(), Json(self.body())).into_response()
    }
}

/// The camelCase name a struct field has in request bodies
fn wire_name(field: &str) -> String {
    let mut name = String::with_capacity(field.len());
    let mut upper = false;
    for c in field.chars() {
        if c == '_' {
            upper = true;
        } else if upper {
            name.extend(c.to_uppercase());
            upper = false;
        } else {
            name.push(c);
        }
    }
    name
}

impl From<validator::ValidationErrors> for Error {
    fn from(errors: validator::ValidationErrors) -> Self {
        let mut fields: Vec<FieldError> = errors
            .field_errors()
            .into_iter()
            .flat_map(|(field, errs)| {
                let field = wire_name(&field);
                errs.iter().map(move |err| FieldError {
                    field: field.clone(),
                    message: err
                        .message
                        .as_ref()
                        .map(|m| m.to_string())
                        .unwrap_or_else(|| format!("Invalid value ({})", err.code)),
                })
            })
            .collect();
        fields.sort_by(|a, b| a.field.cmp(&b.field));

        Error::Validation { errors: fields }
    }
}

/// Convert from String errors (e.g., from external functions)
impl From<String> for Error {
    fn from(msg: String) -> Self {
        Error::Internal { operation: msg }
    }
}

/// Type alias for service operation results
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_errors_use_fail_status() {
        let body = Error::BadRequest {
            message: "Token is invalid or has expired".to_string(),
        }
        .body();
        assert_eq!(body.status, "fail");
        assert_eq!(body.message, "Token is invalid or has expired");
        assert!(body.errors.is_empty());
    }

    #[test]
    fn test_internal_errors_are_collapsed() {
        let err = Error::Internal {
            operation: "connect to mail relay at 10.0.0.4".to_string(),
        };
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);

        let body = err.body();
        assert_eq!(body.status, "error");
        assert_eq!(body.message, GENERIC_ERROR_MESSAGE);
        assert!(!body.message.contains("10.0.0.4"));

        let other = Error::Other(anyhow::anyhow!("secret detail"));
        assert_eq!(other.user_message(), GENERIC_ERROR_MESSAGE);
    }

    #[test]
    fn test_email_delivery_is_operational() {
        let err = Error::EmailDelivery {
            reason: "connection refused".to_string(),
        };
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.user_message(), "There was an error sending the email. Try again later!");
        assert_eq!(err.body().status, "error");
    }

    #[test]
    fn test_duplicate_email_maps_to_bad_request() {
        let err = Error::Database(DbError::UniqueViolation {
            constraint: Some("users_email_unique".to_string()),
            table: Some("users".to_string()),
            message: "duplicate key".to_string(),
        });
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(err.user_message(), "User with this email already exists");
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(Error::Unauthenticated { message: None }.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            Error::InsufficientPermissions { required: Role::Admin }.status_code(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            Error::NotFound {
                message: "There is no user with that email address".to_string()
            }
            .status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            Error::TooManyRequests {
                message: "slow down".to_string()
            }
            .status_code(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(Error::Database(DbError::NotFound).status_code(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_validation_errors_are_listed() {
        let err = Error::Validation {
            errors: vec![FieldError {
                field: "email".to_string(),
                message: "Please provide a valid email address".to_string(),
            }],
        };
        let body = err.body();
        assert_eq!(body.status, "fail");
        assert_eq!(body.message, "Validation failed");
        assert_eq!(body.errors.len(), 1);
        assert_eq!(body.errors[0].field, "email");
    }

    #[test]
    fn test_from_validator_errors_sorted_by_field() {
        let mut errors = validator::ValidationErrors::new();
        errors.add(
            "password",
            validator::ValidationError::new("length").with_message("Password must be at least 8 characters long".into()),
        );
        errors.add(
            "email",
            validator::ValidationError::new("email").with_message("Please provide a valid email address".into()),
        );

        match Error::from(errors) {
            Error::Validation { errors } => {
                assert_eq!(errors.len(), 2);
                assert_eq!(errors[0].field, "email");
                assert_eq!(errors[1].field, "password");
                assert_eq!(errors[1].message, "Password must be at least 8 characters long");
            }
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn test_field_names_use_request_casing() {
        assert_eq!(wire_name("email"), "email");
        assert_eq!(wire_name("confirm_password"), "confirmPassword");
        assert_eq!(wire_name("confirm_new_password"), "confirmNewPassword");

        let mut errors = validator::ValidationErrors::new();
        errors.add(
            "new_password",
            validator::ValidationError::new("length").with_message("Password must be at least 8 characters long".into()),
        );
        errors.add(
            "current_password",
            validator::ValidationError::new("length").with_message("Current password is required".into()),
        );

        match Error::from(errors) {
            Error::Validation { errors } => {
                let names: Vec<&str> = errors.iter().map(|e| e.field.as_str()).collect();
                assert_eq!(names, vec!["currentPassword", "newPassword"]);
            }
            other => panic!("expected validation error, got {other:?}"),
        }
    }
}
