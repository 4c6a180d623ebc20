//! Request extractors whose rejections render as the standard error body.
//!
//! axum's own `Json` and `Path` reject with plain-text 4xx responses that quote serde. These
//! wrappers turn every rejection into an [`Error`], so malformed input gets a
//! `{status: "fail", message}` body with status 400 like any other client error.

use axum::{
    extract::{
        FromRequest, FromRequestParts, Request,
        rejection::{JsonRejection, PathRejection},
    },
    http::request::Parts,
    response::{IntoResponse, Response},
};
use serde::{Serialize, de::DeserializeOwned};

use crate::errors::{Error, FieldError};

const MISSING_FIELD: &str = "missing field `";

/// JSON request body or response. Rejections become [`Error`].
#[derive(Debug, Clone, Copy, Default)]
pub struct Json<T>(pub T);

impl<T, S> FromRequest<S> for Json<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = Error;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match axum::Json::<T>::from_request(req, state).await {
            Ok(axum::Json(value)) => Ok(Json(value)),
            Err(rejection) => Err(rejection.into()),
        }
    }
}

impl<T: Serialize> IntoResponse for Json<T> {
    fn into_response(self) -> Response {
        axum::Json(self.0).into_response()
    }
}

/// Path parameters. Rejections become [`Error`].
#[derive(Debug, Clone, Copy, Default)]
pub struct Path<T>(pub T);

impl<T, S> FromRequestParts<S> for Path<T>
where
    T: DeserializeOwned + Send,
    S: Send + Sync,
{
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        match axum::extract::Path::<T>::from_request_parts(parts, state).await {
            Ok(axum::extract::Path(value)) => Ok(Path(value)),
            Err(rejection) => Err(rejection.into()),
        }
    }
}

/// The field serde reported as missing, if that was the failure
fn missing_field(detail: &str) -> Option<&str> {
    let start = detail.find(MISSING_FIELD)? + MISSING_FIELD.len();
    let len = detail[start..].find('`')?;
    Some(&detail[start..start + len])
}

impl From<JsonRejection> for Error {
    fn from(rejection: JsonRejection) -> Self {
        tracing::debug!("Rejected request body: {}", rejection.body_text());
        match rejection {
            JsonRejection::JsonDataError(err) => match missing_field(&err.body_text()) {
                Some(field) => Error::Validation {
                    errors: vec![FieldError {
                        field: field.to_string(),
                        message: "This field is required".to_string(),
                    }],
                },
                None => Error::BadRequest {
                    message: "Request body has fields of the wrong type".to_string(),
                },
            },
            JsonRejection::JsonSyntaxError(_) => Error::BadRequest {
                message: "Request body is not valid JSON".to_string(),
            },
            JsonRejection::MissingJsonContentType(_) => Error::BadRequest {
                message: "Expected a request with `Content-Type: application/json`".to_string(),
            },
            _ => Error::BadRequest {
                message: "Failed to read request body".to_string(),
            },
        }
    }
}

impl From<PathRejection> for Error {
    fn from(rejection: PathRejection) -> Self {
        match rejection {
            PathRejection::FailedToDeserializePathParams(err) => {
                tracing::debug!("Rejected path parameters: {}", err.body_text());
                Error::BadRequest {
                    message: "Invalid path parameter".to_string(),
                }
            }
            other => Error::Internal {
                operation: format!("extract path parameters: {}", other.body_text()),
            },
        }
    }
}
