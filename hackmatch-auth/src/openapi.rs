//! OpenAPI documentation for the authentication API.

use utoipa::{
    Modify, OpenApi,
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
};

use crate::api;
use crate::errors::{ErrorBody, FieldError};

/// Bearer access token scheme
struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.security_schemes.insert(
                "bearer_auth".to_string(),
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .description(Some(
                            "Access token from login, registration, refresh or password reset:\n\n\
                            ```\nAuthorization: Bearer <accessToken>\n```",
                        ))
                        .build(),
                ),
            );
        }
    }
}

#[derive(OpenApi)]
#[openapi(
    info(
        title = "HackMatch Auth API",
        description = "Accounts, sessions and one-time email tokens for HackMatch."
    ),
    modifiers(&SecurityAddon),
    paths(
        api::handlers::auth::register,
        api::handlers::auth::login,
        api::handlers::auth::logout,
        api::handlers::auth::refresh_token,
        api::handlers::auth::get_me,
        api::handlers::auth::update_password,
        api::handlers::auth::forgot_password,
        api::handlers::auth::reset_password,
        api::handlers::auth::verify_email,
        api::handlers::auth::resend_verification,
        api::handlers::admin::update_user_status,
        api::handlers::health::health,
        api::handlers::health::database_health,
    ),
    components(schemas(ErrorBody, FieldError)),
    tags(
        (name = "authentication", description = "Registration, sessions, password and email flows"),
        (name = "admin", description = "Account administration"),
        (name = "health", description = "Service health"),
    )
)]
pub struct ApiDoc;
