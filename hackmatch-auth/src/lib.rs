//! # hackmatch-auth: Authentication service for HackMatch
//!
//! `hackmatch-auth` owns the accounts of the HackMatch team matching platform and everything
//! needed to prove who a caller is: registration, password login, short-lived access tokens,
//! long-lived refresh tokens, logout revocation, temporary lockout after repeated failures, and
//! single-use email tokens for password reset and email verification.
//!
//! ## Architecture
//!
//! The HTTP layer is built on [Axum](https://github.com/tokio-rs/axum). Handlers never talk to a
//! database directly; they go through the [`db::store::CredentialStore`] trait, backed by
//! PostgreSQL in production and by an in-process map for development and tests.
//!
//! ### Request Flow
//!
//! A request under `/api` first passes the per-client rate limiter, then reaches its handler.
//! Protected handlers take a [`auth::current_user::CurrentUser`] extractor, which verifies the
//! bearer token, loads the account, and rejects revoked tokens or tokens older than the last
//! password change. The handler then runs a single flow (for example "log in") against the
//! store and answers with `{status: "success", ...}` or an error body from [`errors::Error`].
//!
//! ### Background Services
//!
//! A token sweep periodically clears expired refresh, reset and verification tokens and deletes
//! expired blacklist entries. It stops on graceful shutdown.
//!
//! ## Getting Started
//!
//! ```no_run
//! use hackmatch_auth::{Application, Config};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load(&hackmatch_auth::config::Args {
//!         config: "config.yaml".to_string(),
//!         validate: false,
//!     })?;
//!     hackmatch_auth::telemetry::init_telemetry(&config)?;
//!
//!     let app = Application::new(config).await?;
//!     app.serve(async { tokio::signal::ctrl_c().await.ok(); }).await
//! }
//! ```
//!
//! ## Modules
//!
//! - [`api`]: HTTP handlers and request/response models
//! - [`auth`]: Password hashing, tokens, lockout and revocation
//! - [`config`]: Configuration loading
//! - [`db`]: The credential store and its PostgreSQL repositories
//! - [`errors`]: Error types and their HTTP rendering
//! - [`telemetry`]: Tracing and OpenTelemetry setup

pub mod api;
pub mod auth;
pub mod config;
pub mod db;
pub mod email;
pub mod errors;
pub mod limits;
mod openapi;
pub mod sweep;
pub mod telemetry;
pub mod types;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    Json, Router,
    http::{self, HeaderValue, Uri, header},
    middleware::from_fn_with_state,
    routing::{get, patch, post},
};
use axum_prometheus::PrometheusMetricLayer;
use bon::Builder;
use sqlx::{PgPool, postgres::PgPoolOptions};
use tokio::net::TcpListener;
use tower_http::{
    cors::CorsLayer,
    set_header::SetResponseHeaderLayer,
    trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::{Level, debug, info, instrument};
use utoipa::OpenApi;
use utoipa_scalar::{Scalar, Servable};

use crate::{
    api::{handlers, models::users::Role},
    auth::password::{self, Argon2Params},
    config::{CorsOrigin, DatabaseConfig},
    db::{
        models::users::{Fields, UserCreateDBRequest},
        store::{CredentialStore, MemoryCredentialStore, PgCredentialStore},
    },
    email::{EmailSender, EmailService},
    errors::Error,
    limits::Limiters,
    openapi::ApiDoc,
};

pub use config::Config;
pub use types::UserId;

/// Application state shared across all request handlers.
///
/// # Example
///
/// ```ignore
/// let state = AppState::builder()
///     .store(Arc::new(MemoryCredentialStore::new()))
///     .config(config)
///     .mailer(Arc::new(EmailService::new(&config)?))
///     .build();
/// ```
#[derive(Clone, Builder)]
pub struct AppState {
    pub store: Arc<dyn CredentialStore>,
    pub config: Config,
    pub mailer: Arc<dyn EmailSender>,
    #[builder(default)]
    pub limiters: Limiters,
    #[builder(default = Instant::now())]
    pub started_at: Instant,
}

/// Get the database migrator
pub fn migrator() -> sqlx::migrate::Migrator {
    sqlx::migrate!("./migrations")
}

/// Open the configured credential store, running migrations for PostgreSQL.
///
/// Returns the pool as well so it can be closed on shutdown.
pub async fn connect_store(config: &Config) -> anyhow::Result<(Arc<dyn CredentialStore>, Option<PgPool>)> {
    match &config.database {
        DatabaseConfig::Memory => {
            info!("Using in-memory credential store; accounts are lost on restart");
            Ok((Arc::new(MemoryCredentialStore::new()), None))
        }
        DatabaseConfig::Postgres { url, pool } => {
            info!("Using PostgreSQL credential store");
            let pg_pool = PgPoolOptions::new()
                .max_connections(pool.max_connections)
                .min_connections(pool.min_connections)
                .acquire_timeout(pool.acquire_timeout)
                .idle_timeout(Some(pool.idle_timeout))
                .connect(url)
                .await?;
            migrator().run(&pg_pool).await?;
            Ok((Arc::new(PgCredentialStore::new(pg_pool.clone())), Some(pg_pool)))
        }
    }
}

/// Create the initial admin user if it doesn't exist.
///
/// Idempotent: an existing account with this email gets the admin role, a verified email and
/// the given password. Returns the account id.
#[instrument(skip_all)]
pub async fn create_initial_admin_user(store: &dyn CredentialStore, email: &str, password: &str, config: &Config) -> anyhow::Result<UserId> {
    let email = email.trim().to_lowercase();

    if let Some(mut existing) = store.find_by_email(&email, Fields::Public).await? {
        password::change_password(store, &mut existing, password, config, chrono::Utc::now()).await?;
        existing.role = Role::Admin;
        existing.is_email_verified = true;
        existing.is_active = true;
        store.save(&existing).await?;
        info!(user_id = %types::abbrev_uuid(&existing.id), "Updated bootstrap admin account");
        return Ok(existing.id);
    }

    let password_hash = password::hash_password(password, Argon2Params::from(&config.auth.password)).await?;
    let created = store
        .create(&UserCreateDBRequest {
            name: "Admin".to_string(),
            email,
            password_hash,
            role: Role::Admin,
            is_email_verified: true,
        })
        .await?;
    info!(user_id = %types::abbrev_uuid(&created.id), "Created bootstrap admin account");
    Ok(created.id)
}

fn create_cors_layer(config: &Config) -> anyhow::Result<CorsLayer> {
    let cors_config = &config.auth.cors;
    let mut origins = Vec::new();
    for origin in &cors_config.allowed_origins {
        let header_value = match origin {
            CorsOrigin::Wildcard => "*".parse::<HeaderValue>()?,
            CorsOrigin::Url(url) => url.as_str().trim_end_matches('/').parse::<HeaderValue>()?,
        };
        origins.push(header_value);
    }

    let mut cors = CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([http::Method::GET, http::Method::POST, http::Method::PATCH, http::Method::OPTIONS])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
        .allow_credentials(cors_config.allow_credentials);

    if let Some(max_age) = cors_config.max_age {
        cors = cors.max_age(std::time::Duration::from_secs(max_age));
    }

    Ok(cors)
}

async fn not_found(uri: Uri) -> Error {
    Error::NotFound {
        message: format!("Can't find {} on this server!", uri.path()),
    }
}

/// Build the application router with all endpoints and middleware.
///
/// - `/api/v1/auth/*` and `/api/v1/admin/*`, behind the generic rate limit, with tighter limits on
///   login and forgot-password
/// - `/api/health`, `/api/health/database` and `/healthz`
/// - OpenAPI JSON at `/api-docs/openapi.json`, rendered at `/docs`
/// - `/internal/metrics` when metrics are enabled
/// - CORS, security headers and request tracing on everything
pub fn build_router(state: AppState) -> anyhow::Result<Router> {
    let limited = |route: axum::routing::MethodRouter<AppState>, limiter: &Option<Arc<limits::RateLimiter>>| match limiter {
        Some(limiter) => route.layer(from_fn_with_state(limiter.clone(), limits::rate_limit)),
        None => route,
    };

    let auth_routes = Router::new()
        .route("/register", post(handlers::auth::register))
        .route("/login", limited(post(handlers::auth::login), &state.limiters.login))
        .route("/logout", post(handlers::auth::logout))
        .route("/refresh-token", post(handlers::auth::refresh_token))
        .route("/me", get(handlers::auth::get_me))
        .route("/update-password", patch(handlers::auth::update_password))
        .route(
            "/forgot-password",
            limited(post(handlers::auth::forgot_password), &state.limiters.password_reset),
        )
        .route("/reset-password/{token}", patch(handlers::auth::reset_password))
        .route("/verify-email/{token}", get(handlers::auth::verify_email))
        .route("/resend-verification", post(handlers::auth::resend_verification));

    let mut api_routes = Router::new()
        .nest("/v1/auth", auth_routes)
        .route("/v1/admin/users/{id}/status", patch(handlers::admin::update_user_status))
        .route("/health", get(handlers::health::health))
        .route("/health/database", get(handlers::health::database_health));

    if let Some(limiter) = &state.limiters.generic {
        api_routes = api_routes.layer(from_fn_with_state(limiter.clone(), limits::rate_limit));
    }

    let mut router = Router::new()
        .route("/healthz", get(|| async { "OK" }))
        .nest("/api", api_routes)
        .with_state(state.clone())
        .route("/api-docs/openapi.json", get(|| async { Json(ApiDoc::openapi()) }))
        .merge(Scalar::with_url("/docs", ApiDoc::openapi()))
        .fallback(not_found);

    if state.config.enable_metrics {
        let (prometheus_layer, metric_handle) = PrometheusMetricLayer::pair();
        router = router
            .route("/internal/metrics", get(move || async move { metric_handle.render() }))
            .layer(prometheus_layer);
    }

    let security_headers = [
        (header::X_CONTENT_TYPE_OPTIONS, "nosniff"),
        (header::X_FRAME_OPTIONS, "DENY"),
        (header::X_XSS_PROTECTION, "1; mode=block"),
        (header::STRICT_TRANSPORT_SECURITY, "max-age=31536000; includeSubDomains"),
        (header::CONTENT_SECURITY_POLICY, "default-src 'self'"),
    ];
    for (name, value) in security_headers {
        router = router.layer(SetResponseHeaderLayer::overriding(name, HeaderValue::from_static(value)));
    }

    let router = router.layer(create_cors_layer(&state.config)?).layer(
        TraceLayer::new_for_http()
            .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
            .on_request(DefaultOnRequest::new().level(Level::INFO))
            .on_response(DefaultOnResponse::new().level(Level::INFO)),
    );

    Ok(router)
}

/// Background tasks running alongside the HTTP server.
///
/// [`shutdown`](BackgroundServices::shutdown) stops them and waits for them to finish. Dropping
/// the struct cancels them through `drop_guard`.
pub struct BackgroundServices {
    background_tasks: Vec<tokio::task::JoinHandle<()>>,
    shutdown_token: tokio_util::sync::CancellationToken,
    // Pub so that we can disarm it if we want to
    pub drop_guard: Option<tokio_util::sync::DropGuard>,
}

impl BackgroundServices {
    /// Gracefully shutdown all background tasks
    pub async fn shutdown(self) {
        self.shutdown_token.cancel();
        for handle in self.background_tasks {
            if let Err(e) = handle.await {
                tracing::error!("Background task failed: {}", e);
            }
        }
    }
}

fn setup_background_services(
    store: Arc<dyn CredentialStore>,
    config: &Config,
    shutdown_token: tokio_util::sync::CancellationToken,
) -> BackgroundServices {
    let drop_guard = shutdown_token.clone().drop_guard();
    let mut background_tasks = Vec::new();

    let sweep_config = &config.background_services.token_sweep;
    if sweep_config.enabled {
        let interval = sweep_config.interval;
        let sweep_shutdown = shutdown_token.clone();
        background_tasks.push(tokio::spawn(async move {
            if let Err(e) = sweep::run_token_sweep(store, interval, sweep_shutdown).await {
                tracing::error!("Token sweep stopped: {:#}", e);
            }
        }));
    } else {
        info!("Token sweep disabled");
    }

    BackgroundServices {
        background_tasks,
        shutdown_token,
        drop_guard: Some(drop_guard),
    }
}

/// The assembled service.
///
/// 1. **Create**: [`Application::new`] opens the store, runs migrations, bootstraps the admin
///    account and starts background services
/// 2. **Serve**: [`Application::serve`] binds the TCP port and handles requests until the
///    shutdown future resolves, then stops background services and closes the pool
pub struct Application {
    router: Router,
    config: Config,
    pool: Option<PgPool>,
    bg_services: BackgroundServices,
}

impl Application {
    /// Create a new application instance with all resources initialized
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        debug!("Starting hackmatch-auth with configuration: {:#?}", config);

        let (store, pool) = connect_store(&config).await?;
        let mailer: Arc<dyn EmailSender> = Arc::new(EmailService::new(&config)?);

        if let (Some(email), Some(admin_password)) = (&config.admin_email, &config.admin_password) {
            create_initial_admin_user(store.as_ref(), email, admin_password, &config).await?;
        }

        let shutdown_token = tokio_util::sync::CancellationToken::new();
        let bg_services = setup_background_services(store.clone(), &config, shutdown_token);

        let app_state = AppState::builder()
            .store(store)
            .config(config.clone())
            .mailer(mailer)
            .limiters(Limiters::new(&config.rate_limits))
            .build();
        let router = build_router(app_state)?;

        Ok(Self {
            router,
            config,
            pool,
            bg_services,
        })
    }

    /// Convert application into a test server (for tests)
    #[cfg(any(test, feature = "test-utils"))]
    pub fn into_test_server(self) -> (axum_test::TestServer, BackgroundServices) {
        let service = self.router.into_make_service_with_connect_info::<SocketAddr>();
        let server = axum_test::TestServer::new(service).expect("Failed to create test server");
        (server, self.bg_services)
    }

    /// Start serving the application
    pub async fn serve<F>(self, shutdown: F) -> anyhow::Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let bind_addr = self.config.bind_address();
        let listener = TcpListener::bind(&bind_addr).await?;
        info!("hackmatch-auth listening on http://{}", bind_addr);

        // Peer addresses feed the per-client rate limits
        axum::serve(listener, self.router.into_make_service_with_connect_info::<SocketAddr>())
            .with_graceful_shutdown(shutdown)
            .await?;

        self.bg_services.shutdown().await;

        if let Some(pool) = self.pool {
            info!("Closing database connections...");
            pool.close().await;
        }

        info!("Shutting down telemetry...");
        telemetry::shutdown_telemetry();

        Ok(())
    }
}
