//! Test utilities for integration testing (available with `test-utils` feature).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum_test::TestServer;

use crate::{
    AppState,
    api::models::users::Role,
    auth::password::{self, Argon2Params},
    config::{Config, RateLimitConfig, RateLimitsConfig},
    db::{
        models::users::{UserCreateDBRequest, UserDBResponse},
        store::{CredentialStore, MemoryCredentialStore, PgCredentialStore},
    },
    email::{Email, EmailSender},
    errors::Error,
};

pub fn create_test_config() -> Config {
    let unlimited = RateLimitConfig {
        max_requests: 0,
        window: Duration::from_secs(60),
    };

    let mut config = Config {
        host: "127.0.0.1".to_string(),
        port: 0,
        secret_key: Some("test-secret-key-for-testing-only".to_string()),
        rate_limits: RateLimitsConfig {
            trust_forwarded_for: false,
            generic: unlimited.clone(),
            login: unlimited.clone(),
            password_reset: unlimited,
        },
        enable_metrics: false,
        enable_otel_export: false,
        ..Default::default()
    };
    // Cheap hashing keeps the suite fast
    config.auth.password.argon2_memory_kib = 128;
    config.auth.password.argon2_iterations = 1;
    config.auth.password.argon2_parallelism = 1;
    config.background_services.token_sweep.enabled = false;
    config
}

/// An email recorded by [`RecordingMailer`]
#[derive(Debug, Clone)]
pub struct SentEmail {
    pub to: String,
    pub email: Email,
}

/// Mailer that keeps messages in memory and can be told to fail
#[derive(Debug, Default)]
pub struct RecordingMailer {
    sent: Mutex<Vec<SentEmail>>,
    failing: AtomicBool,
}

impl RecordingMailer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every following send fail (or succeed again)
    pub fn fail(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn messages(&self) -> Vec<SentEmail> {
        self.sent.lock().expect("mailer lock poisoned").clone()
    }

    /// The token from the link in the most recent message
    pub fn last_token(&self) -> Option<String> {
        let last = self.messages().pop()?;
        ["/reset-password/", "/verify-email/"].iter().find_map(|marker| {
            let start = last.email.body.find(marker)? + marker.len();
            let token: String = last.email.body[start..]
                .chars()
                .take_while(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
                .collect();
            (!token.is_empty()).then_some(token)
        })
    }
}

#[async_trait::async_trait]
impl EmailSender for RecordingMailer {
    async fn send(&self, to_email: &str, _to_name: Option<&str>, email: &Email) -> Result<(), Error> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(Error::EmailDelivery {
                reason: "recording mailer set to fail".to_string(),
            });
        }
        self.sent.lock().expect("mailer lock poisoned").push(SentEmail {
            to: to_email.to_string(),
            email: email.clone(),
        });
        Ok(())
    }
}

pub fn create_test_state_with_store(config: Config, store: Arc<dyn CredentialStore>) -> (AppState, Arc<RecordingMailer>) {
    let mailer = Arc::new(RecordingMailer::new());
    let state = AppState::builder().store(store).config(config).mailer(mailer.clone()).build();
    (state, mailer)
}

pub fn create_test_state_with_config(config: Config) -> (AppState, Arc<RecordingMailer>) {
    create_test_state_with_store(config, Arc::new(MemoryCredentialStore::new()))
}

pub fn create_test_state() -> (AppState, Arc<RecordingMailer>) {
    create_test_state_with_config(create_test_config())
}

/// The full router over an in-memory store
pub fn create_test_server_with_config(config: Config) -> (TestServer, AppState, Arc<RecordingMailer>) {
    let (state, mailer) = create_test_state_with_config(config);
    let router = crate::build_router(state.clone()).expect("Failed to build router");
    let server = TestServer::new(router).expect("Failed to create test server");
    (server, state, mailer)
}

/// The full router over the PostgreSQL store
pub fn create_pg_test_server(pool: sqlx::PgPool) -> (TestServer, AppState, Arc<RecordingMailer>) {
    let (state, mailer) = create_test_state_with_store(create_test_config(), Arc::new(PgCredentialStore::new(pool)));
    let router = crate::build_router(state.clone()).expect("Failed to build router");
    let server = TestServer::new(router).expect("Failed to create test server");
    (server, state, mailer)
}

pub fn create_test_server() -> (TestServer, AppState, Arc<RecordingMailer>) {
    create_test_server_with_config(create_test_config())
}

/// Create an account directly in the store. The returned record carries its secrets.
pub async fn create_user(state: &AppState, email: &str, password: &str, role: Role) -> UserDBResponse {
    let password_hash = password::hash_password(password, Argon2Params::from(&state.config.auth.password))
        .await
        .expect("Failed to hash password");
    let name = email.split('@').next().unwrap_or("user").to_string();

    state
        .store
        .create(&UserCreateDBRequest {
            name,
            email: email.to_string(),
            password_hash,
            role,
            is_email_verified: false,
        })
        .await
        .expect("Failed to create test user")
}
