use axum::{extract::State, http::StatusCode};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::{AppState, api::extract::Json};

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    /// Seconds since the process started serving
    pub uptime: f64,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct DatabaseStatus {
    pub connected: bool,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct DatabaseHealthResponse {
    /// `OK` or `ERROR`
    pub status: String,
    pub database: DatabaseStatus,
    pub timestamp: DateTime<Utc>,
}

/// Service liveness and uptime
#[utoipa::path(
    get,
    path = "/api/health",
    tag = "health",
    responses((status = 200, description = "Server is running", body = HealthResponse))
)]
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "OK".to_string(),
        message: "Server is running".to_string(),
        timestamp: Utc::now(),
        uptime: state.started_at.elapsed().as_secs_f64(),
    })
}

/// Credential store connectivity
#[utoipa::path(
    get,
    path = "/api/health/database",
    tag = "health",
    responses(
        (status = 200, description = "Store reachable", body = DatabaseHealthResponse),
        (status = 503, description = "Store unreachable", body = DatabaseHealthResponse),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn database_health(State(state): State<AppState>) -> (StatusCode, Json<DatabaseHealthResponse>) {
    let connected = match state.store.ping().await {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!("Database health check failed: {}", e);
            false
        }
    };

    let status = if connected { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (
        status,
        Json(DatabaseHealthResponse {
            status: if connected { "OK" } else { "ERROR" }.to_string(),
            database: DatabaseStatus { connected },
            timestamp: Utc::now(),
        }),
    )
}
