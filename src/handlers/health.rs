use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::state::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub database: &'static str,
    pub timestamp: DateTime<Utc>,
}

/// Liveness and database reachability probe.
#[axum::debug_handler]
pub async fn health(State(state): State<AppState>) -> Response {
    let database = match state.db.get().await {
        Ok(_) => "up",
        Err(err) => {
            tracing::error!(error = %err, "❌ Health check: database unreachable");
            "down"
        }
    };

    let status_code = if database == "up" {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let response = HealthResponse {
        status: if database == "up" { "ok" } else { "degraded" },
        database,
        timestamp: Utc::now(),
    };

    (status_code, Json(response)).into_response()
}
