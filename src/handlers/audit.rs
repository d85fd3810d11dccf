use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    error::Result,
    models::audit::{AuditEntry, AuditFilter},
    state::AppState,
};

/// Query parameters for the audit log listing.
#[derive(Deserialize, Debug)]
pub struct AuditLogsQuery {
    pub user_id: Option<String>,
    /// Substring match on the action name.
    pub action: Option<String>,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    #[serde(default)]
    pub skip: i64,
    #[serde(default = "default_take")]
    pub take: i64,
}

/// Query parameters for security events and statistics.
#[derive(Deserialize, Debug)]
pub struct AuditRangeQuery {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    #[serde(default)]
    pub skip: i64,
    #[serde(default = "default_take")]
    pub take: i64,
}

fn default_take() -> i64 {
    50
}

#[derive(Serialize)]
pub struct AuditLogsResponse {
    pub logs: Vec<AuditEntry>,
    pub total: i64,
}

#[derive(Serialize)]
pub struct ActionCount {
    pub action: String,
    pub count: i64,
}

/// Filtered page of the audit trail, newest first. Admin only.
#[axum::debug_handler]
pub async fn logs(
    State(state): State<AppState>,
    Query(query): Query<AuditLogsQuery>,
) -> Result<Response> {
    let filter = AuditFilter {
        user_id: query.user_id,
        action_contains: query.action,
        start: query.start,
        end: query.end,
        ..AuditFilter::page(query.skip, query.take)
    };

    let (logs, total) = state.audit.logs(&filter).await?;
    Ok((StatusCode::OK, Json(AuditLogsResponse { logs, total })).into_response())
}

/// Security-relevant entries only. Admin only.
#[axum::debug_handler]
pub async fn security_events(
    State(state): State<AppState>,
    Query(query): Query<AuditRangeQuery>,
) -> Result<Response> {
    let events = state
        .audit
        .security_events(query.start, query.end, query.skip, query.take)
        .await?;
    Ok((StatusCode::OK, Json(events)).into_response())
}

/// Per-action counts over an optional time range. Admin only.
#[axum::debug_handler]
pub async fn statistics(
    State(state): State<AppState>,
    Query(query): Query<AuditRangeQuery>,
) -> Result<Response> {
    let counts = state
        .audit
        .statistics(query.start, query.end)
        .await?
        .into_iter()
        .map(|(action, count)| ActionCount { action, count })
        .collect::<Vec<_>>();
    Ok((StatusCode::OK, Json(counts)).into_response())
}
