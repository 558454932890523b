//! Health and status handlers

use crate::api::rest::state::AppState;
use crate::error::ApiResult;
use axum::{extract::State, Json};
use issuance_types::WorkflowStatus;
use serde::Serialize;
use std::collections::BTreeMap;

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthCheckResponse {
    pub status: String,
    pub version: String,
    pub uptime: String,
}

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> Json<HealthCheckResponse> {
    Json(HealthCheckResponse {
        status: "healthy".to_string(),
        version: state.version.clone(),
        uptime: state.uptime(),
    })
}

/// Daemon status response
#[derive(Debug, Serialize)]
pub struct DaemonStatusResponse {
    pub status: String,
    pub version: String,
    pub uptime: String,
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub stats: DaemonStats,
}

/// Daemon statistics
#[derive(Debug, Serialize)]
pub struct DaemonStats {
    pub workflows_by_status: BTreeMap<String, usize>,
    pub credits_issued: usize,
    pub treasury_accounts: usize,
    pub treasury_accounts_below_threshold: usize,
}

/// Daemon status endpoint
pub async fn daemon_status(State(state): State<AppState>) -> ApiResult<Json<DaemonStatusResponse>> {
    let store = state.engine.store();
    let workflows = store
        .list_workflows_by_status(&WorkflowStatus::ALL, usize::MAX)
        .await?;
    let credits = store.list_credits().await?;
    let treasuries = store.list_treasuries().await?;

    let mut workflows_by_status = BTreeMap::new();
    for record in &workflows {
        *workflows_by_status
            .entry(record.current_status.to_string())
            .or_insert(0) += 1;
    }

    Ok(Json(DaemonStatusResponse {
        status: "healthy".to_string(),
        version: state.version.clone(),
        uptime: state.uptime(),
        started_at: state.started_at,
        stats: DaemonStats {
            workflows_by_status,
            credits_issued: credits.len(),
            treasury_accounts: treasuries.len(),
            treasury_accounts_below_threshold: treasuries
                .iter()
                .filter(|t| t.is_below_threshold())
                .count(),
        },
    }))
}
