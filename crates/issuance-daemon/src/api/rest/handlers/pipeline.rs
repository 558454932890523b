//! Manual pipeline trigger

use crate::api::rest::state::AppState;
use crate::error::ApiResult;
use axum::{extract::State, Json};
use issuance_engine::ScanReport;
use serde::Serialize;

/// Scan result
#[derive(Debug, Serialize)]
pub struct PipelineRunResponse {
    pub examined: usize,
    pub issued: usize,
    pub skipped: usize,
    pub unconfigured: usize,
    pub stopped: usize,
    pub superseded: usize,
}

impl From<ScanReport> for PipelineRunResponse {
    fn from(report: ScanReport) -> Self {
        Self {
            examined: report.examined,
            issued: report.issued,
            skipped: report.skipped,
            unconfigured: report.unconfigured,
            stopped: report.stopped,
            superseded: report.superseded,
        }
    }
}

/// Run one issuance scan now
pub async fn run_pipeline(State(state): State<AppState>) -> ApiResult<Json<PipelineRunResponse>> {
    tracing::info!("Manual issuance scan requested");
    let report = state.pipeline.scan_once().await?;
    Ok(Json(report.into()))
}
