//! Project submission and status handlers

use crate::api::rest::state::AppState;
use crate::error::{ApiError, ApiResult};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use issuance_engine::SubmitProject;
use issuance_types::{IssuedCredit, Metadata, ProjectProfile, ProjectRef, WorkflowStatusView};
use serde::Deserialize;

/// Submit project request
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitProjectRequest {
    pub project_ref: String,
    pub policy_id: String,
    pub policy_tag: String,
    pub project: ProjectProfile,
    #[serde(default)]
    pub metadata: Metadata,
}

/// Start tracking a project and submit it to the verifier
pub async fn submit_project(
    State(state): State<AppState>,
    Json(request): Json<SubmitProjectRequest>,
) -> ApiResult<(StatusCode, Json<WorkflowStatusView>)> {
    if request.project_ref.trim().is_empty() {
        return Err(ApiError::BadRequest("projectRef must not be empty".into()));
    }

    let record = state
        .engine
        .submit_project(SubmitProject {
            project_ref: ProjectRef::new(request.project_ref),
            policy_id: request.policy_id,
            policy_tag: request.policy_tag,
            project: request.project,
            metadata: request.metadata,
        })
        .await?;

    Ok((StatusCode::CREATED, Json(WorkflowStatusView::from(&record))))
}

/// Status view of a project's current (or latest) workflow
pub async fn get_workflow(
    State(state): State<AppState>,
    Path(project_ref): Path<String>,
) -> ApiResult<Json<WorkflowStatusView>> {
    let view = state
        .engine
        .status_view(&ProjectRef::new(&project_ref))
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("No workflow for project {}", project_ref)))?;

    Ok(Json(view))
}

/// Credit issued for a project
pub async fn get_credit(
    State(state): State<AppState>,
    Path(project_ref): Path<String>,
) -> ApiResult<Json<IssuedCredit>> {
    let credit = state
        .engine
        .store()
        .find_credit_by_project(&ProjectRef::new(&project_ref))
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("No credit issued for project {}", project_ref)))?;

    Ok(Json(credit))
}
