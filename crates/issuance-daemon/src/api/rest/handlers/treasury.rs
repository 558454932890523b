//! Treasury handlers

use crate::api::rest::state::AppState;
use crate::error::ApiResult;
use axum::{extract::State, Json};
use issuance_types::TreasuryAccount;

/// List treasury accounts with their last balance and collections.
/// Signing keys are never serialized.
pub async fn list_treasury(State(state): State<AppState>) -> ApiResult<Json<Vec<TreasuryAccount>>> {
    let accounts = state.engine.store().list_treasuries().await?;
    Ok(Json(accounts))
}
