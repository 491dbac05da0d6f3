use axum::{extract::State, Json};
use std::sync::Arc;

use crate::{error::AppResult, routes::AppState, services::governor::GovernorStatus};

/// Governor snapshot: emergency flag, rate limits, and this month's spend
pub async fn status(State(state): State<Arc<AppState>>) -> AppResult<Json<GovernorStatus>> {
    let status = state.pipeline.governor().status().await?;
    Ok(Json(status))
}
