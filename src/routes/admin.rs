use axum::{extract::State, http::HeaderMap, Extension, Json};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::{
    error::{AppError, AppResult},
    middleware::RequestId,
    routes::AppState,
};

pub const ADMIN_TOKEN_HEADER: &str = "x-admin-token";

#[derive(Debug, Deserialize)]
pub struct EmergencyStopRequest {
    pub enabled: bool,
}

/// Sets or clears the stored emergency-stop flag
///
/// Responds with the effective state, which stays `true` while the stop is
/// also set in configuration.
pub async fn emergency_stop(
    State(state): State<Arc<AppState>>,
    Extension(request_id): Extension<RequestId>,
    headers: HeaderMap,
    Json(request): Json<EmergencyStopRequest>,
) -> AppResult<Json<Value>> {
    let expected = state.admin_token.as_deref().ok_or(AppError::NotFound)?;
    let supplied = headers
        .get(ADMIN_TOKEN_HEADER)
        .and_then(|value| value.to_str().ok());
    if supplied != Some(expected) {
        tracing::warn!(request_id = %request_id, "Rejected emergency-stop change with bad admin token");
        return Err(AppError::Unauthorized);
    }

    let governor = state.pipeline.governor();
    governor.set_emergency_stop(request.enabled).await?;
    let effective = governor.is_emergency_stopped().await?;

    tracing::warn!(
        request_id = %request_id,
        requested = request.enabled,
        effective,
        "Emergency stop updated by admin"
    );

    Ok(Json(json!({ "emergency_stop": effective })))
}
