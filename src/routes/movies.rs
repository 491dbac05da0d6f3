use axum::{
    extract::{Path, Query, State},
    Json,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::{error::AppResult, routes::AppState, services::pipeline::MAX_POPULAR_PAGE};

#[derive(Debug, Deserialize)]
pub struct PopularParams {
    #[serde(default)]
    pub page: Option<i64>,
}

/// Full details for one movie; 404 when the catalog does not know the id
pub async fn movie_details(
    State(state): State<Arc<AppState>>,
    Path(id): Path<u64>,
) -> AppResult<Json<Value>> {
    let movie = state.pipeline.movie(id).await?;
    Ok(Json(json!({ "movie": movie, "timestamp": Utc::now() })))
}

pub async fn popular_movies(
    State(state): State<Arc<AppState>>,
    Query(params): Query<PopularParams>,
) -> AppResult<Json<Value>> {
    let requested = params
        .page
        .unwrap_or(1)
        .clamp(1, i64::from(MAX_POPULAR_PAGE));
    let page = u32::try_from(requested).unwrap_or(1);

    let (page, movies) = state.pipeline.popular(page).await?;
    tracing::debug!(page, results = movies.len(), "Served popular movies");

    Ok(Json(json!({ "movies": movies, "page": page, "timestamp": Utc::now() })))
}
