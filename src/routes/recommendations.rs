use axum::{
    extract::{ConnectInfo, State},
    http::HeaderMap,
    Extension, Json,
};
use serde::Deserialize;
use std::{net::SocketAddr, sync::Arc};

use crate::{
    error::AppResult,
    middleware::RequestId,
    models::{Mode, RecommendationResponse},
    routes::AppState,
};

const FORWARDED_FOR_HEADER: &str = "x-forwarded-for";

#[derive(Debug, Deserialize)]
pub struct RecommendationRequest {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub num_recommendations: Option<i64>,
}

/// Handler for mood-based recommendations
pub async fn recommend_mood(
    State(state): State<Arc<AppState>>,
    Extension(request_id): Extension<RequestId>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    Json(request): Json<RecommendationRequest>,
) -> AppResult<Json<RecommendationResponse>> {
    recommend(Mode::Mood, &state, &request_id, connect_info, &headers, request).await
}

/// Handler for criteria-based recommendations
pub async fn recommend_search(
    State(state): State<Arc<AppState>>,
    Extension(request_id): Extension<RequestId>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    Json(request): Json<RecommendationRequest>,
) -> AppResult<Json<RecommendationResponse>> {
    recommend(Mode::Search, &state, &request_id, connect_info, &headers, request).await
}

async fn recommend(
    mode: Mode,
    state: &AppState,
    request_id: &RequestId,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    headers: &HeaderMap,
    request: RecommendationRequest,
) -> AppResult<Json<RecommendationResponse>> {
    let client = client_id(
        headers,
        connect_info.map(|ConnectInfo(addr)| addr),
        state.trust_forwarded_for,
    );
    let scope = state.scope_policy.scope_for(&client);

    tracing::info!(
        request_id = %request_id,
        mode = %mode,
        scope = %scope,
        text_len = request.text.chars().count(),
        "Processing recommendation request"
    );

    let response = state
        .pipeline
        .recommend(mode, &request.text, request.num_recommendations, &scope)
        .await?;

    tracing::info!(
        request_id = %request_id,
        total_found = response.metadata.total_found,
        "Recommendation request completed"
    );

    Ok(Json(response))
}

/// Caller address for rate scoping
///
/// When the deployment trusts its proxy, the last `x-forwarded-for` hop (the
/// one that proxy appended); otherwise the header is ignored. Falls back to
/// the peer address, then `unknown`.
pub fn client_id(headers: &HeaderMap, peer: Option<SocketAddr>, trust_forwarded_for: bool) -> String {
    let forwarded = if trust_forwarded_for {
        headers
            .get(FORWARDED_FOR_HEADER)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.rsplit(',').next())
            .map(str::trim)
            .filter(|hop| !hop.is_empty())
            .map(str::to_string)
    } else {
        None
    };

    forwarded
        .or_else(|| peer.map(|addr| addr.ip().to_string()))
        .unwrap_or_else(|| "unknown".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn forwarded(value: &'static str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(FORWARDED_FOR_HEADER, HeaderValue::from_static(value));
        headers
    }

    #[test]
    fn test_forwarded_for_ignored_unless_trusted() {
        let headers = forwarded("198.51.100.7");
        let peer: SocketAddr = "192.0.2.44:4000".parse().unwrap();
        assert_eq!(client_id(&headers, Some(peer), false), "192.0.2.44");
    }

    #[test]
    fn test_trusted_proxy_hop_wins_over_spoofed_hops() {
        // The caller sent a fake first hop; the proxy appended the real address
        let headers = forwarded("1.2.3.4, 198.51.100.7");
        let peer: SocketAddr = "10.0.0.2:4000".parse().unwrap();
        assert_eq!(client_id(&headers, Some(peer), true), "198.51.100.7");
    }

    #[test]
    fn test_peer_address_fallback() {
        let peer: SocketAddr = "192.0.2.10:5555".parse().unwrap();
        assert_eq!(client_id(&HeaderMap::new(), Some(peer), true), "192.0.2.10");
        assert_eq!(client_id(&forwarded(" "), Some(peer), true), "192.0.2.10");
        assert_eq!(client_id(&HeaderMap::new(), None, false), "unknown");
    }
}
